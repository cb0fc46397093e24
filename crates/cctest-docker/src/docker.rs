//! Thin driver over the `docker` client binary.

use cctest_common::config::DockerConfig;
use cctest_common::error::{CctestError, Result};
use cctest_common::types::ContainerName;
use cctest_loop::command::{CommandOutput, CommandRequest, CommandRunner, SystemRunner};

use crate::options::RunOptions;

/// Runs `docker` subcommands through a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct Docker<R = SystemRunner> {
    config: DockerConfig,
    runner: R,
}

impl Docker<SystemRunner> {
    /// Creates a driver for the real `docker` client.
    #[must_use]
    pub fn new(config: DockerConfig) -> Self {
        Self::with_runner(config, SystemRunner::new())
    }
}

impl<R: CommandRunner> Docker<R> {
    /// Creates a driver that runs commands through `runner`.
    #[must_use]
    pub fn with_runner(config: DockerConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &DockerConfig {
        &self.config
    }

    /// Returns whether the client binary can be found.
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.config.binary).is_ok()
    }

    /// Options for `name` pre-filled with the configured image and runtime.
    #[must_use]
    pub fn options(&self, name: ContainerName) -> RunOptions {
        self.options_for(name, &self.config.image)
    }

    /// Options for `name` running `image` with the configured runtime.
    #[must_use]
    pub fn options_for(&self, name: ContainerName, image: &str) -> RunOptions {
        RunOptions::new(name, image).runtime(self.config.runtime.clone())
    }

    /// Runs a container. A non-zero exit is returned, not raised: it usually
    /// is the workload's own exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be run at all.
    pub fn run(&self, options: &RunOptions) -> Result<CommandOutput> {
        tracing::info!(name = %options.name(), devices = options.devices().len(), "docker run");
        self.docker(options.to_args())
    }

    /// Force-removes a container; returns whether `docker rm` succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be run at all.
    pub fn remove(&self, name: &ContainerName) -> Result<bool> {
        let output = self.docker(["rm".to_string(), "-f".to_string(), name.to_string()])?;
        if !output.success() {
            tracing::debug!(name = %name, stderr = %output.stderr.trim(), "docker rm failed");
        }
        Ok(output.success())
    }

    /// Returns whether a container with exactly this name exists, in any state.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::CommandFailure`] if `docker ps` fails.
    pub fn exists(&self, name: &ContainerName) -> Result<bool> {
        let stdout = self.ps(name, "{{.Names}}")?;
        Ok(stdout.lines().any(|line| line.trim() == name.as_str()))
    }

    /// Returns the first word of the container status, e.g. `Up` or `Exited`.
    ///
    /// # Errors
    ///
    /// Returns [`CctestError::NotFound`] if no such container exists, or
    /// [`CctestError::CommandFailure`] if `docker ps` fails.
    pub fn status(&self, name: &ContainerName) -> Result<String> {
        let stdout = self.ps(name, "{{.Status}}")?;
        stdout
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| CctestError::NotFound {
                kind: "container",
                id: name.to_string(),
            })
    }

    /// Runs `docker top <name> [ps_args...]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be run at all.
    pub fn top(&self, name: &ContainerName, ps_args: &[String]) -> Result<CommandOutput> {
        let mut args = vec!["top".to_string(), name.to_string()];
        args.extend(ps_args.iter().cloned());
        self.docker(args)
    }

    fn ps(&self, name: &ContainerName, format: &str) -> Result<String> {
        let output = self
            .docker([
                "ps".to_string(),
                "-a".to_string(),
                "--filter".to_string(),
                format!("name=^/{name}$"),
                "--format".to_string(),
                format.to_string(),
            ])?
            .check(&self.program())?;
        Ok(output.stdout)
    }

    fn docker<I>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = String>,
    {
        self.runner
            .run(&CommandRequest::new(self.program()).args(args))
    }

    fn program(&self) -> String {
        self.config.binary.display().to_string()
    }
}
