//! CLI command definitions and dispatch.

pub mod check;
pub mod hotplug;
pub mod loopdev;
pub mod run;
pub mod scenarios;

use std::path::PathBuf;

use anyhow::Context;
use cctest_common::config::CctestConfig;
use clap::{Parser, Subcommand, ValueEnum};

/// cctest — loop device hot-plug and container runtime checks.
#[derive(Parser, Debug)]
#[command(name = "cctest", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// YAML configuration file.
    #[arg(long, global = true, env = cctest_common::constants::CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Docker client binary.
    #[arg(long, global = true, env = "CCTEST_DOCKER")]
    pub docker: Option<PathBuf>,

    /// Image used for workload and hot-plug containers.
    #[arg(long, global = true, env = "CCTEST_IMAGE")]
    pub image: Option<String>,

    /// OCI runtime passed to `docker run --runtime`.
    #[arg(long, global = true, env = "CCTEST_RUNTIME")]
    pub runtime: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report whether this host can run the checks.
    Check(check::CheckArgs),
    /// Create or destroy loop-backed block devices.
    Loop(loopdev::LoopArgs),
    /// Hot-plug loop devices into a container and verify they are visible.
    Hotplug(hotplug::HotplugArgs),
    /// Run a shell workload and report its exit code.
    Run(run::RunArgs),
    /// Run every container scenario.
    Scenarios(scenarios::ScenariosArgs),
}

impl Cli {
    /// Loads the configuration file, if any, and applies flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is invalid.
    pub fn resolve_config(&self) -> anyhow::Result<CctestConfig> {
        let mut config = match &self.config {
            Some(path) => CctestConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => CctestConfig::default(),
        };
        if let Some(docker) = &self.docker {
            config.docker.binary.clone_from(docker);
        }
        if let Some(image) = &self.image {
            config.docker.image.clone_from(image);
        }
        if self.runtime.is_some() {
            config.docker.runtime.clone_from(&self.runtime);
        }
        config.validate()?;
        tracing::debug!(?config, "configuration resolved");
        Ok(config)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    match cli.command {
        Command::Check(args) => check::execute(args, &config),
        Command::Loop(args) => loopdev::execute(args, &config),
        Command::Hotplug(args) => hotplug::execute(args, &config),
        Command::Run(args) => run::execute(args, &config),
        Command::Scenarios(args) => scenarios::execute(args, &config),
    }
}
