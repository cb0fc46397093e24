//! Invocation of external utilities.
//!
//! Every host-side effect in this workspace goes through a [`CommandRunner`].
//! A non-zero exit is reported as data, not as an error, so callers decide
//! whether it means "slot busy", "unbind refused" or a hard failure.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use cctest_common::error::{CctestError, Result};

/// A program invocation: binary, arguments, and an optional stdin script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Program name, resolved on `PATH`, or an absolute path.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Text written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl CommandRequest {
    /// Starts a request for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a path argument.
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feeds `script` to the child's stdin.
    #[must_use]
    pub fn stdin(mut self, script: impl Into<String>) -> Self {
        self.stdin = Some(script.into());
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code, `-1` when the process was killed by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns whether the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Passes a successful output through, or converts a non-zero exit into
    /// [`CctestError::CommandFailure`] carrying the verbatim stderr.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit code is non-zero.
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(CctestError::CommandFailure {
            program: program.to_string(),
            exit_code: self.exit_code,
            stderr: self.stderr,
        })
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }
}

/// Runs external programs to completion.
///
/// Implementations block until the child exits; no timeout is applied.
pub trait CommandRunner {
    /// Runs `request` and captures its output.
    ///
    /// # Errors
    ///
    /// Returns an error only if the program cannot be found or spawned, or
    /// its output cannot be collected. A non-zero exit is not an error.
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        (**self).run(request)
    }
}

/// Runs commands as real child processes of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Creates a runner that spawns real processes.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        let program = which::which(&request.program).map_err(|_| CctestError::NotFound {
            kind: "executable",
            id: request.program.clone(),
        })?;
        tracing::debug!(program = %program.display(), args = ?request.args, "running command");

        let stdin = if request.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut child = Command::new(&program)
            .args(&request.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CctestError::Io {
                path: program.clone(),
                source: e,
            })?;

        if let (Some(script), Some(mut pipe)) = (&request.stdin, child.stdin.take()) {
            // The child may exit before reading everything; its stderr says why.
            if let Err(e) = pipe.write_all(script.as_bytes()) {
                tracing::debug!(program = %program.display(), error = %e, "stdin closed early");
            }
        }

        let output = child.wait_with_output().map_err(|e| CctestError::Io {
            path: program.clone(),
            source: e,
        })?;
        let output = CommandOutput::from(output);
        tracing::debug!(
            program = %program.display(),
            exit_code = output.exit_code,
            "command finished"
        );
        Ok(output)
    }
}

/// Returns whether `program` resolves to an executable on `PATH`.
#[must_use]
pub fn is_installed(program: &str) -> bool {
    which::which(program).is_ok()
}
