//! Container checks run through the docker client.
//!
//! Each check generates its own container name, verifies one behavior of the
//! runtime, and makes sure the container is gone afterwards.

use cctest_common::error::{CctestError, Result};
use cctest_common::types::ContainerName;
use cctest_loop::command::CommandRunner;

use crate::docker::Docker;
use crate::identity::IdentityExpectation;

/// A shell workload and the exit code `docker run` must propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadCase {
    /// Script passed to `sh -c`.
    pub workload: String,
    /// Expected exit code of `docker run`.
    pub expected_exit_code: i32,
}

impl WorkloadCase {
    /// Creates a case.
    #[must_use]
    pub fn new(workload: impl Into<String>, expected_exit_code: i32) -> Self {
        Self {
            workload: workload.into(),
            expected_exit_code,
        }
    }
}

/// Workloads whose exit codes must pass through the runtime unchanged.
#[must_use]
pub fn workload_cases() -> Vec<WorkloadCase> {
    vec![
        WorkloadCase::new("true", 0),
        WorkloadCase::new("false", 1),
        WorkloadCase::new("exit 0", 0),
        WorkloadCase::new("exit 1", 1),
        WorkloadCase::new("exit 15", 15),
        WorkloadCase::new("exit 123", 123),
    ]
}

/// How a long-lived container is started in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachedMode {
    /// `-di`: detached, stdin kept open.
    Interactive,
    /// `-dit`: detached, stdin kept open, with a TTY.
    InteractiveTty,
}

impl DetachedMode {
    /// Both modes.
    pub const ALL: [Self; 2] = [Self::Interactive, Self::InteractiveTty];

    /// Status word `docker ps` must report for the started container.
    #[must_use]
    pub const fn expected_status(self) -> &'static str {
        "Up"
    }
}

/// Runs `sh -c <workload>` under `--rm` and returns the exit code of
/// `docker run`.
///
/// # Errors
///
/// Returns an error if docker cannot be run, or
/// [`CctestError::Verification`] if the container survives its exit.
pub fn run_workload<R: CommandRunner>(docker: &Docker<R>, workload: &str) -> Result<i32> {
    let name = ContainerName::random();
    let output = docker.run(&docker.options(name.clone()).remove(true).shell(workload))?;
    tracing::debug!(name = %name, workload, exit_code = output.exit_code, "workload finished");
    ensure_gone(docker, &name)?;
    Ok(output.exit_code)
}

/// Checks that a workload's exit code is propagated.
///
/// # Errors
///
/// Returns [`CctestError::Verification`] on a different exit code.
pub fn check_workload<R: CommandRunner>(docker: &Docker<R>, case: &WorkloadCase) -> Result<()> {
    let exit_code = run_workload(docker, &case.workload)?;
    if exit_code != case.expected_exit_code {
        return Err(CctestError::Verification {
            message: format!(
                "workload {:?} exited with {exit_code}, expected {}",
                case.workload, case.expected_exit_code
            ),
        });
    }
    Ok(())
}

/// Starts `sh` in the background and checks the container is up.
///
/// The container is always removed afterwards, and must then be gone.
///
/// # Errors
///
/// Returns [`CctestError::Verification`] if the run fails, the status is
/// wrong, or the container is missing or cannot be removed.
pub fn check_detached<R: CommandRunner>(docker: &Docker<R>, mode: DetachedMode) -> Result<()> {
    let name = ContainerName::random();
    let options = docker
        .options(name.clone())
        .detach(true)
        .interactive(true)
        .tty(mode == DetachedMode::InteractiveTty)
        .command(["sh"]);

    with_removal(docker, &name, || {
        let output = docker.run(&options)?;
        expect_success(&name, "docker run", &output)?;

        let status = docker.status(&name)?;
        if status != mode.expected_status() {
            return Err(CctestError::Verification {
                message: format!(
                    "container {name} has status {status:?}, expected {:?}",
                    mode.expected_status()
                ),
            });
        }
        if !docker.exists(&name)? {
            return Err(CctestError::Verification {
                message: format!("container {name} is not listed"),
            });
        }
        Ok(())
    })
}

/// Runs `sleep 10` in the background and checks `docker top` lists it.
///
/// # Errors
///
/// Returns [`CctestError::Verification`] if either command fails or the
/// workload is missing from the process list.
pub fn check_top<R: CommandRunner>(docker: &Docker<R>, ps_args: &[String]) -> Result<()> {
    const WORKLOAD: &str = "sleep 10";

    let name = ContainerName::random();
    let options = docker.options(name.clone()).detach(true).shell(WORKLOAD);

    with_removal(docker, &name, || {
        let output = docker.run(&options)?;
        expect_success(&name, "docker run", &output)?;

        let top = docker.top(&name, ps_args)?;
        expect_success(&name, "docker top", &top)?;
        if !top.stdout.contains(WORKLOAD) {
            return Err(CctestError::Verification {
                message: format!("docker top {name} does not list {WORKLOAD:?}: {}", top.stdout),
            });
        }
        Ok(())
    })
}

/// Runs `id` as the expected user and checks the reported identity.
///
/// # Errors
///
/// Returns [`CctestError::Verification`] on any mismatch, or if the
/// container survives its exit.
pub fn check_identity<R: CommandRunner>(
    docker: &Docker<R>,
    case: &IdentityExpectation,
) -> Result<()> {
    let name = ContainerName::random();
    let mut options = docker
        .options_for(name.clone(), &docker.config().identity_image)
        .remove(true)
        .user(case.spec.raw());
    for group in &case.groups {
        options = options.group_add(group.clone());
    }
    let output = docker.run(&options.command(["id"]))?;
    tracing::debug!(
        name = %name,
        case = %case,
        exit_code = output.exit_code,
        "identity run finished"
    );

    let verdict = case.check(&output);
    ensure_gone(docker, &name)?;
    verdict
}

/// Fails if `name` is still known to docker.
///
/// # Errors
///
/// Returns [`CctestError::Verification`] if the container exists.
pub fn ensure_gone<R: CommandRunner>(docker: &Docker<R>, name: &ContainerName) -> Result<()> {
    if docker.exists(name)? {
        return Err(CctestError::Verification {
            message: format!("container {name} still exists"),
        });
    }
    Ok(())
}

fn expect_success(
    name: &ContainerName,
    what: &str,
    output: &cctest_loop::command::CommandOutput,
) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    Err(CctestError::Verification {
        message: format!(
            "{what} for {name} exited with {}: {}",
            output.exit_code,
            output.stderr.trim()
        ),
    })
}

/// Runs `body`, then removes the container whatever happened. The body's
/// error wins over a removal error.
fn with_removal<R, F>(docker: &Docker<R>, name: &ContainerName, body: F) -> Result<()>
where
    R: CommandRunner,
    F: FnOnce() -> Result<()>,
{
    let outcome = body();
    let removal = remove_and_confirm(docker, name);
    outcome.and(removal)
}

fn remove_and_confirm<R: CommandRunner>(docker: &Docker<R>, name: &ContainerName) -> Result<()> {
    if !docker.remove(name)? {
        return Err(CctestError::Verification {
            message: format!("docker rm -f {name} failed"),
        });
    }
    ensure_gone(docker, name)
}
