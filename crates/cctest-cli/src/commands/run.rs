//! `cctest run` — Run a shell workload and report its exit code.

use cctest_common::config::CctestConfig;
use cctest_docker::docker::Docker;
use cctest_docker::scenario::{self, WorkloadCase};
use clap::Args;

use crate::output::{BOLD, GREEN, RESET};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Script passed to `sh -c` inside the container.
    pub workload: String,

    /// Fail unless `docker run` exits with this code.
    #[arg(long)]
    pub expect: Option<i32>,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if docker cannot be run, the container is left behind,
/// or the exit code differs from `--expect`.
pub fn execute(args: RunArgs, config: &CctestConfig) -> anyhow::Result<()> {
    let docker = Docker::new(config.docker.clone());

    if let Some(expected) = args.expect {
        scenario::check_workload(&docker, &WorkloadCase::new(args.workload.as_str(), expected))?;
        eprintln!("  {GREEN}{BOLD}{:?}{RESET} exited with {expected}", args.workload);
        return Ok(());
    }

    let exit_code = scenario::run_workload(&docker, &args.workload)?;
    eprintln!("  {BOLD}{:?}{RESET} exited with {exit_code}", args.workload);
    Ok(())
}
