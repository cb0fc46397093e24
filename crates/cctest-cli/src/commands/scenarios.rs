//! `cctest scenarios` — Run every container check and summarize.

use std::time::Instant;

use cctest_common::config::CctestConfig;
use cctest_common::error::Result;
use cctest_docker::docker::Docker;
use cctest_docker::hotplug;
use cctest_docker::identity::identity_cases;
use cctest_docker::scenario::{self, DetachedMode};
use cctest_loop::command::CommandRunner;
use cctest_loop::privilege;
use cctest_loop::provisioner::LoopProvisioner;
use clap::Args;

use crate::output::{self, BOLD, DIM, GREEN, RED, RESET, YELLOW};

/// Arguments for the `scenarios` command.
#[derive(Args, Debug)]
pub struct ScenariosArgs {
    /// Skip the user and group checks.
    #[arg(long)]
    pub skip_identity: bool,

    /// Skip block device hot-plug.
    #[arg(long)]
    pub skip_hotplug: bool,
}

/// Outcome of one named check.
#[derive(Debug)]
struct Outcome {
    name: String,
    error: Option<String>,
}

impl Outcome {
    fn from_result(name: String, result: Result<()>) -> Self {
        Self {
            name,
            error: result.err().map(|e| e.to_string()),
        }
    }
}

/// Executes the `scenarios` command.
///
/// # Errors
///
/// Returns an error if any check fails.
pub fn execute(args: ScenariosArgs, config: &CctestConfig) -> anyhow::Result<()> {
    let start = Instant::now();
    output::print_header();

    let docker = Docker::new(config.docker.clone());
    let mut outcomes = container_checks(&docker);

    if !args.skip_identity {
        outcomes.extend(identity_cases().iter().map(|case| {
            Outcome::from_result(
                format!("identity {case}"),
                scenario::check_identity(&docker, case),
            )
        }));
    }

    if !args.skip_hotplug {
        if privilege::is_root() {
            let provisioner = LoopProvisioner::new(config.loop_devices.clone());
            let result = hotplug::verify_hotplug(&provisioner, &docker, config.hotplug_devices)
                .and_then(hotplug::HotplugReport::into_result)
                .map(|_| ());
            outcomes.push(Outcome::from_result(
                format!("hot-plug {} block device(s)", config.hotplug_devices),
                result,
            ));
        } else {
            eprintln!("  {YELLOW}Skipping hot-plug:{RESET} requires root");
        }
    }

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    for outcome in &outcomes {
        eprintln!("{}", output::status_line(outcome.error.is_none(), &outcome.name));
        if let Some(error) = &outcome.error {
            eprintln!("      {DIM}{error}{RESET}");
        }
    }

    eprintln!();
    let passed = outcomes.len() - failed;
    let elapsed = start.elapsed().as_secs_f64();
    if failed == 0 {
        eprintln!("  {GREEN}{BOLD}{passed} passed{RESET} in {elapsed:.1}s");
        return Ok(());
    }
    eprintln!("  {RED}{BOLD}{failed} failed{RESET}, {passed} passed in {elapsed:.1}s");
    anyhow::bail!("{failed} scenario(s) failed")
}

fn container_checks<R: CommandRunner>(docker: &Docker<R>) -> Vec<Outcome> {
    let mut outcomes: Vec<Outcome> = scenario::workload_cases()
        .iter()
        .map(|case| {
            Outcome::from_result(
                format!("exit code of {:?}", case.workload),
                scenario::check_workload(docker, case),
            )
        })
        .collect();

    outcomes.extend(DetachedMode::ALL.iter().map(|mode| {
        Outcome::from_result(
            format!("background container {mode:?}"),
            scenario::check_detached(docker, *mode),
        )
    }));

    outcomes.push(Outcome::from_result(
        "docker top".to_string(),
        scenario::check_top(docker, &[]),
    ));
    outcomes
}
