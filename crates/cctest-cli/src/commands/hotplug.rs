//! `cctest hotplug` — Attach loop devices to a container and verify them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cctest_common::config::CctestConfig;
use cctest_common::types::ProvisionedDevice;
use cctest_docker::docker::Docker;
use cctest_docker::hotplug::{self, HotplugReport};
use cctest_loop::privilege;
use cctest_loop::provisioner::LoopProvisioner;
use clap::Args;

use crate::output::{self, BOLD, DIM, GREEN, RESET};

/// Arguments for the `hotplug` command.
#[derive(Args, Debug)]
pub struct HotplugArgs {
    /// Number of devices to attach; defaults to `hotplug_devices` from the
    /// configuration.
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Keep the devices bound until Ctrl+C before tearing them down.
    #[arg(long)]
    pub hold: bool,
}

/// Executes the `hotplug` command.
///
/// # Errors
///
/// Returns an error if the caller is not root, provisioning fails, a device
/// is not visible inside the container, or teardown is incomplete.
pub fn execute(args: HotplugArgs, config: &CctestConfig) -> anyhow::Result<()> {
    let count = args.count.unwrap_or(config.hotplug_devices);
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }
    privilege::ensure_root()?;

    let start = Instant::now();
    output::print_header();

    let provisioner = LoopProvisioner::new(config.loop_devices.clone());
    let docker = Docker::new(config.docker.clone());
    let hold = args.hold;

    let report = hotplug::verify_hotplug_with(&provisioner, &docker, count, |devices| {
        if hold {
            wait_for_release(devices);
        }
    })?;

    print_report(&report, start);
    let _ = report.into_result()?;
    eprintln!();
    eprintln!("  {GREEN}{BOLD}All devices attached and released.{RESET}");
    Ok(())
}

fn print_report(report: &HotplugReport, start: Instant) {
    eprintln!(
        "  {BOLD}{}{RESET} device(s) attached to {BOLD}{}{RESET} in {:.1}s",
        report.devices.len(),
        report.container,
        start.elapsed().as_secs_f64()
    );
    for device in &report.devices {
        eprintln!(
            "{} {DIM}{}{RESET}",
            output::status_line(report.attached(), &device.device().display().to_string()),
            device.image_path().display()
        );
    }
    if !report.output.stderr.trim().is_empty() {
        eprintln!("  {DIM}{}{RESET}", report.output.stderr.trim());
    }
    eprintln!(
        "{}",
        output::status_line(!report.container_left_behind, "container removed")
    );
    eprintln!(
        "{}",
        output::status_line(
            report.teardown.is_clean(),
            &format!(
                "{} unbound, {} image(s) removed",
                report.teardown.unbound.len(),
                report.teardown.removed.len()
            )
        )
    );
}

fn wait_for_release(devices: &[ProvisionedDevice]) {
    eprintln!();
    eprintln!(
        "  Holding {} device(s). Press {BOLD}Ctrl+C{RESET} to release them...",
        devices.len()
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        tracing::warn!(error = %e, "failed to set Ctrl+C handler, releasing now");
        return;
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(250));
    }
    eprintln!();
    eprintln!("  Releasing devices...");
}
