//! `cctest check` — Report whether this host can run the checks.

use cctest_common::config::CctestConfig;
use cctest_docker::docker::Docker;
use cctest_loop::{command, privilege};
use clap::Args;

use crate::output::{self, BOLD, DIM, RESET, YELLOW};

/// Host tools the loop provisioner shells out to.
const LOOP_TOOLS: [&str; 3] = ["dd", "fdisk", "losetup"];

/// Arguments for the `check` command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Exit with an error if anything is missing.
    #[arg(long)]
    pub strict: bool,
}

/// Executes the `check` command.
///
/// # Errors
///
/// Returns an error in `--strict` mode when a requirement is not met.
pub fn execute(args: CheckArgs, config: &CctestConfig) -> anyhow::Result<()> {
    output::print_header();

    let mut missing = Vec::new();

    let root = privilege::is_root();
    eprintln!("{}", output::status_line(root, "running as root"));
    if !root {
        missing.push("root".to_string());
    }

    for tool in LOOP_TOOLS {
        let found = command::is_installed(tool);
        eprintln!("{}", output::status_line(found, tool));
        if !found {
            missing.push(tool.to_string());
        }
    }

    let docker = Docker::new(config.docker.clone());
    let binary = config.docker.binary.display().to_string();
    let available = docker.is_available();
    eprintln!("{}", output::status_line(available, &binary));
    if !available {
        missing.push(binary);
    }

    let loop_cfg = &config.loop_devices;
    let image_bytes = u64::from(loop_cfg.image_size_mib) * 1024 * 1024;
    eprintln!();
    eprintln!(
        "  {DIM}Loop devices:{RESET} {}0..{}  {DIM}images:{RESET} {} each",
        loop_cfg.device_prefix,
        loop_cfg.max_tries.saturating_sub(1),
        output::format_bytes(image_bytes)
    );
    eprintln!(
        "  {DIM}Runtime:{RESET} {}  {DIM}image:{RESET} {}",
        config.docker.runtime.as_deref().unwrap_or("daemon default"),
        config.docker.image
    );
    eprintln!(
        "  {DIM}Allocation lock:{RESET} {}",
        loop_cfg
            .lock_file
            .as_ref()
            .map_or_else(|| "disabled".to_string(), |p| p.display().to_string())
    );

    if missing.is_empty() {
        eprintln!();
        eprintln!("  {BOLD}Host is ready.{RESET}");
        return Ok(());
    }

    eprintln!();
    eprintln!("  {YELLOW}Missing:{RESET} {}", missing.join(", "));
    if args.strict {
        anyhow::bail!("host is missing {} requirement(s)", missing.len());
    }
    Ok(())
}
