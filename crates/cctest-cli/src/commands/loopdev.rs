//! `cctest loop` — Create or destroy loop-backed block devices.

use std::path::PathBuf;

use cctest_common::config::CctestConfig;
use cctest_common::types::ProvisionedDevice;
use cctest_loop::privilege;
use cctest_loop::provisioner::LoopProvisioner;
use clap::{Args, Subcommand};

use crate::output::{BOLD, DIM, GREEN, RESET};

/// Arguments for the `loop` command.
#[derive(Args, Debug)]
pub struct LoopArgs {
    /// Action to perform.
    #[command(subcommand)]
    pub action: LoopAction,
}

/// `loop` subcommands.
#[derive(Subcommand, Debug)]
pub enum LoopAction {
    /// Create backing images and bind them to free loop devices.
    Create(CreateArgs),
    /// Detach loop devices and delete their backing images.
    Destroy(DestroyArgs),
}

/// Arguments for `loop create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Number of devices to create.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,

    /// Print the created pairs as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `loop destroy`.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Loop device to detach (repeatable).
    #[arg(long = "device")]
    pub devices: Vec<PathBuf>,

    /// Backing image to delete (repeatable).
    #[arg(long = "image")]
    pub images: Vec<PathBuf>,
}

/// Executes the `loop` command.
///
/// # Errors
///
/// Returns an error if the caller is not root, or if any device cannot be
/// created or released.
pub fn execute(args: LoopArgs, config: &CctestConfig) -> anyhow::Result<()> {
    privilege::ensure_root()?;
    let provisioner = LoopProvisioner::new(config.loop_devices.clone());
    match args.action {
        LoopAction::Create(create) => execute_create(&create, &provisioner),
        LoopAction::Destroy(destroy) => execute_destroy(&destroy, &provisioner),
    }
}

fn execute_create(args: &CreateArgs, provisioner: &LoopProvisioner) -> anyhow::Result<()> {
    let devices = provisioner
        .create(args.count)
        .map_err(|err| provisioner.roll_back(err))?;

    if args.json {
        print_json(&devices)?;
        return Ok(());
    }

    eprintln!("  {GREEN}{BOLD}Created {}{RESET} loop device(s):", devices.len());
    for device in &devices {
        eprintln!(
            "    {GREEN}●{RESET} {BOLD}{}{RESET} {DIM}{}{RESET}",
            device.device().display(),
            device.image_path().display()
        );
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_json(devices: &[ProvisionedDevice]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(devices)?);
    Ok(())
}

fn execute_destroy(args: &DestroyArgs, provisioner: &LoopProvisioner) -> anyhow::Result<()> {
    if args.devices.is_empty() && args.images.is_empty() {
        anyhow::bail!("nothing to destroy: pass --device and/or --image");
    }

    let report = provisioner.release(&args.devices, &args.images);
    for device in &report.unbound {
        eprintln!("  {GREEN}Detached{RESET} {}", device.display());
    }
    for image in &report.removed {
        eprintln!("  {GREEN}Removed{RESET} {}", image.display());
    }
    for failure in &report.failures {
        tracing::error!(error = %failure, "release failed");
    }
    report.into_result()?;
    Ok(())
}
