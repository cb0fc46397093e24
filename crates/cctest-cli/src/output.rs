//! Formatted output helpers for CLI commands.
//!
//! Status lines go to stderr with ANSI colors; machine-readable output is
//! printed to stdout by the commands that offer it.

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const RED: &str = "\x1b[31m";
pub const YELLOW: &str = "\x1b[33m";
pub const RESET: &str = "\x1b[0m";

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Renders a check result as a colored marker followed by `label`.
#[must_use]
pub fn status_line(passed: bool, label: &str) -> String {
    if passed {
        format!("  {GREEN}✓{RESET} {label}")
    } else {
        format!("  {RED}✗{RESET} {label}")
    }
}

/// Prints the tool banner to stderr.
pub fn print_header() {
    eprintln!();
    eprintln!("  {BOLD}cctest{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!();
}
