//! Container-side checks for a Clear-Containers-compatible runtime.
//!
//! Everything here drives the `docker` client as an opaque command: the
//! runtime under test is selected by the daemon configuration (or by
//! `--runtime`) and is never linked against.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod docker;
pub mod hotplug;
pub mod identity;
pub mod options;
pub mod scenario;
