//! # cctest-loop
//!
//! Loop device provisioning for block-device hot-plug checks.
//!
//! This crate provides:
//! - **Command runner**: a seam over external utilities (`dd`, `fdisk`,
//!   `losetup`) with captured output and typed failures.
//! - **Slot pool**: first-free allocation over a finite set of loop slots.
//! - **Allocation lock**: an advisory host-wide lock around slot claims.
//! - **Provisioner**: create, bind, unbind and delete backing images.
//! - **Teardown**: best-effort cleanup that reports every failure.
//!
//! Creating loop devices requires root; [`privilege::ensure_root`] checks
//! that precondition but the provisioner itself never does.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod command;
pub mod lock;
pub mod pool;
pub mod privilege;
pub mod provisioner;
pub mod teardown;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
