//! Fleetcare core - shared types for the device coverage sync engine.
//!
//! This crate holds everything the other workspace members agree on:
//!
//! - **Records**: [`CoverageRecord`], [`DeviceSnapshot`], [`CoverageEntry`],
//!   and the derived [`CoverageStatus`] classification.
//! - **Errors**: the [`SyncError`] taxonomy shared across the engine.
//! - **Configuration**: the cascading per-tenant credential resolution
//!   ([`CredentialResolver`]) over a pluggable [`CredentialSource`].
//! - **Ports**: the [`DeviceInventory`] trait the host implements to tell
//!   the engine which devices exist.

#![forbid(unsafe_code)]

mod config;
mod error;
mod inventory;
mod record;

pub use config::*;
pub use error::*;
pub use inventory::*;
pub use record::*;
