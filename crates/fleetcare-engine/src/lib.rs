//! Fleetcare engine - the device coverage sync engine.
//!
//! The orchestrator drives, per device: credential resolution, token
//! acquisition (cached per tenant for the run), moving-window rate
//! admission, the two dependent vendor calls, record reconciliation, and
//! primary-plan recomputation. Devices run strictly sequentially, because
//! the rate budget is global to the run and the HTTP calls are the
//! bottleneck.
//!
//! Entry points: [`SyncEngine::sync_one`] for a single device (also the
//! unit the fleet loop repeats) and [`SyncEngine::run`] for the fleet.

#![forbid(unsafe_code)]

mod engine;
mod fetch;
mod progress;
mod reseller;

pub use engine::*;
pub use fetch::*;
pub use progress::*;
pub use reseller::*;
