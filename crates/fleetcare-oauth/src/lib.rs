//! Fleetcare OAuth - vendor token acquisition for the coverage sync engine.
//!
//! One fixed flow: a signed client assertion is exchanged for a short-lived
//! bearer token via an OAuth 2.0 client-credentials grant against the
//! vendor's token endpoint. The tenant/client identity is extracted from
//! the assertion's own payload; the scope is chosen from the API base URL
//! (education vs business variant).
//!
//! Tokens are cached per tenant key for the lifetime of one sync run in a
//! [`TokenCache`] owned by the orchestrator, never a process-wide
//! singleton, so runs stay independently testable and re-entrant.

#![forbid(unsafe_code)]

mod assertion;
mod cache;
mod client;
mod error;

pub use assertion::*;
pub use cache::*;
pub use client::*;
pub use error::*;
