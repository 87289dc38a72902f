//! Error taxonomy for the coverage sync engine.

use std::time::Duration;

/// Classified per-device (and per-tenant) sync failures.
///
/// Per-device errors never abort a run; the orchestrator maps each variant
/// to a skip or an error in the run summary. The two expected steady-state
/// conditions ([`SyncError::ConfigurationMissing`] and
/// [`SyncError::NotFound`]) are deliberately kept out of error logs.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No vendor credentials resolvable for this device. Many devices
    /// legitimately lack tenant config; this is a skip, not an error.
    #[error("vendor API not configured for this device")]
    ConfigurationMissing,

    /// Malformed client assertion. Fatal for that tenant's whole run.
    #[error("invalid client assertion: {0}")]
    InvalidAssertion(String),

    /// Vendor signaled 429; retryable within the per-device bound.
    #[error("rate limited by vendor, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Wait requested by the vendor (or the default fallback).
        retry_after: Duration,
    },

    /// The vendor does not know the device. Terminal skip.
    #[error("device not found in Apple Business/School Manager")]
    NotFound,

    /// Non-200, non-429 vendor response. Terminal skip for the device.
    #[error("vendor error HTTP {status}: {message}")]
    VendorError {
        /// HTTP status, or 0 when the failure had no status line.
        status: u16,
        /// Vendor error detail when the body carried a structured list.
        message: String,
    },

    /// Transport-level failure that survived the single in-flight retry.
    #[error("transport failure: {0}")]
    TransientTransport(String),

    /// The record store dropped the connection past the reconnect bound.
    #[error("record store connection lost: {0}")]
    StoreConnectionLost(String),

    /// Anything unclassified. Logged, counted as an error, run continues.
    #[error("{0}")]
    Unknown(String),
}

impl SyncError {
    /// The two skip reasons excluded from noisy error logs.
    #[must_use]
    pub const fn is_expected_skip(&self) -> bool {
        matches!(self, Self::ConfigurationMissing | Self::NotFound)
    }

    /// Whether a bounded retry of the same operation can help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::TransientTransport(_) | Self::StoreConnectionLost(_)
        )
    }

    /// Explicit vendor-requested wait, when one was signaled.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
