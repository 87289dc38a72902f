//! Fleetcare ratelimit - moving-window admission control.
//!
//! The vendor budget is a moving window rather than fixed per-minute
//! buckets: a fixed window resets and immediately admits a burst, while a
//! trailing window keeps load smooth. The effective budget keeps 20%
//! headroom under the configured limit so background or concurrent callers
//! do not trip the vendor's own limiter, and it adapts when the vendor
//! reports its limit in response headers.

#![forbid(unsafe_code)]

mod hints;
mod window;

pub use hints::*;
pub use window::*;
