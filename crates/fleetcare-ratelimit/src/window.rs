//! Moving-window request accounting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

/// Default trailing window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Every device costs exactly two vendor calls (device record, coverage).
pub const REQUESTS_PER_DEVICE: u32 = 2;

/// Ordered multiset of completed-request timestamps within the trailing
/// window, pruned lazily before each admission decision.
///
/// Timestamps are recorded after a device's calls complete, one per HTTP
/// request actually made; a failed call still consumed vendor quota.
#[derive(Debug)]
pub struct MovingWindow {
    window: VecDeque<Instant>,
    window_size: Duration,
    configured_limit: u32,
    header_limit: Option<u32>,
}

impl MovingWindow {
    /// Window with the default 60s length.
    #[must_use]
    pub fn new(configured_limit: u32) -> Self {
        Self::with_window(configured_limit, DEFAULT_WINDOW)
    }

    /// Window with an explicit length (tests use short windows).
    #[must_use]
    pub const fn with_window(configured_limit: u32, window_size: Duration) -> Self {
        Self {
            window: VecDeque::new(),
            window_size,
            configured_limit,
            header_limit: None,
        }
    }

    /// Update the configured limit, e.g. when the next device belongs to a
    /// tenant with a different budget.
    pub fn set_configured_limit(&mut self, limit: u32) {
        if limit > 0 {
            self.configured_limit = limit;
        }
    }

    /// Record a vendor-reported limit seen in response headers. The budget
    /// is adaptive, not static.
    pub fn observe_limit(&mut self, limit: u32) {
        if limit > 0 && self.header_limit != Some(limit) {
            debug!(limit, "vendor reported rate limit");
            self.header_limit = Some(limit);
        }
    }

    /// 80% of the larger of the configured and header-derived limits,
    /// never below one device's worth of calls.
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        let base = self
            .header_limit
            .map_or(self.configured_limit, |header| {
                header.max(self.configured_limit)
            });
        (base * 4 / 5).max(REQUESTS_PER_DEVICE)
    }

    fn prune_at(&mut self, now: Instant) {
        while let Some(oldest) = self.window.front() {
            if now.duration_since(*oldest) >= self.window_size {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Requests currently inside the window.
    #[must_use]
    pub fn in_window(&mut self) -> usize {
        self.in_window_at(Instant::now())
    }

    pub(crate) fn in_window_at(&mut self, now: Instant) -> usize {
        self.prune_at(now);
        self.window.len()
    }

    /// Decide whether one more device's calls fit the budget right now.
    /// `None` means proceed; `Some(wait)` is how long to sleep before
    /// re-checking.
    pub fn admission_wait(&mut self) -> Option<Duration> {
        self.admission_wait_at(Instant::now())
    }

    pub(crate) fn admission_wait_at(&mut self, now: Instant) -> Option<Duration> {
        self.prune_at(now);
        let projected = u32::try_from(self.window.len()).unwrap_or(u32::MAX);
        let projected = projected.saturating_add(REQUESTS_PER_DEVICE);
        if projected <= self.effective_limit() {
            return None;
        }
        let oldest = *self.window.front()?;
        let wait = self
            .window_size
            .checked_sub(now.duration_since(oldest))
            .unwrap_or(Duration::ZERO);
        if wait.is_zero() { None } else { Some(wait) }
    }

    /// Account for calls just made.
    pub fn record(&mut self, requests: u32) {
        self.record_at(requests, Instant::now());
    }

    pub(crate) fn record_at(&mut self, requests: u32, now: Instant) {
        for _ in 0..requests {
            self.window.push_back(now);
        }
    }

    /// Even spacing between devices that keeps a full window right at the
    /// effective budget.
    #[must_use]
    pub fn device_spacing(&self) -> Duration {
        let devices_per_window = (self.effective_limit() / REQUESTS_PER_DEVICE).max(1);
        self.window_size / devices_per_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limit_keeps_headroom() {
        let window = MovingWindow::new(40);
        assert_eq!(window.effective_limit(), 32);

        let window = MovingWindow::new(20);
        assert_eq!(window.effective_limit(), 16);
    }

    #[test]
    fn effective_limit_never_below_one_device() {
        let window = MovingWindow::new(1);
        assert_eq!(window.effective_limit(), REQUESTS_PER_DEVICE);
    }

    #[test]
    fn header_limit_raises_the_budget() {
        let mut window = MovingWindow::new(20);
        window.observe_limit(50);
        assert_eq!(window.effective_limit(), 40);

        // A lower header never shrinks the configured budget.
        window.observe_limit(10);
        assert_eq!(window.effective_limit(), 16);
    }

    #[test]
    fn admits_until_projection_exceeds_cap() {
        // configured 40 -> effective 32 -> 16 devices fit.
        let mut window = MovingWindow::new(40);
        let now = Instant::now();

        for _ in 0..16 {
            assert_eq!(window.admission_wait_at(now), None);
            window.record_at(REQUESTS_PER_DEVICE, now);
        }
        assert_eq!(window.in_window_at(now), 32);

        // Device 17 would project to 34 > 32 and must wait.
        let wait = window.admission_wait_at(now).expect("must wait");
        assert!(wait <= DEFAULT_WINDOW);
        assert!(wait > Duration::from_secs(55));
    }

    #[test]
    fn wait_shrinks_as_the_oldest_entry_ages() {
        let mut window = MovingWindow::with_window(4, Duration::from_secs(10));
        let start = Instant::now();
        window.record_at(2, start);
        window.record_at(2, start + Duration::from_secs(1));

        // effective = 3, projection 6 > 3; oldest is 4s old -> wait 6s.
        let wait = window
            .admission_wait_at(start + Duration::from_secs(4))
            .expect("must wait");
        assert_eq!(wait, Duration::from_secs(6));
    }

    #[test]
    fn entries_age_out_of_the_window() {
        let mut window = MovingWindow::with_window(4, Duration::from_secs(10));
        let start = Instant::now();
        window.record_at(4, start);

        assert!(window.admission_wait_at(start).is_some());
        // One full window later everything has aged out.
        assert_eq!(
            window.admission_wait_at(start + Duration::from_secs(10)),
            None
        );
        assert_eq!(window.in_window_at(start + Duration::from_secs(10)), 0);
    }

    #[test]
    fn device_spacing_spreads_the_window() {
        let window = MovingWindow::new(40);
        // 32 effective / 2 per device = 16 devices per 60s window.
        assert_eq!(window.device_spacing(), Duration::from_secs(60) / 16);
    }

    #[test]
    fn tenant_switch_updates_configured_limit() {
        let mut window = MovingWindow::new(40);
        window.set_configured_limit(10);
        assert_eq!(window.effective_limit(), 8);
        // Zero is ignored rather than wiping the budget.
        window.set_configured_limit(0);
        assert_eq!(window.effective_limit(), 8);
    }
}
