//! Record reconciliation.
//!
//! Turns a device fetch's payload into store writes: coverage entries are
//! merged with the device snapshot and upserted by vendor id; a device
//! with metadata but no plans gets its snapshot refreshed in place, or a
//! single placeholder record if nothing is stored yet. Writes that fail
//! with a lost connection are retried after a forced reconnect, bounded.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use fleetcare_core::{CoverageEntry, CoverageRecord, DeviceSnapshot};

use crate::{RecordStore, StoreError, StoreResult, primary};

const DEFAULT_WRITE_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Applies fetch outcomes to a [`RecordStore`], then recomputes the
/// device's primary record.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    write_attempts: u32,
    retry_delay: Duration,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the reconnect-retry bounds (tests).
    #[must_use]
    pub const fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.write_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// The store this reconciler writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Merge a snapshot and one coverage entry into a stored record. All
    /// entries from one fetch share the same `last_fetched` stamp so they
    /// stay distinguishable from a later fetch.
    #[must_use]
    pub fn build_record(
        serial: &str,
        snapshot: &DeviceSnapshot,
        entry: &CoverageEntry,
        fetched_at: DateTime<Utc>,
    ) -> CoverageRecord {
        CoverageRecord {
            id: entry.id.clone(),
            serial_number: serial.to_string(),
            device: snapshot.clone(),
            description: entry.description.clone(),
            status: entry.status.clone(),
            agreement_number: entry.agreement_number.clone(),
            payment_type: entry.payment_type.clone(),
            is_renewable: entry.is_renewable,
            is_canceled: entry.is_canceled,
            start_date: entry.start_date,
            end_date: entry.end_date,
            contract_cancel_date: entry.contract_cancel_date,
            last_updated: entry.last_updated,
            last_fetched: Some(fetched_at),
            sync_in_progress: false,
            is_primary: false,
            coverage_status: None,
        }
    }

    /// Upsert every coverage entry for a device, then recompute primary.
    /// Returns the number of records written.
    pub async fn apply_coverage(
        &self,
        serial: &str,
        snapshot: &DeviceSnapshot,
        entries: &[CoverageEntry],
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        for entry in entries {
            let record = Self::build_record(serial, snapshot, entry, fetched_at);
            self.with_write_retry(|| self.store.upsert(record.clone()))
                .await?;
        }
        self.with_write_retry(|| primary::recompute(self.store.as_ref(), serial))
            .await?;
        Ok(entries.len())
    }

    /// Persist device metadata for a device without coverage plans: refresh
    /// existing rows in place, or insert one placeholder. Returns 1 when a
    /// placeholder was inserted, 0 when existing rows were refreshed.
    pub async fn apply_device_only(
        &self,
        serial: &str,
        snapshot: &DeviceSnapshot,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let refreshed = self
            .with_write_retry(|| self.store.refresh_snapshot(serial, snapshot, fetched_at))
            .await?;

        let inserted = if refreshed == 0 {
            let placeholder = CoverageRecord::placeholder(serial, snapshot.clone(), fetched_at);
            self.with_write_retry(|| self.store.upsert(placeholder.clone()))
                .await?;
            1
        } else {
            0
        };

        self.with_write_retry(|| primary::recompute(self.store.as_ref(), serial))
            .await?;
        Ok(inserted)
    }

    /// Delete every record for a serial (the explicit-clear path for a
    /// fresh device whose coverage query came back empty). Returns how
    /// many records went away.
    pub async fn clear_serial(&self, serial: &str) -> StoreResult<usize> {
        self.with_write_retry(|| self.store.delete_for_serial(serial))
            .await
    }

    async fn with_write_retry<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(StoreError::ConnectionLost(reason)) if attempt + 1 < self.write_attempts => {
                    attempt += 1;
                    warn!(attempt, %reason, "store connection lost, reconnecting");
                    if let Err(err) = self.store.reconnect().await {
                        warn!(error = %err, "store reconnect attempt failed");
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
                other => return other,
            }
        }
    }
}
