//! Record store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetcare_core::{CoverageRecord, CoverageStatus, DeviceSnapshot};

/// Store-level failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing connection dropped mid-operation. Retryable after a
    /// reconnect.
    #[error("store connection lost: {0}")]
    ConnectionLost(String),

    /// Any other backend failure. Propagates immediately.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Opaque record store with single-record upserts and simple filters.
///
/// All writes are atomic at single-record granularity; the engine needs no
/// cross-record locking. Hosts back this with their database of choice.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record by vendor id.
    async fn get(&self, id: &str) -> StoreResult<Option<CoverageRecord>>;

    /// Insert or fully overwrite a record, keyed by its vendor id.
    async fn upsert(&self, record: CoverageRecord) -> StoreResult<()>;

    /// All records for a serial number, in unspecified order.
    async fn list_for_serial(&self, serial: &str) -> StoreResult<Vec<CoverageRecord>>;

    /// Every serial number that has at least one record.
    async fn serials_with_records(&self) -> StoreResult<Vec<String>>;

    /// Whether any record exists for the serial.
    async fn has_records(&self, serial: &str) -> StoreResult<bool>;

    /// Delete all records for a serial; returns how many went away.
    async fn delete_for_serial(&self, serial: &str) -> StoreResult<usize>;

    /// Update only the device-snapshot fields and `last_fetched` on every
    /// record of a serial, leaving coverage fields untouched. Clears the
    /// host's `sync_in_progress` flag. Returns the number of rows touched.
    async fn refresh_snapshot(
        &self,
        serial: &str,
        snapshot: &DeviceSnapshot,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Reset `is_primary` and `coverage_status` on every record of a
    /// serial.
    async fn clear_primary_flags(&self, serial: &str) -> StoreResult<()>;

    /// Mark one record primary with the given derived status.
    async fn mark_primary(&self, id: &str, status: CoverageStatus) -> StoreResult<()>;

    /// Force the backend to re-establish its connection after a
    /// [`StoreError::ConnectionLost`].
    async fn reconnect(&self) -> StoreResult<()>;
}
