//! In-memory record store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use fleetcare_core::{CoverageRecord, CoverageStatus, DeviceSnapshot};

use crate::{RecordStore, StoreError, StoreResult};

/// `HashMap`-backed store. The in-tree implementation for tests and
/// embedded hosts; production hosts swap in their database behind the same
/// port.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, CoverageRecord>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total record count across all serials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<CoverageRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn upsert(&self, record: CoverageRecord) -> StoreResult<()> {
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_for_serial(&self, serial: &str) -> StoreResult<Vec<CoverageRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|record| record.serial_number == serial)
            .cloned()
            .collect())
    }

    async fn serials_with_records(&self) -> StoreResult<Vec<String>> {
        let mut serials: Vec<String> = self
            .records
            .read()
            .values()
            .map(|record| record.serial_number.clone())
            .collect();
        serials.sort();
        serials.dedup();
        Ok(serials)
    }

    async fn has_records(&self, serial: &str) -> StoreResult<bool> {
        Ok(self
            .records
            .read()
            .values()
            .any(|record| record.serial_number == serial))
    }

    async fn delete_for_serial(&self, serial: &str) -> StoreResult<usize> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.serial_number != serial);
        Ok(before - records.len())
    }

    async fn refresh_snapshot(
        &self,
        serial: &str,
        snapshot: &DeviceSnapshot,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut touched = 0;
        for record in self.records.write().values_mut() {
            if record.serial_number == serial {
                record.device = snapshot.clone();
                record.last_fetched = Some(fetched_at);
                record.sync_in_progress = false;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn clear_primary_flags(&self, serial: &str) -> StoreResult<()> {
        for record in self.records.write().values_mut() {
            if record.serial_number == serial {
                record.is_primary = false;
                record.coverage_status = None;
            }
        }
        Ok(())
    }

    async fn mark_primary(&self, id: &str, status: CoverageStatus) -> StoreResult<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::Backend(format!("no record with id {id}")))?;
        record.is_primary = true;
        record.coverage_status = Some(status);
        Ok(())
    }

    async fn reconnect(&self) -> StoreResult<()> {
        Ok(())
    }
}
