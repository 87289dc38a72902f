//! Device inventory port.

use std::collections::HashMap;

use async_trait::async_trait;

/// Which devices a fleet run should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InventoryFilter {
    /// Every known device.
    #[default]
    All,
    /// Only devices with no stored coverage records yet (incremental runs).
    MissingRecordsOnly,
}

/// Host-implemented view of the device inventory.
///
/// The identity lookups are optional enrichment: implementations must
/// swallow their own failures and answer `None` rather than erroring, so a
/// broken sub-query never blocks a device's sync.
#[async_trait]
pub trait DeviceInventory: Send + Sync {
    /// Serial numbers to process, in processing order.
    async fn list_serials(&self, filter: InventoryFilter) -> Vec<String>;

    /// Machine-group identifier for a device, when known.
    async fn machine_group(&self, serial: &str) -> Option<String>;

    /// Per-device client identifier, when known.
    async fn client_identifier(&self, serial: &str) -> Option<String>;
}

/// Fixed in-memory inventory, used by the CLI and in tests. Serves the
/// same list for every filter; real hosts implement the incremental
/// filter against their record store.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    serials: Vec<String>,
    machine_groups: HashMap<String, String>,
    client_identifiers: HashMap<String, String>,
}

impl StaticInventory {
    #[must_use]
    pub fn new(serials: Vec<String>) -> Self {
        Self {
            serials,
            ..Self::default()
        }
    }

    /// Attach a machine-group identifier to a serial, builder style.
    #[must_use]
    pub fn with_machine_group(mut self, serial: &str, group: &str) -> Self {
        self.machine_groups
            .insert(serial.to_string(), group.to_string());
        self
    }

    /// Attach a client identifier to a serial, builder style.
    #[must_use]
    pub fn with_client_identifier(mut self, serial: &str, identifier: &str) -> Self {
        self.client_identifiers
            .insert(serial.to_string(), identifier.to_string());
        self
    }
}

#[async_trait]
impl DeviceInventory for StaticInventory {
    async fn list_serials(&self, _filter: InventoryFilter) -> Vec<String> {
        self.serials.clone()
    }

    async fn machine_group(&self, serial: &str) -> Option<String> {
        self.machine_groups.get(serial).cloned()
    }

    async fn client_identifier(&self, serial: &str) -> Option<String> {
        self.client_identifiers.get(serial).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_inventory_answers_lookups() {
        let inventory = StaticInventory::new(vec!["C02AAAA11111".into(), "C02BBBB22222".into()])
            .with_machine_group("C02AAAA11111", "acme-hq")
            .with_client_identifier("C02BBBB22222", "edu-lab");

        assert_eq!(
            inventory.list_serials(InventoryFilter::All).await,
            vec!["C02AAAA11111".to_string(), "C02BBBB22222".to_string()]
        );
        assert_eq!(
            inventory.machine_group("C02AAAA11111").await,
            Some("acme-hq".to_string())
        );
        assert_eq!(inventory.machine_group("C02BBBB22222").await, None);
        assert_eq!(
            inventory.client_identifier("C02BBBB22222").await,
            Some("edu-lab".to_string())
        );
    }
}
