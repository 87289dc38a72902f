//! Coverage record types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Suffix appended to a serial number to form the deterministic id of a
/// placeholder record (device metadata known, zero coverage plans).
pub const PLACEHOLDER_ID_SUFFIX: &str = "-NOCOVERAGE";

/// Derived three-state classification of a device's primary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    /// Coverage is in force and ends more than 30 days out.
    Active,
    /// Coverage is in force but ends within 30 days.
    ExpiringSoon,
    /// No coverage in force (expired, canceled, or never covered).
    Inactive,
}

impl CoverageStatus {
    /// Stable string form used in stored records and progress output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::ExpiringSoon => "expiring_soon",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device metadata returned by the vendor's device-record endpoint.
///
/// The vendor only returns this alongside a specific device lookup, never
/// joined to individual plans, so the engine duplicates the snapshot onto
/// every coverage record for the device at fetch time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub model: Option<String>,
    pub part_number: Option<String>,
    pub product_family: Option<String>,
    pub product_type: Option<String>,
    pub color: Option<String>,
    pub device_capacity: Option<String>,
    pub device_assignment_status: Option<String>,
    pub mdm_server: Option<String>,
    pub purchase_source_type: Option<String>,
    pub purchase_source_id: Option<String>,
    /// Resolved reseller display name, set only when a directory lookup
    /// translated `purchase_source_id` into something different.
    pub purchase_source_name: Option<String>,
    pub order_number: Option<String>,
    pub order_date: Option<DateTime<Utc>>,
    pub added_to_org_date: Option<DateTime<Utc>>,
    pub released_from_org_date: Option<DateTime<Utc>>,
    pub wifi_mac_address: Option<String>,
    /// A device may report several ethernet interfaces; they are joined
    /// with `", "` at parse time.
    pub ethernet_mac_address: Option<String>,
    pub bluetooth_mac_address: Option<String>,
}

impl DeviceSnapshot {
    /// True when the device lookup yielded nothing usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One normalized coverage plan as returned by the vendor's coverage
/// endpoint, before it is merged with a [`DeviceSnapshot`] into a stored
/// record. Boolean-ish vendor values are already strict booleans here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageEntry {
    /// Vendor-issued record id, globally unique.
    pub id: String,
    pub description: Option<String>,
    /// Raw vendor status string, informally `ACTIVE` / `INACTIVE`.
    pub status: Option<String>,
    pub agreement_number: Option<String>,
    pub payment_type: Option<String>,
    pub is_renewable: bool,
    pub is_canceled: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub contract_cancel_date: Option<NaiveDate>,
    /// Vendor-reported update time, falling back to the device record's.
    pub last_updated: Option<DateTime<Utc>>,
}

/// One stored coverage row, keyed by the vendor-issued `id`.
///
/// For any serial number with at least one record, at most one record has
/// `is_primary = true`, and only that record carries a non-null
/// `coverage_status`. A device with metadata but zero plans is represented
/// by a single placeholder record with null coverage fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub id: String,
    pub serial_number: String,
    #[serde(flatten)]
    pub device: DeviceSnapshot,
    pub description: Option<String>,
    pub status: Option<String>,
    pub agreement_number: Option<String>,
    pub payment_type: Option<String>,
    pub is_renewable: bool,
    pub is_canceled: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub contract_cancel_date: Option<NaiveDate>,
    /// Vendor-reported update time, if the vendor supplied one.
    pub last_updated: Option<DateTime<Utc>>,
    /// Local timestamp of the fetch that produced this exact snapshot.
    /// All entries from one fetch share one value.
    pub last_fetched: Option<DateTime<Utc>>,
    /// Host-owned flag used to serialize concurrent runs. The engine
    /// clears it when it rewrites a record but never sets it.
    pub sync_in_progress: bool,
    pub is_primary: bool,
    pub coverage_status: Option<CoverageStatus>,
}

impl CoverageRecord {
    /// Deterministic synthetic id for a device's placeholder record.
    #[must_use]
    pub fn placeholder_id(serial_number: &str) -> String {
        format!("{serial_number}{PLACEHOLDER_ID_SUFFIX}")
    }

    /// Build the placeholder record for a device with metadata but no
    /// coverage plans. Coverage fields stay null; the primary selector may
    /// still pick it (with status `inactive`).
    #[must_use]
    pub fn placeholder(
        serial_number: &str,
        device: DeviceSnapshot,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::placeholder_id(serial_number),
            serial_number: serial_number.to_string(),
            device,
            last_fetched: Some(fetched_at),
            ..Self::default()
        }
    }

    /// True for the synthetic record representing "metadata, no plans".
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.id.ends_with(PLACEHOLDER_ID_SUFFIX)
    }
}

/// Normalize a boolean-ish vendor value into a strict bool.
///
/// The vendor has been observed sending `true`, `1`, `"1"`, and
/// case-insensitive `"true"` for set flags.
#[must_use]
pub fn normalize_flag(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_i64() == Some(1),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coverage_status_as_str() {
        assert_eq!(CoverageStatus::Active.as_str(), "active");
        assert_eq!(CoverageStatus::ExpiringSoon.as_str(), "expiring_soon");
        assert_eq!(CoverageStatus::Inactive.as_str(), "inactive");
    }

    #[test]
    fn coverage_status_serde_form() {
        let json = serde_json::to_string(&CoverageStatus::ExpiringSoon).unwrap();
        assert_eq!(json, "\"expiring_soon\"");
        let back: CoverageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CoverageStatus::ExpiringSoon);
    }

    #[test]
    fn placeholder_has_deterministic_id_and_null_coverage() {
        let snapshot = DeviceSnapshot {
            model: Some("MacBook Pro".into()),
            ..DeviceSnapshot::default()
        };
        let record = CoverageRecord::placeholder("C02TEST12345", snapshot, Utc::now());

        assert_eq!(record.id, "C02TEST12345-NOCOVERAGE");
        assert!(record.is_placeholder());
        assert_eq!(record.serial_number, "C02TEST12345");
        assert!(record.status.is_none());
        assert!(record.end_date.is_none());
        assert!(!record.is_primary);
        assert!(record.coverage_status.is_none());
        assert!(record.last_fetched.is_some());
    }

    #[test]
    fn empty_snapshot_detection() {
        assert!(DeviceSnapshot::default().is_empty());
        let snapshot = DeviceSnapshot {
            wifi_mac_address: Some("aa:bb:cc:dd:ee:ff".into()),
            ..DeviceSnapshot::default()
        };
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn normalize_flag_accepts_vendor_variants() {
        assert!(normalize_flag(&json!(true)));
        assert!(normalize_flag(&json!(1)));
        assert!(normalize_flag(&json!("1")));
        assert!(normalize_flag(&json!("true")));
        assert!(normalize_flag(&json!("TRUE")));

        assert!(!normalize_flag(&json!(false)));
        assert!(!normalize_flag(&json!(0)));
        assert!(!normalize_flag(&json!("0")));
        assert!(!normalize_flag(&json!("false")));
        assert!(!normalize_flag(&json!("")));
        assert!(!normalize_flag(&json!(null)));
        assert!(!normalize_flag(&json!(2)));
    }
}
