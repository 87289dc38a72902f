//! Device fetcher: the two dependent vendor calls.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::warn;

use fleetcare_core::{CoverageEntry, DeviceSnapshot, normalize_flag};
use fleetcare_ratelimit::{RateLimitHints, parse_retry_after_secs};

/// Fallback wait for a 429 on a device call without `Retry-After`.
pub const DEFAULT_DEVICE_RETRY_AFTER: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// What one device's fetch produced. `requests` counts the HTTP calls
/// actually made, success or not, for window accounting.
#[derive(Debug)]
pub struct FetchOutcome {
    pub requests: u32,
    /// Rate-limit headers seen on successful responses.
    pub hints: RateLimitHints,
    pub kind: OutcomeKind,
}

/// Classified fetch result.
#[derive(Debug)]
pub enum OutcomeKind {
    /// 404 on the device lookup: the vendor does not know the device.
    /// Terminal; the coverage call is never attempted.
    NotFound,
    /// 429 on either call.
    RateLimited { retry_after: Duration },
    /// Non-200, non-429 on the coverage call.
    Failed { status: u16, message: String },
    /// Transport failure that survived the single in-flight retry.
    Transport { message: String },
    /// Empty coverage collection and no usable device metadata.
    NoCoverage,
    /// Empty coverage collection but device metadata was obtained.
    DeviceOnly { snapshot: DeviceSnapshot },
    /// At least one coverage entry.
    Coverage {
        snapshot: DeviceSnapshot,
        entries: Vec<CoverageEntry>,
    },
}

#[derive(Debug, Deserialize)]
struct ResourceDocument {
    #[serde(default)]
    data: Option<ResourceObject>,
}

#[derive(Debug, Deserialize)]
struct CollectionDocument {
    #[serde(default)]
    data: Vec<ResourceObject>,
}

#[derive(Debug, Deserialize)]
struct ResourceObject {
    #[serde(default)]
    id: String,
    #[serde(default)]
    attributes: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DeviceAttributes {
    device_model: Option<String>,
    part_number: Option<String>,
    product_family: Option<String>,
    product_type: Option<String>,
    color: Option<String>,
    device_capacity: Option<String>,
    status: Option<String>,
    mdm_server_name: Option<String>,
    purchase_source_type: Option<String>,
    purchase_source_id: Option<String>,
    order_number: Option<String>,
    order_date_time: Option<String>,
    added_to_org_date_time: Option<String>,
    released_from_org_date_time: Option<String>,
    wifi_mac_address: Option<String>,
    ethernet_mac_address: Option<EthernetMac>,
    bluetooth_mac_address: Option<String>,
    updated_date_time: Option<String>,
}

/// The vendor sends a single MAC or a list, depending on the device.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EthernetMac {
    One(String),
    Many(Vec<Option<String>>),
}

impl EthernetMac {
    fn joined(self) -> Option<String> {
        match self {
            Self::One(mac) => Some(mac).filter(|mac| !mac.is_empty()),
            Self::Many(macs) => {
                let joined = macs
                    .into_iter()
                    .flatten()
                    .filter(|mac| !mac.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");
                Some(joined).filter(|joined| !joined.is_empty())
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CoverageAttributes {
    description: Option<String>,
    status: Option<String>,
    agreement_number: Option<String>,
    payment_type: Option<String>,
    is_renewable: Option<serde_json::Value>,
    is_canceled: Option<serde_json::Value>,
    start_date_time: Option<String>,
    end_date_time: Option<String>,
    contract_cancel_date_time: Option<String>,
    updated_date_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VendorErrorBody {
    #[serde(default)]
    errors: Vec<VendorErrorItem>,
}

#[derive(Debug, Deserialize)]
struct VendorErrorItem {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    parse_datetime(value).map(|parsed| parsed.date_naive())
}

fn snapshot_from(attributes: DeviceAttributes) -> (DeviceSnapshot, Option<DateTime<Utc>>) {
    let updated = attributes.updated_date_time.as_deref().and_then(parse_datetime);
    let snapshot = DeviceSnapshot {
        model: attributes.device_model,
        part_number: attributes.part_number,
        product_family: attributes.product_family,
        product_type: attributes.product_type,
        color: attributes.color,
        device_capacity: attributes.device_capacity,
        device_assignment_status: attributes.status,
        mdm_server: attributes.mdm_server_name,
        purchase_source_type: attributes.purchase_source_type,
        purchase_source_id: attributes.purchase_source_id,
        purchase_source_name: None,
        order_number: attributes.order_number,
        order_date: attributes.order_date_time.as_deref().and_then(parse_datetime),
        added_to_org_date: attributes
            .added_to_org_date_time
            .as_deref()
            .and_then(parse_datetime),
        released_from_org_date: attributes
            .released_from_org_date_time
            .as_deref()
            .and_then(parse_datetime),
        wifi_mac_address: attributes.wifi_mac_address,
        ethernet_mac_address: attributes.ethernet_mac_address.and_then(EthernetMac::joined),
        bluetooth_mac_address: attributes.bluetooth_mac_address,
    };
    (snapshot, updated)
}

fn entry_from(object: ResourceObject, device_updated: Option<DateTime<Utc>>) -> CoverageEntry {
    let attributes: CoverageAttributes =
        serde_json::from_value(object.attributes).unwrap_or_default();
    CoverageEntry {
        id: object.id,
        description: attributes.description,
        status: attributes.status,
        agreement_number: attributes.agreement_number,
        payment_type: attributes.payment_type,
        is_renewable: attributes
            .is_renewable
            .as_ref()
            .is_some_and(normalize_flag),
        is_canceled: attributes.is_canceled.as_ref().is_some_and(normalize_flag),
        start_date: attributes.start_date_time.as_deref().and_then(parse_date),
        end_date: attributes.end_date_time.as_deref().and_then(parse_date),
        contract_cancel_date: attributes
            .contract_cancel_date_time
            .as_deref()
            .and_then(parse_date),
        last_updated: attributes
            .updated_date_time
            .as_deref()
            .and_then(parse_datetime)
            .or(device_updated),
    }
}

/// Build the human-facing message for a non-200 coverage response,
/// appending structured vendor error details when the body has them.
fn vendor_error_message(status: u16, body: &str) -> String {
    let mut message = match status {
        404 => "device not found in Apple Business/School Manager or not enrolled".to_string(),
        401 => "authentication failed (token may be expired)".to_string(),
        403 => "access forbidden (check API permissions)".to_string(),
        _ => format!("unexpected vendor response (HTTP {status})"),
    };

    let parsed: VendorErrorBody = serde_json::from_str(body).unwrap_or_default();
    let details: Vec<String> = parsed
        .errors
        .into_iter()
        .filter_map(|item| item.detail.or(item.title))
        .collect();
    if !details.is_empty() {
        message.push_str(" - ");
        message.push_str(&details.join(", "));
    }
    message
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

fn hints_from(headers: &reqwest::header::HeaderMap) -> RateLimitHints {
    RateLimitHints::from_pairs(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value))),
    )
}

fn retry_after_from(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after_secs)
        .unwrap_or(DEFAULT_DEVICE_RETRY_AFTER)
}

/// Issues the two dependent vendor calls for one device and classifies the
/// outcome. A failed device lookup never blocks the coverage call; a 404
/// on the device lookup ends the device immediately.
#[derive(Debug, Clone)]
pub struct DeviceFetcher {
    http: reqwest::Client,
    transport_retry_delay: Duration,
}

impl DeviceFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            transport_retry_delay: TRANSPORT_RETRY_DELAY,
        })
    }

    /// Shorten the in-flight transport retry delay (tests).
    #[must_use]
    pub const fn with_transport_retry_delay(mut self, delay: Duration) -> Self {
        self.transport_retry_delay = delay;
        self
    }

    async fn get(&self, url: &str, token: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
    }

    /// Fetch device metadata, then coverage, for one serial.
    pub async fn fetch(&self, api_base_url: &str, token: &str, serial: &str) -> FetchOutcome {
        let mut requests = 0;
        let mut hints = RateLimitHints::default();

        // Device record first. Anything short of a 404 or 429 must not
        // block the coverage fetch.
        let device_url = format!("{api_base_url}orgDevices/{serial}");
        let mut snapshot = DeviceSnapshot::default();
        let mut device_updated = None;

        requests += 1;
        match self.get(&device_url, token).await {
            Ok(response) => {
                let status = response.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return FetchOutcome {
                        requests,
                        hints,
                        kind: OutcomeKind::NotFound,
                    };
                }
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    let retry_after = retry_after_from(response.headers());
                    return FetchOutcome {
                        requests,
                        hints,
                        kind: OutcomeKind::RateLimited { retry_after },
                    };
                }
                if status.is_success() {
                    hints = hints_from(response.headers());
                    match response.json::<ResourceDocument>().await {
                        Ok(document) => {
                            if let Some(object) = document.data {
                                match serde_json::from_value::<DeviceAttributes>(object.attributes)
                                {
                                    Ok(attributes) => {
                                        (snapshot, device_updated) = snapshot_from(attributes);
                                    }
                                    Err(err) => {
                                        warn!(%serial, error = %err, "unexpected device attribute shape");
                                    }
                                }
                            } else {
                                warn!(%serial, "device lookup returned 200 without attributes");
                            }
                        }
                        Err(err) => {
                            warn!(%serial, error = %err, "device lookup body unreadable, continuing");
                        }
                    }
                } else {
                    warn!(%serial, status = status.as_u16(), "device lookup failed, continuing to coverage");
                }
            }
            Err(err) => {
                warn!(%serial, error = %err, "device lookup transport failure, continuing to coverage");
            }
        }

        // Coverage, with one in-flight retry for transient transport
        // failures (the vendor's front end resets streams now and then).
        let coverage_url = format!("{api_base_url}orgDevices/{serial}/appleCareCoverage");
        requests += 1;
        let response = match self.get(&coverage_url, token).await {
            Ok(response) => response,
            Err(err) if is_transient(&err) => {
                warn!(%serial, error = %err, "transient transport failure on coverage call, retrying once");
                tokio::time::sleep(self.transport_retry_delay).await;
                requests += 1;
                match self.get(&coverage_url, token).await {
                    Ok(response) => response,
                    Err(err) => {
                        return FetchOutcome {
                            requests,
                            hints,
                            kind: OutcomeKind::Transport {
                                message: format!("coverage call failed after retry: {err}"),
                            },
                        };
                    }
                }
            }
            Err(err) => {
                return FetchOutcome {
                    requests,
                    hints,
                    kind: OutcomeKind::Transport {
                        message: format!("coverage call failed: {err}"),
                    },
                };
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from(response.headers());
            return FetchOutcome {
                requests,
                hints,
                kind: OutcomeKind::RateLimited { retry_after },
            };
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return FetchOutcome {
                requests,
                hints,
                kind: OutcomeKind::Failed {
                    status: status.as_u16(),
                    message: vendor_error_message(status.as_u16(), &body),
                },
            };
        }

        let coverage_hints = hints_from(response.headers());
        if !coverage_hints.is_empty() {
            hints = coverage_hints;
        }

        let document = match response.json::<CollectionDocument>().await {
            Ok(document) => document,
            Err(err) => {
                return FetchOutcome {
                    requests,
                    hints,
                    kind: OutcomeKind::Failed {
                        status: status.as_u16(),
                        message: format!("coverage body unreadable: {err}"),
                    },
                };
            }
        };

        if document.data.is_empty() {
            let kind = if snapshot.is_empty() {
                OutcomeKind::NoCoverage
            } else {
                OutcomeKind::DeviceOnly { snapshot }
            };
            return FetchOutcome {
                requests,
                hints,
                kind,
            };
        }

        let entries: Vec<CoverageEntry> = document
            .data
            .into_iter()
            .filter(|object| {
                if object.id.is_empty() {
                    warn!(%serial, "skipping coverage entry without vendor id");
                    false
                } else {
                    true
                }
            })
            .map(|object| entry_from(object, device_updated))
            .collect();

        if entries.is_empty() {
            let kind = if snapshot.is_empty() {
                OutcomeKind::NoCoverage
            } else {
                OutcomeKind::DeviceOnly { snapshot }
            };
            return FetchOutcome {
                requests,
                hints,
                kind,
            };
        }

        FetchOutcome {
            requests,
            hints,
            kind: OutcomeKind::Coverage { snapshot, entries },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;

    #[test]
    fn ethernet_mac_joins_lists() {
        let one = EthernetMac::One("aa:bb".into());
        assert_eq!(one.joined().as_deref(), Some("aa:bb"));

        let many = EthernetMac::Many(vec![
            Some("aa:bb".into()),
            None,
            Some("cc:dd".into()),
            Some(String::new()),
        ]);
        assert_eq!(many.joined().as_deref(), Some("aa:bb, cc:dd"));

        let empty = EthernetMac::Many(vec![None]);
        assert_eq!(empty.joined(), None);
    }

    #[test]
    fn datetime_parsing_accepts_rfc3339_and_plain_dates() {
        let parsed = parse_datetime("2025-03-04T10:15:00Z").unwrap();
        assert_eq!(parsed.date_naive().year(), 2025);

        let parsed = parse_datetime("2025-03-04").unwrap();
        assert_eq!(parsed.date_naive().month(), 3);

        assert!(parse_datetime("yesterday").is_none());
        assert_eq!(
            parse_date("2026-01-31T00:00:00Z"),
            NaiveDate::from_ymd_opt(2026, 1, 31)
        );
    }

    #[test]
    fn entry_normalizes_boolean_variants() {
        let object = ResourceObject {
            id: "COV1".into(),
            attributes: json!({
                "description": "AppleCare+ for Mac",
                "status": "ACTIVE",
                "isRenewable": "1",
                "isCanceled": "false",
                "startDateTime": "2024-05-01T00:00:00Z",
                "endDateTime": "2027-05-01T00:00:00Z"
            }),
        };
        let entry = entry_from(object, None);

        assert!(entry.is_renewable);
        assert!(!entry.is_canceled);
        assert_eq!(entry.start_date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(entry.end_date, NaiveDate::from_ymd_opt(2027, 5, 1));
    }

    #[test]
    fn entry_falls_back_to_device_update_time() {
        let device_updated = parse_datetime("2026-02-01T00:00:00Z");
        let object = ResourceObject {
            id: "COV1".into(),
            attributes: json!({ "status": "ACTIVE" }),
        };
        let entry = entry_from(object, device_updated);
        assert_eq!(entry.last_updated, device_updated);

        let object = ResourceObject {
            id: "COV2".into(),
            attributes: json!({ "updatedDateTime": "2026-03-01T00:00:00Z" }),
        };
        let entry = entry_from(object, device_updated);
        assert_eq!(entry.last_updated, parse_datetime("2026-03-01T00:00:00Z"));
    }

    #[test]
    fn vendor_error_message_extracts_details() {
        let body = json!({
            "errors": [
                { "detail": "The device is not eligible" },
                { "title": "Forbidden" }
            ]
        })
        .to_string();
        let message = vendor_error_message(403, &body);
        assert!(message.contains("access forbidden"));
        assert!(message.contains("The device is not eligible, Forbidden"));

        let message = vendor_error_message(500, "not json");
        assert_eq!(message, "unexpected vendor response (HTTP 500)");
    }

    #[test]
    fn snapshot_maps_vendor_attribute_names() {
        let attributes: DeviceAttributes = serde_json::from_value(json!({
            "deviceModel": "MacBook Pro 14",
            "partNumber": "Z15G",
            "productFamily": "Mac",
            "status": "ASSIGNED",
            "mdmServerName": "Main MDM",
            "purchaseSourceType": "RESELLER",
            "purchaseSourceId": "1AE4C0",
            "orderDateTime": "2024-01-15T08:00:00Z",
            "addedToOrgDateTime": "2024-01-20T08:00:00Z",
            "wifiMacAddress": "aa:bb:cc:dd:ee:01",
            "ethernetMacAddress": ["aa:bb:cc:dd:ee:02", "aa:bb:cc:dd:ee:03"],
            "updatedDateTime": "2026-06-01T00:00:00Z"
        }))
        .unwrap();

        let (snapshot, updated) = snapshot_from(attributes);
        assert_eq!(snapshot.model.as_deref(), Some("MacBook Pro 14"));
        assert_eq!(snapshot.device_assignment_status.as_deref(), Some("ASSIGNED"));
        assert_eq!(snapshot.mdm_server.as_deref(), Some("Main MDM"));
        assert_eq!(
            snapshot.ethernet_mac_address.as_deref(),
            Some("aa:bb:cc:dd:ee:02, aa:bb:cc:dd:ee:03")
        );
        assert!(snapshot.order_date.is_some());
        assert!(updated.is_some());
        assert!(!snapshot.is_empty());
    }
}
