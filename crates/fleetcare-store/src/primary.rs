//! Primary-plan selection and coverage-status derivation.
//!
//! A device may carry several coverage records across time and plans;
//! exactly one of them is the "primary" record that represents the
//! device's current coverage state for display and statistics. Selection
//! is a deterministic total order: **latest end date wins**, a missing end
//! date sorts as 1970-01-01, and ties fall to the lexicographically
//! greatest record id. Re-running selection at any time from stored data
//! alone yields the same result; no network is involved.

use chrono::{Days, NaiveDate, Utc};

use fleetcare_core::{CoverageRecord, CoverageStatus};

use crate::{RecordStore, StoreResult};

/// Records ending within this many days of today count as expiring soon.
pub const EXPIRING_SOON_WINDOW_DAYS: u64 = 30;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is a valid date")
}

/// Pick the primary record out of a device's stored records.
#[must_use]
pub fn select_primary(records: &[CoverageRecord]) -> Option<&CoverageRecord> {
    records.iter().max_by(|a, b| {
        (a.end_date.unwrap_or_else(epoch), &a.id).cmp(&(b.end_date.unwrap_or_else(epoch), &b.id))
    })
}

/// Derive the three-state coverage status from the primary record.
///
/// `active` requires vendor status `ACTIVE`, not canceled, and an end date
/// today or later; among active plans, ending within 30 days means
/// `expiring_soon`. Everything else is `inactive`.
#[must_use]
pub fn derive_status(record: &CoverageRecord, today: NaiveDate) -> CoverageStatus {
    let status_active = record
        .status
        .as_deref()
        .is_some_and(|status| status.trim().eq_ignore_ascii_case("ACTIVE"));
    let in_force = status_active
        && !record.is_canceled
        && record.end_date.is_some_and(|end_date| end_date >= today);

    if !in_force {
        return CoverageStatus::Inactive;
    }

    let horizon = today + Days::new(EXPIRING_SOON_WINDOW_DAYS);
    if record.end_date.is_some_and(|end_date| end_date <= horizon) {
        CoverageStatus::ExpiringSoon
    } else {
        CoverageStatus::Active
    }
}

/// Recompute a device's primary record and status as of a given date.
///
/// Resets every record for the serial to non-primary first, then marks the
/// selected one. Idempotent; safe to re-run at any time.
pub async fn recompute_as_of<S: RecordStore + ?Sized>(
    store: &S,
    serial: &str,
    today: NaiveDate,
) -> StoreResult<Option<String>> {
    let records = store.list_for_serial(serial).await?;
    if records.is_empty() {
        return Ok(None);
    }

    store.clear_primary_flags(serial).await?;

    let Some(primary) = select_primary(&records) else {
        return Ok(None);
    };
    let status = derive_status(primary, today);
    store.mark_primary(&primary.id, status).await?;
    Ok(Some(primary.id.clone()))
}

/// Recompute a device's primary record and status as of today.
pub async fn recompute<S: RecordStore + ?Sized>(
    store: &S,
    serial: &str,
) -> StoreResult<Option<String>> {
    recompute_as_of(store, serial, Utc::now().date_naive()).await
}

/// Administrative recompute across every serial with records. Returns how
/// many serials were processed.
pub async fn recompute_all<S: RecordStore + ?Sized>(store: &S) -> StoreResult<usize> {
    let serials = store.serials_with_records().await?;
    let count = serials.len();
    for serial in serials {
        recompute(store, &serial).await?;
    }
    Ok(count)
}
