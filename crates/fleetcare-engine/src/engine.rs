//! Sync orchestrator.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fleetcare_core::{
    CredentialResolver, CredentialSource, DEFAULT_RATE_LIMIT, DeviceInventory, InventoryFilter,
    ResolvedTenant, SyncError,
};
use fleetcare_oauth::{ClientAssertion, OAuthError, TokenCache, TokenClient};
use fleetcare_ratelimit::{DEFAULT_WINDOW, MovingWindow};
use fleetcare_store::{Reconciler, RecordStore, StoreError};

use crate::{
    DeviceFetcher, NoResellers, NullSink, OutcomeKind, ProgressSink, ResellerDirectory,
};

/// Serials shorter than this cannot be vendor device identifiers.
pub const MIN_SERIAL_LEN: usize = 8;

/// Tunable waits and bounds. Defaults match production behavior; tests
/// shrink them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Moving-window length for rate accounting.
    pub window_size: Duration,
    /// Sleep after acquiring a token, so the vendor's own token limiter is
    /// not immediately re-triggered.
    pub token_cooldown: Duration,
    /// Wait between token acquisition attempts when the failure carries no
    /// `Retry-After`.
    pub token_retry_fallback: Duration,
    /// Token acquisition attempts per tenant before the tenant is dropped
    /// for the run.
    pub token_max_attempts: u32,
    /// Fetch attempts per device across 429 responses before the device is
    /// skipped.
    pub rate_limit_max_attempts: u32,
    /// Emit a "Processing device X of Y" heartbeat every this many
    /// devices. Zero disables the heartbeat.
    pub heartbeat_every: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW,
            token_cooldown: Duration::from_secs(3),
            token_retry_fallback: Duration::from_secs(30),
            token_max_attempts: 3,
            rate_limit_max_attempts: 3,
            heartbeat_every: 10,
        }
    }
}

/// Result of a single-device sync, for on-demand refresh callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResult {
    pub success: bool,
    pub records_written: usize,
    pub message: String,
}

/// Totals for one fleet run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub synced: usize,
    pub skipped: usize,
    pub errors: usize,
    pub elapsed: Duration,
}

/// Per-device disposition, internal to the orchestrator.
#[derive(Debug)]
enum DeviceSync {
    /// Coverage records written.
    Saved { records: usize },
    /// No plans, but device metadata persisted (placeholder inserted when
    /// nothing was stored yet).
    MetadataOnly { inserted_placeholder: bool },
    /// Empty coverage collection and no metadata. A skip, not a failure.
    NoCoverage,
    /// Token acquisition already failed for this tenant earlier in the run.
    TenantDisabled { key: String },
    Error(SyncError),
}

fn oauth_to_sync(err: OAuthError) -> SyncError {
    match err {
        OAuthError::InvalidAssertion(message) => SyncError::InvalidAssertion(message),
        OAuthError::RateLimited { retry_after } => SyncError::RateLimited { retry_after },
        OAuthError::TokenRequestFailed { status, body } => SyncError::VendorError {
            status,
            message: body,
        },
        OAuthError::MalformedTokenResponse(body) => SyncError::Unknown(body),
        OAuthError::Http(err) => SyncError::TransientTransport(err.to_string()),
    }
}

fn store_to_sync(err: StoreError) -> SyncError {
    match err {
        StoreError::ConnectionLost(message) => SyncError::StoreConnectionLost(message),
        StoreError::Backend(message) => SyncError::Unknown(message),
    }
}

/// The device coverage sync engine.
///
/// One instance corresponds to one run scope: the token cache and rate
/// window live and die with it. Devices are processed strictly
/// sequentially; the shared rate budget makes concurrent fan-out pointless
/// while the HTTP calls remain the bottleneck.
pub struct SyncEngine {
    resolver: CredentialResolver<Arc<dyn CredentialSource>>,
    inventory: Arc<dyn DeviceInventory>,
    reconciler: Reconciler,
    token_client: TokenClient,
    tokens: TokenCache,
    failed_tenants: Mutex<HashSet<String>>,
    window: Mutex<MovingWindow>,
    fetcher: DeviceFetcher,
    progress: Arc<dyn ProgressSink>,
    resellers: Arc<dyn ResellerDirectory>,
    abort: Arc<AtomicBool>,
    config: EngineConfig,
}

impl SyncEngine {
    /// Build an engine over the host's credential source, inventory, and
    /// record store.
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        inventory: Arc<dyn DeviceInventory>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, SyncError> {
        let fetcher = DeviceFetcher::new()
            .map_err(|err| SyncError::Unknown(format!("failed to build HTTP client: {err}")))?;
        let token_client = TokenClient::new()
            .map_err(|err| SyncError::Unknown(format!("failed to build token client: {err}")))?;
        let config = EngineConfig::default();

        Ok(Self {
            resolver: CredentialResolver::new(credentials),
            inventory,
            reconciler: Reconciler::new(store),
            token_client,
            tokens: TokenCache::new(),
            failed_tenants: Mutex::new(HashSet::new()),
            window: Mutex::new(MovingWindow::with_window(
                DEFAULT_RATE_LIMIT,
                config.window_size,
            )),
            fetcher,
            progress: Arc::new(NullSink),
            resellers: Arc::new(NoResellers),
            abort: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Replace the progress sink.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Attach a reseller directory.
    #[must_use]
    pub fn with_resellers(mut self, resellers: Arc<dyn ResellerDirectory>) -> Self {
        self.resellers = resellers;
        self
    }

    /// Override engine tunables. Rebuilds the rate window so a custom
    /// window size takes effect.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.window = Mutex::new(MovingWindow::with_window(
            DEFAULT_RATE_LIMIT,
            config.window_size,
        ));
        self.config = config;
        self
    }

    /// Replace the token client (tests point it at a mock endpoint).
    #[must_use]
    pub fn with_token_client(mut self, token_client: TokenClient) -> Self {
        self.token_client = token_client;
        self
    }

    /// Replace the device fetcher (tests shrink its retry delay).
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: DeviceFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Handle the caller flips to stop the run at the next device
    /// boundary.
    #[must_use]
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    fn apply_resellers(&self, snapshot: &mut fleetcare_core::DeviceSnapshot) {
        if let Some(reseller_id) = snapshot.purchase_source_id.as_deref() {
            if let Some(name) = self.resellers.resolve(reseller_id) {
                if name != reseller_id {
                    snapshot.purchase_source_name = Some(name);
                }
            }
        }
    }

    /// Wait until one more device's calls fit the tenant's budget.
    async fn admit(&self, rate_limit: u32) {
        loop {
            let wait = {
                let mut window = self.window.lock();
                window.set_configured_limit(rate_limit);
                window.admission_wait()
            };
            match wait {
                None => return,
                Some(wait) => {
                    info!(wait_secs = wait.as_secs_f64(), "rate budget exhausted, waiting");
                    self.progress.emit(
                        &format!("Rate limit reached. Sleeping for {}s...", wait.as_secs().max(1)),
                        false,
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Acquire (or reuse) the bearer token for a tenant, with bounded
    /// retry keyed off `Retry-After` when present.
    async fn tenant_token(&self, tenant: &ResolvedTenant) -> Result<String, SyncError> {
        if let Some(token) = self.tokens.get(&tenant.key) {
            return Ok(token);
        }

        let assertion = ClientAssertion::parse(&tenant.config.client_assertion)
            .map_err(|err| SyncError::InvalidAssertion(err.to_string()))?;

        let mut attempt = 0;
        loop {
            match self
                .token_client
                .acquire(&assertion, &tenant.config.api_base_url)
                .await
            {
                Ok(token) => {
                    debug!(tenant = %tenant.key, "access token acquired");
                    self.tokens.insert(&tenant.key, &token);
                    // Cooldown so the vendor's token limiter is not hit by
                    // the immediately following device call.
                    tokio::time::sleep(self.config.token_cooldown).await;
                    return Ok(token);
                }
                Err(err) => {
                    attempt += 1;
                    let terminal = matches!(
                        err,
                        OAuthError::InvalidAssertion(_) | OAuthError::MalformedTokenResponse(_)
                    );
                    if attempt >= self.config.token_max_attempts || terminal {
                        return Err(oauth_to_sync(err));
                    }
                    let wait = err.retry_after().unwrap_or(self.config.token_retry_fallback);
                    warn!(
                        tenant = %tenant.key,
                        attempt,
                        wait_secs = wait.as_secs(),
                        error = %err,
                        "token acquisition failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Drive one device through resolve, token, admission, fetch, and
    /// reconcile. The 429 loop is a small state machine:
    /// Pending -> Fetching -> RateLimited(n) -> Done | Skipped.
    async fn sync_device(&self, serial: &str) -> DeviceSync {
        let machine_group = self.inventory.machine_group(serial).await;
        let client_identifier = self.inventory.client_identifier(serial).await;
        let Some(tenant) = self
            .resolver
            .resolve(machine_group.as_deref(), client_identifier.as_deref())
        else {
            return DeviceSync::Error(SyncError::ConfigurationMissing);
        };

        if self.failed_tenants.lock().contains(&tenant.key) {
            return DeviceSync::TenantDisabled {
                key: tenant.key.clone(),
            };
        }

        let token = match self.tenant_token(&tenant).await {
            Ok(token) => token,
            Err(err) => {
                warn!(tenant = %tenant.key, error = %err, "tenant disabled for this run");
                self.failed_tenants.lock().insert(tenant.key.clone());
                return DeviceSync::Error(err);
            }
        };

        let mut attempt = 0;
        loop {
            self.admit(tenant.config.rate_limit).await;

            let outcome = self
                .fetcher
                .fetch(&tenant.config.api_base_url, &token, serial)
                .await;

            {
                // Failed calls still consumed vendor quota; record them
                // all, and fold in any header-reported limit.
                let mut window = self.window.lock();
                window.record(outcome.requests);
                if let Some(limit) = outcome.hints.limit {
                    window.observe_limit(limit);
                }
            }

            match outcome.kind {
                OutcomeKind::RateLimited { retry_after } => {
                    attempt += 1;
                    if attempt >= self.config.rate_limit_max_attempts {
                        return DeviceSync::Error(SyncError::RateLimited { retry_after });
                    }
                    warn!(
                        %serial,
                        attempt,
                        wait_secs = retry_after.as_secs(),
                        "vendor rate limited, retrying same device"
                    );
                    self.progress.emit(
                        &format!(
                            "HTTP 429 for {serial}, retrying after {}s",
                            retry_after.as_secs()
                        ),
                        false,
                    );
                    tokio::time::sleep(retry_after).await;
                    // Window counters are re-derived fresh on the next
                    // admission; nothing is advanced speculatively.
                }
                OutcomeKind::NotFound => return DeviceSync::Error(SyncError::NotFound),
                OutcomeKind::Failed { status, message } => {
                    return DeviceSync::Error(SyncError::VendorError { status, message });
                }
                OutcomeKind::Transport { message } => {
                    return DeviceSync::Error(SyncError::TransientTransport(message));
                }
                OutcomeKind::NoCoverage => return DeviceSync::NoCoverage,
                OutcomeKind::DeviceOnly { mut snapshot } => {
                    self.apply_resellers(&mut snapshot);
                    return match self
                        .reconciler
                        .apply_device_only(serial, &snapshot, Utc::now())
                        .await
                    {
                        Ok(inserted) => DeviceSync::MetadataOnly {
                            inserted_placeholder: inserted > 0,
                        },
                        Err(err) => DeviceSync::Error(store_to_sync(err)),
                    };
                }
                OutcomeKind::Coverage {
                    mut snapshot,
                    entries,
                } => {
                    self.apply_resellers(&mut snapshot);
                    return match self
                        .reconciler
                        .apply_coverage(serial, &snapshot, &entries, Utc::now())
                        .await
                    {
                        Ok(records) => DeviceSync::Saved { records },
                        Err(err) => DeviceSync::Error(store_to_sync(err)),
                    };
                }
            }
        }
    }

    /// Sync one device on demand. Also the unit the fleet loop repeats.
    pub async fn sync_one(&self, serial: &str) -> DeviceResult {
        let serial = serial.trim();
        if serial.len() < MIN_SERIAL_LEN {
            return DeviceResult {
                success: false,
                records_written: 0,
                message: "Invalid serial number".into(),
            };
        }

        match self.sync_device(serial).await {
            DeviceSync::Saved { records } => DeviceResult {
                success: true,
                records_written: records,
                message: format!("Synced {records} coverage record(s) for {serial}"),
            },
            DeviceSync::MetadataOnly {
                inserted_placeholder,
            } => DeviceResult {
                success: true,
                records_written: usize::from(inserted_placeholder),
                message: "No coverage plans; device metadata saved".into(),
            },
            DeviceSync::NoCoverage => {
                // A fresh refresh that found neither plans nor metadata
                // invalidates whatever we stored before.
                let cleared = match self.reconciler.store().has_records(serial).await {
                    Ok(true) => self.reconciler.clear_serial(serial).await.unwrap_or(0),
                    _ => 0,
                };
                let message = if cleared > 0 {
                    format!("No coverage data found; cleared {cleared} stale record(s)")
                } else {
                    "No coverage data found for this device".into()
                };
                DeviceResult {
                    success: true,
                    records_written: 0,
                    message,
                }
            }
            DeviceSync::TenantDisabled { .. } => DeviceResult {
                success: false,
                records_written: 0,
                message: "Tenant credentials unavailable for this run".into(),
            },
            DeviceSync::Error(err) => DeviceResult {
                success: false,
                records_written: 0,
                message: err.to_string(),
            },
        }
    }

    /// Run the fleet loop over the inventory.
    pub async fn run(&self, filter: InventoryFilter) -> RunSummary {
        let started = Instant::now();
        let serials = self.inventory.list_serials(filter).await;
        let total = serials.len();

        self.progress
            .emit(&format!("Starting sync for {total} devices"), false);

        let mut synced = 0;
        let mut skipped = 0;
        let mut errors = 0;

        for (index, serial) in serials.iter().enumerate() {
            if self.abort.load(Ordering::Relaxed) {
                self.progress.emit("Sync aborted", true);
                break;
            }

            let position = index + 1;
            if self.config.heartbeat_every > 0 && position % self.config.heartbeat_every == 0 {
                self.progress
                    .emit(&format!("Processing device {position} of {total}"), false);
            }

            let serial = serial.trim();
            if serial.len() < MIN_SERIAL_LEN {
                skipped += 1;
                continue;
            }

            self.progress.emit(&format!("Processing {serial}..."), false);
            let made_requests;
            match self.sync_device(serial).await {
                DeviceSync::Saved { records } => {
                    made_requests = true;
                    synced += 1;
                    self.progress
                        .emit(&format!("{serial}: OK ({records} coverage records)"), false);
                }
                DeviceSync::MetadataOnly { .. } => {
                    made_requests = true;
                    synced += 1;
                    self.progress
                        .emit(&format!("{serial}: OK (device metadata only)"), false);
                }
                DeviceSync::NoCoverage => {
                    made_requests = true;
                    skipped += 1;
                    self.progress
                        .emit(&format!("{serial}: SKIP (no coverage)"), false);
                }
                DeviceSync::TenantDisabled { key } => {
                    made_requests = false;
                    skipped += 1;
                    self.progress.emit(
                        &format!("{serial}: SKIP (tenant {key} disabled for this run)"),
                        false,
                    );
                }
                DeviceSync::Error(err) if err.is_expected_skip() => {
                    // Expected steady state; kept out of error logs.
                    made_requests = matches!(err, SyncError::NotFound);
                    skipped += 1;
                    self.progress
                        .emit(&format!("{serial}: SKIP ({err})"), false);
                }
                DeviceSync::Error(err @ (SyncError::VendorError { .. }
                | SyncError::RateLimited { .. })) => {
                    made_requests = true;
                    skipped += 1;
                    warn!(%serial, error = %err, "device skipped");
                    self.progress
                        .emit(&format!("{serial}: SKIP ({err})"), true);
                }
                DeviceSync::Error(err) => {
                    made_requests = true;
                    errors += 1;
                    warn!(%serial, error = %err, "device sync failed");
                    self.progress
                        .emit(&format!("{serial}: ERROR ({err})"), true);
                }
            }

            // Space devices evenly across the window instead of bursting
            // to the cap and stalling.
            if made_requests && position < total {
                let spacing = self.window.lock().device_spacing();
                tokio::time::sleep(spacing).await;
            }
        }

        let summary = RunSummary {
            total,
            synced,
            skipped,
            errors,
            elapsed: started.elapsed(),
        };
        self.progress.emit(
            &format!(
                "Sync complete: {} synced, {} skipped, {} errors in {:.1}s",
                summary.synced,
                summary.skipped,
                summary.errors,
                summary.elapsed.as_secs_f64()
            ),
            false,
        );
        info!(
            total = summary.total,
            synced = summary.synced,
            skipped = summary.skipped,
            errors = summary.errors,
            "sync run finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::test_support::RecordingSink;
    use fleetcare_core::{MapCredentials, StaticInventory};
    use fleetcare_store::MemoryStore;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            window_size: Duration::from_millis(200),
            token_cooldown: Duration::ZERO,
            token_retry_fallback: Duration::from_millis(1),
            heartbeat_every: 2,
            ..EngineConfig::default()
        }
    }

    fn engine_with(
        credentials: MapCredentials,
        inventory: StaticInventory,
    ) -> (SyncEngine, Arc<MemoryStore>, RecordingSink) {
        let store = Arc::new(MemoryStore::new());
        let sink = RecordingSink::default();
        let engine = SyncEngine::new(
            Arc::new(credentials),
            Arc::new(inventory),
            store.clone() as Arc<dyn RecordStore>,
        )
        .unwrap()
        .with_config(fast_config())
        .with_progress(Arc::new(sink.clone()));
        (engine, store, sink)
    }

    #[tokio::test]
    async fn unconfigured_devices_skip_quietly() {
        let inventory = StaticInventory::new(vec!["C02AAAA11111".into(), "C02BBBB22222".into()]);
        let (engine, store, sink) = engine_with(MapCredentials::new(), inventory);

        let summary = engine.run(InventoryFilter::All).await;

        assert_eq!(summary.total, 2);
        assert_eq!(summary.synced, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.errors, 0);
        assert!(store.is_empty());
        // Expected skips never show up as error lines.
        assert_eq!(sink.error_count(), 0);
    }

    #[tokio::test]
    async fn short_serials_are_skipped_before_any_work() {
        let inventory = StaticInventory::new(vec!["SHORT".into()]);
        let (engine, store, _sink) = engine_with(MapCredentials::new(), inventory);

        let summary = engine.run(InventoryFilter::All).await;
        assert_eq!(summary.skipped, 1);
        assert!(store.is_empty());

        let result = engine.sync_one("TINY").await;
        assert!(!result.success);
        assert_eq!(result.message, "Invalid serial number");
    }

    #[tokio::test]
    async fn malformed_assertion_disables_the_tenant_for_the_run() {
        let credentials = MapCredentials::new()
            .with("API_URL", "https://api-business.apple.com/v1")
            .with("CLIENT_ASSERTION", "not-a-compact-token");
        let inventory =
            StaticInventory::new(vec!["C02AAAA11111".into(), "C02BBBB22222".into()]);
        let (engine, store, sink) = engine_with(credentials, inventory);

        let summary = engine.run(InventoryFilter::All).await;

        // First device burns the tenant, the second is skipped without
        // another parse attempt.
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.skipped, 1);
        assert!(store.is_empty());
        assert!(
            sink.messages()
                .iter()
                .any(|line| line.contains("tenant DEFAULT disabled"))
        );
    }

    #[tokio::test]
    async fn abort_stops_before_the_first_device() {
        let credentials = MapCredentials::new();
        let inventory = StaticInventory::new(vec!["C02AAAA11111".into()]);
        let (engine, _store, sink) = engine_with(credentials, inventory);

        engine.abort_handle().store(true, Ordering::Relaxed);
        let summary = engine.run(InventoryFilter::All).await;

        assert_eq!(summary.total, 1);
        assert_eq!(summary.synced + summary.skipped + summary.errors, 0);
        assert!(sink.messages().iter().any(|line| line == "Sync aborted"));
    }

    #[tokio::test]
    async fn heartbeat_lines_carry_device_position() {
        let inventory = StaticInventory::new(vec![
            "C02AAAA11111".into(),
            "C02BBBB22222".into(),
            "C02CCCC33333".into(),
            "C02DDDD44444".into(),
        ]);
        let (engine, _store, sink) = engine_with(MapCredentials::new(), inventory);

        engine.run(InventoryFilter::All).await;

        let messages = sink.messages();
        assert!(messages.iter().any(|line| line == "Processing device 2 of 4"));
        assert!(messages.iter().any(|line| line == "Processing device 4 of 4"));
    }
}
