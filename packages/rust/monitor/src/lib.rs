//! Remote asset monitoring.
//!
//! The [`AssetMonitor`] polls the site's asset listing endpoint and raises a
//! sticky "new content" flag when the listing changes. The flag is published
//! on a [`watch`] channel so the pipeline can react without polling the
//! monitor itself.

mod diff;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use url::Url;

use fragmentsync_shared::{AssetRecord, FragmentSyncError, PipelineConfig, Result};

pub use diff::{AssetDiff, diff_assets};

/// Maximum number of redirects to follow when fetching the asset listing.
const MAX_REDIRECTS: usize = 3;

/// Timeout for a single scan request.
const SCAN_TIMEOUT_SECS: u64 = 10;

/// User-Agent string for scan requests.
const USER_AGENT: &str = concat!("FragmentSync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Receives "new content available" notifications.
pub trait Notifier: Send + Sync {
    fn new_content(&self, diff: &AssetDiff);
}

/// Notifier that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn new_content(&self, diff: &AssetDiff) {
        info!(
            added = diff.added.len(),
            modified = diff.modified.len(),
            removed = diff.removed.len(),
            "new content available"
        );
    }
}

// ---------------------------------------------------------------------------
// AssetMonitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Monitoring => write!(f, "monitoring"),
        }
    }
}

struct Shared {
    client: Client,
    scan_url: Url,
    notifier: Arc<dyn Notifier>,
    /// Last successfully fetched listing.
    assets: Mutex<Vec<AssetRecord>>,
    flag: watch::Sender<bool>,
    /// Bumped on every detection, under the flag's lock.
    generation: AtomicU64,
    /// Cleared on stop so an in-flight scan cannot raise the flag afterwards.
    active: AtomicBool,
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls the remote asset listing and tracks whether new content was published.
pub struct AssetMonitor {
    shared: Arc<Shared>,
    interval: Duration,
    running: std::sync::Mutex<Option<Running>>,
}

impl AssetMonitor {
    pub fn new(config: &PipelineConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(SCAN_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                FragmentSyncError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        let (flag, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                scan_url: config.scan_url()?,
                notifier,
                assets: Mutex::new(Vec::new()),
                flag,
                generation: AtomicU64::new(0),
                active: AtomicBool::new(false),
            }),
            interval: Duration::from_millis(config.monitoring_interval_ms),
            running: std::sync::Mutex::new(None),
        })
    }

    pub fn state(&self) -> MonitorState {
        if self.lock_running().is_some() {
            MonitorState::Monitoring
        } else {
            MonitorState::Idle
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start polling: one scan now, then one per interval. No-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_monitoring(&self) {
        let mut running = self.lock_running();
        if running.is_some() {
            debug!("monitor already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        self.shared.active.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move { poll_loop(shared, period, stop_rx).await });

        *running = Some(Running {
            stop: stop_tx,
            handle,
        });
        info!(interval_ms = period.as_millis(), url = %self.shared.scan_url, "asset monitoring started");
    }

    /// Stop polling. A scan already in flight finishes but only updates the baseline.
    pub fn stop_monitoring(&self) {
        let _ = self.signal_stop();
    }

    /// Stop polling and wait for the poll loop to exit.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.signal_stop() {
            if let Err(e) = handle.await {
                warn!(error = %e, "poll loop ended abnormally");
            }
        }
    }

    fn signal_stop(&self) -> Option<JoinHandle<()>> {
        let running = self.lock_running().take()?;
        self.shared.active.store(false, Ordering::SeqCst);
        let _ = running.stop.send(true);
        info!("asset monitoring stopped");
        Some(running.handle)
    }

    /// Fetch the listing once and apply the detection rule.
    ///
    /// Returns whether this scan detected a change. Unlike the background
    /// loop, failures are returned to the caller.
    #[instrument(skip(self))]
    pub async fn scan_once(&self) -> Result<bool> {
        let assets = fetch_assets(&self.shared.client, &self.shared.scan_url).await?;
        Ok(self.shared.observe(assets, true).await)
    }

    /// Apply the detection rule to a freshly fetched listing.
    ///
    /// Raises the flag when a baseline exists and the listing differs from it.
    /// The listing becomes the new baseline either way.
    pub async fn observe(&self, assets: Vec<AssetRecord>) -> bool {
        self.shared.observe(assets, true).await
    }

    pub fn new_content_detected(&self) -> bool {
        *self.shared.flag.borrow()
    }

    pub fn clear_new_content_flag(&self) {
        if self.shared.flag.send_replace(false) {
            debug!("new content flag cleared");
        }
    }

    /// Number of detections so far. Pair with [`clear_new_content_flag_if`](Self::clear_new_content_flag_if).
    pub fn new_content_generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Clear the flag only if no detection happened after `generation` was read.
    ///
    /// Returns whether the flag was cleared.
    pub fn clear_new_content_flag_if(&self, generation: u64) -> bool {
        let cleared = self.shared.flag.send_if_modified(|raised| {
            if *raised && self.shared.generation.load(Ordering::SeqCst) == generation {
                *raised = false;
                true
            } else {
                false
            }
        });
        if cleared {
            debug!(generation, "new content flag cleared");
        }
        cleared
    }

    /// Receiver for the new-content flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.flag.subscribe()
    }

    /// The current baseline listing.
    pub async fn assets(&self) -> Vec<AssetRecord> {
        self.shared.assets.lock().await.clone()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AssetMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.signal_stop() {
            handle.abort();
        }
    }
}

impl Shared {
    async fn observe(&self, assets: Vec<AssetRecord>, may_raise: bool) -> bool {
        let mut baseline = self.assets.lock().await;

        let changed = !baseline.is_empty() && *baseline != assets;
        let diff = diff_assets(&baseline, &assets);
        *baseline = assets;
        drop(baseline);

        if !changed {
            return false;
        }
        if !may_raise {
            debug!("listing changed after stop, baseline updated only");
            return false;
        }

        self.flag.send_modify(|raised| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *raised = true;
        });
        self.notifier.new_content(&diff);
        true
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

async fn poll_loop(shared: Arc<Shared>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                match fetch_assets(&shared.client, &shared.scan_url).await {
                    Ok(assets) => {
                        let may_raise = shared.active.load(Ordering::SeqCst);
                        shared.observe(assets, may_raise).await;
                    }
                    Err(e) => warn!(error = %e, "asset scan failed"),
                }
                if *stop.borrow() {
                    break;
                }
            }
        }
    }

    debug!("poll loop exited");
}

/// GET the asset listing and parse it as a JSON array of [`AssetRecord`].
async fn fetch_assets(client: &Client, url: &Url) -> Result<Vec<AssetRecord>> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| FragmentSyncError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FragmentSyncError::Network(format!("{url}: HTTP {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| FragmentSyncError::Network(format!("{url}: failed to read body: {e}")))?;

    serde_json::from_str(&body)
        .map_err(|e| FragmentSyncError::validation(format!("{url}: invalid asset listing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragmentsync_shared::AssetType;
    use std::sync::atomic::AtomicUsize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CountingNotifier(AtomicUsize);

    impl Notifier for CountingNotifier {
        fn new_content(&self, _diff: &AssetDiff) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn asset(path: &str) -> AssetRecord {
        AssetRecord {
            path: path.into(),
            asset_type: AssetType::Html,
            last_modified: 1_700_000_000_000,
            size: 512,
        }
    }

    fn monitor_for(origin: &str, notifier: Arc<dyn Notifier>) -> AssetMonitor {
        let config = PipelineConfig {
            origin: origin.to_string(),
            monitoring_interval_ms: 50,
            ..PipelineConfig::default()
        };
        AssetMonitor::new(&config, notifier).unwrap()
    }

    #[tokio::test]
    async fn test_detection_sequence() {
        let notifier = Arc::new(CountingNotifier::default());
        let monitor = monitor_for("http://localhost:5173", notifier.clone());

        monitor.observe(vec![asset("a.html")]).await;
        assert!(!monitor.new_content_detected());

        monitor.observe(vec![asset("a.html")]).await;
        assert!(!monitor.new_content_detected());

        assert!(monitor.observe(vec![asset("a.html"), asset("b.html")]).await);
        assert!(monitor.new_content_detected());
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);

        // Sticky until cleared, even if the next listing is unchanged.
        monitor.observe(vec![asset("a.html"), asset("b.html")]).await;
        assert!(monitor.new_content_detected());

        monitor.clear_new_content_flag();
        assert!(!monitor.new_content_detected());
        assert_eq!(monitor.assets().await.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_baseline_never_raises() {
        let monitor = monitor_for("http://localhost:5173", Arc::new(LogNotifier));
        monitor.observe(Vec::new()).await;
        assert!(!monitor.observe(vec![asset("a.html")]).await);
        assert!(!monitor.new_content_detected());
    }

    #[tokio::test]
    async fn test_subscribe_sees_flag() {
        let monitor = monitor_for("http://localhost:5173", Arc::new(LogNotifier));
        let mut rx = monitor.subscribe();

        monitor.observe(vec![asset("a.html")]).await;
        monitor.observe(vec![asset("b.html")]).await;

        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_scan_once_parses_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/builder/scan"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"path":"hero.html","type":"html","lastModified":1700000000000,"size":512}]"#,
            ))
            .mount(&server)
            .await;

        let monitor = monitor_for(&server.uri(), Arc::new(LogNotifier));
        assert!(!monitor.scan_once().await.unwrap());
        assert_eq!(monitor.assets().await, vec![asset("hero.html")]);
    }

    #[tokio::test]
    async fn test_scan_failures_are_errors_without_flag() {
        let server = MockServer::start().await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let monitor = monitor_for(&server.uri(), Arc::new(LogNotifier));
        monitor.observe(vec![asset("a.html")]).await;

        assert!(monitor.scan_once().await.is_err());
        assert!(!monitor.new_content_detected());
        // Baseline untouched by a failed scan.
        assert_eq!(monitor.assets().await, vec![asset("a.html")]);
    }

    #[tokio::test]
    async fn test_background_loop_survives_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let monitor = monitor_for(&server.uri(), Arc::new(LogNotifier));
        monitor.start_monitoring();
        assert_eq!(monitor.state(), MonitorState::Monitoring);

        tokio::time::sleep(Duration::from_millis(180)).await;
        assert!(!monitor.new_content_detected());
        assert_eq!(monitor.state(), MonitorState::Monitoring);

        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() >= 2);

        monitor.stop_monitoring();
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_background_loop_detects_change() {
        let server = MockServer::start().await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"path":"a.html","type":"html","lastModified":1,"size":1}]"#),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"path":"a.html","type":"html","lastModified":1,"size":1},{"path":"b.css","type":"css","lastModified":2,"size":1}]"#,
            ))
            .mount(&server)
            .await;

        let monitor = monitor_for(&server.uri(), Arc::new(LogNotifier));
        let mut rx = monitor.subscribe();
        monitor.start_monitoring();

        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|raised| *raised))
            .await
            .expect("flag raised in time")
            .unwrap();

        monitor.stop_monitoring();
        assert!(monitor.new_content_detected());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_is_safe() {
        let monitor = monitor_for("http://127.0.0.1:9", Arc::new(LogNotifier));
        monitor.stop_monitoring();
        assert_eq!(monitor.state(), MonitorState::Idle);

        monitor.start_monitoring();
        monitor.start_monitoring();
        assert_eq!(monitor.state(), MonitorState::Monitoring);

        monitor.stop_monitoring();
        monitor.stop_monitoring();
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_observe_after_stop_only_updates_baseline() {
        let monitor = monitor_for("http://localhost:5173", Arc::new(LogNotifier));
        monitor.observe(vec![asset("a.html")]).await;

        assert!(!monitor.shared.observe(vec![asset("b.html")], false).await);
        assert!(!monitor.new_content_detected());
        assert_eq!(monitor.assets().await, vec![asset("b.html")]);
    }

    #[tokio::test]
    async fn test_clear_if_keeps_later_detection() {
        let monitor = monitor_for("http://localhost:5173", Arc::new(LogNotifier));
        monitor.observe(vec![asset("a.html")]).await;
        monitor.observe(vec![asset("b.html")]).await;
        let seen = monitor.new_content_generation();

        // Another change lands before the caller gets round to clearing.
        monitor.observe(vec![asset("c.html")]).await;
        assert!(!monitor.clear_new_content_flag_if(seen));
        assert!(monitor.new_content_detected());

        let seen = monitor.new_content_generation();
        assert!(monitor.clear_new_content_flag_if(seen));
        assert!(!monitor.new_content_detected());
        assert!(!monitor.clear_new_content_flag_if(seen));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_scan() {
        let server = MockServer::start().await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"path":"a.html","type":"html","lastModified":1,"size":1}]"#)
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let monitor = monitor_for(&server.uri(), Arc::new(LogNotifier));
        monitor.start_monitoring();
        tokio::time::sleep(Duration::from_millis(50)).await;

        monitor.shutdown().await;
        assert_eq!(monitor.state(), MonitorState::Idle);
        // The scan that was in flight completed before shutdown returned.
        assert_eq!(monitor.assets().await.len(), 1);
        assert!(!monitor.new_content_detected());

        let requests = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), requests);
    }
}
