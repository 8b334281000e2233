//! The content pipeline: config → processor → fetcher ← monitor.
//!
//! [`ContentPipeline`] owns one instance of each stage, built from a single
//! explicit [`PipelineConfig`]. The monitor signals the fetcher through its
//! watch channel when auto-sync is running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use fragmentsync_fetcher::{ContentFetcher, FetchOutcome, LoadReport};
use fragmentsync_monitor::{AssetMonitor, LogNotifier, MonitorState, Notifier};
use fragmentsync_processor::{ProcessContext, Processor};
use fragmentsync_shared::{
    AnalyticsEvent, ConfigOverride, EventKind, PipelineConfig, Result, Theme,
};
use fragmentsync_storage::Storage;

use crate::analytics;
use crate::render::{RenderedSection, render_section};
use crate::session::Session;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting load status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once per component after a load settles.
    fn component_loaded(&self, outcome: &FetchOutcome, current: usize, total: usize);
    /// Called when the load completes.
    fn done(&self, report: &LoadReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn component_loaded(&self, _outcome: &FetchOutcome, _current: usize, _total: usize) {}
    fn done(&self, _report: &LoadReport) {}
}

// ---------------------------------------------------------------------------
// Config persistence
// ---------------------------------------------------------------------------

/// `base` with the persisted override applied.
pub async fn effective_config(base: &PipelineConfig, storage: &Storage) -> Result<PipelineConfig> {
    let over = storage.load_config_override().await?;
    let config = base.merged(&over);
    config.validate()?;
    Ok(config)
}

/// Edit the persisted override, validate the result, then save it.
///
/// Returns the new effective config. Nothing is written if the edited
/// override would produce an invalid config.
#[instrument(skip_all)]
pub async fn update_and_persist(
    storage: &Storage,
    base: &PipelineConfig,
    update: impl FnOnce(&mut ConfigOverride),
) -> Result<PipelineConfig> {
    let mut over = storage.load_config_override().await?;
    update(&mut over);

    let config = base.merged(&over);
    config.validate()?;

    storage.save_config_override(&over).await?;
    info!("config override saved");
    Ok(config)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Point-in-time view of the pipeline for dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    pub enabled: bool,
    pub preview_mode: bool,
    pub theme: Theme,
    pub monitor: MonitorState,
    pub new_content: bool,
    pub auto_sync: bool,
    pub loaded: usize,
    pub failed: usize,
    pub enabled_components: usize,
}

// ---------------------------------------------------------------------------
// ContentPipeline
// ---------------------------------------------------------------------------

/// The running auto-sync loop and its stop signal.
struct SyncTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ContentPipeline {
    config: PipelineConfig,
    storage: Arc<Storage>,
    fetcher: Arc<ContentFetcher>,
    monitor: Arc<AssetMonitor>,
    theme: RwLock<Theme>,
    session: RwLock<Session>,
    sync_task: std::sync::Mutex<Option<SyncTask>>,
    /// Serializes the analytics buffer's load-modify-save.
    analytics_lock: Mutex<()>,
}

impl ContentPipeline {
    /// Build the pipeline from an explicit config, notifying through the log.
    pub async fn open(config: PipelineConfig, storage: Arc<Storage>) -> Result<Self> {
        Self::open_with_notifier(config, storage, Arc::new(LogNotifier)).await
    }

    pub async fn open_with_notifier(
        config: PipelineConfig,
        storage: Arc<Storage>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let theme = storage.get_theme().await?.unwrap_or_default();
        let session = Session::anonymous();

        let processor = Processor::new(ProcessContext {
            theme,
            bindings: session.bindings(),
        });
        let fetcher = ContentFetcher::new(config.clone(), processor, storage.clone())?;
        let monitor = AssetMonitor::new(&config, notifier)?;

        debug!(%theme, components = config.enabled_components().len(), "pipeline opened");

        Ok(Self {
            config,
            storage,
            fetcher: Arc::new(fetcher),
            monitor: Arc::new(monitor),
            theme: RwLock::new(theme),
            session: RwLock::new(session),
            sync_task: std::sync::Mutex::new(None),
            analytics_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    pub fn monitor(&self) -> &AssetMonitor {
        &self.monitor
    }

    pub async fn theme(&self) -> Theme {
        *self.theme.read().await
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Load all enabled components once.
    ///
    /// A disabled pipeline loads nothing and every section renders its fallback.
    #[instrument(skip_all)]
    pub async fn load(&self, progress: &dyn ProgressReporter) -> Result<LoadReport> {
        if !self.config.enabled {
            info!("pipeline disabled, skipping load");
            let report = LoadReport {
                outcomes: Vec::new(),
                duration: Duration::ZERO,
            };
            progress.done(&report);
            return Ok(report);
        }

        progress.phase("Loading content");
        let report = self.fetcher.load_all_content().await?;
        self.report_outcomes(&report, progress);
        Ok(report)
    }

    /// Clear the content cache and reload everything.
    ///
    /// Like [`load`](Self::load), a disabled pipeline does nothing.
    #[instrument(skip_all)]
    pub async fn refresh(&self, progress: &dyn ProgressReporter) -> Result<LoadReport> {
        if !self.config.enabled {
            info!("pipeline disabled, skipping refresh");
            let report = LoadReport {
                outcomes: Vec::new(),
                duration: Duration::ZERO,
            };
            progress.done(&report);
            return Ok(report);
        }

        progress.phase("Clearing cache");
        let report = self.fetcher.refresh_content().await?;
        self.report_outcomes(&report, progress);
        Ok(report)
    }

    fn report_outcomes(&self, report: &LoadReport, progress: &dyn ProgressReporter) {
        let total = report.outcomes.len();
        for (i, outcome) in report.outcomes.iter().enumerate() {
            progress.component_loaded(outcome, i + 1, total);
        }
        progress.done(report);
    }

    // -----------------------------------------------------------------------
    // Auto-sync
    // -----------------------------------------------------------------------

    /// Start the monitor and refresh whenever it reports new content.
    ///
    /// Does nothing when `auto_sync` is off or sync is already running. In
    /// preview mode refreshes are skipped and the flag stays raised until
    /// preview ends or someone clears it. A change detected while a refresh
    /// is running keeps the flag raised and triggers another refresh.
    pub fn start_auto_sync(&self) {
        if !self.config.enabled || !self.config.auto_sync {
            info!("auto sync disabled by config");
            return;
        }

        let mut task = self.lock_sync_task();
        if task.is_some() {
            debug!("auto sync already running");
            return;
        }

        self.monitor.start_monitoring();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(sync_loop(
            self.fetcher.clone(),
            self.monitor.clone(),
            stop_rx,
        ));

        *task = Some(SyncTask {
            stop: stop_tx,
            handle,
        });
        info!("auto sync started");
    }

    /// Stop the monitor and the sync loop.
    ///
    /// A refresh already in progress runs to completion in the background.
    /// Use [`shutdown`](Self::shutdown) to wait for it.
    pub fn stop_auto_sync(&self) {
        self.monitor.stop_monitoring();
        let _ = self.signal_sync_stop();
    }

    /// Stop auto sync and wait for the sync loop and the poll loop to exit.
    pub async fn shutdown(&self) {
        let task = self.signal_sync_stop();
        self.monitor.shutdown().await;
        if let Some(handle) = task {
            if let Err(e) = handle.await {
                warn!(error = %e, "auto sync loop ended abnormally");
            }
        }
    }

    pub fn auto_sync_running(&self) -> bool {
        self.lock_sync_task().is_some()
    }

    fn signal_sync_stop(&self) -> Option<JoinHandle<()>> {
        let task = self.lock_sync_task().take()?;
        let _ = task.stop.send(true);
        info!("auto sync stopped");
        Some(task.handle)
    }

    fn lock_sync_task(&self) -> std::sync::MutexGuard<'_, Option<SyncTask>> {
        self.sync_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Rendering and analytics
    // -----------------------------------------------------------------------

    /// How `component` renders right now.
    pub async fn render(&self, component: &str) -> Result<RenderedSection> {
        let content = self.fetcher.content().await;
        let failures = self.fetcher.failures().await;
        render_section(&self.config, &content, &failures, component)
    }

    /// Every enabled component in render order.
    pub async fn render_all(&self) -> Result<Vec<(String, RenderedSection)>> {
        let content = self.fetcher.content().await;
        let failures = self.fetcher.failures().await;

        self.config
            .enabled_components()
            .into_iter()
            .map(|(name, _)| {
                render_section(&self.config, &content, &failures, name)
                    .map(|section| (name.to_string(), section))
            })
            .collect()
    }

    /// Record that `component` was mounted at `location`.
    ///
    /// Returns the recorded event, or `None` when analytics is disabled.
    pub async fn mount(&self, component: &str, location: &str) -> Result<Option<AnalyticsEvent>> {
        self.config.component(component)?;
        if !self.config.analytics_enabled {
            return Ok(None);
        }

        let identity = self.session.read().await.identity();
        let event = AnalyticsEvent::new(component, EventKind::Mount, identity, location);
        let _guard = self.analytics_lock.lock().await;
        analytics::record_event(&self.storage, event.clone()).await?;
        Ok(Some(event))
    }

    /// Newest `limit` analytics events, newest first.
    pub async fn analytics(&self, limit: usize) -> Result<Vec<AnalyticsEvent>> {
        analytics::recent_events(&self.storage, limit).await
    }

    // -----------------------------------------------------------------------
    // Runtime settings
    // -----------------------------------------------------------------------

    /// Bind later fetches to `session`.
    pub async fn set_session(&self, session: Session) {
        let theme = *self.theme.read().await;
        self.fetcher
            .set_processor(Processor::new(ProcessContext {
                theme,
                bindings: session.bindings(),
            }))
            .await;
        info!(authenticated = session.is_authenticated(), "session updated");
        *self.session.write().await = session;
    }

    /// Persist `theme` and use it for later fetches.
    pub async fn set_theme(&self, theme: Theme) -> Result<()> {
        self.storage.set_theme(theme).await?;
        *self.theme.write().await = theme;

        let bindings = self.session.read().await.bindings();
        self.fetcher
            .set_processor(Processor::new(ProcessContext { theme, bindings }))
            .await;
        info!(%theme, "theme updated");
        Ok(())
    }

    /// Toggle preview mode now and persist it for later runs.
    pub async fn set_preview_mode(&self, on: bool) -> Result<()> {
        update_and_persist(&self.storage, &self.config, |over| {
            over.preview_mode = Some(on);
        })
        .await?;
        self.fetcher.set_preview_mode(on);
        Ok(())
    }

    pub async fn status(&self) -> PipelineStatus {
        let content = self.fetcher.content().await;
        let failures = self.fetcher.failures().await;
        PipelineStatus {
            enabled: self.config.enabled,
            preview_mode: self.fetcher.preview_mode(),
            theme: *self.theme.read().await,
            monitor: self.monitor.state(),
            new_content: self.monitor.new_content_detected(),
            auto_sync: self.auto_sync_running(),
            loaded: content.len(),
            failed: failures.len(),
            enabled_components: self.config.enabled_components().len(),
        }
    }
}

impl Drop for ContentPipeline {
    fn drop(&mut self) {
        // The loop owns its own handles, so a running refresh still completes.
        let _ = self.signal_sync_stop();
    }
}

/// Wait for the new-content flag, refresh, repeat until `stop` fires.
///
/// The stop signal is only raced against waiting. A refresh that has
/// started always runs to completion.
async fn sync_loop(
    fetcher: Arc<ContentFetcher>,
    monitor: Arc<AssetMonitor>,
    mut stop: watch::Receiver<bool>,
) {
    let mut rx = monitor.subscribe();
    let retry = monitor.interval();

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            raised = async { rx.wait_for(|raised| *raised).await.map(|_| ()) } => {
                if raised.is_err() {
                    break;
                }
            }
        }

        // Read before refreshing: a later detection must survive the clear.
        let generation = monitor.new_content_generation();

        match fetcher.auto_refresh().await {
            Ok(Some(report)) => {
                if monitor.clear_new_content_flag_if(generation) {
                    info!(
                        live = report.live(),
                        cached = report.from_cache(),
                        "auto sync refreshed content"
                    );
                } else {
                    info!("content changed during refresh, syncing again");
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "auto sync refresh failed"),
        }

        // Flag is still raised: retry on the next poll period or when it changes.
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(retry) => {}
        }
    }

    debug!("auto sync loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use fragmentsync_shared::{ComponentConfig, ComponentOverride, Identity};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn component(path: &str, priority: i32, fallback: Option<&str>) -> ComponentConfig {
        ComponentConfig {
            path: path.into(),
            enabled: true,
            priority,
            fallback_component: fallback.map(String::from),
        }
    }

    fn test_config(origin: &str) -> PipelineConfig {
        PipelineConfig {
            origin: origin.to_string(),
            monitoring_interval_ms: 50,
            components: BTreeMap::from([
                ("hero".to_string(), component("hero.html", 1, Some("Hero"))),
                ("pricing".to_string(), component("pricing.html", 2, Some("Pricing"))),
            ]),
            ..PipelineConfig::default()
        }
    }

    async fn open(config: PipelineConfig) -> (ContentPipeline, std::path::PathBuf) {
        let tmp = std::env::temp_dir().join(format!("fs_pipeline_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.unwrap());
        let pipeline = ContentPipeline::open(config, storage).await.unwrap();
        (pipeline, tmp)
    }

    async fn mount_fragment(server: &MockServer, at: &str, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn load_and_render_sections() {
        let server = MockServer::start().await;
        mount_fragment(&server, "/builder/hero.html", 200, "<p>Hi</p>").await;
        mount_fragment(&server, "/builder/pricing.html", 404, "").await;

        let (pipeline, tmp) = open(test_config(&server.uri())).await;
        let report = pipeline.load(&SilentProgress).await.unwrap();
        assert_eq!(report.live(), 1);

        let sections = pipeline.render_all().await.unwrap();
        assert_eq!(sections[0].0, "hero");
        assert!(matches!(
            &sections[0].1,
            RenderedSection::Fragment { html } if html.contains("<p>Hi</p>")
        ));
        assert_eq!(
            sections[1].1,
            RenderedSection::Fallback {
                fallback_component: "Pricing".into()
            }
        );

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn processing_failure_only_affects_one_section() {
        let server = MockServer::start().await;
        mount_fragment(&server, "/builder/hero.html", 200, "<p>Hi</p>").await;
        mount_fragment(&server, "/builder/pricing.html", 200, "<script>unterminated(").await;

        let (pipeline, tmp) = open(test_config(&server.uri())).await;
        pipeline.load(&SilentProgress).await.unwrap();

        assert_eq!(pipeline.render("hero").await.unwrap().kind(), "fragment");
        assert_eq!(pipeline.render("pricing").await.unwrap().kind(), "error");

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn disabled_pipeline_fetches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>x</p>"))
            .expect(0)
            .mount(&server)
            .await;

        let config = PipelineConfig {
            enabled: false,
            ..test_config(&server.uri())
        };
        let (pipeline, tmp) = open(config).await;
        let report = pipeline.load(&SilentProgress).await.unwrap();

        assert!(report.outcomes.is_empty());
        assert_eq!(pipeline.render("hero").await.unwrap().kind(), "fallback");
        server.verify().await;

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn disabled_pipeline_refresh_is_a_no_op() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>x</p>"))
            .expect(0)
            .mount(&server)
            .await;

        let config = PipelineConfig {
            enabled: false,
            ..test_config(&server.uri())
        };
        let (pipeline, tmp) = open(config).await;
        pipeline
            .storage()
            .put_cache_entry("hero", "<p>cached</p>", 1)
            .await
            .unwrap();

        let report = pipeline.refresh(&SilentProgress).await.unwrap();

        assert!(report.outcomes.is_empty());
        assert!(pipeline.storage().get_cache_entry("hero").await.unwrap().is_some());
        server.verify().await;

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn session_bindings_apply_to_later_fetches() {
        let server = MockServer::start().await;
        mount_fragment(
            &server,
            "/builder/hero.html",
            200,
            r#"<a data-builder-key="cta-primary">CTA</a>"#,
        )
        .await;
        mount_fragment(&server, "/builder/pricing.html", 404, "").await;

        let (pipeline, tmp) = open(test_config(&server.uri())).await;
        pipeline.load(&SilentProgress).await.unwrap();
        let anonymous = pipeline.fetcher().content().await;
        assert!(anonymous.get("hero").unwrap().contains("Get Started Free"));

        pipeline.set_session(Session::user("u-1")).await;
        pipeline.load(&SilentProgress).await.unwrap();
        let signed_in = pipeline.fetcher().content().await;
        assert!(signed_in.get("hero").unwrap().contains("Go to Dashboard"));

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn mount_records_identity() {
        let (pipeline, tmp) = open(test_config("http://localhost:5173")).await;
        pipeline.set_session(Session::user("u-7")).await;

        let event = pipeline.mount("hero", "/pricing").await.unwrap().unwrap();
        assert_eq!(event.identity, Identity::User("u-7".into()));
        assert_eq!(event.kind, EventKind::Mount);

        let recent = pipeline.analytics(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].location, "/pricing");

        assert!(pipeline.mount("sidebar", "/").await.is_err());

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mounts_are_all_recorded() {
        let (pipeline, tmp) = open(test_config("http://localhost:5173")).await;
        let pipeline = Arc::new(pipeline);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.mount("hero", &format!("/page-{i}")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let recent = pipeline.analytics(100).await.unwrap();
        assert_eq!(recent.len(), 20);

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn mount_skipped_when_analytics_disabled() {
        let config = PipelineConfig {
            analytics_enabled: false,
            ..test_config("http://localhost:5173")
        };
        let (pipeline, tmp) = open(config).await;
        assert!(pipeline.mount("hero", "/").await.unwrap().is_none());
        assert!(pipeline.analytics(10).await.unwrap().is_empty());

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn preview_mode_persists_through_override() {
        let (pipeline, tmp) = open(test_config("http://localhost:5173")).await;
        pipeline.set_preview_mode(true).await.unwrap();

        assert!(pipeline.fetcher().preview_mode());
        let over = pipeline.storage().load_config_override().await.unwrap();
        assert_eq!(over.preview_mode, Some(true));

        let effective = effective_config(pipeline.config(), pipeline.storage())
            .await
            .unwrap();
        assert!(effective.preview_mode);

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn update_and_persist_rejects_invalid_override() {
        let tmp = std::env::temp_dir().join(format!("fs_pipeline_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.unwrap();
        let base = PipelineConfig::default();

        let updated = update_and_persist(&storage, &base, |over| {
            over.components.insert(
                "hero".into(),
                ComponentOverride {
                    priority: Some(50),
                    ..ComponentOverride::default()
                },
            );
        })
        .await
        .unwrap();
        assert_eq!(updated.component("hero").unwrap().priority, 50);

        let rejected = update_and_persist(&storage, &base, |over| {
            over.components.insert(
                "faq".into(),
                ComponentOverride {
                    path: Some("../secrets.html".into()),
                    ..ComponentOverride::default()
                },
            );
        })
        .await;
        assert!(rejected.is_err());

        let saved = storage.load_config_override().await.unwrap();
        assert!(!saved.components.contains_key("faq"));
        assert_eq!(saved.components["hero"].priority, Some(50));

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn theme_is_persisted_and_injected() {
        let server = MockServer::start().await;
        mount_fragment(&server, "/builder/hero.html", 200, "<style>h1{}</style>").await;
        mount_fragment(&server, "/builder/pricing.html", 404, "").await;

        let (pipeline, tmp) = open(test_config(&server.uri())).await;
        pipeline.set_theme(Theme::Dark).await.unwrap();
        pipeline.load(&SilentProgress).await.unwrap();

        assert_eq!(pipeline.storage().get_theme().await.unwrap(), Some(Theme::Dark));
        let content = pipeline.fetcher().content().await;
        assert!(content.get("hero").unwrap().contains("color-scheme:dark;"));

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn auto_sync_refreshes_on_new_content() {
        let server = MockServer::start().await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"path":"hero.html","type":"html","lastModified":1,"size":1}]"#),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"path":"hero.html","type":"html","lastModified":2,"size":1}]"#),
            )
            .mount(&server)
            .await;
        mount_fragment(&server, "/builder/hero.html", 200, "<p>New</p>").await;
        mount_fragment(&server, "/builder/pricing.html", 404, "").await;

        let (pipeline, tmp) = open(test_config(&server.uri())).await;
        pipeline.start_auto_sync();
        assert!(pipeline.auto_sync_running());

        let p = &pipeline;
        wait_until(|| async move { p.fetcher().content().await.is_loaded("hero") }).await;
        wait_until(|| async move { !p.monitor().new_content_detected() }).await;

        pipeline.stop_auto_sync();
        assert!(!pipeline.auto_sync_running());
        assert_eq!(pipeline.monitor().state(), MonitorState::Idle);

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn auto_sync_skipped_in_preview() {
        let server = MockServer::start().await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"path":"hero.html","type":"html","lastModified":1,"size":1}]"#),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(path("/api/builder/scan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"path":"hero.html","type":"html","lastModified":2,"size":1}]"#),
            )
            .mount(&server)
            .await;
        Mock::given(path("/builder/hero.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>x</p>"))
            .expect(0)
            .mount(&server)
            .await;

        let config = PipelineConfig {
            preview_mode: true,
            ..test_config(&server.uri())
        };
        let (pipeline, tmp) = open(config).await;
        pipeline.start_auto_sync();

        let p = &pipeline;
        wait_until(|| async move { p.monitor().new_content_detected() }).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(pipeline.monitor().new_content_detected());

        pipeline.stop_auto_sync();
        server.verify().await;

        let _ = std::fs::remove_file(&tmp);
    }

    fn hero_requests(requests: &[wiremock::Request]) -> usize {
        requests
            .iter()
            .filter(|r| r.url.path() == "/builder/hero.html")
            .count()
    }

    fn listing(paths: &[&str]) -> Vec<fragmentsync_shared::AssetRecord> {
        paths
            .iter()
            .map(|p| fragmentsync_shared::AssetRecord {
                path: (*p).into(),
                asset_type: fragmentsync_shared::AssetType::Html,
                last_modified: 1,
                size: 1,
            })
            .collect()
    }

    #[tokio::test]
    async fn change_during_refresh_triggers_another() {
        let server = MockServer::start().await;
        Mock::given(path("/builder/hero.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>Hi</p>")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        mount_fragment(&server, "/builder/pricing.html", 404, "").await;

        let (pipeline, tmp) = open(test_config(&server.uri())).await;
        pipeline.start_auto_sync();

        // Listings are fed by hand; the scan endpoint is unmocked and just fails.
        let monitor = pipeline.monitor();
        monitor.observe(listing(&["a.html"])).await;
        monitor.observe(listing(&["a.html", "b.html"])).await;

        let s = &server;
        wait_until(|| async move { hero_requests(&s.received_requests().await.unwrap()) == 1 }).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.observe(listing(&["a.html", "b.html", "c.html"])).await;

        wait_until(|| async move { hero_requests(&s.received_requests().await.unwrap()) >= 2 }).await;
        let p = &pipeline;
        wait_until(|| async move { !p.monitor().new_content_detected() }).await;

        pipeline.shutdown().await;
        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn shutdown_lets_running_refresh_finish() {
        let server = MockServer::start().await;
        Mock::given(path("/builder/hero.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>v1</p>"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(path("/builder/hero.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>v2</p>")
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;
        mount_fragment(&server, "/builder/pricing.html", 404, "").await;

        let (pipeline, tmp) = open(test_config(&server.uri())).await;
        pipeline.load(&SilentProgress).await.unwrap();
        pipeline.start_auto_sync();

        let monitor = pipeline.monitor();
        monitor.observe(listing(&["a.html"])).await;
        monitor.observe(listing(&["a.html", "b.html"])).await;

        let s = &server;
        wait_until(|| async move { hero_requests(&s.received_requests().await.unwrap()) == 2 }).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (_, during) = tokio::join!(pipeline.shutdown(), async {
            pipeline.render("hero").await.unwrap()
        });
        assert!(matches!(
            during,
            RenderedSection::Fragment { ref html } if html.contains("<p>v1</p>")
        ));

        assert!(!pipeline.auto_sync_running());
        let content = pipeline.fetcher().content().await;
        assert!(content.get("hero").unwrap().contains("<p>v2</p>"));
        let cached = pipeline.storage().get_cache_entry("hero").await.unwrap();
        assert!(cached.unwrap().content.contains("<p>v2</p>"));
        assert!(!pipeline.monitor().new_content_detected());

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn stop_auto_sync_keeps_loaded_content() {
        let server = MockServer::start().await;
        Mock::given(path("/builder/hero.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>v1</p>"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(path("/builder/hero.html"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>v2</p>")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        mount_fragment(&server, "/builder/pricing.html", 404, "").await;

        let (pipeline, tmp) = open(test_config(&server.uri())).await;
        pipeline.load(&SilentProgress).await.unwrap();
        pipeline.start_auto_sync();

        let monitor = pipeline.monitor();
        monitor.observe(listing(&["a.html"])).await;
        monitor.observe(listing(&["a.html", "b.html"])).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        pipeline.stop_auto_sync();

        assert_eq!(pipeline.render("hero").await.unwrap().kind(), "fragment");
        assert_eq!(pipeline.fetcher().content().await.len(), 1);

        // The refresh in progress still lands and repopulates the cache.
        let p = &pipeline;
        wait_until(|| async move {
            p.fetcher()
                .content()
                .await
                .get("hero")
                .is_some_and(|html| html.contains("<p>v2</p>"))
        })
        .await;
        assert!(p.storage().get_cache_entry("hero").await.unwrap().is_some());

        let _ = std::fs::remove_file(&tmp);
    }

    #[tokio::test]
    async fn status_reflects_state() {
        let (pipeline, tmp) = open(test_config("http://localhost:5173")).await;
        let status = pipeline.status().await;
        assert!(status.enabled);
        assert!(!status.preview_mode);
        assert_eq!(status.monitor, MonitorState::Idle);
        assert_eq!(status.enabled_components, 2);
        assert_eq!(status.loaded, 0);

        let _ = std::fs::remove_file(&tmp);
    }
}
