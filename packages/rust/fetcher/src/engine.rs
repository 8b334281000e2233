//! Concurrent fragment fetcher with local cache fallback.
//!
//! Every enabled component is fetched in its own task. Results are settled
//! together and applied in one pass: processed, persisted to the cache, and
//! swapped into the [`ContentMap`] as a whole.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use url::Url;

use fragmentsync_processor::{Processor, TrustedFragment};
use fragmentsync_shared::{ContentMap, FragmentSyncError, PipelineConfig, Result, now_ms};
use fragmentsync_storage::Storage;

/// User-Agent string for fragment requests.
const USER_AGENT: &str = concat!("FragmentSync/", env!("CARGO_PKG_VERSION"));

/// Query parameter used to bypass intermediary caches in preview mode.
const CACHE_BUST_PARAM: &str = "t";

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Where a component's content came from on the last load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Fetched and processed. `changed` is false when it matches the cached copy.
    Live { changed: bool },
    /// The fetch failed and the cached copy was used.
    Cache { stale: bool },
    /// The fetch failed and nothing was cached.
    Unavailable,
    /// The fragment was fetched but could not be processed.
    ProcessingFailed { message: String },
}

/// Result of loading one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub component: String,
    pub source: ContentSource,
}

impl FetchOutcome {
    /// Whether the component ended up with content in the map.
    pub fn is_loaded(&self) -> bool {
        matches!(
            self.source,
            ContentSource::Live { .. } | ContentSource::Cache { .. }
        )
    }
}

/// Summary of a full load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// One outcome per enabled component, in load order.
    pub outcomes: Vec<FetchOutcome>,
    pub duration: Duration,
}

impl LoadReport {
    pub fn live(&self) -> usize {
        self.count(|s| matches!(s, ContentSource::Live { .. }))
    }

    pub fn from_cache(&self) -> usize {
        self.count(|s| matches!(s, ContentSource::Cache { .. }))
    }

    pub fn unavailable(&self) -> usize {
        self.count(|s| matches!(s, ContentSource::Unavailable))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ContentSource::ProcessingFailed { .. }))
    }

    pub fn outcome(&self, component: &str) -> Option<&FetchOutcome> {
        self.outcomes.iter().find(|o| o.component == component)
    }

    fn count(&self, pred: impl Fn(&ContentSource) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.source)).count()
    }
}

/// What a single resolution produced, before it is applied to shared state.
struct Resolved {
    outcome: FetchOutcome,
    html: Option<String>,
}

// ---------------------------------------------------------------------------
// ContentFetcher
// ---------------------------------------------------------------------------

/// Fetches fragments, runs them through the processor and owns the live [`ContentMap`].
pub struct ContentFetcher {
    config: PipelineConfig,
    client: Client,
    storage: Arc<Storage>,
    processor: RwLock<Processor>,
    content: RwLock<ContentMap>,
    /// Components whose last fetched fragment failed to process, with the reason.
    failures: RwLock<BTreeMap<String, String>>,
    preview: AtomicBool,
    /// Last cache timestamp handed out; keeps persisted stamps strictly increasing.
    last_stamp: AtomicI64,
}

impl ContentFetcher {
    /// Create a fetcher for `config`. Preview mode starts at `config.preview_mode`.
    pub fn new(config: PipelineConfig, processor: Processor, storage: Arc<Storage>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                FragmentSyncError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        let preview = AtomicBool::new(config.preview_mode);
        Ok(Self {
            config,
            client,
            storage,
            processor: RwLock::new(processor),
            content: RwLock::new(ContentMap::new()),
            failures: RwLock::new(BTreeMap::new()),
            preview,
            last_stamp: AtomicI64::new(0),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn preview_mode(&self) -> bool {
        self.preview.load(Ordering::SeqCst)
    }

    /// Toggle preview mode. While on, the cache is neither read nor written.
    pub fn set_preview_mode(&self, on: bool) {
        let was = self.preview.swap(on, Ordering::SeqCst);
        if was != on {
            info!(preview = on, "preview mode changed");
        }
    }

    /// Replace the processor used by later fetches.
    pub async fn set_processor(&self, processor: Processor) {
        *self.processor.write().await = processor;
    }

    /// Snapshot of the current content map.
    pub async fn content(&self) -> ContentMap {
        self.content.read().await.clone()
    }

    /// Components whose fragment failed to process, with the error message.
    pub async fn failures(&self) -> BTreeMap<String, String> {
        self.failures.read().await.clone()
    }

    /// Fetch a single component.
    ///
    /// `path` is the fragment path relative to the content path; it usually
    /// comes from the component's config. Network failures are not errors;
    /// the outcome records where the content came from instead.
    #[instrument(skip(self))]
    pub async fn load_content(&self, name: &str, path: &str) -> Result<FetchOutcome> {
        self.config.component(name)?;

        let preview = self.preview_mode();
        let url = self.fragment_url(path, preview)?;
        let fetched = fetch_fragment(&self.client, &url).await;
        let resolved = self.resolve(name, fetched, preview).await;

        {
            let mut content = self.content.write().await;
            match &resolved.html {
                Some(html) => content.insert(name, html.clone()),
                None => {
                    if matches!(resolved.outcome.source, ContentSource::ProcessingFailed { .. }) {
                        content.remove(name);
                    }
                }
            }
        }
        {
            let mut failures = self.failures.write().await;
            match &resolved.outcome.source {
                ContentSource::ProcessingFailed { message } => {
                    failures.insert(name.to_string(), message.clone());
                }
                _ => {
                    failures.remove(name);
                }
            }
        }

        Ok(resolved.outcome)
    }

    /// Fetch every enabled component concurrently and replace the content map.
    ///
    /// All fetches settle before anything is applied; one component failing
    /// never affects another.
    #[instrument(skip_all, fields(preview = self.preview_mode()))]
    pub async fn load_all_content(&self) -> Result<LoadReport> {
        let start = Instant::now();
        let preview = self.preview_mode();
        let components = self.config.enabled_components();

        info!(components = components.len(), "loading content");

        let mut handles = Vec::with_capacity(components.len());
        for (name, component) in components {
            let url = self.fragment_url(&component.path, preview)?;
            let client = self.client.clone();
            handles.push((
                name.to_string(),
                tokio::spawn(async move { fetch_fragment(&client, &url).await }),
            ));
        }

        // Settle every task, then apply results one at a time.
        let mut next_content = ContentMap::new();
        let mut next_failures = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(handles.len());

        for (name, handle) in handles {
            let fetched = match handle.await {
                Ok(result) => result,
                Err(e) => Err(FragmentSyncError::Network(format!("fetch task failed: {e}"))),
            };

            let resolved = self.resolve(&name, fetched, preview).await;
            if let Some(html) = resolved.html {
                next_content.insert(name.clone(), html);
            }
            if let ContentSource::ProcessingFailed { message } = &resolved.outcome.source {
                next_failures.insert(name.clone(), message.clone());
            }
            outcomes.push(resolved.outcome);
        }

        *self.content.write().await = next_content;
        *self.failures.write().await = next_failures;

        let report = LoadReport {
            outcomes,
            duration: start.elapsed(),
        };

        info!(
            live = report.live(),
            cached = report.from_cache(),
            unavailable = report.unavailable(),
            failed = report.failed(),
            duration_ms = report.duration.as_millis(),
            "content loaded"
        );

        Ok(report)
    }

    /// Drop every cached fragment, then reload everything.
    ///
    /// The in-memory map and failures are not cleared up front. They keep
    /// serving the previous load until [`load_all_content`](Self::load_all_content)
    /// swaps in the new ones.
    #[instrument(skip_all)]
    pub async fn refresh_content(&self) -> Result<LoadReport> {
        let removed = self.storage.clear_content_cache().await?;
        debug!(removed, "content cache cleared");

        self.load_all_content().await
    }

    /// Refresh triggered by the asset monitor. Returns `None` when skipped in preview mode.
    pub async fn auto_refresh(&self) -> Result<Option<LoadReport>> {
        if self.preview_mode() {
            info!("preview mode active, skipping automatic refresh");
            return Ok(None);
        }
        info!("new content detected, refreshing");
        self.refresh_content().await.map(Some)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn fragment_url(&self, path: &str, preview: bool) -> Result<Url> {
        let mut url = self.config.content_url(path)?;
        if preview {
            url.query_pairs_mut()
                .append_pair(CACHE_BUST_PARAM, &now_ms().to_string());
        }
        Ok(url)
    }

    /// Turn a fetch result into an outcome, processing and caching as needed.
    async fn resolve(&self, name: &str, fetched: Result<String>, preview: bool) -> Resolved {
        let use_cache = self.config.cache_enabled && !preview;

        let body = match fetched {
            Ok(body) => body,
            Err(e) => {
                warn!(component = %name, error = %e, "fragment fetch failed");
                return self.cache_fallback(name, use_cache).await;
            }
        };

        let processed = {
            let processor = self.processor.read().await;
            processor.process(&TrustedFragment::from_first_party(body), name)
        };

        let html = match processed {
            Ok(fragment) => fragment.html,
            Err(e) => {
                warn!(component = %name, error = %e, "fragment processing failed");
                return Resolved {
                    outcome: FetchOutcome {
                        component: name.to_string(),
                        source: ContentSource::ProcessingFailed {
                            message: e.to_string(),
                        },
                    },
                    html: None,
                };
            }
        };

        let mut changed = true;
        if use_cache {
            match self.storage.get_cache_entry(name).await {
                Ok(Some(previous)) => changed = fingerprint(&previous.content) != fingerprint(&html),
                Ok(None) => {}
                Err(e) => warn!(component = %name, error = %e, "failed to read cache entry"),
            }

            let stamp = self.next_stamp();
            if let Err(e) = self.storage.put_cache_entry(name, &html, stamp).await {
                warn!(component = %name, error = %e, "failed to persist fragment");
            }
        }

        debug!(component = %name, changed, "fragment loaded");

        Resolved {
            outcome: FetchOutcome {
                component: name.to_string(),
                source: ContentSource::Live { changed },
            },
            html: Some(html),
        }
    }

    async fn cache_fallback(&self, name: &str, use_cache: bool) -> Resolved {
        let unavailable = || Resolved {
            outcome: FetchOutcome {
                component: name.to_string(),
                source: ContentSource::Unavailable,
            },
            html: None,
        };

        if !use_cache {
            return unavailable();
        }

        match self.storage.get_cache_entry(name).await {
            Ok(Some(entry)) => {
                let stale = entry.is_stale(now_ms(), self.config.cache_ttl_ms);
                info!(component = %name, stale, age_ms = entry.age_ms(now_ms()), "using cached fragment");
                Resolved {
                    outcome: FetchOutcome {
                        component: name.to_string(),
                        source: ContentSource::Cache { stale },
                    },
                    html: Some(entry.content),
                }
            }
            Ok(None) => unavailable(),
            Err(e) => {
                warn!(component = %name, error = %e, "failed to read cache entry");
                unavailable()
            }
        }
    }

    /// Wall-clock ms, bumped past the last stamp so stamps never repeat.
    fn next_stamp(&self) -> i64 {
        let now = now_ms();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// GET a fragment. Transport failures and non-2xx statuses are errors.
async fn fetch_fragment(client: &Client, url: &Url) -> Result<String> {
    debug!(%url, "fetching fragment");

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| FragmentSyncError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FragmentSyncError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| FragmentSyncError::Network(format!("{url}: body read failed: {e}")))
}

/// SHA-256 of fragment content, hex encoded.
fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
