//! Pipeline configuration for FragmentSync.
//!
//! Static config lives at `~/.fragmentsync/fragmentsync.toml` and is loaded once
//! at start. A persisted [`ConfigOverride`] is merged on top with
//! [`PipelineConfig::merged`], which returns a new value rather than mutating
//! the one it was called on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FragmentSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "fragmentsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".fragmentsync";

/// Local state database file name, inside the config directory.
const STATE_DB_NAME: &str = "state.db";

// ---------------------------------------------------------------------------
// Config structs (matching fragmentsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level pipeline config, deserialized from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Master switch for external content. When off every section renders its fallback.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Site origin the content and scan paths are resolved against.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Path prefix under which fragments are published.
    #[serde(default = "default_content_path")]
    pub content_path: String,

    /// Path of the remote asset listing endpoint.
    #[serde(default = "default_scan_path")]
    pub scan_path: String,

    /// Render the built-in component when no fragment is available.
    #[serde(default = "default_true")]
    pub fallback_to_default: bool,

    /// Refresh automatically when the monitor reports new content.
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    /// Poll period of the asset monitor.
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_ms: u64,

    /// Persist fetched fragments as a fallback source.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Age after which a cached fragment is reported as stale.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_ms: u64,

    /// Record mount events in the rolling analytics buffer.
    #[serde(default = "default_true")]
    pub analytics_enabled: bool,

    /// Start in preview mode (cache bypassed, fetches cache-busted).
    #[serde(default)]
    pub preview_mode: bool,

    /// Per-section component settings, keyed by component name.
    #[serde(default = "default_components")]
    pub components: BTreeMap<String, ComponentConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            origin: default_origin(),
            content_path: default_content_path(),
            scan_path: default_scan_path(),
            fallback_to_default: true,
            auto_sync: true,
            monitoring_interval_ms: default_monitoring_interval(),
            cache_enabled: true,
            cache_ttl_ms: default_cache_ttl(),
            analytics_enabled: true,
            preview_mode: false,
            components: default_components(),
        }
    }
}

/// `[components.<name>]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Fragment path relative to the content path.
    pub path: String,

    /// Whether the fetcher requests this component at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Load and render order; lower comes first.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Built-in component rendered when no fragment is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_component: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_origin() -> String {
    "http://localhost:5173".into()
}
fn default_content_path() -> String {
    "/builder".into()
}
fn default_scan_path() -> String {
    "/api/builder/scan".into()
}
fn default_monitoring_interval() -> u64 {
    30_000
}
fn default_cache_ttl() -> u64 {
    300_000
}
fn default_priority() -> i32 {
    100
}

fn default_components() -> BTreeMap<String, ComponentConfig> {
    let entry = |path: &str, enabled: bool, priority: i32, fallback: Option<&str>| ComponentConfig {
        path: path.into(),
        enabled,
        priority,
        fallback_component: fallback.map(String::from),
    };

    BTreeMap::from([
        ("hero".into(), entry("sections/hero-section.html", true, 1, Some("Hero"))),
        ("features".into(), entry("sections/features-grid.html", true, 2, Some("Features"))),
        ("pricing".into(), entry("sections/pricing-table.html", true, 3, Some("Pricing"))),
        ("navigation".into(), entry("components/navigation.html", false, 0, Some("Navigation"))),
        ("footer".into(), entry("components/footer.html", false, 10, Some("Footer"))),
        ("testimonials".into(), entry("sections/testimonials.html", true, 4, None)),
        ("cta".into(), entry("sections/cta-section.html", true, 5, None)),
        ("blog".into(), entry("sections/blog-preview.html", true, 6, None)),
    ])
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Persisted partial override of [`PipelineConfig`] (stored as JSON under `content-config`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_to_default: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_sync: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentOverride>,
}

/// Partial override of one [`ComponentConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_component: Option<String>,
}

impl ConfigOverride {
    /// Fold `later` into `self`; fields set in `later` win.
    pub fn combine(mut self, later: ConfigOverride) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $( if later.$field.is_some() { self.$field = later.$field; } )*
            };
        }
        take!(
            enabled,
            origin,
            content_path,
            scan_path,
            fallback_to_default,
            auto_sync,
            monitoring_interval_ms,
            cache_enabled,
            cache_ttl_ms,
            analytics_enabled,
            preview_mode
        );

        for (name, patch) in later.components {
            let slot = self.components.entry(name).or_default();
            if patch.path.is_some() {
                slot.path = patch.path;
            }
            if patch.enabled.is_some() {
                slot.enabled = patch.enabled;
            }
            if patch.priority.is_some() {
                slot.priority = patch.priority;
            }
            if patch.fallback_component.is_some() {
                slot.fallback_component = patch.fallback_component;
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Derived views and merge
// ---------------------------------------------------------------------------

impl PipelineConfig {
    /// Return a new config with `over` applied on top of `self`.
    ///
    /// Component overrides for names not declared in `self` only take effect
    /// when they carry a `path`; otherwise they are ignored.
    pub fn merged(&self, over: &ConfigOverride) -> PipelineConfig {
        let mut next = self.clone();

        macro_rules! apply {
            ($($field:ident),*) => {
                $( if let Some(v) = &over.$field { next.$field = v.clone(); } )*
            };
        }
        apply!(
            enabled,
            origin,
            content_path,
            scan_path,
            fallback_to_default,
            auto_sync,
            monitoring_interval_ms,
            cache_enabled,
            cache_ttl_ms,
            analytics_enabled,
            preview_mode
        );

        for (name, patch) in &over.components {
            match next.components.get_mut(name) {
                Some(existing) => {
                    if let Some(path) = &patch.path {
                        existing.path = path.clone();
                    }
                    if let Some(enabled) = patch.enabled {
                        existing.enabled = enabled;
                    }
                    if let Some(priority) = patch.priority {
                        existing.priority = priority;
                    }
                    if patch.fallback_component.is_some() {
                        existing.fallback_component = patch.fallback_component.clone();
                    }
                }
                None => match &patch.path {
                    Some(path) => {
                        next.components.insert(
                            name.clone(),
                            ComponentConfig {
                                path: path.clone(),
                                enabled: patch.enabled.unwrap_or(true),
                                priority: patch.priority.unwrap_or_else(default_priority),
                                fallback_component: patch.fallback_component.clone(),
                            },
                        );
                    }
                    None => {
                        tracing::warn!(component = %name, "override for undeclared component has no path, ignoring");
                    }
                },
            }
        }

        next
    }

    /// Look up a component by name.
    pub fn component(&self, name: &str) -> Result<&ComponentConfig> {
        self.components
            .get(name)
            .ok_or_else(|| FragmentSyncError::UnknownComponent(name.to_string()))
    }

    /// Enabled components in load/render order (priority, then name).
    pub fn enabled_components(&self) -> Vec<(&str, &ComponentConfig)> {
        let mut enabled: Vec<_> = self
            .components
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(name, c)| (name.as_str(), c))
            .collect();
        enabled.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then(a.0.cmp(b.0)));
        enabled
    }

    /// `{origin}{content_path}/{file_path}` for an arbitrary relative path.
    ///
    /// A root content path (`/`) maps files directly under the origin.
    pub fn content_url(&self, file_path: &str) -> Result<Url> {
        let origin = self.origin.trim_end_matches('/');
        let file = file_path.trim_start_matches('/');
        let raw = match self.content_path.trim_matches('/') {
            "" => format!("{origin}/{file}"),
            dir => format!("{origin}/{dir}/{file}"),
        };
        Url::parse(&raw).map_err(|e| FragmentSyncError::config(format!("invalid content URL '{raw}': {e}")))
    }

    /// Full URL of an enabled component's fragment.
    pub fn component_url(&self, name: &str) -> Result<Url> {
        let component = self.component(name)?;
        if !component.enabled {
            return Err(FragmentSyncError::config(format!(
                "component {name} is disabled"
            )));
        }
        self.content_url(&component.path)
    }

    /// URL of the remote asset listing endpoint.
    pub fn scan_url(&self) -> Result<Url> {
        let raw = format!(
            "{}/{}",
            self.origin.trim_end_matches('/'),
            self.scan_path.trim_start_matches('/')
        );
        Url::parse(&raw).map_err(|e| FragmentSyncError::config(format!("invalid scan URL '{raw}': {e}")))
    }

    /// Check the config for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.monitoring_interval_ms == 0 {
            return Err(FragmentSyncError::config(
                "monitoring_interval_ms must be greater than zero",
            ));
        }

        let origin = Url::parse(&self.origin)
            .map_err(|e| FragmentSyncError::config(format!("invalid origin '{}': {e}", self.origin)))?;
        if origin.scheme() != "http" && origin.scheme() != "https" {
            return Err(FragmentSyncError::config(format!(
                "origin must be http or https, got '{}'",
                origin.scheme()
            )));
        }

        if self.content_path.trim().is_empty() {
            return Err(FragmentSyncError::config(
                "content_path must not be empty (use \"/\" for the origin root)",
            ));
        }
        let scan_path = self.scan_path.trim().trim_matches('/');
        if scan_path.is_empty() {
            return Err(FragmentSyncError::config("scan_path must name an endpoint"));
        }

        for (name, component) in &self.components {
            let path = component.path.trim();
            if path.is_empty() {
                return Err(FragmentSyncError::config(format!(
                    "component {name} has an empty path"
                )));
            }
            if path.starts_with('/') || path.split('/').any(|seg| seg == "..") {
                return Err(FragmentSyncError::config(format!(
                    "component {name} path must be relative and stay under the content path: {path}"
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.fragmentsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FragmentSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.fragmentsync/fragmentsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Get the path to the local state database (`~/.fragmentsync/state.db`).
pub fn state_db_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(STATE_DB_NAME))
}

/// Load the static config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<PipelineConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(PipelineConfig::default());
    }

    load_config_from(&path)
}

/// Load the static config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FragmentSyncError::io(path, e))?;

    let config: PipelineConfig = toml::from_str(&content).map_err(|e| {
        FragmentSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FragmentSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&PipelineConfig::default())
        .map_err(|e| FragmentSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FragmentSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
