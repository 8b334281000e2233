//! Core domain types for the section content pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FragmentSyncError;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// ContentMap
// ---------------------------------------------------------------------------

/// Processed HTML per component name. A missing key means "render the fallback".
///
/// Owned by the fetcher, which swaps in a whole new map on every full load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentMap(BTreeMap<String, String>);

impl ContentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processed HTML for a component, if any was loaded.
    pub fn get(&self, component: &str) -> Option<&str> {
        self.0.get(component).map(String::as_str)
    }

    pub fn is_loaded(&self, component: &str) -> bool {
        self.0.contains_key(component)
    }

    pub fn insert(&mut self, component: impl Into<String>, html: impl Into<String>) {
        self.0.insert(component.into(), html.into());
    }

    pub fn remove(&mut self, component: &str) -> Option<String> {
        self.0.remove(component)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// AssetRecord
// ---------------------------------------------------------------------------

/// Kind of asset reported by the remote scan endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Html,
    Css,
    Js,
    Image,
}

/// One entry of the remote asset listing (`GET /api/builder/scan`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Path of the asset relative to the content root.
    pub path: String,
    /// Asset kind.
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// Last modification time, epoch ms.
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
    /// Size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// A persisted copy of a component's processed content.
///
/// Only ever used as a substitute for a failed live fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub component: String,
    pub content: String,
    /// When the content was fetched, epoch ms.
    pub fetched_at_ms: i64,
}

impl CacheEntry {
    /// Age of the entry relative to `now_ms`, clamped at zero.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.fetched_at_ms).max(0)
    }

    /// Whether the entry is older than `ttl_ms`.
    pub fn is_stale(&self, now_ms: i64, ttl_ms: u64) -> bool {
        self.age_ms(now_ms) > i64::try_from(ttl_ms).unwrap_or(i64::MAX)
    }
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// What happened to a mounted component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Mount,
    View,
    Interaction,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mount => write!(f, "mount"),
            Self::View => write!(f, "view"),
            Self::Interaction => write!(f, "interaction"),
        }
    }
}

/// Coarse identity attached to analytics events.
///
/// Serialized as `"anonymous"` or `"user:<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Identity {
    Anonymous,
    User(String),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

impl FromStr for Identity {
    type Err = FragmentSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anonymous" => Ok(Self::Anonymous),
            _ => match s.strip_prefix("user:") {
                Some(id) if !id.is_empty() => Ok(Self::User(id.to_string())),
                _ => Err(FragmentSyncError::validation(format!(
                    "invalid identity '{s}'"
                ))),
            },
        }
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

impl TryFrom<String> for Identity {
    type Error = FragmentSyncError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A single tracking event, kept in the capped rolling buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub component: String,
    pub kind: EventKind,
    pub identity: Identity,
    /// Where the component was mounted (page path or URL).
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(
        component: impl Into<String>,
        kind: EventKind,
        identity: Identity,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            component: component.into(),
            kind,
            identity,
            location: location.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Theme
// ---------------------------------------------------------------------------

/// Host colour scheme, persisted under the `theme` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    #[default]
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = FragmentSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dark" => Ok(Self::Dark),
            "light" => Ok(Self::Light),
            other => Err(FragmentSyncError::validation(format!(
                "theme must be 'dark' or 'light', got '{other}'"
            ))),
        }
    }
}
