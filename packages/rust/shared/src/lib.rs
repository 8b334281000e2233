//! Shared types, error model, and configuration for FragmentSync.
//!
//! This crate is the foundation depended on by all other FragmentSync crates.
//! It provides:
//! - [`FragmentSyncError`]: the unified error type
//! - Domain types ([`ContentMap`], [`AssetRecord`], [`CacheEntry`], [`AnalyticsEvent`])
//! - Configuration ([`PipelineConfig`], [`ConfigOverride`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ComponentConfig, ComponentOverride, ConfigOverride, PipelineConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, state_db_path,
};
pub use error::{FragmentSyncError, Result};
pub use types::{
    AnalyticsEvent, AssetRecord, AssetType, CacheEntry, ContentMap, EventKind, Identity, Theme,
    now_ms,
};
