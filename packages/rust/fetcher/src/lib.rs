//! Content fetching for page sections.
//!
//! This crate provides:
//! - [`ContentFetcher`]: concurrent fragment loading with cache fallback and preview mode
//! - [`LoadReport`] / [`FetchOutcome`]: per-component results of a load

pub mod engine;

pub use engine::{ContentFetcher, ContentSource, FetchOutcome, LoadReport};
