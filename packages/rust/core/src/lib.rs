//! Pipeline orchestration for FragmentSync.
//!
//! This crate wires the processor, fetcher and monitor into a
//! [`ContentPipeline`] and adds the pieces around them: section rendering,
//! the analytics buffer, and session-driven data bindings.

pub mod analytics;
pub mod pipeline;
pub mod render;
pub mod session;

pub use analytics::ANALYTICS_CAPACITY;
pub use pipeline::{
    ContentPipeline, PipelineStatus, ProgressReporter, SilentProgress, effective_config,
    update_and_persist,
};
pub use render::{RenderedSection, render_section};
pub use session::Session;
