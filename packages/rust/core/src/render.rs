//! Section rendering decisions.
//!
//! The pipeline never fails a page because of external content. Each
//! section resolves to a fragment, its built-in fallback, nothing, or a
//! contained error notice for that section alone.

use std::collections::BTreeMap;

use fragmentsync_shared::{ContentMap, PipelineConfig, Result};

/// What the host should render for one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedSection {
    /// External content, wrapped in the component container.
    Fragment { html: String },
    /// Render the named built-in component.
    Fallback { fallback_component: String },
    /// Render nothing.
    Empty,
    /// The fragment could not be processed.
    Error { placeholder: String },
}

impl RenderedSection {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fragment { .. } => "fragment",
            Self::Fallback { .. } => "fallback",
            Self::Empty => "empty",
            Self::Error { .. } => "error",
        }
    }
}

/// Decide how `name` renders given the current content and processing failures.
pub fn render_section(
    config: &PipelineConfig,
    content: &ContentMap,
    failures: &BTreeMap<String, String>,
    name: &str,
) -> Result<RenderedSection> {
    let component = config.component(name)?;

    if config.enabled && component.enabled {
        if let Some(html) = content.get(name) {
            return Ok(RenderedSection::Fragment {
                html: wrap_fragment(name, html),
            });
        }
        if let Some(message) = failures.get(name) {
            return Ok(RenderedSection::Error {
                placeholder: error_placeholder(name, message),
            });
        }
    }

    if config.fallback_to_default {
        Ok(RenderedSection::Fallback {
            fallback_component: component
                .fallback_component
                .clone()
                .unwrap_or_else(|| name.to_string()),
        })
    } else {
        Ok(RenderedSection::Empty)
    }
}

fn wrap_fragment(name: &str, html: &str) -> String {
    format!(
        r#"<div class="builder-component" data-builder-component="{}">{html}</div>"#,
        escape(name)
    )
}

fn error_placeholder(name: &str, message: &str) -> String {
    format!(
        r#"<div class="builder-component builder-error" data-builder-component="{}" role="alert"><p>This section could not be displayed.</p><!-- {} --></div>"#,
        escape(name),
        escape(message).replace("--", "- -")
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
