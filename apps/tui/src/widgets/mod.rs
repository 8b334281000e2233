//! Reusable TUI widgets.

use fragmentsync_core::PipelineStatus;
use fragmentsync_fetcher::ContentSource;
use fragmentsync_monitor::MonitorState;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Bottom status bar: the last message plus badges for the pipeline's modes.
pub(crate) fn status_bar<'a>(msg: &'a str, status: &PipelineStatus) -> Paragraph<'a> {
    let mut spans = vec![Span::raw(format!(" {msg}"))];

    let mut badge = |label: &'static str, color: Color| {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            format!("[{label}]"),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
    };

    if !status.enabled {
        badge("disabled", Color::Red);
    }
    if status.preview_mode {
        badge("preview", Color::Magenta);
    }
    if status.monitor == MonitorState::Monitoring {
        badge("monitoring", Color::Green);
    }
    if status.auto_sync {
        badge("auto-sync", Color::Green);
    }
    if status.new_content {
        badge("new content", Color::Yellow);
    }

    Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray).fg(Color::White))
}

/// `label: value` line with the label dimmed.
pub(crate) fn field<'a>(label: &'a str, value: impl Into<Span<'a>>) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!("{label:<16}"), Style::default().fg(Color::Gray)),
        value.into(),
    ])
}

/// On/off value styled green or dark gray.
pub(crate) fn flag(on: bool) -> Span<'static> {
    if on {
        Span::styled("on", Style::default().fg(Color::Green))
    } else {
        Span::styled("off", Style::default().fg(Color::DarkGray))
    }
}

/// Short label and colour for where a component's content came from.
pub(crate) fn source_label(source: &ContentSource) -> (&'static str, Color) {
    match source {
        ContentSource::Live { changed: true } => ("live (changed)", Color::Green),
        ContentSource::Live { changed: false } => ("live", Color::Green),
        ContentSource::Cache { stale: false } => ("cache", Color::Yellow),
        ContentSource::Cache { stale: true } => ("cache (stale)", Color::LightRed),
        ContentSource::Unavailable => ("unavailable", Color::Red),
        ContentSource::ProcessingFailed { .. } => ("processing failed", Color::Red),
    }
}

/// Colour for a rendered section kind.
pub(crate) fn render_kind_color(kind: &str) -> Color {
    match kind {
        "fragment" => Color::Green,
        "fallback" => Color::Yellow,
        "error" => Color::Red,
        _ => Color::DarkGray,
    }
}

/// Human-readable age of an epoch-ms timestamp relative to `now_ms`.
pub(crate) fn format_age(then_ms: i64, now_ms: i64) -> String {
    let secs = (now_ms - then_ms).max(0) / 1000;
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

/// Byte count in B / KiB / MiB.
pub(crate) fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
