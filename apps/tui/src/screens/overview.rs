//! "Overview" screen: pipeline state and the outcome of the last load.

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};

use crate::app::Snapshot;
use crate::widgets::{field, flag, source_label};

pub(crate) struct OverviewScreen;

impl OverviewScreen {
    pub(crate) fn draw(&self, f: &mut Frame, area: Rect, snapshot: &Snapshot) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(11), // Pipeline
                Constraint::Min(1),     // Last load
            ])
            .split(area);

        let status = &snapshot.status;
        let config = &snapshot.config;

        let lines = vec![
            field("Pipeline", flag(status.enabled)),
            field(
                "Content root",
                format!(
                    "{}{}",
                    config.origin.trim_end_matches('/'),
                    config.content_path
                ),
            ),
            field("Preview mode", flag(status.preview_mode)),
            field("Theme", status.theme.to_string()),
            field("Monitor", status.monitor.to_string()),
            field("Auto sync", flag(status.auto_sync)),
            field(
                "New content",
                if status.new_content {
                    Span::styled("available", Style::default().fg(Color::Yellow))
                } else {
                    Span::raw("none")
                },
            ),
            field(
                "Loaded",
                format!(
                    "{} of {} enabled components, {} failed",
                    status.loaded, status.enabled_components, status.failed
                ),
            ),
            field(
                "Cache",
                format!(
                    "{} (ttl {}s)",
                    if config.cache_enabled { "on" } else { "off" },
                    config.cache_ttl_ms / 1000
                ),
            ),
        ];

        let pipeline = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(" Pipeline "));
        f.render_widget(pipeline, chunks[0]);

        match &snapshot.last_report {
            None => {
                let empty = Paragraph::new("No load has finished yet.\n\nPress 'l' to load or 'r' to refresh.")
                    .alignment(Alignment::Center)
                    .block(Block::default().borders(Borders::ALL).title(" Last load "));
                f.render_widget(empty, chunks[1]);
            }
            Some(report) => {
                let items: Vec<ListItem> = report
                    .outcomes
                    .iter()
                    .map(|outcome| {
                        let (label, color) = source_label(&outcome.source);
                        ListItem::new(Line::from(vec![
                            Span::raw(format!("  {:<16}", outcome.component)),
                            Span::styled(label, Style::default().fg(color)),
                        ]))
                    })
                    .collect();

                let title = format!(
                    " Last load: {} live, {} cached, {} unavailable, {} failed in {:.1?} ",
                    report.live(),
                    report.from_cache(),
                    report.unavailable(),
                    report.failed(),
                    report.duration
                );
                let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
                f.render_widget(list, chunks[1]);
            }
        }
    }
}
