//! "Monitoring" screen: asset monitor state and the last scanned listing.

use crossterm::event::{KeyCode, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};

use fragmentsync_shared::now_ms;

use super::step_cursor;
use crate::app::Snapshot;
use crate::widgets::{field, flag, format_age, format_size};

pub(crate) struct MonitoringScreen {
    selected: usize,
}

impl MonitoringScreen {
    pub(crate) fn new() -> Self {
        Self { selected: 0 }
    }

    pub(crate) fn draw(&self, f: &mut Frame, area: Rect, snapshot: &Snapshot) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(7), // Monitor
                Constraint::Min(1),    // Assets
            ])
            .split(area);

        let status = &snapshot.status;
        let config = &snapshot.config;
        let scan_url = config
            .scan_url()
            .map_or_else(|e| format!("invalid ({e})"), |u| u.to_string());

        let flag_span = if status.new_content {
            Span::styled(
                "NEW CONTENT AVAILABLE (c clears)",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )
        } else {
            Span::raw("up to date")
        };

        let lines = vec![
            field("State", status.monitor.to_string()),
            field("Interval", format!("{} ms", config.monitoring_interval_ms)),
            field("Scan endpoint", scan_url),
            field("Auto sync", flag(status.auto_sync)),
            field("Content", flag_span),
        ];
        let monitor = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Asset monitor · m start/stop · s scan now "),
        );
        f.render_widget(monitor, chunks[0]);

        if snapshot.assets.is_empty() {
            let empty = Paragraph::new("No asset listing yet.\n\nPress 's' to scan or 'm' to start monitoring.")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title(" Assets "));
            f.render_widget(empty, chunks[1]);
            return;
        }

        let now = now_ms();
        let selected = self.selected.min(snapshot.assets.len() - 1);
        let items: Vec<ListItem> = snapshot
            .assets
            .iter()
            .enumerate()
            .map(|(i, asset)| {
                let prefix = if i == selected { "▸ " } else { "  " };
                let style = if i == selected {
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                let kind = format!("{:?}", asset.asset_type).to_lowercase();
                ListItem::new(format!(
                    "{prefix}{kind:<6} {:<48} {:>10}  {}",
                    asset.path,
                    format_size(asset.size),
                    format_age(asset.last_modified, now)
                ))
                .style(style)
            })
            .collect();

        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Assets ({}) ", snapshot.assets.len())),
        );
        f.render_widget(list, chunks[1]);
    }

    pub(crate) fn handle_key(&mut self, code: KeyCode, _modifiers: KeyModifiers, snapshot: &Snapshot) {
        self.selected = step_cursor(self.selected, snapshot.assets.len(), code);
    }
}
