//! "Analytics" screen: the rolling buffer of mount events, newest first.

use crossterm::event::{KeyCode, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};

use fragmentsync_core::ANALYTICS_CAPACITY;

use super::step_cursor;
use crate::app::Snapshot;

pub(crate) struct AnalyticsScreen {
    selected: usize,
}

impl AnalyticsScreen {
    pub(crate) fn new() -> Self {
        Self { selected: 0 }
    }

    pub(crate) fn draw(&self, f: &mut Frame, area: Rect, snapshot: &Snapshot) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Min(1),    // Events
                Constraint::Length(1), // Hint
            ])
            .split(area);

        let title = format!(
            " Events ({} shown, buffer keeps {ANALYTICS_CAPACITY}) ",
            snapshot.events.len()
        );

        if snapshot.events.is_empty() {
            let text = if snapshot.config.analytics_enabled {
                "No events recorded yet.\n\nSelect a component on the Components tab and press Enter."
            } else {
                "Analytics is disabled in the configuration."
            };
            let empty = Paragraph::new(text)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title(title));
            f.render_widget(empty, chunks[0]);
        } else {
            let selected = self.selected.min(snapshot.events.len() - 1);
            let items: Vec<ListItem> = snapshot
                .events
                .iter()
                .enumerate()
                .map(|(i, event)| {
                    let prefix = if i == selected { "▸ " } else { "  " };
                    let style = if i == selected {
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    };
                    ListItem::new(format!(
                        "{prefix}{}  {:<12} {:<16} {:<20} {}",
                        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        event.kind.to_string(),
                        event.component,
                        event.identity.to_string(),
                        event.location
                    ))
                    .style(style)
                })
                .collect();

            let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
            f.render_widget(list, chunks[0]);
        }

        let hint = Paragraph::new(if snapshot.config.analytics_enabled {
            "Recording mount events"
        } else {
            "Analytics disabled"
        })
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
        f.render_widget(hint, chunks[1]);
    }

    pub(crate) fn handle_key(&mut self, code: KeyCode, _modifiers: KeyModifiers, snapshot: &Snapshot) {
        self.selected = step_cursor(self.selected, snapshot.events.len(), code);
    }
}
