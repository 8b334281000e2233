//! "Components" screen: every configured section and how it renders now.

use crossterm::event::{KeyCode, KeyModifiers};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};

use fragmentsync_core::RenderedSection;
use fragmentsync_shared::{ComponentConfig, PipelineConfig};

use super::{ScreenAction, step_cursor};
use crate::app::Snapshot;
use crate::widgets::{field, flag, format_size, render_kind_color, source_label};

pub(crate) struct ComponentsScreen {
    selected: usize,
}

/// All components, enabled or not, in render order (priority, then name).
fn ordered(config: &PipelineConfig) -> Vec<(&str, &ComponentConfig)> {
    let mut all: Vec<_> = config
        .components
        .iter()
        .map(|(name, c)| (name.as_str(), c))
        .collect();
    all.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then(a.0.cmp(b.0)));
    all
}

impl ComponentsScreen {
    pub(crate) fn new() -> Self {
        Self { selected: 0 }
    }

    pub(crate) fn draw(&self, f: &mut Frame, area: Rect, snapshot: &Snapshot) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Min(1),    // List
                Constraint::Length(9), // Detail
            ])
            .split(area);

        let components = ordered(&snapshot.config);
        if components.is_empty() {
            let empty = Paragraph::new("No components configured.")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title(" Components "));
            f.render_widget(empty, chunks[0]);
            return;
        }
        let selected = self.selected.min(components.len() - 1);

        let items: Vec<ListItem> = components
            .iter()
            .enumerate()
            .map(|(i, (name, component))| {
                let prefix = if i == selected { "▸ " } else { "  " };
                let kind = snapshot.section(name).map_or("disabled", RenderedSection::kind);
                let style = if i == selected {
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("{prefix}{name:<16} {:>4}  {:<40}", component.priority, component.path),
                        style,
                    ),
                    Span::styled(kind, Style::default().fg(render_kind_color(kind))),
                ]))
            })
            .collect();

        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Components ({}) ", components.len())),
        );
        f.render_widget(list, chunks[0]);

        let (name, component) = components[selected];
        f.render_widget(self.detail(name, component, snapshot), chunks[1]);
    }

    fn detail<'a>(&self, name: &'a str, component: &'a ComponentConfig, snapshot: &'a Snapshot) -> Paragraph<'a> {
        let fallback = component.fallback_component.as_deref().unwrap_or(name);
        let mut lines = vec![
            field("Enabled", flag(component.enabled)),
            field("Fallback", fallback),
        ];

        lines.push(field(
            "Content",
            snapshot
                .loaded_bytes
                .get(name)
                .map_or_else(|| "not loaded".to_string(), |n| format_size(*n as u64)),
        ));

        if let Some(outcome) = snapshot.last_report.as_ref().and_then(|r| r.outcome(name)) {
            let (label, color) = source_label(&outcome.source);
            lines.push(field("Last source", Span::styled(label, Style::default().fg(color))));
        }

        match snapshot.section(name) {
            Some(RenderedSection::Fallback { fallback_component }) => {
                lines.push(field("Renders", format!("fallback <{fallback_component}>")));
            }
            Some(section) => lines.push(field("Renders", section.kind())),
            None => lines.push(field("Renders", "nothing (disabled)")),
        }

        if let Some(message) = snapshot.failures.get(name) {
            lines.push(field(
                "Failure",
                Span::styled(message.as_str(), Style::default().fg(Color::Red)),
            ));
        }

        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" {name} · Enter records a mount ")),
            )
    }

    pub(crate) fn handle_key(
        &mut self,
        code: KeyCode,
        _modifiers: KeyModifiers,
        snapshot: &Snapshot,
    ) -> Option<ScreenAction> {
        let components = ordered(&snapshot.config);
        if code == KeyCode::Enter {
            return components
                .get(self.selected)
                .map(|(name, _)| ScreenAction::Mount(name.to_string()));
        }
        self.selected = step_cursor(self.selected, components.len(), code);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_includes_disabled_by_priority() {
        let config = PipelineConfig::default();
        let names: Vec<&str> = ordered(&config).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.first(), Some(&"navigation"));
        assert_eq!(names.last(), Some(&"footer"));
        assert_eq!(names.len(), config.components.len());
    }
}
