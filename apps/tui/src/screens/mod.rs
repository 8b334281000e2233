//! TUI screen definitions.
//!
//! Each screen corresponds to a tab in the TUI, keeps its own cursor state,
//! and draws from the shared [`Snapshot`].

mod analytics;
mod components;
mod monitoring;
mod overview;

use std::fmt;

use crossterm::event::{KeyCode, KeyModifiers};
use ratatui::prelude::*;

use crate::app::Snapshot;

/// Screen identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScreenId {
    Overview,
    Components,
    Monitoring,
    Analytics,
}

impl ScreenId {
    pub(crate) const ALL: [ScreenId; 4] = [
        ScreenId::Overview,
        ScreenId::Components,
        ScreenId::Monitoring,
        ScreenId::Analytics,
    ];
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overview => write!(f, "Overview"),
            Self::Components => write!(f, "Components"),
            Self::Monitoring => write!(f, "Monitoring"),
            Self::Analytics => write!(f, "Analytics"),
        }
    }
}

/// Something a screen asks the app to do against the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScreenAction {
    /// Record a mount event for the named component.
    Mount(String),
}

/// Per-screen state and behaviour.
pub(crate) struct Screens {
    overview: overview::OverviewScreen,
    components: components::ComponentsScreen,
    monitoring: monitoring::MonitoringScreen,
    analytics: analytics::AnalyticsScreen,
}

impl Screens {
    pub(crate) fn new() -> Self {
        Self {
            overview: overview::OverviewScreen,
            components: components::ComponentsScreen::new(),
            monitoring: monitoring::MonitoringScreen::new(),
            analytics: analytics::AnalyticsScreen::new(),
        }
    }

    pub(crate) fn draw(&self, id: ScreenId, f: &mut Frame, area: Rect, snapshot: &Snapshot) {
        match id {
            ScreenId::Overview => self.overview.draw(f, area, snapshot),
            ScreenId::Components => self.components.draw(f, area, snapshot),
            ScreenId::Monitoring => self.monitoring.draw(f, area, snapshot),
            ScreenId::Analytics => self.analytics.draw(f, area, snapshot),
        }
    }

    pub(crate) fn handle_key(
        &mut self,
        id: ScreenId,
        code: KeyCode,
        modifiers: KeyModifiers,
        snapshot: &Snapshot,
    ) -> Option<ScreenAction> {
        match id {
            ScreenId::Overview => None,
            ScreenId::Components => self.components.handle_key(code, modifiers, snapshot),
            ScreenId::Monitoring => {
                self.monitoring.handle_key(code, modifiers, snapshot);
                None
            }
            ScreenId::Analytics => {
                self.analytics.handle_key(code, modifiers, snapshot);
                None
            }
        }
    }
}

/// Move a list cursor one step up or down, clamped to `len`.
pub(crate) fn step_cursor(selected: usize, len: usize, code: KeyCode) -> usize {
    match code {
        KeyCode::Up | KeyCode::Char('k') => selected.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') if selected + 1 < len => selected + 1,
        KeyCode::Home => 0,
        KeyCode::End => len.saturating_sub(1),
        _ => selected,
    }
}
