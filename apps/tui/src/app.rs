//! Core TUI application state and event loop.
//!
//! The dashboard owns a tokio runtime. Loads and scans run on it as
//! background jobs so the UI keeps redrawing; quick calls (preview, theme,
//! mount) are driven with `block_on` from the event loop.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use color_eyre::eyre::{Result, WrapErr};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Tabs};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fragmentsync_core::{
    ContentPipeline, PipelineStatus, RenderedSection, SilentProgress, effective_config,
};
use fragmentsync_fetcher::LoadReport;
use fragmentsync_monitor::MonitorState;
use fragmentsync_shared::{
    AnalyticsEvent, AssetRecord, PipelineConfig, Theme, config_dir, load_config, state_db_path,
};
use fragmentsync_storage::Storage;

use crate::screens::{ScreenAction, ScreenId, Screens};
use crate::widgets::status_bar;

/// How often the snapshot is rebuilt while nothing else happens.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Number of analytics events shown on the Analytics tab.
const ANALYTICS_LIMIT: usize = 50;

/// Log file inside the config directory. The terminal belongs to the UI.
const LOG_FILE_NAME: &str = "tui.log";

/// Location recorded for mounts triggered from the dashboard.
const MOUNT_LOCATION: &str = "tui://components";

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything the screens draw, gathered from the pipeline in one pass.
pub(crate) struct Snapshot {
    pub config: PipelineConfig,
    pub status: PipelineStatus,
    /// Enabled components in render order.
    pub sections: Vec<(String, RenderedSection)>,
    pub failures: BTreeMap<String, String>,
    /// Size of the processed HTML per loaded component.
    pub loaded_bytes: BTreeMap<String, usize>,
    pub assets: Vec<AssetRecord>,
    pub events: Vec<AnalyticsEvent>,
    /// Carried over between snapshots; set when a load job finishes.
    pub last_report: Option<LoadReport>,
}

impl Snapshot {
    async fn gather(pipeline: &ContentPipeline) -> fragmentsync_shared::Result<Self> {
        let content = pipeline.fetcher().content().await;
        let loaded_bytes = content
            .iter()
            .map(|(name, html)| (name.to_string(), html.len()))
            .collect();

        Ok(Self {
            config: pipeline.config().clone(),
            status: pipeline.status().await,
            sections: pipeline.render_all().await?,
            failures: pipeline.fetcher().failures().await,
            loaded_bytes,
            assets: pipeline.monitor().assets().await,
            events: pipeline.analytics(ANALYTICS_LIMIT).await?,
            last_report: None,
        })
    }

    /// How an enabled component renders, or `None` if it is disabled.
    pub(crate) fn section(&self, name: &str) -> Option<&RenderedSection> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, section)| section)
    }
}

// ---------------------------------------------------------------------------
// Background jobs
// ---------------------------------------------------------------------------

enum Job {
    Load {
        refresh: bool,
        handle: JoinHandle<fragmentsync_shared::Result<LoadReport>>,
    },
    Scan(JoinHandle<fragmentsync_shared::Result<bool>>),
}

impl Job {
    fn is_finished(&self) -> bool {
        match self {
            Self::Load { handle, .. } => handle.is_finished(),
            Self::Scan(handle) => handle.is_finished(),
        }
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Application state.
pub(crate) struct App {
    /// Declared before the runtime so background tasks are aborted first on drop.
    pipeline: Arc<ContentPipeline>,
    rt: Runtime,
    /// Currently active screen tab.
    pub active_tab: usize,
    /// Whether the app should quit.
    pub should_quit: bool,
    /// Status message shown in bottom bar.
    pub status: String,
    /// Whether help overlay is visible.
    pub show_help: bool,
    screens: Screens,
    snapshot: Snapshot,
    snapshot_at: Instant,
    job: Option<Job>,
}

impl App {
    fn new(rt: Runtime, pipeline: Arc<ContentPipeline>) -> Result<Self> {
        let snapshot = rt.block_on(Snapshot::gather(&pipeline))?;
        Ok(Self {
            pipeline,
            rt,
            active_tab: 0,
            should_quit: false,
            status: "Ready, press ? for help".to_string(),
            show_help: false,
            screens: Screens::new(),
            snapshot,
            snapshot_at: Instant::now(),
            job: None,
        })
    }

    fn current_screen(&self) -> ScreenId {
        ScreenId::ALL[self.active_tab]
    }

    fn refresh_snapshot(&mut self) {
        match self.rt.block_on(Snapshot::gather(&self.pipeline)) {
            Ok(mut next) => {
                next.last_report = self.snapshot.last_report.take();
                self.snapshot = next;
            }
            Err(e) => {
                warn!(error = %e, "snapshot failed");
                self.status = format!("Snapshot failed: {e}");
            }
        }
        self.snapshot_at = Instant::now();
    }

    /// Collect a finished job and keep the snapshot fresh.
    fn tick(&mut self) {
        if self.job.as_ref().is_some_and(Job::is_finished) {
            if let Some(job) = self.job.take() {
                self.finish_job(job);
            }
            self.refresh_snapshot();
        } else if self.snapshot_at.elapsed() >= SNAPSHOT_INTERVAL {
            self.refresh_snapshot();
        }
    }

    fn finish_job(&mut self, job: Job) {
        match job {
            Job::Load { refresh, handle } => {
                let what = if refresh { "Refresh" } else { "Load" };
                match self.rt.block_on(handle) {
                    Ok(Ok(report)) => {
                        self.status = format!(
                            "{what} finished: {} live, {} cached, {} unavailable, {} failed in {:.1?}",
                            report.live(),
                            report.from_cache(),
                            report.unavailable(),
                            report.failed(),
                            report.duration
                        );
                        self.snapshot.last_report = Some(report);
                    }
                    Ok(Err(e)) => self.status = format!("{what} failed: {e}"),
                    Err(e) => self.status = format!("{what} task aborted: {e}"),
                }
            }
            Job::Scan(handle) => {
                self.status = match self.rt.block_on(handle) {
                    Ok(Ok(true)) => "Scan: new content detected".to_string(),
                    Ok(Ok(false)) => "Scan: no changes".to_string(),
                    Ok(Err(e)) => format!("Scan failed: {e}"),
                    Err(e) => format!("Scan task aborted: {e}"),
                };
            }
        }
    }

    fn busy(&mut self) -> bool {
        if self.job.is_some() {
            self.status = "Busy, wait for the current job to finish".to_string();
            return true;
        }
        false
    }

    fn start_load(&mut self, refresh: bool) {
        if self.busy() {
            return;
        }
        let pipeline = self.pipeline.clone();
        let handle = self.rt.spawn(async move {
            if refresh {
                pipeline.refresh(&SilentProgress).await
            } else {
                pipeline.load(&SilentProgress).await
            }
        });
        self.job = Some(Job::Load { refresh, handle });
        self.status = if refresh {
            "Clearing cache and reloading...".to_string()
        } else {
            "Loading content...".to_string()
        };
    }

    fn start_scan(&mut self) {
        if self.busy() {
            return;
        }
        let pipeline = self.pipeline.clone();
        let handle = self
            .rt
            .spawn(async move { pipeline.monitor().scan_once().await });
        self.job = Some(Job::Scan(handle));
        self.status = "Scanning assets...".to_string();
    }

    fn toggle_preview(&mut self) {
        let on = !self.snapshot.status.preview_mode;
        self.status = match self.rt.block_on(self.pipeline.set_preview_mode(on)) {
            Ok(()) => format!("Preview mode {}", if on { "on" } else { "off" }),
            Err(e) => format!("Preview toggle failed: {e}"),
        };
        self.refresh_snapshot();
    }

    fn toggle_theme(&mut self) {
        let theme = match self.snapshot.status.theme {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        };
        self.status = match self.rt.block_on(self.pipeline.set_theme(theme)) {
            Ok(()) => format!("Theme set to {theme}, applies to the next load"),
            Err(e) => format!("Theme change failed: {e}"),
        };
        self.refresh_snapshot();
    }

    /// Start or stop auto sync. With auto sync off in config, only the monitor runs.
    fn toggle_monitoring(&mut self) {
        {
            // Monitor and sync tasks are spawned onto the dashboard runtime.
            let _guard = self.rt.enter();
            let monitor = self.pipeline.monitor();
            let config = self.pipeline.config();

            self.status = if self.pipeline.auto_sync_running() {
                self.pipeline.stop_auto_sync();
                "Auto sync stopped".to_string()
            } else if monitor.state() == MonitorState::Monitoring {
                monitor.stop_monitoring();
                "Monitoring stopped".to_string()
            } else if config.enabled && config.auto_sync {
                self.pipeline.start_auto_sync();
                format!("Auto sync started, polling every {:?}", monitor.interval())
            } else {
                monitor.start_monitoring();
                "Monitoring started (auto sync is off in config)".to_string()
            };
        }
        self.refresh_snapshot();
    }

    fn clear_flag(&mut self) {
        self.pipeline.monitor().clear_new_content_flag();
        self.status = "New-content flag cleared".to_string();
        self.refresh_snapshot();
    }

    fn apply(&mut self, action: ScreenAction) {
        match action {
            ScreenAction::Mount(component) => {
                self.status = match self.rt.block_on(self.pipeline.mount(&component, MOUNT_LOCATION)) {
                    Ok(Some(event)) => format!("Recorded mount of {component} as {}", event.identity),
                    Ok(None) => "Analytics is disabled, nothing recorded".to_string(),
                    Err(e) => format!("Mount failed: {e}"),
                };
                self.refresh_snapshot();
            }
        }
    }

    /// Let a running load finish so a refresh never leaves the cache half rebuilt.
    fn shutdown(&mut self) {
        if let Some(job) = self.job.take() {
            match job {
                Job::Load { handle, .. } => {
                    let _ = self.rt.block_on(handle);
                }
                Job::Scan(handle) => handle.abort(),
            }
        }
        self.rt.block_on(self.pipeline.shutdown());
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Send tracing output to a log file so it never draws over the UI.
fn init_tracing() -> Result<()> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).wrap_err("creating config directory")?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
        .wrap_err("opening TUI log file")?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fragmentsync=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

async fn open_pipeline() -> Result<ContentPipeline> {
    let base = load_config()?;
    let storage = Arc::new(Storage::open(&state_db_path()?).await?);
    let config = effective_config(&base, &storage).await?;
    Ok(ContentPipeline::open(config, storage).await?)
}

/// Entry point: sets up terminal, runs event loop, restores terminal.
pub(crate) fn run() -> Result<()> {
    init_tracing()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("building tokio runtime")?;
    let pipeline = rt.block_on(open_pipeline())?;
    let mut app = App::new(rt, Arc::new(pipeline))?;
    info!("dashboard started");
    app.start_load(false);

    // Setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    app.shutdown();
    result
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| draw(f, app))?;

        // Poll for events with 100ms timeout for responsive UI
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(app, key.code, key.modifiers);
                }
            }
        }

        if app.should_quit {
            break;
        }

        app.tick();
    }

    Ok(())
}

fn select_tab(app: &mut App, idx: usize) {
    app.active_tab = idx;
    app.status = format!("{}", ScreenId::ALL[idx]);
}

fn handle_key(app: &mut App, code: KeyCode, modifiers: KeyModifiers) {
    let tabs = ScreenId::ALL.len();

    // Global keybindings (always active)
    match code {
        KeyCode::Char('q') | KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            app.should_quit = true;
            return;
        }
        KeyCode::Char('q') => {
            app.should_quit = true;
            return;
        }
        KeyCode::Char('?') => {
            app.show_help = !app.show_help;
            return;
        }
        KeyCode::Esc if app.show_help => {
            app.show_help = false;
            return;
        }
        _ => {}
    }

    // If help is showing, consume any key to dismiss
    if app.show_help {
        app.show_help = false;
        return;
    }

    match code {
        // Tab navigation with number keys
        KeyCode::Char(c @ '1'..='4') => select_tab(app, (c as usize) - ('1' as usize)),
        KeyCode::Tab => select_tab(app, (app.active_tab + 1) % tabs),
        KeyCode::BackTab => select_tab(app, (app.active_tab + tabs - 1) % tabs),
        KeyCode::Char('l') => app.start_load(false),
        KeyCode::Char('r') => app.start_load(true),
        KeyCode::Char('s') => app.start_scan(),
        KeyCode::Char('p') => app.toggle_preview(),
        KeyCode::Char('t') => app.toggle_theme(),
        KeyCode::Char('m') => app.toggle_monitoring(),
        KeyCode::Char('c') => app.clear_flag(),
        _ => {
            // Delegate to current screen
            let screen = app.current_screen();
            if let Some(action) = app.screens.handle_key(screen, code, modifiers, &app.snapshot) {
                app.apply(action);
            }
        }
    }
}

fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Tab bar
            Constraint::Min(1),    // Content
            Constraint::Length(1), // Status bar
        ])
        .split(f.area());

    // Tab bar
    let tab_titles: Vec<Line> = ScreenId::ALL
        .iter()
        .map(|s| Line::from(format!("{s}")))
        .collect();

    let tabs = Tabs::new(tab_titles)
        .block(Block::default().borders(Borders::ALL).title(" FragmentSync "))
        .select(app.active_tab)
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .divider(" │ ");

    f.render_widget(tabs, chunks[0]);

    // Content area, drawn by the active screen
    app.screens
        .draw(app.current_screen(), f, chunks[1], &app.snapshot);

    // Status bar
    let bar = status_bar(&app.status, &app.snapshot.status);
    f.render_widget(bar, chunks[2]);

    // Help overlay
    if app.show_help {
        draw_help_overlay(f);
    }
}

fn draw_help_overlay(f: &mut Frame) {
    let area = centered_rect(60, 70, f.area());
    let bold = Style::default().add_modifier(Modifier::BOLD);

    let help_text = vec![
        Line::from("Keybindings").style(bold),
        Line::from(""),
        Line::from("  1-4          Switch to screen"),
        Line::from("  Tab/S-Tab    Next/previous screen"),
        Line::from("  ?            Toggle this help"),
        Line::from("  q / Ctrl-C   Quit"),
        Line::from(""),
        Line::from("Pipeline:").style(bold),
        Line::from("  l            Load enabled components"),
        Line::from("  r            Clear cache and reload"),
        Line::from("  p            Toggle preview mode"),
        Line::from("  t            Toggle dark/light theme"),
        Line::from("  m            Start/stop monitoring and auto sync"),
        Line::from("  s            Scan assets once"),
        Line::from("  c            Clear the new-content flag"),
        Line::from(""),
        Line::from("Lists:").style(bold),
        Line::from("  ↑/↓ j/k      Navigate"),
        Line::from("  Enter        Record a mount (Components)"),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help, press any key to close ")
                .style(Style::default().bg(Color::DarkGray)),
        )
        .style(Style::default().fg(Color::White).bg(Color::DarkGray));

    // Clear background
    f.render_widget(Clear, area);
    f.render_widget(help, area);
}

/// Create a centered rectangle with percentage width and height.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
