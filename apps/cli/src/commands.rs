//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use fragmentsync_core::{
    ContentPipeline, ProgressReporter, RenderedSection, Session, effective_config,
    update_and_persist,
};
use fragmentsync_fetcher::{ContentSource, FetchOutcome, LoadReport};
use fragmentsync_monitor::{AssetDiff, Notifier};
use fragmentsync_processor::{ProcessContext, Processor, TrustedFragment, summarize};
use fragmentsync_shared::{
    PipelineConfig, Theme, init_config, load_config, now_ms, state_db_path,
};
use fragmentsync_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// FragmentSync: keep externally authored page sections in sync.
#[derive(Parser)]
#[command(
    name = "fragmentsync",
    version,
    about = "Fetch, process, cache and monitor externally authored HTML page sections.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum ThemeArg {
    Dark,
    Light,
}

impl From<ThemeArg> for Theme {
    fn from(arg: ThemeArg) -> Self {
        match arg {
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::Light => Theme::Light,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Load every enabled component once and print where each came from.
    Load,

    /// Clear the content cache and reload everything.
    Refresh,

    /// Load, then keep content in sync with the remote asset listing until Ctrl-C.
    Watch,

    /// Load, then print how one section renders.
    Render {
        /// Component name (e.g. hero, pricing).
        component: String,
    },

    /// Run the content processor on a local fragment file.
    Process {
        /// HTML fragment file.
        file: PathBuf,

        /// Component name used in error messages.
        #[arg(short, long, default_value = "local")]
        component: String,

        /// Bind as this signed-in user instead of an anonymous visitor.
        #[arg(long)]
        user: Option<String>,
    },

    /// Inspect or clear cached fragments.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Turn preview mode on or off (persisted).
    Preview {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Show or set the colour scheme injected into fragments.
    Theme {
        #[arg(value_enum)]
        theme: Option<ThemeArg>,
    },

    /// Show recent analytics events.
    Analytics {
        /// Number of events to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// List cached fragments with their age.
    List,
    /// Remove every cached fragment.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration (static config plus persisted override).
    Show,
    /// Override settings of one component.
    SetComponent {
        /// Component name.
        name: String,

        #[arg(long)]
        enabled: Option<bool>,

        #[arg(long)]
        priority: Option<i32>,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "fragmentsync=info",
        1 => "fragmentsync=debug",
        _ => "fragmentsync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Load => cmd_load().await,
        Command::Refresh => cmd_refresh().await,
        Command::Watch => cmd_watch().await,
        Command::Render { component } => cmd_render(&component).await,
        Command::Process {
            file,
            component,
            user,
        } => cmd_process(&file, &component, user).await,
        Command::Cache { action } => match action {
            CacheAction::List => cmd_cache_list().await,
            CacheAction::Clear => cmd_cache_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
            ConfigAction::SetComponent {
                name,
                enabled,
                priority,
            } => cmd_config_set_component(&name, enabled, priority).await,
        },
        Command::Preview { state } => cmd_preview(matches!(state, Toggle::On)).await,
        Command::Theme { theme } => cmd_theme(theme.map(Theme::from)).await,
        Command::Analytics { limit } => cmd_analytics(limit).await,
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

async fn open_storage() -> Result<Arc<Storage>> {
    let path = state_db_path()?;
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Static config plus persisted override, and the storage it came from.
async fn resolve_config() -> Result<(PipelineConfig, Arc<Storage>)> {
    let base = load_config()?;
    let storage = open_storage().await?;
    let config = effective_config(&base, &storage).await?;
    Ok((config, storage))
}

async fn open_pipeline() -> Result<ContentPipeline> {
    let (config, storage) = resolve_config().await?;
    Ok(ContentPipeline::open(config, storage).await?)
}

// ---------------------------------------------------------------------------
// Content commands
// ---------------------------------------------------------------------------

async fn cmd_load() -> Result<()> {
    let pipeline = open_pipeline().await?;
    let reporter = CliProgress::new();
    let report = pipeline.load(&reporter).await?;
    print_report(&report);
    Ok(())
}

async fn cmd_refresh() -> Result<()> {
    let pipeline = open_pipeline().await?;
    let reporter = CliProgress::new();
    let report = pipeline.refresh(&reporter).await?;
    print_report(&report);
    Ok(())
}

async fn cmd_watch() -> Result<()> {
    let (config, storage) = resolve_config().await?;
    let pipeline =
        ContentPipeline::open_with_notifier(config, storage, Arc::new(PrintNotifier)).await?;

    let report = pipeline.load(&CliProgress::new()).await?;
    print_report(&report);

    pipeline.start_auto_sync();
    if !pipeline.auto_sync_running() {
        return Err(eyre!("auto sync is disabled in the configuration"));
    }

    println!(
        "  Watching for new content every {}ms (Ctrl-C to stop)",
        pipeline.config().monitoring_interval_ms
    );
    tokio::signal::ctrl_c().await?;

    pipeline.shutdown().await;
    println!("  Stopped.");
    Ok(())
}

async fn cmd_render(component: &str) -> Result<()> {
    let pipeline = open_pipeline().await?;
    pipeline.load(&CliProgress::new()).await?;

    match pipeline.render(component).await? {
        RenderedSection::Fragment { html } => println!("{html}"),
        RenderedSection::Fallback { fallback_component } => {
            println!("  {component}: no fragment, render built-in <{fallback_component}>");
        }
        RenderedSection::Empty => println!("  {component}: nothing to render"),
        RenderedSection::Error { placeholder } => println!("{placeholder}"),
    }
    Ok(())
}

async fn cmd_process(file: &Path, component: &str, user: Option<String>) -> Result<()> {
    let html = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;

    let storage = open_storage().await?;
    let theme = storage.get_theme().await?.unwrap_or_default();
    let session = match user {
        Some(id) => Session::user(id),
        None => Session::anonymous(),
    };

    let processor = Processor::new(ProcessContext {
        theme,
        bindings: session.bindings(),
    });

    // Files passed on the command line are the operator's own content.
    let fragment = TrustedFragment::from_first_party(html);
    let processed = processor.process(&fragment, component)?;
    let summary = summarize(&processed.html);

    println!("{}", processed.html);
    println!();
    println!("  Theme:         {theme}");
    println!("  Scripts:       {}", processed.scripts.len());
    println!("  Styles:        {}", summary.style_count);
    println!("  Bindings:      {}", summary.binding_keys.join(", "));
    println!(
        "  Classed:       {} ({} unmarked)",
        summary.classed_elements, summary.unmarked_elements
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Cache commands
// ---------------------------------------------------------------------------

async fn cmd_cache_list() -> Result<()> {
    let (config, storage) = resolve_config().await?;
    let entries = storage.list_cache_entries().await?;

    if entries.is_empty() {
        println!("  No cached fragments.");
        return Ok(());
    }

    let now = now_ms();
    println!("  {:<16} {:>10} {:>10}  STATE", "COMPONENT", "AGE", "BYTES");
    for entry in entries {
        let state = if entry.is_stale(now, config.cache_ttl_ms) {
            "stale"
        } else {
            "fresh"
        };
        println!(
            "  {:<16} {:>9}s {:>10}  {state}",
            entry.component,
            entry.age_ms(now) / 1000,
            entry.content.len()
        );
    }
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let storage = open_storage().await?;
    let removed = storage.clear_content_cache().await?;
    info!(removed, "content cache cleared");
    println!("  Removed {removed} cache keys.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let (config, _storage) = resolve_config().await?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

async fn cmd_config_set_component(
    name: &str,
    enabled: Option<bool>,
    priority: Option<i32>,
) -> Result<()> {
    if enabled.is_none() && priority.is_none() {
        return Err(eyre!("nothing to change: pass --enabled and/or --priority"));
    }

    let base = load_config()?;
    let storage = open_storage().await?;
    effective_config(&base, &storage).await?.component(name)?;

    let updated = update_and_persist(&storage, &base, |over| {
        let slot = over
            .components
            .entry(name.to_string())
            .or_default();
        if enabled.is_some() {
            slot.enabled = enabled;
        }
        if priority.is_some() {
            slot.priority = priority;
        }
    })
    .await?;

    let component = updated.component(name)?;
    println!(
        "  {name}: enabled={} priority={}",
        component.enabled, component.priority
    );
    Ok(())
}

async fn cmd_preview(on: bool) -> Result<()> {
    let pipeline = open_pipeline().await?;
    pipeline.set_preview_mode(on).await?;
    println!("  Preview mode {}.", if on { "on" } else { "off" });
    Ok(())
}

async fn cmd_theme(theme: Option<Theme>) -> Result<()> {
    let storage = open_storage().await?;
    match theme {
        Some(theme) => {
            storage.set_theme(theme).await?;
            println!("  Theme set to {theme}.");
        }
        None => {
            let current = storage.get_theme().await?.unwrap_or_default();
            println!("  {current}");
        }
    }
    Ok(())
}

async fn cmd_analytics(limit: usize) -> Result<()> {
    let pipeline = open_pipeline().await?;
    let events = pipeline.analytics(limit).await?;

    if events.is_empty() {
        println!("  No analytics events recorded.");
        return Ok(());
    }

    for event in events {
        println!(
            "  {}  {:<12} {:<12} {:<20} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.kind.to_string(),
            event.component,
            event.identity.to_string(),
            event.location
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn describe(outcome: &FetchOutcome) -> String {
    match &outcome.source {
        ContentSource::Live { changed: true } => "live (updated)".into(),
        ContentSource::Live { changed: false } => "live (unchanged)".into(),
        ContentSource::Cache { stale: false } => "cache".into(),
        ContentSource::Cache { stale: true } => "cache (stale)".into(),
        ContentSource::Unavailable => "unavailable, fallback".into(),
        ContentSource::ProcessingFailed { message } => format!("error: {message}"),
    }
}

fn print_report(report: &LoadReport) {
    println!();
    if report.outcomes.is_empty() {
        println!("  Pipeline disabled; every section renders its fallback.");
        println!();
        return;
    }
    for outcome in &report.outcomes {
        println!("  {:<16} {}", outcome.component, describe(outcome));
    }
    println!();
    println!(
        "  Loaded {} of {} in {:.1}s",
        report.live() + report.from_cache(),
        report.outcomes.len(),
        report.duration.as_secs_f64()
    );
    println!();
}

/// Prints monitor notifications to the terminal.
struct PrintNotifier;

impl Notifier for PrintNotifier {
    fn new_content(&self, diff: &AssetDiff) {
        println!(
            "  New content available: {} added, {} modified, {} removed",
            diff.added.len(),
            diff.modified.len(),
            diff.removed.len()
        );
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn component_loaded(&self, outcome: &FetchOutcome, current: usize, total: usize) {
        self.spinner.set_message(format!(
            "[{current}/{total}] {}",
            outcome.component
        ));
    }

    fn done(&self, _report: &LoadReport) {
        self.spinner.finish_and_clear();
    }
}
