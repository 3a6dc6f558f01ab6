//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use paperpipe_batch::{GeminiBatchClient, GeminiOptions};
use paperpipe_core::{AdvanceReport, EnqueueOutcome, Pipeline, ProgressReporter, PromptSet};
use paperpipe_discovery::{ArxivOptions, ArxivSource};
use paperpipe_notify::DiscordWebhook;
use paperpipe_shared::{
    AppConfig, JobStatus, PipelineSettings, StateDocument, init_config, load_config,
    load_config_from, read_secret,
};
use paperpipe_storage::{StateStore, decode_state};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paperpipe: find new papers, keep the relevant ones, post their summaries.
#[derive(Parser)]
#[command(
    name = "paperpipe",
    version,
    about = "Discover new arXiv papers, filter and summarize them with batch LLM jobs, and post the results to a webhook.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.paperpipe/paperpipe.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State file, overriding `[state] path` from the config.
    #[arg(long, env = "PENDING_JOBS_FILE", global = true)]
    pub state_file: Option<PathBuf>,

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

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Discover candidate papers and submit the relevance batch.
    Enqueue,

    /// Poll relevance batches and submit summary batches.
    AdvanceInterest,

    /// Poll summary batches and deliver summaries to the webhook.
    AdvanceDelivery,

    /// Show every job in the state file.
    Status {
        /// Print machine-readable JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "paperpipe=info",
        1 => "paperpipe=debug",
        _ => "paperpipe=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Enqueue => cmd_enqueue(&config).await,
        Command::AdvanceInterest => cmd_advance_interest(&config).await,
        Command::AdvanceDelivery => cmd_advance_delivery(&config).await,
        Command::Status { json } => cmd_status(&config, json),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

/// Load the config file and apply CLI overrides on top of it.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(path) = &cli.state_file {
        config.state.path = path.to_string_lossy().into_owned();
    }
    Ok(config)
}

fn state_store(config: &AppConfig) -> StateStore {
    StateStore::new(&config.state.path)
}

fn batch_client(config: &AppConfig) -> Result<GeminiBatchClient> {
    let api_key = read_secret(&config.batch.api_key_env, "Batch API key")?;
    Ok(GeminiBatchClient::new(GeminiOptions::from_config(
        &config.batch,
        api_key,
    ))?)
}

// ---------------------------------------------------------------------------
// Pipeline commands
// ---------------------------------------------------------------------------

async fn cmd_enqueue(config: &AppConfig) -> Result<()> {
    let batch = batch_client(config)?;
    let prompts = PromptSet::load(&config.prompts)?;
    let source = ArxivSource::new(ArxivOptions::from(&config.discovery))?;
    let store = state_store(config);

    info!(
        categories = ?config.discovery.categories,
        state = %store.path().display(),
        "enqueueing new papers"
    );

    let reporter = CliProgress::new();
    let pipeline =
        Pipeline::new(&batch, prompts, PipelineSettings::from(config)).with_progress(&reporter);
    let outcome = pipeline.enqueue(&source, &store, Utc::now()).await;
    reporter.finish();

    match outcome? {
        EnqueueOutcome::NoCandidates => {
            println!("No new papers found; nothing enqueued.");
        }
        EnqueueOutcome::Enqueued {
            pipeline_id,
            documents,
            handle,
        } => {
            println!();
            println!("  Job enqueued!");
            println!("  ID:     {pipeline_id}");
            println!("  Papers: {documents}");
            println!("  Batch:  {handle}");
            println!();
        }
    }
    Ok(())
}

async fn cmd_advance_interest(config: &AppConfig) -> Result<()> {
    let batch = batch_client(config)?;
    let prompts = PromptSet::load(&config.prompts)?;
    let store = state_store(config);

    let reporter = CliProgress::new();
    let report = Pipeline::new(&batch, prompts, PipelineSettings::from(config))
        .with_progress(&reporter)
        .advance_interest(&store, Utc::now())
        .await?;

    print_report("Relevance checks", &report);
    Ok(())
}

async fn cmd_advance_delivery(config: &AppConfig) -> Result<()> {
    let webhook_url = read_secret(&config.notify.webhook_url_env, "Webhook URL")?;
    let batch = batch_client(config)?;
    let notifier = DiscordWebhook::new(webhook_url)?;
    let prompts = PromptSet::load(&config.prompts)?;
    let store = state_store(config);

    let reporter = CliProgress::new();
    let report = Pipeline::new(&batch, prompts, PipelineSettings::from(config))
        .with_progress(&reporter)
        .advance_delivery(&notifier, &store, Utc::now())
        .await?;

    print_report("Summaries and delivery", &report);
    Ok(())
}

fn print_report(what: &str, report: &AdvanceReport) {
    println!();
    println!("  {what}");
    println!("  Examined:  {}", report.examined);
    println!("  Changed:   {}", report.changed);
    println!("  Finalized: {}", report.finalized);
    println!();
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

fn cmd_status(config: &AppConfig, json: bool) -> Result<()> {
    let store = state_store(config);
    if !store.path().exists() {
        return Err(eyre!(
            "no state file at '{}'; run `paperpipe enqueue` first",
            store.path().display()
        ));
    }
    let state = read_state(&store)?;

    for job in state.jobs() {
        for violation in job.invariant_violations() {
            warn!(pipeline_id = %job.pipeline_id, %violation, "job invariant violated");
        }
    }
    let opaque = state.opaque_count();
    if opaque > 0 {
        warn!(count = opaque, "state holds job entries that could not be read");
    }

    if json {
        let jobs: Vec<serde_json::Value> = state
            .jobs()
            .map(|job| {
                serde_json::json!({
                    "pipeline_id": job.pipeline_id,
                    "status": job.status,
                    "documents": job.documents.len(),
                    "interested": job.interested_ids.len(),
                    "summaries": job.summaries.len(),
                    "sent": job.sent_ids.len(),
                    "retry_count": job.retry_count,
                    "last_error": job.last_error,
                    "updated_at": job.updated_at,
                })
            })
            .collect();
        let out = serde_json::json!({ "jobs": jobs, "unreadable_entries": opaque });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{:<28} {:<26} {:>5} {:>5} {:>5} {:>5} {:>5}  LAST ERROR",
        "ID", "STATUS", "DOCS", "INT", "SUM", "SENT", "RETRY"
    );
    for job in state.jobs() {
        println!(
            "{:<28} {:<26} {:>5} {:>5} {:>5} {:>5} {:>5}  {}",
            job.pipeline_id,
            job.status,
            job.documents.len(),
            job.interested_ids.len(),
            job.summaries.len(),
            job.sent_ids.len(),
            job.retry_count,
            job.last_error.as_deref().unwrap_or("-"),
        );
    }

    let active = state
        .jobs()
        .filter(|j| !j.is_terminal() && !matches!(j.status, JobStatus::Unknown(_)))
        .count();
    println!();
    println!("  {active} active, {opaque} unreadable");
    Ok(())
}

/// Decode the state file without migrating it on disk or setting a corrupt
/// file aside.
fn read_state(store: &StateStore) -> Result<StateDocument> {
    let path = store.path();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read state file '{}': {e}", path.display()))?;
    decode_state(&raw)
        .map_err(|reason| eyre!("state file '{}' is unreadable: {reason}", path.display()))
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
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
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn job_started(&self, pipeline_id: &str, status: &JobStatus) {
        self.spinner.set_message(format!("{pipeline_id} ({status})"));
    }

    fn item_posted(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Posting [{current}/{total}]"));
    }

    fn done(&self, _report: &AdvanceReport) {
        self.finish();
    }
}
