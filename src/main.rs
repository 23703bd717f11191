//! # Lead Sieve CLI
//!
//! Command-line interface for the Lead Sieve library (`lead_sieve_core`).
//! This binary parses arguments, builds the configuration, runs list
//! generation with live progress, and manages the suppression list.

use lead_sieve_core::{
    generate_list, open_store, sync_suppressions_from_leads, upload_suppressions, AcceptedLead,
    AppError, CancellationToken, ConfigBuilder, GenderFilter, LeadStore, ProgressEmitter,
    ProgressEvent, RunRequest, RunSummary, SourceKind,
};

// Dependencies specific to the CLI binary
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Builds verified outreach lead lists.",
    long_about = "Lead Sieve fetches candidates from a lead table, filters and deduplicates them locally, verifies deliverability through a paid service with a result cache, and stores the accepted leads under a list name."
)]
struct AppArgs {
    /// Path to a configuration file (TOML format). CLI args override file settings.
    #[arg(long, global = true, env = "LEAD_SIEVE_CONFIG")]
    config_file: Option<String>,

    /// SQLite database holding leads, suppression entries and cached verifications.
    #[arg(long, global = true, env = "LEAD_SIEVE_DATABASE")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new lead list.
    Generate(GenerateArgs),
    /// Manage the suppression list.
    Suppression {
        #[command(subcommand)]
        action: SuppressionAction,
    },
    /// Show stored lead counts per list.
    Stats,
}

#[derive(Subcommand, Debug)]
enum SuppressionAction {
    /// Add addresses from a text or CSV file.
    Upload { file: PathBuf },
    /// Suppress every address already stored as a lead.
    Sync,
    /// Show suppression list size by provenance.
    Stats,
    /// Remove every suppression entry.
    Clear,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Name (tag) of the list to build.
    #[arg(long)]
    list_name: String,

    /// Number of verified leads wanted.
    #[arg(long)]
    target: usize,

    /// Gender filter: All, male or female.
    #[arg(long, default_value = "All")]
    gender: GenderFilter,

    /// Case-insensitive industry substring.
    #[arg(long)]
    industry: Option<String>,

    /// Print progress events as JSON lines on stdout instead of a progress bar.
    #[arg(long, default_value = "false")]
    json: bool,

    /// Also write the accepted leads to this JSON file.
    #[arg(short, long)]
    output: Option<String>,

    /// Candidate source: bigquery or file.
    #[arg(long, env = "LEAD_SIEVE_SOURCE")]
    source: Option<SourceKind>,

    #[arg(long, env = "LEAD_SIEVE_BQ_PROJECT")]
    project_id: Option<String>,

    #[arg(long, env = "LEAD_SIEVE_BQ_QUERY")]
    query_template: Option<String>,

    /// Fixed OAuth access token; overrides service-account credentials.
    #[arg(long, env = "LEAD_SIEVE_BQ_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Service-account key JSON, pasted inline.
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS_JSON", hide_env_values = true)]
    credentials_json: Option<String>,

    /// Path to a service-account key file.
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials_file: Option<String>,

    /// `name,gender` CSV of extra first names for gender inference.
    #[arg(long, env = "LEAD_SIEVE_NAMES_FILE")]
    names_file: Option<String>,

    /// Directory for the per-run audit sample CSV; empty disables it.
    #[arg(long, env = "LEAD_SIEVE_AUDIT_DIR")]
    audit_dir: Option<String>,

    /// JSON file of candidate records (file source).
    #[arg(long, env = "LEAD_SIEVE_SOURCE_FILE")]
    source_file: Option<String>,

    /// Comma-separated allow-list of source identifiers.
    #[arg(long, value_delimiter = ',', env = "LEAD_SIEVE_ENABLED_SOURCES")]
    enabled_sources: Option<Vec<String>>,

    /// Verification service API key.
    #[arg(long, env = "LEAD_SIEVE_VERIFIER_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Comma-separated statuses that qualify a lead (default: safe).
    #[arg(long, value_delimiter = ',', env = "LEAD_SIEVE_ACCEPT")]
    accept: Option<Vec<String>>,

    #[arg(long, env = "LEAD_SIEVE_OVERSAMPLE")]
    oversample: Option<f64>,

    #[arg(long)]
    min_batch: Option<usize>,

    #[arg(long)]
    max_batch: Option<usize>,

    /// Stop after examining target x this many candidates.
    #[arg(long)]
    safety_multiplier: Option<usize>,

    /// Concurrent verification calls per sub-batch.
    #[arg(long)]
    sub_batch_size: Option<usize>,

    /// Verification call timeout in seconds.
    #[arg(long)]
    verify_timeout: Option<u64>,

    /// Candidate source request timeout in seconds.
    #[arg(long)]
    source_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Setting up tracing subscriber failed")?;

    let args = AppArgs::parse();
    tracing::debug!("Parsed CLI arguments: {:?}", args);

    let mut config_builder = ConfigBuilder::new();
    if let Some(ref path) = args.config_file {
        config_builder = config_builder.config_file(path);
    }
    if let Some(ref path) = args.database {
        config_builder = config_builder.database_path(path);
    }
    if let Command::Generate(ref generate) = args.command {
        config_builder = apply_generate_overrides(config_builder, generate);
    }

    let config = match config_builder.build() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            return Err(anyhow::anyhow!("Failed to build configuration: {}", e));
        }
    };
    tracing::debug!("Effective configuration loaded: {:?}", config);

    let store = open_store(&config)
        .with_context(|| format!("Failed to open database '{}'", config.database_path))?;

    match args.command {
        Command::Generate(generate) => run_generate(&config, store, generate).await,
        Command::Suppression { action } => run_suppression(store.as_ref(), action).await,
        Command::Stats => run_stats(store.as_ref()).await,
    }
}

fn apply_generate_overrides(mut builder: ConfigBuilder, args: &GenerateArgs) -> ConfigBuilder {
    if let Some(kind) = args.source {
        builder = builder.source_kind(kind);
    }
    if let Some(ref v) = args.project_id {
        builder = builder.project_id(v);
    }
    if let Some(ref v) = args.query_template {
        builder = builder.query_template(v);
    }
    if let Some(ref v) = args.access_token {
        builder = builder.access_token(v);
    }
    if let Some(ref v) = args.credentials_json {
        builder = builder.credentials_json(v);
    }
    if let Some(ref v) = args.credentials_file {
        builder = builder.credentials_file(v);
    }
    if let Some(ref v) = args.source_file {
        builder = builder.source_file(v);
    }
    if let Some(ref v) = args.names_file {
        builder = builder.names_file(v);
    }
    if let Some(ref v) = args.audit_dir {
        builder = builder.audit_sample_dir(v);
    }
    if let Some(ref sources) = args.enabled_sources {
        builder = builder.enabled_sources(sources.clone());
    }
    if let Some(ref v) = args.api_key {
        builder = builder.verifier_api_key(v);
    }
    if let Some(ref statuses) = args.accept {
        builder = builder.acceptable_statuses(statuses.clone());
    }
    if let Some(v) = args.oversample {
        builder = builder.oversample_factor(v);
    }
    if let Some(v) = args.min_batch {
        builder = builder.min_batch(v);
    }
    if let Some(v) = args.max_batch {
        builder = builder.max_batch(v);
    }
    if let Some(v) = args.safety_multiplier {
        builder = builder.safety_multiplier(v);
    }
    if let Some(v) = args.sub_batch_size {
        builder = builder.verify_sub_batch_size(v);
    }
    if let Some(t) = args.verify_timeout {
        builder = builder.verify_timeout(Duration::from_secs(t));
    }
    if let Some(t) = args.source_timeout {
        builder = builder.source_timeout(Duration::from_secs(t));
    }
    builder
}

async fn run_generate(
    config: &lead_sieve_core::Config,
    store: Arc<dyn LeadStore>,
    args: GenerateArgs,
) -> Result<()> {
    let start_time = Instant::now();
    let mut request = RunRequest::new(args.list_name.clone(), args.target).with_gender(args.gender);
    if let Some(ref industry) = args.industry {
        request = request.with_industry(industry);
    }

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step...");
            ctrl_c_token.cancel();
        }
    });

    let (emitter, rx) = ProgressEmitter::channel();
    let emitter = emitter.cancel_on_disconnect(cancel.clone());

    let (result, _) = tokio::join!(
        generate_list(config, store, &request, &emitter, &cancel),
        render_events(rx, args.target, args.json)
    );

    match result {
        Ok(report) => {
            if !args.json {
                print_summary(&report.summary);
            }
            if let Some(ref path) = args.output {
                save_leads(&report.leads, path)?;
                tracing::info!("Wrote {} leads to '{}'.", report.leads.len(), path);
            }
            tracing::info!("Generation finished. Total duration: {:.2?}", start_time.elapsed());
            Ok(())
        }
        Err(AppError::Persistence {
            at_risk,
            leads,
            source,
        }) => {
            let rescue = format!("{}-unsaved.json", request.list_name.trim());
            save_leads(&leads, &rescue)?;
            Err(anyhow::anyhow!(
                "Database save failed ({}); {} verified leads were written to '{}' instead",
                source,
                at_risk,
                rescue
            ))
        }
        Err(e) => Err(anyhow::anyhow!("List generation failed: {}", e)),
    }
}

/// Consumes progress events until the terminal one arrives.
async fn render_events(mut rx: UnboundedReceiver<ProgressEvent>, target: usize, json: bool) {
    let pb = if json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(target as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} clean | {msg}")
            .map(|s| s.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    };

    while let Some(event) = rx.recv().await {
        if json {
            match event.to_json_line() {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Could not serialize progress event: {}", e),
            }
        }
        match event {
            ProgressEvent::Status { ref message } => pb.set_message(message.clone()),
            ProgressEvent::Progress(ref snapshot) => {
                pb.set_position(snapshot.clean as u64);
                pb.set_message(snapshot.message.clone());
            }
            ProgressEvent::Done(ref summary) => {
                pb.set_position(summary.clean_leads as u64);
                pb.finish_with_message(summary.message().to_string());
                break;
            }
            ProgressEvent::Error { ref message } => {
                pb.abandon_with_message(format!("Failed: {}", message));
                break;
            }
        }
    }
}

fn save_leads(leads: &[AcceptedLead], file_path: &str) -> Result<()> {
    tracing::debug!("Creating output file: {}", file_path);
    let file = File::create(file_path)
        .with_context(|| format!("Failed to create/truncate output file '{}'", file_path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, leads)
        .with_context(|| format!("Failed to serialize leads to JSON for '{}'", file_path))?;
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    const BLUE: &str = "\x1b[34m";
    const GREEN: &str = "\x1b[32m";
    const YELLOW: &str = "\x1b[33m";
    const RESET: &str = "\x1b[0m";

    let stats = &summary.stats;
    println!("\n{BLUE}===== Lead Sieve: {} ====={RESET}", summary.list_name);
    let colour = if summary.clean_leads >= summary.requested {
        GREEN
    } else {
        YELLOW
    };
    println!(
        "Clean leads:   {colour}{}{RESET} of {} requested ({} newly saved)",
        summary.clean_leads, summary.requested, summary.persisted
    );
    println!("Fetched:       {}", stats.total_fetched);
    println!("Pre-filtered:  {}", stats.pre_filtered);
    println!("Duplicates:    {}", stats.duplicates_skipped);
    println!("Suppressed:    {}", stats.suppressed_skipped);
    println!("Cached hits:   {}", stats.cached_hits);
    println!("Sent to verifier: {}", stats.total_sent_to_verifier);
    if let Some(ref file) = stats.sample_csv_file {
        println!("Audit sample:  {} ({} entries)", file, stats.sample_csv_entries);
    }
    if !stats.status_breakdown.is_empty() {
        println!("\n{BLUE}Status breakdown:{RESET}");
        for (status, count) in &stats.status_breakdown {
            println!("- {}: {}", status, count);
        }
    }
    if !stats.source_stats.is_empty() {
        println!("\n{BLUE}By source:{RESET}");
        for (source, s) in &stats.source_stats {
            println!(
                "- {}: {} verified, {} safe ({}%), {} invalid, {} catch-all",
                source,
                s.total,
                s.safe,
                s.safe_rate(),
                s.invalid,
                s.catch_all
            );
        }
    }
    println!("\n{}", stats.message);
    println!("{BLUE}=============================={RESET}\n");
}

async fn run_suppression(store: &dyn LeadStore, action: SuppressionAction) -> Result<()> {
    match action {
        SuppressionAction::Upload { file } => {
            let body = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read '{}'", file.display()))?;
            let upload = upload_suppressions(store, &body).await?;
            println!(
                "Added {} new addresses ({} in file, {} suppressed in total)",
                upload.newly_added, upload.emails_in_file, upload.total
            );
        }
        SuppressionAction::Sync => {
            let added = sync_suppressions_from_leads(store).await?;
            println!("Suppressed {} addresses from stored leads", added);
        }
        SuppressionAction::Stats => {
            let stats = store.suppression_stats().await?;
            println!("Suppressed addresses: {}", stats.total);
            for (source, count) in &stats.by_source {
                println!("- {}: {}", source, count);
            }
        }
        SuppressionAction::Clear => {
            let removed = store.clear_suppressions().await?;
            println!("Removed {} suppression entries", removed);
        }
    }
    Ok(())
}

async fn run_stats(store: &dyn LeadStore) -> Result<()> {
    let total = store.lead_count().await?;
    let lists = store.list_stats().await?;
    println!("Stored leads: {}", total);
    for list in &lists {
        println!("- {}: {}", list.list_tag, list.total);
    }
    Ok(())
}
