use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use linkflow::domain::{
    Comment, EntryStatus, HistoryEntry, Liker, RunHistory, RunOptions, RunStatus, SourceKind, StyleHints,
    UnitStatus, preview,
};
use linkflow::history::{HistoryStore, MemoryHistoryStore, SqliteHistoryStore};
use linkflow::providers::{
    AppleNotesSource, ContentGenerator, EngagementGateway, GoogleDocsSource, HttpEngagementGateway, ImageGenerator,
    MockGateway, OpenAiContentGenerator, OpenAiImageGenerator, SourceRegistry, StubContentGenerator,
    StubImageGenerator, Unconfigured,
};
use linkflow::{EngageRequest, Orchestrator, PipelineRequest, Providers};

mod cli;
mod config;

use cli::Cli;
use cli::commands::{Commands, SourceArgs};
use config::Config;

fn setup_logging(config: &Config) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("linkflow")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("linkflow.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Source adapters are read-only, so dry runs use the real ones
fn build_sources(config: &Config) -> Result<SourceRegistry> {
    let google_token = std::env::var(&config.sources.google_token_env)
        .ok()
        .filter(|t| !t.is_empty());
    let google = GoogleDocsSource::new(
        google_token,
        Duration::from_millis(config.sources.google_timeout_ms),
    )
    .context("Failed to create Google Docs client")?;

    Ok(SourceRegistry::with_plain_text()
        .register(SourceKind::AppleNotes, Arc::new(AppleNotesSource::new()))
        .register(SourceKind::GoogleDocs, Arc::new(google)))
}

fn build_providers(config: &Config, dry_run: bool) -> Result<Providers> {
    let sources = Arc::new(build_sources(config)?);

    if dry_run {
        let gateway = MockGateway::new()
            .with_comments(vec![Comment {
                id: "comment-1".to_string(),
                author: "Sample Reader".to_string(),
                text: "Congratulations on the launch!".to_string(),
            }])
            .with_likers(vec![Liker {
                id: "liker-1".to_string(),
                name: "Sample Reader".to_string(),
                profile_url: None,
            }]);
        return Ok(Providers {
            sources,
            generator: Arc::new(StubContentGenerator::new()),
            images: Some(Arc::new(StubImageGenerator::new())),
            gateway: Arc::new(gateway),
        });
    }

    let openai = config.openai.client_config();
    let generator: Arc<dyn ContentGenerator> = match &openai {
        Some(openai) => {
            Arc::new(OpenAiContentGenerator::new(openai.clone()).context("Failed to create OpenAI client")?)
        }
        None => Arc::new(Unconfigured::new(format!("{} not set", config.openai.api_key_env))),
    };
    let images: Option<Arc<dyn ImageGenerator>> = match openai {
        Some(openai) => Some(Arc::new(
            OpenAiImageGenerator::new(openai).context("Failed to create OpenAI image client")?,
        )),
        None => None,
    };

    let gateway: Arc<dyn EngagementGateway> = match config.gateway.client_config() {
        Some(gateway) => Arc::new(HttpEngagementGateway::new(gateway).context("Failed to create gateway client")?),
        None => Arc::new(Unconfigured::new("gateway.base_url not configured")),
    };

    Ok(Providers {
        sources,
        generator,
        images,
        gateway,
    })
}

fn open_history(config: &Config, dry_run: bool) -> Result<Arc<dyn HistoryStore>> {
    if dry_run {
        return Ok(Arc::new(MemoryHistoryStore::new()));
    }
    let store = SqliteHistoryStore::open(&config.storage.history_db)
        .context(format!("Failed to open history at {}", config.storage.history_db.display()))?;
    Ok(Arc::new(store))
}

fn build_orchestrator(config: &Config, dry_run: bool) -> Result<Orchestrator> {
    let providers = build_providers(config, dry_run)?;
    let history = open_history(config, dry_run)?;
    Ok(Orchestrator::new(providers, history).with_config(config.orchestrator_config()))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            source,
            run_id,
            image,
            engage,
            context,
            dry_run,
        } => {
            handle_run_command(
                source,
                run_id.clone(),
                RunOptions {
                    generate_image: *image,
                    auto_engage: *engage,
                },
                context.as_deref(),
                *dry_run,
                config,
            )
            .await
        }
        Commands::Status { id, detailed } => handle_status_command(id, *detailed, config),
        Commands::History { limit } => handle_history_command(*limit, config),
        Commands::Cancel { id, reason } => handle_cancel_command(id, reason.as_deref(), config).await,
        Commands::Engage {
            id,
            replies,
            messages,
            max_likers,
            round,
        } => {
            // Replies are the default action
            let request = EngageRequest {
                reply_to_comments: *replies || !*messages,
                message_likers: *messages,
                max_likers: *max_likers,
                hints: StyleHints::default(),
                round: *round,
            };
            handle_engage_command(id, &request, config).await
        }
        Commands::Check => handle_check_command(config),
    }
}

async fn handle_run_command(
    source: &SourceArgs,
    run_id: Option<String>,
    options: RunOptions,
    context: Option<&str>,
    dry_run: bool,
    config: &Config,
) -> Result<()> {
    let descriptor = source.descriptor().ok_or_else(|| eyre!("A source is required"))?;
    info!("Running pipeline for {}", descriptor.describe());
    if dry_run {
        println!("{}", "Dry run: using stub generators and an in-memory gateway".yellow());
    }

    let orchestrator = build_orchestrator(config, dry_run)?;
    let mut request = PipelineRequest::new(descriptor).with_options(options);
    if let Some(run_id) = run_id {
        request = request.with_run_id(run_id);
    }
    if let Some(context) = context {
        request = request.with_hints(StyleHints::with_context(context));
    }

    let history = orchestrator.run_pipeline(&request).await.context("Pipeline failed")?;
    print_run(&history, false);

    match history.run.status {
        RunStatus::Failed => Err(eyre!(
            "Run {} failed: {}",
            history.run.id,
            history.run.last_error.as_deref().unwrap_or("unknown error")
        )),
        _ => Ok(()),
    }
}

fn handle_status_command(id: &str, detailed: bool, config: &Config) -> Result<()> {
    info!("Getting status for run: {} (detailed: {})", id, detailed);
    let history = open_history(config, false)?;
    let run = history
        .get_run(id)
        .context("Failed to read history")?
        .ok_or_else(|| eyre!("Run not found: {}", id))?;
    print_run(&run, detailed);
    Ok(())
}

fn handle_history_command(limit: usize, config: &Config) -> Result<()> {
    info!("Listing {} recent runs", limit);
    let history = open_history(config, false)?;
    let runs = history.list_recent(limit).context("Failed to read history")?;
    if runs.is_empty() {
        println!("{}", "No runs recorded".yellow());
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {}  {:<16} {}",
            format_time(run.created_at).dimmed(),
            run.id.cyan(),
            colored_status(run.status),
            run.preview.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn handle_cancel_command(id: &str, reason: Option<&str>, config: &Config) -> Result<()> {
    info!("Cancelling run: {} (reason: {:?})", id, reason);
    let orchestrator = build_orchestrator(config, false)?;
    let run = orchestrator
        .cancel(id, reason.unwrap_or("cancelled by user"))
        .await
        .context("Failed to cancel run")?;
    println!("{} {} ({})", "Cancel:".red(), run.id, colored_status(run.status));
    Ok(())
}

async fn handle_engage_command(id: &str, request: &EngageRequest, config: &Config) -> Result<()> {
    info!("Engaging on run: {} ({:?})", id, request);
    let orchestrator = build_orchestrator(config, false)?;
    let report = orchestrator.engage(id, request).await.context("Engagement failed")?;

    for outcome in &report.outcomes {
        let status = match outcome.status {
            UnitStatus::Sent => "sent".green(),
            UnitStatus::AlreadySent => "already sent".cyan(),
            UnitStatus::Failed => "failed".red(),
        };
        println!("  {:<24} {}", outcome.target, status);
        if let Some(error) = &outcome.error {
            println!("    {}", error.red());
        }
    }
    for error in &report.listing_errors {
        println!("  {} {}", "listing failed:".red(), error);
    }
    println!(
        "{} {} sent, {} failed",
        "Engagement:".green(),
        report.succeeded_count(),
        report.failed_count()
    );
    Ok(())
}

fn handle_check_command(config: &Config) -> Result<()> {
    info!("Checking provider configuration");
    let set = |ok: bool| if ok { "configured".green() } else { "missing".red() };
    let env_set = |var: &str| std::env::var(var).is_ok_and(|v| !v.is_empty());

    println!("{}", "Providers:".cyan());
    println!(
        "  OpenAI ({}): {}",
        config.openai.api_key_env,
        set(env_set(&config.openai.api_key_env))
    );
    println!(
        "  Gateway: {}",
        match &config.gateway.base_url {
            Some(url) => url.green(),
            None => "missing".red(),
        }
    );
    println!(
        "  Gateway token ({}): {}",
        config.gateway.token_env,
        set(env_set(&config.gateway.token_env))
    );
    println!(
        "  Google Docs token ({}): {}",
        config.sources.google_token_env,
        set(env_set(&config.sources.google_token_env))
    );
    println!("  Apple Notes: {}", set(cfg!(target_os = "macos")));
    println!("{}", "Storage:".cyan());
    println!("  History: {}", config.storage.history_db.display());
    println!("  Images: {}", config.openai.image_dir.display());
    Ok(())
}

fn colored_status(status: RunStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::Succeeded => label.green(),
        RunStatus::Failed => label.red(),
        RunStatus::PartiallyFailed | RunStatus::Cancelled => label.yellow(),
        RunStatus::Pending | RunStatus::Running => label.cyan(),
    }
}

fn format_time(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_run(history: &RunHistory, detailed: bool) {
    let run = &history.run;
    println!("{} {}", "Run:".green(), run.id.cyan());
    println!("  State:   {} ({})", run.state, colored_status(run.status));
    println!("  Created: {}", format_time(run.created_at));
    if let Some(content) = run.current_content() {
        println!("  Content: {}", preview(&content.text, 100));
        if !content.hashtags.is_empty() {
            println!("  Tags:    {}", content.hashtags.iter().map(|t| format!("#{}", t)).collect::<Vec<_>>().join(" "));
        }
        if let Some(image) = &content.image {
            println!("  Image:   {}", image.local_path.as_ref().map_or(image.url.clone(), |p| p.display().to_string()));
        }
    }
    if let Some(post_id) = &run.post_id {
        println!("  Post:    {}", post_id);
    }
    if !run.engagement.is_empty() {
        let sent = run.engagement.iter().filter(|o| o.status == UnitStatus::Sent).count();
        println!("  Engaged: {} of {} units sent", sent, run.engagement.len());
    }
    if let Some(error) = &run.last_error {
        println!("  Error:   {}", error.red());
    }

    let retries = history.entries.iter().filter(|e| e.status == EntryStatus::Retrying).count();
    println!("  Entries: {} ({} retries)", history.entries.len(), retries);
    if detailed {
        for entry in &history.entries {
            print_entry(entry);
        }
    }
}

fn print_entry(entry: &HistoryEntry) {
    let status = match entry.status {
        EntryStatus::Ok => entry.status.to_string().green(),
        EntryStatus::Error => entry.status.to_string().red(),
        EntryStatus::Retrying => entry.status.to_string().yellow(),
    };
    print!(
        "    {:>3} {} {:<20} {:<8}",
        entry.seq,
        format_time(entry.timestamp).dimmed(),
        entry.stage,
        status
    );
    if let Some(target) = &entry.target {
        print!(" {}", target);
    }
    if let Some(error) = &entry.error {
        print!(" {}", error);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
