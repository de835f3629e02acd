//! Bugsmith - AI-assisted bug report generation
//!
//! A CLI tool that streams a model's analysis of a plain-language
//! problem description and turns its structured payload into a
//! normalized bug report. It also rolls up test status for a list of
//! tracker issues.
//!
//! `generate --format report` prints only the final report as JSON.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (connection, config, invalid arguments, etc.)
//!   2 - `generate` ended with an error event

mod analysis;
mod cache;
mod cli;
mod config;
mod error;
mod llm;
mod models;
mod report;
mod tracker;

use anyhow::{anyhow, bail, Context, Result};
use cache::TtlCache;
use cli::{Args, Command, GenerateArgs, GenerateFormat, RollupArgs, RollupFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use llm::{spawn_generation, UpstreamClient};
use models::{ConversationTurn, GenerationRequest, MediaBlob, StatusRow, StreamEvent};
use report::ReportNormalizer;
use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracker::{StatusCache, TrackerClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Bugsmith v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let outcome = match args.command {
        Some(Command::Generate(ref generate)) => run_generate(&args, generate).await,
        Some(Command::Rollup(ref rollup)) => run_rollup(&args, rollup).await,
        None => Ok(0),
    };

    match outcome {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .bugsmith.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", DEFAULT_CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the model endpoint, markers and tracker URL.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// Logs go to stderr so they never interleave with streamed output.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    let mut config = if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        Config::load(config_path)?
    } else {
        // Try default location
        match Config::load_default() {
            Ok(Some(config)) => {
                info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
                config
            }
            Ok(None) => {
                debug!("No config file found, using defaults");
                Config::default()
            }
            Err(e) => {
                warn!("Failed to load config: {}", e);
                Config::default()
            }
        }
    };

    config.merge_with_args(args);
    Ok(config)
}

/// Read attachments and history into a generation request.
fn build_request(generate: &GenerateArgs) -> Result<GenerationRequest> {
    let mut request = GenerationRequest::new(generate.description.trim());

    for path in &generate.attach {
        let media_type = cli::media_type_for(path)
            .ok_or_else(|| anyhow!("Unsupported attachment type: {}", path.display()))?;
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
        debug!("Attaching {} ({} bytes, {})", path.display(), bytes.len(), media_type);
        request = request.with_attachment(MediaBlob::from_bytes(media_type, &bytes));
    }

    if let Some(ref path) = generate.history {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file: {}", path.display()))?;
        let history: Vec<ConversationTurn> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse history file: {}", path.display()))?;
        request = request.with_history(history);
    }

    Ok(request)
}

/// Run one generation and print its events. Returns exit code (0 or 2).
async fn run_generate(args: &Args, generate: &GenerateArgs) -> Result<i32> {
    let config = load_config(args)?;
    let request = build_request(generate)?;

    let settings = config.model_settings();
    info!(
        "Model: {} ({:?} at {}), deadline {}s",
        settings.model_name, settings.provider, settings.base_url, settings.timeout_seconds
    );

    let client = UpstreamClient::new(settings, config.markers()?)?;
    let normalizer = Arc::new(ReportNormalizer::new());
    let mut events = spawn_generation(
        Arc::new(client),
        normalizer,
        request,
        config.relay.channel_capacity,
    );

    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match generate.format {
            GenerateFormat::Sse => print!("{}", event.to_sse()),
            GenerateFormat::Json => println!("{}", serde_json::to_string(&event)?),
            GenerateFormat::Text => match event {
                StreamEvent::Chunk(ref text) => print!("{}", text),
                StreamEvent::Complete(ref report) => {
                    println!("\n\n{}", report::generate_markdown_report(report))
                }
                StreamEvent::Error(ref message) => eprintln!("\n❌ {}", message),
            },
            GenerateFormat::Report => match event {
                StreamEvent::Chunk(_) => {}
                StreamEvent::Complete(ref report) => {
                    println!("{}", report::generate_json_report(report)?)
                }
                StreamEvent::Error(ref message) => eprintln!("❌ {}", message),
            },
        }
        stdout.flush()?;

        if event.is_terminal() {
            let exit_code = match event {
                StreamEvent::Complete(_) => 0,
                _ => 2,
            };
            return Ok(exit_code);
        }
    }

    bail!("Generation stopped without a result")
}

/// Look up status for every key, optionally on an interval.
async fn run_rollup(args: &Args, rollup_args: &RollupArgs) -> Result<i32> {
    let mut config = load_config(args)?;
    config.merge_with_rollup_args(rollup_args);

    if config.rollup.tracker_url.is_empty() {
        bail!("No tracker URL configured. Set [rollup] tracker_url or pass --tracker-url");
    }

    let client = TrackerClient::new(
        &config.rollup.tracker_url,
        config.rollup.timeout_seconds,
        config.retry_policy(),
    )?;
    let ttl = chrono::Duration::seconds(config.rollup.cache_ttl_seconds as i64);
    let cache: RefCell<StatusCache> = RefCell::new(TtlCache::new(ttl));

    loop {
        let start_time = Instant::now();
        let rows = rollup_pass(
            &client,
            &cache,
            &rollup_args.keys,
            config.rollup.concurrency,
            args.quiet,
        )
        .await;

        let output = match rollup_args.format {
            RollupFormat::Table => report::generate_status_table(&rows),
            RollupFormat::Json => report::generate_status_json(&rows)?,
        };
        println!("{}", output);
        info!(
            "Rollup took {:.1}s ({} cached entries)",
            start_time.elapsed().as_secs_f64(),
            cache.borrow().len()
        );

        let Some(interval) = rollup_args.watch else {
            return Ok(0);
        };
        info!("Refreshing in {}s", interval);
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

/// One rollup over `keys` with a progress bar.
async fn rollup_pass(
    client: &TrackerClient,
    cache: &RefCell<StatusCache>,
    keys: &[String],
    concurrency: usize,
    quiet: bool,
) -> Vec<StatusRow> {
    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(keys.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar
    };

    let progress_ref = &progress;
    let rows = analysis::rollup(keys, concurrency, move |key| async move {
        progress_ref.set_message(key.clone());
        let result = client.lookup(&key, cache).await;
        progress_ref.inc(1);
        result
    })
    .await;

    progress.finish_and_clear();
    rows
}
