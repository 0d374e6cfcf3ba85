//! Post updater CLI
//!
//! Runs one update cycle against the configured sources and inspects the
//! local store.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use post_updater::{
    error::Result,
    models::Config,
    pipeline::{self, RequestDecision, UpdateOutcome},
    storage::{ItemStore, LocalItemStore, LocalStorage, LocalWatermarkStore, WatermarkStore},
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

const POST_TEMPLATE: &str = "{date}  [{board}] {title} ({author})\n        {link}";

/// Post updater - keeps a local post store current
#[derive(Parser, Debug)]
#[command(name = "post-updater", version, about = "Incremental post updater")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "post-updater.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one update cycle and wait for it to finish
    Update {
        /// Run even if automatic updating is disabled
        #[arg(long)]
        force: bool,
    },

    /// Show the watermark and stored post count
    Status,

    /// Print the newest stored posts
    Latest {
        /// Number of posts to print
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag and configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(&cli.config);
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    let config = match loaded {
        Ok(config) => {
            log::debug!("Loaded configuration from {}", cli.config.display());
            config
        }
        Err(e) if matches!(cli.command, Command::Validate) => {
            log::error!("Cannot load {}: {}", cli.config.display(), e);
            return Err(e);
        }
        Err(e) => {
            log::warn!(
                "Config load failed from {}: {}. Using defaults.",
                cli.config.display(),
                e
            );
            Config::default()
        }
    };

    match cli.command {
        Command::Update { force } => run_update(config, force).await?,
        Command::Status => show_status(&config).await?,
        Command::Latest { count } => show_latest(&config, count).await?,
        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "Config OK ({} fallback boards, {} common)",
                config.fallback.boards.len(),
                config.fallback.boards.iter().filter(|b| b.common).count()
            );
        }
    }

    Ok(())
}

async fn run_update(mut config: Config, force: bool) -> Result<()> {
    config.validate()?;
    if force {
        config.updater.auto_update_enabled = true;
    }

    let scheduler = pipeline::build_scheduler(&config, Handle::current()).await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    scheduler.set_listener(move |outcome| {
        let _ = tx.send(outcome);
    });

    match scheduler.request() {
        RequestDecision::Started => {}
        RequestDecision::AlreadyRunning => log::info!("Update already running"),
        RequestDecision::Disabled => {
            log::info!("Automatic update is disabled; use --force to run anyway");
            return Ok(());
        }
        RequestDecision::TooSoon => {
            log::info!(
                "Last update at {:?}; next update allowed {}s after it",
                scheduler.last_update_time(),
                config.updater.base_interval_secs
            );
            return Ok(());
        }
        RequestDecision::NoConnectivity => return Ok(()),
    }

    let signal = tokio::signal::ctrl_c();
    let outcome = tokio::select! {
        outcome = rx.recv() => outcome,
        _ = signal => {
            scheduler.cancel();
            rx.recv().await
        }
    };

    match outcome {
        Some(UpdateOutcome::Inserted(0)) => log::info!("No new posts"),
        Some(UpdateOutcome::Inserted(n)) => log::info!("{} new posts stored", n),
        Some(UpdateOutcome::NoUpdate) => log::warn!("No source returned posts"),
        Some(UpdateOutcome::NotDue) => log::info!("Posts are up to date"),
        Some(UpdateOutcome::Cancelled) => log::info!("Update cancelled"),
        Some(UpdateOutcome::StoreFailed) => log::error!("Posts could not be stored"),
        None => log::error!("Update ended without reporting"),
    }
    Ok(())
}

async fn show_status(config: &Config) -> Result<()> {
    let storage = LocalStorage::new(&config.storage.dir);
    let watermark = LocalWatermarkStore::new(storage.clone()).get().await;

    let mut handle = LocalItemStore::new(storage).open().await?;
    let stored = handle.query_latest(usize::MAX).await?;
    handle.close().await;

    log::info!("Storage directory: {}", config.storage.dir.display());
    match watermark {
        Some(at) => log::info!("Last update: {}", at.to_rfc3339()),
        None => log::info!("Last update: never"),
    }
    log::info!("Stored posts: {}", stored.len());
    if let Some(newest) = stored.first() {
        log::info!("Newest post: {}", newest.published_at.to_rfc3339());
    }
    Ok(())
}

async fn show_latest(config: &Config, count: usize) -> Result<()> {
    let storage = LocalStorage::new(&config.storage.dir);
    let mut handle = LocalItemStore::new(storage).open().await?;
    let posts = handle.query_latest(count).await?;
    handle.close().await;

    if posts.is_empty() {
        log::info!("No posts stored");
    }
    for post in &posts {
        println!("{}", post.format(POST_TEMPLATE));
    }
    Ok(())
}
