//! synd-worker - Background worker for the publishing pipeline
//!
//! Runs the pipeline's polling loops: promoting due scheduled posts,
//! draining the publishing queue, and sweeping the token refresh queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use libsyndicast::oauth::exchange::HttpExchanger;
use libsyndicast::publishers::mock::MockPublisher;
use libsyndicast::publishers::PublisherRegistry;
use libsyndicast::{
    Config, Database, OAuthCoordinator, Platform, PublishingQueue, RefreshScheduler, Result,
    TokenVault,
};

#[derive(Parser, Debug)]
#[command(name = "synd-worker")]
#[command(version)]
#[command(about = "Background worker for the publishing pipeline")]
#[command(long_about = "\
synd-worker - Background worker for the publishing pipeline

DESCRIPTION:
    synd-worker is a long-running process that drives the delivery and
    credential-maintenance queues. Each loop runs on its own fixed
    interval; a slow tick never blocks the next timer.

    - queue loop: promotes due scheduled posts and drains pending
      delivery jobs through the registered publisher adapters
    - refresh loop: enqueues and processes proactive token refreshes for
      connections nearing expiry

    The pipeline assumes a single active worker per queue; job claiming
    is race-free within one process.

USAGE:
    # Run in foreground (logs to stderr)
    synd-worker

    # Run with custom intervals
    synd-worker --poll-interval 15 --refresh-interval 120

    # Simulate deliveries without touching platform APIs
    synd-worker --dry-run

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current tick)

CONFIGURATION:
    Configuration file: ~/.config/syndicast/config.toml
    Vault secret:       SYNDICAST_VAULT_SECRET (overrides the file)

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Queue drain interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Token refresh sweep interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    refresh_interval: Option<u64>,

    /// Register mock publisher adapters instead of real ones
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run each loop once and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = Arc::new(Config::load()?);
    let db = Database::new(&config.database.path).await?;
    let vault = Arc::new(TokenVault::new(&config.vault.secret)?);

    let coordinator = Arc::new(OAuthCoordinator::new(
        db.clone(),
        vault,
        config.clone(),
        Arc::new(HttpExchanger::new()),
    ));
    let refresher = Arc::new(RefreshScheduler::new(
        db.clone(),
        coordinator.clone(),
        config.refresh.clone(),
    ));
    let queue = Arc::new(PublishingQueue::new(
        db.clone(),
        coordinator,
        refresher.clone(),
        build_registry(cli.dry_run),
        config.queue.clone(),
    ));

    info!("synd-worker starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or(config.queue.poll_interval_secs);
    let refresh_interval = cli
        .refresh_interval
        .unwrap_or(config.refresh.poll_interval_secs);
    info!(
        "Queue interval: {}s, refresh interval: {}s",
        poll_interval, refresh_interval
    );

    if cli.once {
        queue_tick(&queue).await;
        refresh_tick(&refresher).await;
        info!("synd-worker: ran each loop once, exiting");
        return Ok(());
    }

    let queue_loop = tokio::spawn(run_queue_loop(shutdown.clone(), poll_interval, queue.clone()));
    let refresh_loop = tokio::spawn(run_refresh_loop(
        shutdown.clone(),
        refresh_interval,
        refresher.clone(),
    ));

    let _ = queue_loop.await;
    let _ = refresh_loop.await;

    info!("synd-worker stopped");
    Ok(())
}

/// Adapter wiring. Real platform adapters are linked by the deployment;
/// --dry-run substitutes mocks that accept every delivery.
fn build_registry(dry_run: bool) -> PublisherRegistry {
    let mut registry = PublisherRegistry::new();
    if dry_run {
        for platform in Platform::ALL {
            registry.register(Arc::new(MockPublisher::succeeding(platform)));
        }
        info!("Dry run: registered mock adapters for all platforms");
    }
    registry
}

async fn queue_tick(queue: &PublishingQueue) {
    if let Err(e) = queue.promote_due_posts().await {
        error!("Error promoting scheduled posts: {}", e);
    }
    match queue.drain().await {
        Ok(0) => {}
        Ok(n) => info!("Processed {} delivery job(s)", n),
        Err(e) => error!("Error draining publish queue: {}", e),
    }
}

async fn refresh_tick(refresher: &RefreshScheduler) {
    match refresher.sweep().await {
        Ok(0) => {}
        Ok(n) => info!("Processed {} token refresh job(s)", n),
        Err(e) => error!("Error sweeping refresh queue: {}", e),
    }
}

/// Fixed-interval drain loop that checks for shutdown every second
async fn run_queue_loop(shutdown: Arc<AtomicBool>, interval_secs: u64, queue: Arc<PublishingQueue>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping queue loop");
            break;
        }

        queue_tick(&queue).await;

        for _ in 0..interval_secs {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

async fn run_refresh_loop(
    shutdown: Arc<AtomicBool>,
    interval_secs: u64,
    refresher: Arc<RefreshScheduler>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping refresh loop");
            break;
        }

        refresh_tick(&refresher).await;

        for _ in 0..interval_secs {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libsyndicast::SyndicastError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}
