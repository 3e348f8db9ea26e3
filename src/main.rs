// BlackBook Group Bets - daemon entry point
// Restores state from disk, runs the deadline sweeps, flushes on shutdown.

use std::sync::Arc;

use blackbook_group_bets::config::EVENT_CHANNEL_CAPACITY;
use blackbook_group_bets::{
    BetEngine, ChannelNotifier, Collaborators, Config, DeadlineScheduler, InMemoryDirectory, Result, Store,
    SystemClock,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let store = Arc::new(Store::open(&cfg.db_path)?);

    // Membership and identities come from the surrounding app; the daemon
    // starts with an empty in-memory directory.
    let directory = Arc::new(InMemoryDirectory::new());
    let (notifier, mut events) = ChannelNotifier::channel(EVENT_CHANNEL_CAPACITY);
    let collaborators = Collaborators {
        groups: directory.clone(),
        users: directory,
        notifier: Arc::new(notifier),
    };

    let engine = Arc::new(BetEngine::restore(
        store.clone(),
        collaborators,
        Arc::new(SystemClock),
        cfg.initial_credits,
    )?);
    let ledger_stats = engine.ledger().stats();
    info!(
        accounts = ledger_stats.accounts,
        total_balance = %ledger_stats.total_balance,
        db_path = %cfg.db_path,
        "BlackBook group bets ready"
    );

    let dispatcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(kind = event.kind(), bet_id = %event.bet_id(), "Dispatching bet event");
        }
    });

    let (expiry, resolution) = DeadlineScheduler::new(engine.clone(), &cfg).spawn();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received, saving state");

    expiry.abort();
    resolution.abort();
    dispatcher.abort();

    let bytes = store.flush()?;
    info!(bytes, "State flushed to disk");
    Ok(())
}
