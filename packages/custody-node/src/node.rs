//! Node wiring
//!
//! Connects the job store, the internal broadcast path, the block executor
//! and the scheduler around an [`App`] supplied by the embedder, which also
//! owns the chain drivers and validator set.

use std::sync::Arc;

use custody::App;
use eyre::{eyre, Result};
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::broadcast::{Mempool, MempoolBroadcaster};
use crate::config::Config;
use crate::db;
use crate::executor::BlockExecutor;
use crate::jobs::{JobContext, JobRegistry};
use crate::metrics;
use crate::retry::BackoffPolicy;
use crate::scheduler::{Scheduler, SchedulerConfig};

pub struct Node {
    db: SqlitePool,
    mempool: Arc<Mempool>,
    executor: BlockExecutor,
    scheduler: Scheduler,
}

impl Node {
    /// Connect the job store from `config` and wire the node.
    pub async fn new(config: &Config, app: Arc<App>) -> Result<Self> {
        let db = db::create_pool(&config.database.url).await?;
        tracing::info!("Database connected");

        db::run_migrations(&db).await?;
        tracing::info!("Database migrations complete");

        Self::with_pool(config, app, db)
    }

    pub fn with_pool(config: &Config, app: Arc<App>, db: SqlitePool) -> Result<Self> {
        if app.network() != config.bitcoin.network {
            return Err(eyre!(
                "BTC_NETWORK is {} but the ledger runs on {}",
                config.bitcoin.network,
                app.network()
            ));
        }

        let mempool = Arc::new(Mempool::new());
        let broadcaster = Arc::new(MempoolBroadcaster::new(app.clone(), mempool.clone()));
        let ctx = JobContext::new(
            config.validator.signing_key()?,
            Arc::new(app.reader()),
            app.drivers().clone(),
            broadcaster,
            config.bitcoin.network,
            config.bitcoin.oracle_token.clone(),
            config.fees.job_fee(),
        )?;

        tracing::info!(
            validator = %ctx.validator,
            network = %config.bitcoin.network,
            "Node initialized"
        );

        let scheduler = Scheduler::new(
            db.clone(),
            JobRegistry::with_default_handlers(),
            Arc::new(ctx),
            scheduler_config(config),
        );

        Ok(Self {
            executor: BlockExecutor::new(app, db.clone()),
            db,
            mempool,
            scheduler,
        })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn executor(&self) -> &BlockExecutor {
        &self.executor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run the job scheduler until shutdown.
    pub async fn run(&self, shutdown: mpsc::Receiver<()>) -> Result<()> {
        metrics::set_up(true);
        tracing::info!("Custody node running");

        let result = self.scheduler.run(shutdown).await;

        metrics::set_up(false);
        tracing::info!("Custody node stopped");
        result
    }
}

pub fn scheduler_config(config: &Config) -> SchedulerConfig {
    SchedulerConfig {
        poll_interval: config.jobs.poll_interval(),
        job_timeout: config.jobs.job_timeout(),
        batch_size: config.jobs.batch_size,
        backoff: BackoffPolicy::capped_at(config.jobs.max_retry_backoff()),
    }
}

/// Install error reporting and logging for a process embedding the node.
pub fn init() -> Result<()> {
    color_eyre::install()?;
    init_logging();
    Ok(())
}

/// Initialize tracing/logging with structured output
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,custody=debug,custody_node=debug"));

    // a second call (tests, embedders) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .try_init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
pub async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

/// Channel fed by [`wait_for_shutdown_signal`], ready to hand to [`Node::run`].
pub fn shutdown_channel() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = tx.send(()).await;
    });
    rx
}
