//! Block execution
//!
//! Delivers a block's transactions in order and persists the jobs each
//! successful delivery asked for. Nothing else in the node writes the job
//! store on behalf of consensus.

use std::sync::Arc;

use custody::tx::SignedTx;
use custody::{App, TxResult};
use eyre::Result;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::broadcast::Mempool;
use crate::db::{self, NewJob};
use crate::metrics;

pub struct BlockExecutor {
    app: Arc<App>,
    db: SqlitePool,
}

impl BlockExecutor {
    pub fn new(app: Arc<App>, db: SqlitePool) -> Self {
        Self { app, db }
    }

    pub async fn apply_block(&self, height: u64, txs: &[Vec<u8>]) -> Result<Vec<TxResult>> {
        let mut results = Vec::with_capacity(txs.len());
        let mut saved = 0usize;

        for bytes in txs {
            let result = self.app.deliver_tx(height, bytes);
            let kind = SignedTx::decode(bytes)
                .map(|tx| tx.kind().as_str())
                .unwrap_or("undecodable");
            metrics::record_tx_delivered(kind, result.is_ok());

            for job in &result.jobs {
                if db::save_job(&self.db, &NewJob::from_job(job)?).await? {
                    debug!(job_id = %job.id(), height, "Job persisted");
                    saved += 1;
                }
            }
            results.push(result);
        }

        metrics::record_block_applied(height);
        info!(
            height,
            txs = txs.len(),
            rejected = results.iter().filter(|r| !r.is_ok()).count(),
            jobs = saved,
            "Block applied"
        );
        Ok(results)
    }

    /// Build and apply a block from everything waiting in `mempool`.
    pub async fn apply_mempool(&self, height: u64, mempool: &Mempool) -> Result<Vec<TxResult>> {
        let txs = mempool.drain(usize::MAX);
        self.apply_block(height, &txs).await
    }
}
