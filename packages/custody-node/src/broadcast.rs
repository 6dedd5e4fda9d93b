//! Internal broadcast path
//!
//! Jobs never touch consensus state. They sign an ordinary transaction and
//! hand it to [`InternalBroadcast`], which admits it through `check_tx` and
//! queues it for the next block exactly like a user-submitted transaction.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use custody::tx::SignedTx;
use custody::App;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BroadcastError {
    #[error("transaction rejected (code {code}): {log}")]
    Rejected { code: u32, log: String },

    /// The signer already has a submission for this job waiting for inclusion
    #[error("transaction for {memo} already pending")]
    Duplicate { memo: String },

    #[error("broadcast unavailable: {0}")]
    Unavailable(String),
}

/// Acknowledgement of an admitted transaction
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastAck {
    pub tx_hash: String,
}

#[async_trait]
pub trait InternalBroadcast: Send + Sync {
    /// Admit a signed transaction into the node's own ingress.
    async fn submit(&self, tx: &SignedTx) -> Result<BroadcastAck, BroadcastError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingTx {
    pub hash: String,
    pub memo: String,
    /// Hex public key of the first signer
    pub signer: String,
    pub bytes: Vec<u8>,
}

impl PendingTx {
    fn same_job(&self, other: &PendingTx) -> bool {
        !other.memo.is_empty() && self.memo == other.memo && self.signer == other.signer
    }
}

/// Admitted transactions waiting for the next block, in arrival order.
#[derive(Debug, Default)]
pub struct Mempool {
    queue: Mutex<VecDeque<PendingTx>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<PendingTx>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a transaction unless it, or another one from the same signer
    /// for the same job, is already pending.
    pub fn push(&self, tx: PendingTx) -> Result<(), BroadcastError> {
        let mut queue = self.queue();
        if let Some(existing) = queue
            .iter()
            .find(|p| p.hash == tx.hash || p.same_job(&tx))
        {
            return Err(BroadcastError::Duplicate {
                memo: if existing.memo.is_empty() {
                    existing.hash.clone()
                } else {
                    existing.memo.clone()
                },
            });
        }
        queue.push_back(tx);
        Ok(())
    }

    /// Remove up to `max` transactions for block building.
    pub fn drain(&self, max: usize) -> Vec<Vec<u8>> {
        let mut queue = self.queue();
        let n = max.min(queue.len());
        queue.drain(..n).map(|p| p.bytes).collect()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn pending(&self) -> Vec<PendingTx> {
        self.queue().iter().cloned().collect()
    }
}

/// Admits transactions with `App::check_tx` and queues them in the mempool.
pub struct MempoolBroadcaster {
    app: Arc<App>,
    mempool: Arc<Mempool>,
}

impl MempoolBroadcaster {
    pub fn new(app: Arc<App>, mempool: Arc<Mempool>) -> Self {
        Self { app, mempool }
    }
}

#[async_trait]
impl InternalBroadcast for MempoolBroadcaster {
    async fn submit(&self, tx: &SignedTx) -> Result<BroadcastAck, BroadcastError> {
        let kind = tx.kind().as_str();
        let bytes = tx
            .encode()
            .map_err(|e| BroadcastError::Unavailable(e.to_string()))?;

        let result = self.app.check_tx(&bytes);
        if !result.is_ok() {
            debug!(kind, code = result.code, log = %result.log, "Internal transaction rejected");
            metrics::record_internal_broadcast(kind, "rejected");
            return Err(BroadcastError::Rejected {
                code: result.code,
                log: result.log,
            });
        }

        let pending = PendingTx {
            hash: result.tx_hash.clone(),
            memo: tx.raw.memo.clone(),
            signer: tx
                .signatures
                .first()
                .map(|s| hex::encode(s.pub_key.as_slice()))
                .unwrap_or_default(),
            bytes,
        };
        if let Err(e) = self.mempool.push(pending) {
            warn!(kind, memo = %tx.raw.memo, "Internal transaction already pending");
            metrics::record_internal_broadcast(kind, "duplicate");
            return Err(e);
        }

        info!(kind, tx_hash = %result.tx_hash, memo = %tx.raw.memo, "Internal transaction queued");
        metrics::record_internal_broadcast(kind, "accepted");
        Ok(BroadcastAck {
            tx_hash: result.tx_hash,
        })
    }
}
