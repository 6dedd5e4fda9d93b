//! Background jobs
//!
//! A job reads consensus state through [`TrackerReader`], talks to the
//! external chain through its driver, and changes state only by submitting a
//! transaction through [`InternalBroadcast`]. Jobs are idempotent: one that
//! finds its tracker already past the expected state completes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cosmwasm_std::Addr;
use custody::address_codec::ledger_address;
use custody::msg::TxMsg;
use custody::tx::{sign_tx, Fee, RawTx, SignedTx};
use custody::{
    BitcoinNetwork, ChainDrivers, CustodyError, DriverError, Job, JobKind, Tracker, TrackerReader,
};
use k256::ecdsa::SigningKey;
use thiserror::Error;

use crate::broadcast::{BroadcastAck, BroadcastError, InternalBroadcast};

pub mod add_signature;
pub mod check_finality;

pub use add_signature::AddSignatureJob;
pub use check_finality::CheckFinalityJob;

/// What the scheduler does with a job after one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Nothing to do yet; run again on the next poll
    NotReady,
    /// Transient failure; back off and run again
    Retry(String),
    /// Permanent failure; never run again
    Failed(String),
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::NotReady => "not_ready",
            JobOutcome::Retry(_) => "retry",
            JobOutcome::Failed(_) => "failed",
        }
    }
}

impl From<Result<JobOutcome, JobError>> for JobOutcome {
    fn from(result: Result<JobOutcome, JobError>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(JobError::Transient(e)) => JobOutcome::Retry(e),
            Err(JobError::Permanent(e)) => JobOutcome::Failed(e),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl From<DriverError> for JobError {
    fn from(e: DriverError) -> Self {
        if e.is_transient() {
            JobError::Transient(e.to_string())
        } else {
            JobError::Permanent(e.to_string())
        }
    }
}

impl From<CustodyError> for JobError {
    fn from(e: CustodyError) -> Self {
        match e {
            CustodyError::Driver(d) => d.into(),
            // poisoned state lock on the reader side
            CustodyError::Std(_) => JobError::Transient(e.to_string()),
            other => JobError::Permanent(other.to_string()),
        }
    }
}

impl From<BroadcastError> for JobError {
    fn from(e: BroadcastError) -> Self {
        match e {
            BroadcastError::Unavailable(_) => JobError::Transient(e.to_string()),
            _ => JobError::Permanent(e.to_string()),
        }
    }
}

/// Everything a job may use. Read-only with respect to consensus state.
pub struct JobContext {
    pub reader: Arc<dyn TrackerReader>,
    pub drivers: ChainDrivers,
    pub broadcaster: Arc<dyn InternalBroadcast>,
    pub key: SigningKey,
    /// Home ledger account of `key`
    pub validator: Addr,
    pub network: BitcoinNetwork,
    pub oracle_token: String,
    /// Fee attached to every job transaction
    pub fee: Fee,
}

impl JobContext {
    pub fn new(
        key: SigningKey,
        reader: Arc<dyn TrackerReader>,
        drivers: ChainDrivers,
        broadcaster: Arc<dyn InternalBroadcast>,
        network: BitcoinNetwork,
        oracle_token: impl Into<String>,
        fee: Fee,
    ) -> Result<Self, CustodyError> {
        let validator = ledger_address(&key.verifying_key().to_sec1_bytes())?;
        Ok(Self {
            reader,
            drivers,
            broadcaster,
            key,
            validator,
            network,
            oracle_token: oracle_token.into(),
            fee,
        })
    }

    pub fn load_tracker(&self, job: &Job) -> Result<Tracker, JobError> {
        Ok(self.reader.get_tracker(job.chain(), job.tracker_name())?)
    }

    /// Sign `msg` as this validator, tagging it with the job id.
    pub fn sign<M: TxMsg>(&self, msg: &M, job: &Job) -> Result<SignedTx, JobError> {
        let raw = RawTx::new(M::KIND, msg.encode()?, self.fee.clone(), job.id());
        Ok(sign_tx(raw, &[&self.key])?)
    }

    pub async fn submit(&self, tx: &SignedTx) -> Result<BroadcastAck, BroadcastError> {
        self.broadcaster.submit(tx).await
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("validator", &self.validator)
            .field("drivers", &self.drivers)
            .field("network", &self.network)
            .field("key", &"<redacted>")
            .field("oracle_token", &"<redacted>")
            .finish()
    }
}

/// The job's round is over or the tracker moved on without it.
pub(crate) fn round_is_over(tracker: &Tracker, job: &Job) -> bool {
    tracker.round != job.round()
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn run(&self, ctx: &JobContext, job: &Job) -> Result<JobOutcome, JobError>;
}

/// Dispatch table from job kind to handler
#[derive(Default, Clone)]
pub struct JobRegistry {
    handlers: BTreeMap<JobKind, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AddSignatureJob));
        registry.register(Arc::new(CheckFinalityJob));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(&kind)
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmwasm_std::StdError;

    #[test]
    fn test_default_registry_covers_every_kind() {
        let registry = JobRegistry::with_default_handlers();
        assert_eq!(
            registry.kinds(),
            vec![JobKind::AddSignature, JobKind::CheckFinality]
        );
        assert_eq!(
            registry.get(JobKind::CheckFinality).unwrap().kind(),
            JobKind::CheckFinality
        );
        assert!(JobRegistry::new().get(JobKind::AddSignature).is_none());
    }

    #[test]
    fn test_error_mapping() {
        let rpc: JobError = CustodyError::Driver(DriverError::Timeout("oracle".into())).into();
        assert!(matches!(rpc, JobError::Transient(_)));

        let signing: JobError = DriverError::Signing("not a signer".into()).into();
        assert!(matches!(signing, JobError::Permanent(_)));

        let missing: JobError = CustodyError::TrackerNotFound { name: "v1".into() }.into();
        assert!(matches!(missing, JobError::Permanent(_)));

        let poisoned: JobError = CustodyError::Std(StdError::generic_err("poisoned")).into();
        assert!(matches!(poisoned, JobError::Transient(_)));

        let down: JobError = BroadcastError::Unavailable("mempool".into()).into();
        assert!(matches!(down, JobError::Transient(_)));
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(
            JobOutcome::from(Err(JobError::Transient("rpc".into()))),
            JobOutcome::Retry("rpc".into())
        );
        assert_eq!(
            JobOutcome::from(Err(JobError::Permanent("gone".into()))),
            JobOutcome::Failed("gone".into())
        );
        assert_eq!(JobOutcome::from(Ok(JobOutcome::NotReady)), JobOutcome::NotReady);
    }
}
