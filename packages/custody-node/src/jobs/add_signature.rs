//! Co-signing job
//!
//! Adds this validator's signature to the pending custody transaction and
//! submits it as a `BtcAddSignature` transaction. Whoever sees the
//! threshold reached broadcasts the fully signed transaction to the
//! external chain; broadcasting the same transaction twice is harmless.

use async_trait::async_trait;
use custody::error::codes;
use custody::msg::AddSignature;
use custody::{ChainType, DriverError, Job, JobKind, TrackerState};
use tracing::{debug, info, warn};

use super::{round_is_over, JobContext, JobError, JobHandler, JobOutcome};
use crate::broadcast::BroadcastError;

pub struct AddSignatureJob;

#[async_trait]
impl JobHandler for AddSignatureJob {
    fn kind(&self) -> JobKind {
        JobKind::AddSignature
    }

    async fn run(&self, ctx: &JobContext, job: &Job) -> Result<JobOutcome, JobError> {
        let tracker = ctx.load_tracker(job)?;
        if round_is_over(&tracker, job) {
            debug!(job_id = %job.id(), round = tracker.round, "Round over, nothing to sign");
            return Ok(JobOutcome::Completed);
        }

        let driver = ctx.drivers.get(ChainType::Bitcoin)?;

        match tracker.state {
            TrackerState::Requested | TrackerState::BusySigning => {}
            TrackerState::Signed => {
                let tx = tracker.process_tx.as_ref().ok_or_else(|| {
                    JobError::Permanent("signed tracker has no process_tx".to_string())
                })?;
                return broadcast_external(driver.broadcast(tx.as_slice()).await, job);
            }
            _ => return Ok(JobOutcome::Completed),
        }

        let multisig = tracker
            .multisig
            .as_ref()
            .ok_or_else(|| JobError::Permanent("tracker has no multisig".to_string()))?;
        if !multisig.is_signer(&ctx.validator) {
            return Err(JobError::Permanent(format!(
                "{} is not in the signer set of {}",
                ctx.validator, tracker.name
            )));
        }
        if multisig.has_signed(&ctx.validator) {
            // waiting for the rest of the signer set
            return Ok(JobOutcome::NotReady);
        }

        let base = tracker
            .process_tx
            .as_ref()
            .or(tracker.process_unsigned_tx.as_ref())
            .ok_or_else(|| JobError::Permanent("tracker has no custody transaction".to_string()))?;

        let outcome = driver
            .add_signature(base.as_slice(), multisig, &ctx.key)
            .await?;

        let msg = AddSignature {
            tracker_name: tracker.name.clone(),
            validator: ctx.validator.clone(),
            signed_tx: outcome.tx.clone(),
            signature_count: multisig.signed_count(),
        };
        let tx = ctx.sign(&msg, job)?;

        match ctx.submit(&tx).await {
            Ok(ack) => {
                info!(
                    job_id = %job.id(),
                    tx_hash = %ack.tx_hash,
                    signatures = multisig.signed_count() + 1,
                    threshold = multisig.threshold,
                    "Signature submitted"
                );
            }
            Err(BroadcastError::Duplicate { .. }) => return Ok(JobOutcome::NotReady),
            Err(BroadcastError::Rejected { code, log }) => return rejected(code, log, job),
            Err(e) => return Err(e.into()),
        }

        if outcome.threshold_reached {
            return broadcast_external(driver.broadcast(outcome.tx.as_slice()).await, job);
        }
        Ok(JobOutcome::NotReady)
    }
}

fn rejected(code: u32, log: String, job: &Job) -> Result<JobOutcome, JobError> {
    match code {
        // another signature landed first; re-sign on top of it
        codes::STALE_SIGNATURE => Err(JobError::Transient(log)),
        codes::DUPLICATE_SIGNATURE => Ok(JobOutcome::NotReady),
        codes::UNEXPECTED_TRACKER_STATE => {
            debug!(job_id = %job.id(), "Tracker left signing, done");
            Ok(JobOutcome::Completed)
        }
        _ => Err(JobError::Permanent(log)),
    }
}

fn broadcast_external(result: Result<String, DriverError>, job: &Job) -> Result<JobOutcome, JobError> {
    match result {
        Ok(tx_id) => {
            info!(job_id = %job.id(), tx_id = %tx_id, "Custody transaction broadcast");
            Ok(JobOutcome::Completed)
        }
        // usually another validator got there first
        Err(DriverError::Rejected(reason)) => {
            warn!(job_id = %job.id(), reason = %reason, "Custody transaction rejected by chain");
            Ok(JobOutcome::Completed)
        }
        Err(e) => Err(e.into()),
    }
}
