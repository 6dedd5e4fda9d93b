//! Finality polling job
//!
//! Asks the finality oracle whether the signed custody transaction is final
//! and, once it is, submits this validator's `BtcReportFinalityMint` vote.
//! Not-yet-final is not an error. The consensus side counts votes; this job
//! only guarantees one accepted submission per validator and round.

use async_trait::async_trait;
use cosmwasm_std::Binary;
use custody::error::codes;
use custody::msg::ReportFinalityMint;
use custody::{ChainType, Job, JobKind, TrackerState};
use rand::RngCore;
use tracing::{debug, info};

use super::{round_is_over, JobContext, JobError, JobHandler, JobOutcome};
use crate::broadcast::BroadcastError;

/// Size of the per-report nonce
pub const RANDOM_BYTES_LEN: usize = 4;

pub struct CheckFinalityJob;

#[async_trait]
impl JobHandler for CheckFinalityJob {
    fn kind(&self) -> JobKind {
        JobKind::CheckFinality
    }

    async fn run(&self, ctx: &JobContext, job: &Job) -> Result<JobOutcome, JobError> {
        let tracker = ctx.load_tracker(job)?;
        if round_is_over(&tracker, job) || tracker.state != TrackerState::Signed {
            debug!(job_id = %job.id(), state = %tracker.state, "Tracker no longer awaiting finality");
            return Ok(JobOutcome::Completed);
        }
        if tracker.finality_votes.contains(&ctx.validator) {
            return Ok(JobOutcome::Completed);
        }

        let tx_id = tracker
            .process_tx_id
            .as_ref()
            .ok_or_else(|| JobError::Permanent("signed tracker has no process_tx_id".to_string()))?;
        let owner = tracker
            .process_owner
            .clone()
            .ok_or_else(|| JobError::Permanent("signed tracker has no process_owner".to_string()))?;

        let is_final = ctx
            .drivers
            .get(ChainType::Bitcoin)?
            .check_finality(tx_id, &ctx.oracle_token, ctx.network)
            .await?;
        if !is_final {
            debug!(
                job_id = %job.id(),
                tx_id = %tx_id,
                oracle_chain = ctx.network.finality_chain(),
                "Custody transaction not final yet"
            );
            return Ok(JobOutcome::NotReady);
        }

        let mut random_bytes = [0u8; RANDOM_BYTES_LEN];
        rand::thread_rng().fill_bytes(&mut random_bytes);

        let msg = ReportFinalityMint {
            tracker_name: tracker.name.clone(),
            owner,
            validator: ctx.validator.clone(),
            random_bytes: Binary::from(random_bytes.to_vec()),
        };
        let tx = ctx.sign(&msg, job)?;

        match ctx.submit(&tx).await {
            Ok(ack) => {
                info!(job_id = %job.id(), tx_hash = %ack.tx_hash, tx_id = %tx_id, "Finality reported");
                Ok(JobOutcome::Completed)
            }
            // an earlier run of this job is already waiting for inclusion
            Err(BroadcastError::Duplicate { .. }) => Ok(JobOutcome::Completed),
            Err(BroadcastError::Rejected { code, log }) => match code {
                codes::DUPLICATE_VOTE | codes::UNEXPECTED_TRACKER_STATE => Ok(JobOutcome::Completed),
                _ => Err(JobError::Permanent(log)),
            },
            Err(e) => Err(e.into()),
        }
    }
}
