//! Finality report and mint handler.
//!
//! Every validator's finality job submits its own vote. Votes are counted per
//! round and the threshold-th vote mints, commits the new vault output and
//! frees the tracker for the next round, all in one apply.

use cosmwasm_std::StdError;
use tracing::info;

use crate::context::{Context, TxResponse};
use crate::error::CustodyError;
use crate::fees::validate_fee;
use crate::handlers::TxHandler;
use crate::msg::{ReportFinalityMint, TxMsg};
use crate::state::{Tracker, TrackerState, UtxoRef};
use crate::store::{load_tracker, mint, save_tracker};
use crate::tx::{validate_basic, RawTx, SignedTx, TxKind};
use crate::validator::ChainType;

pub struct ReportFinalityHandler;

impl TxHandler for ReportFinalityHandler {
    fn kind(&self) -> TxKind {
        TxKind::BtcReportFinalityMint
    }

    fn validate(&self, ctx: &Context<'_>, tx: &SignedTx) -> Result<(), CustodyError> {
        let msg = ReportFinalityMint::decode(tx.raw.kind, &tx.raw.data)?;
        validate_basic(tx, &msg.signers())?;
        validate_fee(ctx.fee_options, &tx.raw.fee)?;
        let tracker = load_tracker(&*ctx.storage, ChainType::Bitcoin, &msg.tracker_name)?;
        check_vote(&tracker, &msg)
    }

    fn process_check(&self, ctx: &mut Context<'_>, tx: &RawTx) -> Result<TxResponse, CustodyError> {
        run_report(ctx, tx)
    }

    fn process_deliver(
        &self,
        ctx: &mut Context<'_>,
        tx: &RawTx,
    ) -> Result<TxResponse, CustodyError> {
        run_report(ctx, tx)
    }
}

fn check_vote(tracker: &Tracker, msg: &ReportFinalityMint) -> Result<(), CustodyError> {
    if tracker.state != TrackerState::Signed {
        return Err(CustodyError::UnexpectedTrackerState {
            expected: TrackerState::Signed.to_string(),
            got: tracker.state.to_string(),
        });
    }
    let multisig = tracker.multisig.as_ref().ok_or_else(|| CustodyError::MissingData {
        field: "tracker.multisig".to_string(),
    })?;
    if !multisig.is_signer(&msg.validator) {
        return Err(CustodyError::NotAValidator {
            address: msg.validator.to_string(),
        });
    }
    if tracker.finality_votes.contains(&msg.validator) {
        return Err(CustodyError::DuplicateVote {
            address: msg.validator.to_string(),
            round: tracker.round,
        });
    }
    if tracker.process_owner.as_ref() != Some(&msg.owner) {
        return Err(CustodyError::TrackerMismatch {
            reason: format!("{} does not own the pending lock", msg.owner),
        });
    }
    if tracker.process_tx_id.is_none() {
        return Err(CustodyError::MissingData {
            field: "tracker.process_tx_id".to_string(),
        });
    }
    Ok(())
}

fn run_report(ctx: &mut Context<'_>, tx: &RawTx) -> Result<TxResponse, CustodyError> {
    let msg = ReportFinalityMint::decode(tx.kind, &tx.data)?;
    let mut tracker = load_tracker(&*ctx.storage, ChainType::Bitcoin, &msg.tracker_name)?;
    check_vote(&tracker, &msg)?;

    tracker.finality_votes.push(msg.validator.clone());
    let votes = tracker.finality_votes.len() as u32;
    let threshold = tracker.multisig.as_ref().map_or(u32::MAX, |m| m.threshold);

    let mut resp = TxResponse::new()
        .add_attributes(msg.attributes())
        .add_attribute("votes", votes.to_string())
        .add_attribute("threshold", threshold.to_string());

    if votes >= threshold {
        let minted = finalize(ctx, &mut tracker, &msg)?;
        resp = resp
            .add_attribute("minted", minted.to_string())
            .add_attribute("state", TrackerState::Finalized.as_str());
    } else {
        resp = resp.add_attribute("state", tracker.state.as_str());
    }

    save_tracker(ctx.storage, &tracker)?;
    Ok(resp)
}

/// Quorum reached: mint the locked delta and roll the vault forward.
fn finalize(
    ctx: &mut Context<'_>,
    tracker: &mut Tracker,
    msg: &ReportFinalityMint,
) -> Result<cosmwasm_std::Uint128, CustodyError> {
    let minted = tracker
        .process_balance
        .checked_sub(tracker.current_balance)
        .map_err(StdError::from)?;
    mint(ctx.storage, &msg.owner, minted)?;

    let tx_id = tracker.process_tx_id.clone().unwrap_or_default();
    tracker.current_balance = tracker.process_balance;
    tracker.current_utxo = Some(UtxoRef {
        tx_id: tx_id.clone(),
        index: 0,
    });
    if let Some(next) = tracker.next_lock_script_address.take() {
        tracker.lock_script_address = Some(next);
    }
    tracker.state = TrackerState::Finalized;

    info!(
        tracker = %tracker.name,
        round = tracker.round,
        owner = %msg.owner,
        minted = %minted,
        tx_id = %tx_id,
        "Lock finalized"
    );

    tracker.reset_process();
    Ok(minted)
}
