//! Validator co-signature handler.
//!
//! Submitted by each validator's signing job. Signatures accumulate on the
//! tracker's custody transaction; the threshold-th one moves the tracker to
//! `Signed` and schedules finality polling.

use tracing::{debug, info};

use crate::context::{Context, TxResponse};
use crate::error::CustodyError;
use crate::fees::validate_fee;
use crate::handlers::TxHandler;
use crate::jobs::Job;
use crate::msg::{AddSignature, TxMsg};
use crate::state::{Tracker, TrackerState};
use crate::store::{load_tracker, save_tracker};
use crate::tx::{validate_basic, RawTx, SignedTx, TxKind};
use crate::validator::ChainType;

pub struct AddSignatureHandler;

impl TxHandler for AddSignatureHandler {
    fn kind(&self) -> TxKind {
        TxKind::BtcAddSignature
    }

    fn validate(&self, ctx: &Context<'_>, tx: &SignedTx) -> Result<(), CustodyError> {
        let msg = AddSignature::decode(tx.raw.kind, &tx.raw.data)?;
        validate_basic(tx, &msg.signers())?;
        validate_fee(ctx.fee_options, &tx.raw.fee)?;
        let tracker = load_tracker(&*ctx.storage, ChainType::Bitcoin, &msg.tracker_name)?;
        check_signature(ctx, &tracker, &msg)
    }

    fn process_check(&self, ctx: &mut Context<'_>, tx: &RawTx) -> Result<TxResponse, CustodyError> {
        run_add_signature(ctx, tx).map(|(resp, _)| resp)
    }

    fn process_deliver(
        &self,
        ctx: &mut Context<'_>,
        tx: &RawTx,
    ) -> Result<TxResponse, CustodyError> {
        let (resp, tracker) = run_add_signature(ctx, tx)?;
        if tracker.state == TrackerState::Signed {
            return Ok(resp.add_job(Job::check_finality(&tracker.name, tracker.round)));
        }
        Ok(resp)
    }
}

fn check_signature(
    ctx: &Context<'_>,
    tracker: &Tracker,
    msg: &AddSignature,
) -> Result<(), CustodyError> {
    if !matches!(
        tracker.state,
        TrackerState::Requested | TrackerState::BusySigning
    ) {
        return Err(CustodyError::UnexpectedTrackerState {
            expected: "requested or busy_signing".to_string(),
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
    if multisig.has_signed(&msg.validator) {
        return Err(CustodyError::DuplicateSignature {
            address: msg.validator.to_string(),
            round: tracker.round,
        });
    }
    if msg.signature_count != multisig.signed_count() {
        return Err(CustodyError::StaleSignature {
            expected: multisig.signed_count(),
            got: msg.signature_count,
        });
    }
    if msg.signed_tx.is_empty() {
        return Err(CustodyError::MissingData {
            field: "signed_tx".to_string(),
        });
    }

    // The signed transaction must be the one the lock requested.
    let unsigned = tracker
        .process_unsigned_tx
        .as_ref()
        .ok_or_else(|| CustodyError::MissingData {
            field: "tracker.process_unsigned_tx".to_string(),
        })?;
    let driver = ctx.drivers.get(ChainType::Bitcoin)?;
    let decode_err = |e: crate::error::DriverError| CustodyError::Unserializable {
        reason: e.to_string(),
    };
    let expected_id = driver.tx_hash(unsigned.as_slice()).map_err(decode_err)?;
    let got_id = driver.tx_hash(msg.signed_tx.as_slice()).map_err(decode_err)?;
    if expected_id != got_id {
        return Err(CustodyError::TrackerMismatch {
            reason: format!("signed tx {} is not the requested tx {}", got_id, expected_id),
        });
    }

    // It must carry the submitter's signature and keep every recorded one.
    for signer in multisig
        .signers
        .iter()
        .filter(|s| s.validator == msg.validator || multisig.has_signed(&s.validator))
    {
        let signed = driver
            .has_signature(msg.signed_tx.as_slice(), signer.pub_key.as_slice())
            .map_err(decode_err)?;
        if !signed {
            return Err(CustodyError::InvalidSignature {
                signer: signer.validator.to_string(),
            });
        }
    }

    Ok(())
}

fn run_add_signature(
    ctx: &mut Context<'_>,
    tx: &RawTx,
) -> Result<(TxResponse, Tracker), CustodyError> {
    let msg = AddSignature::decode(tx.kind, &tx.data)?;
    let mut tracker = load_tracker(&*ctx.storage, ChainType::Bitcoin, &msg.tracker_name)?;
    check_signature(ctx, &tracker, &msg)?;

    let tx_id = ctx
        .drivers
        .get(ChainType::Bitcoin)?
        .tx_hash(msg.signed_tx.as_slice())
        .map_err(|e| CustodyError::Unserializable {
            reason: e.to_string(),
        })?;

    let (signed, threshold) = match tracker.multisig.as_mut() {
        Some(multisig) => {
            multisig.add_signature(&msg.validator)?;
            (multisig.signed_count(), multisig.threshold)
        }
        None => {
            return Err(CustodyError::MissingData {
                field: "tracker.multisig".to_string(),
            })
        }
    };

    tracker.process_tx = Some(msg.signed_tx.clone());
    tracker.state = TrackerState::BusySigning;
    if signed >= threshold {
        tracker.state = TrackerState::Signed;
        tracker.process_tx_id = Some(tx_id.clone());
        info!(
            tracker = %tracker.name,
            round = tracker.round,
            tx_id = %tx_id,
            "Custody transaction reached signature threshold"
        );
    } else {
        debug!(
            tracker = %tracker.name,
            signed,
            threshold,
            "Signature recorded"
        );
    }
    save_tracker(ctx.storage, &tracker)?;

    let resp = TxResponse::new()
        .add_attributes(msg.attributes())
        .add_attribute("signatures", signed.to_string())
        .add_attribute("threshold", threshold.to_string())
        .add_attribute("state", tracker.state.as_str());
    Ok((resp, tracker))
}
