//! Bitcoin lock handler.
//!
//! A lock moves a vault from `Available` to `Requested` and asks validators to
//! co-sign the custody transaction. The continuity check pins every lock to
//! the vault's last confirmed output, so custody can only move along the
//! tracked chain of outputs, and the destination check pins its vault output
//! to the multisig of the current validator set.

use cosmwasm_std::Uint128;
use tracing::debug;

use crate::context::{Context, TxResponse};
use crate::driver::CustodyTx;
use crate::error::CustodyError;
use crate::fees::validate_fee;
use crate::handlers::TxHandler;
use crate::jobs::Job;
use crate::msg::{Lock, TxMsg};
use crate::multisig::Multisig;
use crate::state::{ProcessType, Tracker, TrackerState};
use crate::store::{load_available_tracker, save_lock_script, save_tracker};
use crate::tx::{validate_basic, RawTx, SignedTx, TxKind};
use crate::validator::ChainType;

pub struct LockHandler;

impl TxHandler for LockHandler {
    fn kind(&self) -> TxKind {
        TxKind::BtcLock
    }

    fn validate(&self, ctx: &Context<'_>, tx: &SignedTx) -> Result<(), CustodyError> {
        let lock = Lock::decode(tx.raw.kind, &tx.raw.data)?;
        validate_basic(tx, &lock.signers())?;
        validate_fee(ctx.fee_options, &tx.raw.fee)?;

        if lock.lock_amount.is_zero() {
            return Err(CustodyError::InvalidAmount {
                reason: "lock amount must be greater than zero".to_string(),
            });
        }

        let tracker = load_available_tracker(&*ctx.storage, ChainType::Bitcoin, &lock.tracker_name)?;

        let custody_tx = decode_custody_tx(ctx, &lock)?;
        check_continuity(&tracker, &custody_tx, lock.lock_amount)
    }

    fn process_check(&self, ctx: &mut Context<'_>, tx: &RawTx) -> Result<TxResponse, CustodyError> {
        run_lock(ctx, tx).map(|(resp, _)| resp)
    }

    fn process_deliver(
        &self,
        ctx: &mut Context<'_>,
        tx: &RawTx,
    ) -> Result<TxResponse, CustodyError> {
        let (resp, tracker) = run_lock(ctx, tx)?;
        Ok(resp.add_job(Job::add_signature(&tracker.name, tracker.round)))
    }
}

fn decode_custody_tx(ctx: &Context<'_>, lock: &Lock) -> Result<CustodyTx, CustodyError> {
    ctx.drivers
        .get(ChainType::Bitcoin)?
        .decode_custody_tx(lock.btc_tx.as_slice())
        .map_err(|e| CustodyError::Unserializable {
            reason: e.to_string(),
        })
}

/// The vault output must pay to the signer set's multisig, otherwise
/// validators would co-sign and mint for funds they do not hold.
pub fn check_destination(custody_tx: &CustodyTx, vault_address: &str) -> Result<(), CustodyError> {
    let output = custody_tx
        .outputs
        .first()
        .ok_or_else(|| CustodyError::TrackerMismatch {
            reason: "custody transaction has no outputs".to_string(),
        })?;
    if output.address != vault_address {
        return Err(CustodyError::TrackerMismatch {
            reason: format!(
                "vault output pays {}, expected multisig {}",
                output.address, vault_address
            ),
        });
    }
    Ok(())
}

/// First lock: the vault output must carry exactly the new balance.
/// Later locks: additionally the first input must spend the vault's current
/// output.
pub fn check_continuity(
    tracker: &Tracker,
    custody_tx: &CustodyTx,
    lock_amount: Uint128,
) -> Result<(), CustodyError> {
    let expected = tracker
        .current_balance
        .checked_add(lock_amount)
        .map_err(cosmwasm_std::StdError::from)?;

    let output = custody_tx
        .outputs
        .first()
        .ok_or_else(|| CustodyError::TrackerMismatch {
            reason: "custody transaction has no outputs".to_string(),
        })?;
    if Uint128::from(output.value) != expected {
        return Err(CustodyError::TrackerMismatch {
            reason: format!(
                "vault output carries {}, expected {}",
                output.value, expected
            ),
        });
    }

    if let Some(current) = &tracker.current_utxo {
        let input = custody_tx
            .inputs
            .first()
            .ok_or_else(|| CustodyError::TrackerMismatch {
                reason: "custody transaction has no inputs".to_string(),
            })?;
        if input.tx_id != current.tx_id || input.index != 0 || current.index != 0 {
            return Err(CustodyError::TrackerMismatch {
                reason: format!(
                    "input {}:{} does not spend vault output {}:{}",
                    input.tx_id, input.index, current.tx_id, current.index
                ),
            });
        }
    }

    Ok(())
}

fn run_lock(ctx: &mut Context<'_>, tx: &RawTx) -> Result<(TxResponse, Tracker), CustodyError> {
    let lock = Lock::decode(tx.kind, &tx.data)?;
    let mut tracker = load_available_tracker(&*ctx.storage, ChainType::Bitcoin, &lock.tracker_name)?;

    let validators = ctx.validators.get_validator_set()?;
    let multisig = Multisig::build(&validators, ChainType::Bitcoin, ctx.network, lock.btc_tx.clone())?;
    check_destination(&decode_custody_tx(ctx, &lock)?, &multisig.address)?;

    tracker.process_balance = tracker
        .current_balance
        .checked_add(lock.lock_amount)
        .map_err(cosmwasm_std::StdError::from)?;
    tracker.round += 1;
    tracker.process_type = Some(ProcessType::Lock);
    tracker.process_owner = Some(lock.locker.clone());
    tracker.process_unsigned_tx = Some(lock.btc_tx.clone());
    tracker.process_tx = None;
    tracker.process_tx_id = None;
    tracker.finality_votes.clear();
    tracker.next_lock_script_address = Some(multisig.address.clone());
    save_lock_script(ctx.storage, &multisig.address, &multisig.script)?;
    tracker.multisig = Some(multisig);
    tracker.state = TrackerState::Requested;
    save_tracker(ctx.storage, &tracker)?;

    debug!(
        tracker = %tracker.name,
        round = tracker.round,
        process_balance = %tracker.process_balance,
        "Lock requested"
    );

    let resp = TxResponse::new()
        .add_attributes(lock.attributes())
        .add_attribute("round", tracker.round.to_string())
        .add_attribute("process_balance", tracker.process_balance.to_string());
    Ok((resp, tracker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TxOutput;
    use crate::state::UtxoRef;

    const VAULT_ADDR: &str = "bcrt1qvault";

    fn custody(inputs: Vec<(&str, u32)>, value: u64) -> CustodyTx {
        CustodyTx {
            inputs: inputs
                .into_iter()
                .map(|(tx_id, index)| UtxoRef {
                    tx_id: tx_id.to_string(),
                    index,
                })
                .collect(),
            outputs: vec![TxOutput {
                address: VAULT_ADDR.to_string(),
                value,
            }],
        }
    }

    #[test]
    fn test_first_lock_requires_exact_output() {
        let tracker = Tracker::new_vault("v1");
        assert!(check_continuity(&tracker, &custody(vec![("user", 1)], 1000), Uint128::new(1000)).is_ok());
        assert!(matches!(
            check_continuity(&tracker, &custody(vec![("user", 1)], 999), Uint128::new(1000)),
            Err(CustodyError::TrackerMismatch { .. })
        ));
    }

    #[test]
    fn test_vault_output_must_pay_multisig() {
        let mut tx = custody(vec![("user", 1)], 1000);
        assert!(check_destination(&tx, VAULT_ADDR).is_ok());

        tx.outputs[0].address = "bcrt1qlocker".to_string();
        assert!(matches!(
            check_destination(&tx, VAULT_ADDR),
            Err(CustodyError::TrackerMismatch { .. })
        ));

        // change to the locker is fine as long as the vault output comes first
        let mut with_change = custody(vec![("user", 1)], 1000);
        with_change.outputs.push(TxOutput {
            address: "bcrt1qlocker".to_string(),
            value: 42,
        });
        assert!(check_destination(&with_change, VAULT_ADDR).is_ok());

        tx.outputs.clear();
        assert!(check_destination(&tx, VAULT_ADDR).is_err());
    }

    #[test]
    fn test_later_lock_must_spend_vault_output() {
        let mut tracker = Tracker::new_vault("v1");
        tracker.current_balance = Uint128::new(1000);
        tracker.current_utxo = Some(UtxoRef {
            tx_id: "aa".to_string(),
            index: 0,
        });

        let ok = custody(vec![("aa", 0), ("user", 3)], 1500);
        assert!(check_continuity(&tracker, &ok, Uint128::new(500)).is_ok());

        let wrong_hash = custody(vec![("bb", 0), ("user", 3)], 1500);
        let wrong_index = custody(vec![("aa", 1), ("user", 3)], 1500);
        let no_inputs = custody(vec![], 1500);
        for tx in [wrong_hash, wrong_index, no_inputs] {
            assert!(matches!(
                check_continuity(&tracker, &tx, Uint128::new(500)),
                Err(CustodyError::TrackerMismatch { .. })
            ));
        }
    }
}
