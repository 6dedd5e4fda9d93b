//! Ethereum redeem handler.
//!
//! A parse failure is a normal rejection (`InvalidAmount`), never a fault:
//! the block commits and no tracker is created.

use tracing::debug;

use crate::context::{Context, TxResponse};
use crate::error::CustodyError;
use crate::fees::validate_fee;
use crate::handlers::TxHandler;
use crate::msg::{Redeem, TxMsg};
use crate::multisig::Multisig;
use crate::state::Tracker;
use crate::store::create_tracker;
use crate::tx::{validate_basic, RawTx, SignedTx, TxKind};
use crate::validator::ChainType;

pub struct RedeemHandler;

impl TxHandler for RedeemHandler {
    fn kind(&self) -> TxKind {
        TxKind::EthRedeem
    }

    fn validate(&self, ctx: &Context<'_>, tx: &SignedTx) -> Result<(), CustodyError> {
        let redeem = Redeem::decode(tx.raw.kind, &tx.raw.data)?;
        validate_basic(tx, &redeem.signers())?;
        validate_fee(ctx.fee_options, &tx.raw.fee)?;
        match &redeem.eth_tx {
            Some(payload) if !payload.is_empty() => Ok(()),
            _ => Err(CustodyError::MissingData {
                field: "eth_tx".to_string(),
            }),
        }
    }

    fn process_check(&self, ctx: &mut Context<'_>, tx: &RawTx) -> Result<TxResponse, CustodyError> {
        run_redeem(ctx, tx)
    }

    fn process_deliver(
        &self,
        ctx: &mut Context<'_>,
        tx: &RawTx,
    ) -> Result<TxResponse, CustodyError> {
        run_redeem(ctx, tx)
    }
}

fn run_redeem(ctx: &mut Context<'_>, tx: &RawTx) -> Result<TxResponse, CustodyError> {
    let redeem = Redeem::decode(tx.kind, &tx.data)?;
    let payload = redeem.eth_tx.clone().ok_or_else(|| CustodyError::MissingData {
        field: "eth_tx".to_string(),
    })?;

    let request = ctx
        .drivers
        .get(ChainType::Ethereum)?
        .parse_redeem(payload.as_slice())
        .map_err(|e| CustodyError::InvalidAmount {
            reason: e.to_string(),
        })?;
    if request.amount.is_zero() {
        return Err(CustodyError::InvalidAmount {
            reason: "redeem amount must be greater than zero".to_string(),
        });
    }

    let validators = ctx.validators.get_validator_set()?;
    let multisig = Multisig::build(&validators, ChainType::Ethereum, ctx.network, payload.clone())?;

    let tracker = Tracker::new_redeem(
        &request.tx_hash,
        redeem.owner.clone(),
        request.amount,
        multisig,
        payload,
    );
    create_tracker(ctx.storage, &tracker)?;

    debug!(
        tracker = %tracker.name,
        owner = %redeem.owner,
        amount = %request.amount,
        recipient = %request.recipient,
        "Redeem tracker created"
    );

    Ok(TxResponse::new()
        .add_attributes(redeem.attributes())
        .add_attribute("tracker", tracker.name)
        .add_attribute("amount", request.amount.to_string())
        .set_info("Transaction received, redeem in progress"))
}
