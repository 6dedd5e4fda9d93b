//! Fee policy
//!
//! Fees are checked at validation time and collected into a pool before the
//! deliver phase, so a transaction that fails in deliver still pays.

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{StdError, Storage, Uint128};

use crate::error::CustodyError;
use crate::state::FEE_POOL;
use crate::tx::{Fee, SignedTx};

/// Minimum fee accepted by this node
pub const DEFAULT_MIN_FEE: u128 = 0;

#[cw_serde]
pub struct FeeOptions {
    pub min_fee: Uint128,
}

impl Default for FeeOptions {
    fn default() -> Self {
        Self {
            min_fee: Uint128::new(DEFAULT_MIN_FEE),
        }
    }
}

pub fn validate_fee(opts: &FeeOptions, fee: &Fee) -> Result<(), CustodyError> {
    if fee.amount < opts.min_fee {
        return Err(CustodyError::InsufficientFee {
            got: fee.amount,
            required: opts.min_fee,
        });
    }
    Ok(())
}

/// Collect the declared fee times `weight` and report gas as `size * weight`.
pub fn basic_fee_handling(
    storage: &mut dyn Storage,
    tx: &SignedTx,
    size: u64,
    weight: u64,
) -> Result<u64, CustodyError> {
    let charged = tx
        .raw
        .fee
        .amount
        .checked_mul(Uint128::from(weight))
        .map_err(StdError::from)?;
    let pool = FEE_POOL.may_load(storage)?.unwrap_or_default();
    FEE_POOL.save(storage, &pool.checked_add(charged).map_err(StdError::from)?)?;
    Ok(size.saturating_mul(weight))
}

pub fn fee_pool(storage: &dyn Storage) -> Result<Uint128, CustodyError> {
    Ok(FEE_POOL.may_load(storage)?.unwrap_or_default())
}
