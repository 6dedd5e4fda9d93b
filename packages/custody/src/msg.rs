//! Transaction payloads
//!
//! Each payload is JSON encoded into [`RawTx::data`](crate::tx::RawTx) and
//! declares which home ledger accounts must sign it.

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Attribute, Binary, Uint128};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CustodyError;
use crate::tx::TxKind;

pub trait TxMsg: Serialize + DeserializeOwned {
    const KIND: TxKind;

    fn signers(&self) -> Vec<Addr>;

    /// Event attributes emitted on successful delivery
    fn attributes(&self) -> Vec<Attribute>;

    fn encode(&self) -> Result<Binary, CustodyError> {
        serde_json::to_vec(self)
            .map(Binary::from)
            .map_err(|e| CustodyError::Unserializable {
                reason: e.to_string(),
            })
    }

    fn decode(kind: TxKind, data: &[u8]) -> Result<Self, CustodyError> {
        if kind != Self::KIND {
            return Err(CustodyError::WrongTxType {
                expected: Self::KIND.to_string(),
                got: kind.to_string(),
            });
        }
        serde_json::from_slice(data).map_err(|e| CustodyError::WrongTxType {
            expected: Self::KIND.to_string(),
            got: format!("undecodable payload ({})", e),
        })
    }
}

/// Lock foreign funds into a vault.
#[cw_serde]
pub struct Lock {
    pub locker: Addr,
    pub tracker_name: String,
    /// Unsigned custody transaction, already signed for the locker's input
    pub btc_tx: Binary,
    pub lock_amount: Uint128,
}

impl TxMsg for Lock {
    const KIND: TxKind = TxKind::BtcLock;

    fn signers(&self) -> Vec<Addr> {
        vec![self.locker.clone()]
    }

    fn attributes(&self) -> Vec<Attribute> {
        vec![
            Attribute::new("tx.type", Self::KIND.as_str()),
            Attribute::new("tx.locker", self.locker.as_str()),
            Attribute::new("tx.tracker", self.tracker_name.as_str()),
        ]
    }
}

/// Burn home ledger funds and release them on Ethereum.
#[cw_serde]
pub struct Redeem {
    pub owner: Addr,
    /// Recipient on the foreign chain
    pub to: String,
    pub eth_tx: Option<Binary>,
}

impl TxMsg for Redeem {
    const KIND: TxKind = TxKind::EthRedeem;

    fn signers(&self) -> Vec<Addr> {
        vec![self.owner.clone()]
    }

    fn attributes(&self) -> Vec<Attribute> {
        vec![
            Attribute::new("tx.type", Self::KIND.as_str()),
            Attribute::new("tx.owner", self.owner.as_str()),
        ]
    }
}

/// One validator's signature over the pending custody transaction.
#[cw_serde]
pub struct AddSignature {
    pub tracker_name: String,
    pub validator: Addr,
    /// Custody transaction including this validator's signature
    pub signed_tx: Binary,
    /// Signatures already recorded when this one was produced
    pub signature_count: u32,
}

impl TxMsg for AddSignature {
    const KIND: TxKind = TxKind::BtcAddSignature;

    fn signers(&self) -> Vec<Addr> {
        vec![self.validator.clone()]
    }

    fn attributes(&self) -> Vec<Attribute> {
        vec![
            Attribute::new("tx.type", Self::KIND.as_str()),
            Attribute::new("tx.validator", self.validator.as_str()),
            Attribute::new("tx.tracker", self.tracker_name.as_str()),
        ]
    }
}

/// A validator's vote that the custody transaction is final on Bitcoin.
#[cw_serde]
pub struct ReportFinalityMint {
    pub tracker_name: String,
    pub owner: Addr,
    pub validator: Addr,
    /// Nonce keeping repeated reports distinct
    pub random_bytes: Binary,
}

impl TxMsg for ReportFinalityMint {
    const KIND: TxKind = TxKind::BtcReportFinalityMint;

    fn signers(&self) -> Vec<Addr> {
        vec![self.validator.clone()]
    }

    fn attributes(&self) -> Vec<Attribute> {
        vec![
            Attribute::new("tx.type", Self::KIND.as_str()),
            Attribute::new("tx.validator", self.validator.as_str()),
            Attribute::new("tx.owner", self.owner.as_str()),
            Attribute::new("tx.tracker", self.tracker_name.as_str()),
        ]
    }
}
