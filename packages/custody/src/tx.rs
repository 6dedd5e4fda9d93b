//! Transaction envelope, signing and basic validation
//!
//! A [`RawTx`] carries a JSON-encoded message tagged with its [`TxKind`].
//! Signers sign the canonical JSON of the raw transaction with secp256k1
//! ECDSA (SHA-256 digest); a signature authorizes the home ledger address
//! derived from its public key.

use std::fmt;

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Binary, Uint128};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};

use crate::address_codec::ledger_address;
use crate::error::CustodyError;
use crate::hash::sha256;

/// Closed set of transaction kinds routed by the handler table.
#[cw_serde]
#[derive(Copy, Eq, Hash, PartialOrd, Ord)]
pub enum TxKind {
    BtcLock,
    BtcAddSignature,
    BtcReportFinalityMint,
    EthRedeem,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::BtcLock => "btc_lock",
            TxKind::BtcAddSignature => "btc_add_signature",
            TxKind::BtcReportFinalityMint => "btc_report_finality_mint",
            TxKind::EthRedeem => "eth_redeem",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cw_serde]
#[derive(Default)]
pub struct Fee {
    pub amount: Uint128,
    pub gas: u64,
}

#[cw_serde]
pub struct RawTx {
    pub kind: TxKind,
    pub data: Binary,
    pub fee: Fee,
    /// Free text; internally broadcast transactions carry the job id
    pub memo: String,
}

impl RawTx {
    pub fn new(kind: TxKind, data: Binary, fee: Fee, memo: impl Into<String>) -> Self {
        Self {
            kind,
            data,
            fee,
            memo: memo.into(),
        }
    }

    /// Canonical bytes covered by signatures.
    pub fn sign_bytes(&self) -> Result<Vec<u8>, CustodyError> {
        serde_json::to_vec(self).map_err(|e| CustodyError::Unserializable {
            reason: e.to_string(),
        })
    }
}

#[cw_serde]
pub struct TxSignature {
    pub pub_key: Binary,
    pub signature: Binary,
}

#[cw_serde]
pub struct SignedTx {
    pub raw: RawTx,
    pub signatures: Vec<TxSignature>,
}

impl SignedTx {
    pub fn encode(&self) -> Result<Vec<u8>, CustodyError> {
        serde_json::to_vec(self).map_err(|e| CustodyError::Unserializable {
            reason: e.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CustodyError> {
        serde_json::from_slice(bytes).map_err(|e| CustodyError::Unserializable {
            reason: e.to_string(),
        })
    }

    pub fn kind(&self) -> TxKind {
        self.raw.kind
    }

    /// Hex SHA-256 of the encoded envelope.
    pub fn hash(&self) -> Result<String, CustodyError> {
        Ok(hex::encode(sha256(&self.encode()?)))
    }
}

/// Sign a raw transaction with each key in order.
pub fn sign_tx(raw: RawTx, keys: &[&SigningKey]) -> Result<SignedTx, CustodyError> {
    let bytes = raw.sign_bytes()?;
    let signatures = keys
        .iter()
        .map(|key| {
            let signature: Signature = key.sign(&bytes);
            TxSignature {
                pub_key: Binary::from(key.verifying_key().to_sec1_bytes().to_vec()),
                signature: Binary::from(signature.to_bytes().to_vec()),
            }
        })
        .collect();
    Ok(SignedTx { raw, signatures })
}

/// Every declared signer must have a valid signature over the raw bytes.
pub fn validate_basic(tx: &SignedTx, signers: &[Addr]) -> Result<(), CustodyError> {
    let bytes = tx.raw.sign_bytes()?;

    for signer in signers {
        let mut found = None;
        for sig in &tx.signatures {
            if &ledger_address(sig.pub_key.as_slice())? == signer {
                found = Some(sig);
                break;
            }
        }
        let sig = found.ok_or_else(|| CustodyError::Unauthorized {
            signer: signed_by(tx),
            declared: signer.to_string(),
        })?;

        let invalid = || CustodyError::InvalidSignature {
            signer: signer.to_string(),
        };
        let key = VerifyingKey::from_sec1_bytes(sig.pub_key.as_slice()).map_err(|_| invalid())?;
        let signature = Signature::from_slice(sig.signature.as_slice()).map_err(|_| invalid())?;
        key.verify(&bytes, &signature).map_err(|_| invalid())?;
    }

    Ok(())
}

fn signed_by(tx: &SignedTx) -> String {
    let addrs: Vec<String> = tx
        .signatures
        .iter()
        .filter_map(|s| ledger_address(s.pub_key.as_slice()).ok())
        .map(|a| a.to_string())
        .collect();
    if addrs.is_empty() {
        "nobody".to_string()
    } else {
        addrs.join(",")
    }
}
