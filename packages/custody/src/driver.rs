//! Chain driver interface
//!
//! Drivers own everything chain specific: transaction encoding, signing,
//! broadcasting and finality checks. Transaction handlers only call the
//! synchronous, pure decoding methods. The async methods touch the network
//! and are reserved for background jobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Binary, Uint128};
use k256::ecdsa::SigningKey;

use crate::address_codec::BitcoinNetwork;
use crate::error::{CustodyError, DriverError};
use crate::multisig::Multisig;
use crate::state::UtxoRef;
use crate::validator::ChainType;

#[cw_serde]
pub struct TxOutput {
    /// Address the output pays to
    pub address: String,
    pub value: u64,
}

/// Shape of a custody transaction as far as continuity checks care.
#[cw_serde]
pub struct CustodyTx {
    pub inputs: Vec<UtxoRef>,
    pub outputs: Vec<TxOutput>,
}

/// Spendable output together with its value.
#[cw_serde]
pub struct Utxo {
    pub outpoint: UtxoRef,
    pub value: u64,
}

/// Canonical redemption parsed out of a signed foreign transaction.
#[cw_serde]
pub struct RedeemRequest {
    pub tx_hash: String,
    pub recipient: String,
    pub amount: Uint128,
}

/// Result of adding one validator signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureOutcome {
    pub tx: Binary,
    pub threshold_reached: bool,
}

#[async_trait]
pub trait ChainDriver: Send + Sync {
    fn chain(&self) -> ChainType;

    fn decode_custody_tx(&self, raw: &[u8]) -> Result<CustodyTx, DriverError>;

    /// Foreign-chain id of a transaction, stable across signatures.
    fn tx_hash(&self, raw: &[u8]) -> Result<String, DriverError>;

    fn parse_redeem(&self, raw: &[u8]) -> Result<RedeemRequest, DriverError>;

    /// Whether `tx` carries a signature by `pub_key`, as committed to in the
    /// multisig script.
    fn has_signature(&self, tx: &[u8], pub_key: &[u8]) -> Result<bool, DriverError>;

    /// Build an unsigned lock transaction that spends the current vault
    /// output (if any) plus the locker's output into `next_address`.
    fn prepare_lock(
        &self,
        current: Option<&Utxo>,
        new_utxo: &Utxo,
        next_address: &str,
    ) -> Result<Binary, DriverError>;

    async fn add_signature(
        &self,
        tx: &[u8],
        multisig: &Multisig,
        key: &SigningKey,
    ) -> Result<SignatureOutcome, DriverError>;

    /// Ask the finality oracle about `tx_id` on `network.finality_chain()`.
    async fn check_finality(
        &self,
        tx_id: &str,
        oracle_token: &str,
        network: BitcoinNetwork,
    ) -> Result<bool, DriverError>;

    /// Broadcast a fully signed transaction, returning its id.
    async fn broadcast(&self, tx: &[u8]) -> Result<String, DriverError>;
}

/// Drivers keyed by the chain they serve.
#[derive(Clone, Default)]
pub struct ChainDrivers {
    drivers: HashMap<ChainType, Arc<dyn ChainDriver>>,
}

impl ChainDrivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn ChainDriver>) -> &mut Self {
        self.drivers.insert(driver.chain(), driver);
        self
    }

    pub fn with(mut self, driver: Arc<dyn ChainDriver>) -> Self {
        self.register(driver);
        self
    }

    pub fn get(&self, chain: ChainType) -> Result<&Arc<dyn ChainDriver>, CustodyError> {
        self.drivers
            .get(&chain)
            .ok_or(CustodyError::DriverUnavailable { chain })
    }
}

impl std::fmt::Debug for ChainDrivers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut chains: Vec<_> = self.drivers.keys().map(|c| c.to_string()).collect();
        chains.sort();
        f.debug_struct("ChainDrivers").field("chains", &chains).finish()
    }
}
