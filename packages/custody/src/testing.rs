//! Test doubles: an in-memory chain driver and deterministic validator keys.
//!
//! The mock encodes custody transactions as JSON. Signatures are modelled as
//! the signer's compressed public key in a witness list, which is excluded
//! from the transaction id the same way segwit witnesses are.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use cosmwasm_std::{Addr, Binary, Uint128};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::address_codec::{ledger_address, BitcoinNetwork};
use crate::app::App;
use crate::driver::{
    ChainDriver, ChainDrivers, CustodyTx, RedeemRequest, SignatureOutcome, TxOutput, Utxo,
};
use crate::error::{CustodyError, DriverError};
use crate::fees::FeeOptions;
use crate::hash::sha256;
use crate::msg::TxMsg;
use crate::multisig::Multisig;
use crate::state::UtxoRef;
use crate::tx::{sign_tx, Fee, RawTx};
use crate::validator::{ChainType, StaticValidatorSet, Validator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockOutput {
    pub address: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockTx {
    pub inputs: Vec<UtxoRef>,
    pub outputs: Vec<MockOutput>,
    /// Hex compressed keys of the validators that signed
    #[serde(default)]
    pub witness: Vec<String>,
}

impl MockTx {
    pub fn encode(&self) -> Binary {
        Binary::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DriverError> {
        serde_json::from_slice(raw).map_err(|e| DriverError::Decode(e.to_string()))
    }

    /// Id over everything but the witness.
    pub fn id(&self) -> String {
        let stripped = MockTx {
            witness: vec![],
            ..self.clone()
        };
        hex::encode(sha256(&serde_json::to_vec(&stripped).unwrap_or_default()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockRedeem {
    pub recipient: String,
    pub amount: Uint128,
}

#[derive(Default)]
struct MockState {
    final_txs: Vec<String>,
    finality_script: VecDeque<Result<bool, DriverError>>,
    finality_calls: u32,
    finality_chains: Vec<&'static str>,
    signature_failures: VecDeque<DriverError>,
    broadcast_failures: VecDeque<DriverError>,
    broadcasts: Vec<Binary>,
}

/// In-memory chain driver with scripted failures.
pub struct MockChainDriver {
    chain: ChainType,
    state: Mutex<MockState>,
}

impl MockChainDriver {
    pub fn new(chain: ChainType) -> Self {
        Self {
            chain,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a transaction id final for every later finality check.
    pub fn set_final(&self, tx_id: &str) {
        self.state().final_txs.push(tx_id.to_string());
    }

    /// Queue finality answers consumed before the final set is consulted.
    pub fn script_finality(&self, answers: Vec<Result<bool, DriverError>>) {
        self.state().finality_script.extend(answers);
    }

    pub fn fail_next_signature(&self, err: DriverError) {
        self.state().signature_failures.push_back(err);
    }

    pub fn fail_next_broadcast(&self, err: DriverError) {
        self.state().broadcast_failures.push_back(err);
    }

    pub fn finality_calls(&self) -> u32 {
        self.state().finality_calls
    }

    /// Oracle chain names finality was asked on, in call order
    pub fn finality_chains(&self) -> Vec<&'static str> {
        self.state().finality_chains.clone()
    }

    pub fn broadcasts(&self) -> Vec<Binary> {
        self.state().broadcasts.clone()
    }
}

#[async_trait]
impl ChainDriver for MockChainDriver {
    fn chain(&self) -> ChainType {
        self.chain
    }

    fn decode_custody_tx(&self, raw: &[u8]) -> Result<CustodyTx, DriverError> {
        let tx = MockTx::decode(raw)?;
        Ok(CustodyTx {
            inputs: tx.inputs,
            outputs: tx
                .outputs
                .into_iter()
                .map(|o| TxOutput {
                    address: o.address,
                    value: o.value,
                })
                .collect(),
        })
    }

    fn tx_hash(&self, raw: &[u8]) -> Result<String, DriverError> {
        Ok(MockTx::decode(raw)?.id())
    }

    fn parse_redeem(&self, raw: &[u8]) -> Result<RedeemRequest, DriverError> {
        let redeem: MockRedeem =
            serde_json::from_slice(raw).map_err(|e| DriverError::Decode(e.to_string()))?;
        Ok(RedeemRequest {
            tx_hash: format!("0x{}", hex::encode(sha256(raw))),
            recipient: redeem.recipient,
            amount: redeem.amount,
        })
    }

    fn has_signature(&self, tx: &[u8], pub_key: &[u8]) -> Result<bool, DriverError> {
        let entry = hex::encode(pub_key);
        Ok(MockTx::decode(tx)?.witness.contains(&entry))
    }

    fn prepare_lock(
        &self,
        current: Option<&Utxo>,
        new_utxo: &Utxo,
        next_address: &str,
    ) -> Result<Binary, DriverError> {
        let mut inputs = vec![];
        let mut value = new_utxo.value;
        if let Some(current) = current {
            inputs.push(current.outpoint.clone());
            value = value.saturating_add(current.value);
        }
        inputs.push(new_utxo.outpoint.clone());
        Ok(MockTx {
            inputs,
            outputs: vec![MockOutput {
                address: next_address.to_string(),
                value,
            }],
            witness: vec![],
        }
        .encode())
    }

    async fn add_signature(
        &self,
        tx: &[u8],
        multisig: &Multisig,
        key: &SigningKey,
    ) -> Result<SignatureOutcome, DriverError> {
        if let Some(err) = self.state().signature_failures.pop_front() {
            return Err(err);
        }
        let mut decoded = MockTx::decode(tx)?;
        let pub_key = key.verifying_key().to_sec1_bytes();
        if !multisig
            .signers
            .iter()
            .any(|s| s.pub_key.as_slice() == &pub_key[..])
        {
            return Err(DriverError::Signing("key is not a multisig signer".into()));
        }
        let entry = hex::encode(&pub_key);
        if !decoded.witness.contains(&entry) {
            decoded.witness.push(entry);
        }
        let threshold_reached = decoded.witness.len() as u32 >= multisig.threshold;
        Ok(SignatureOutcome {
            tx: decoded.encode(),
            threshold_reached,
        })
    }

    async fn check_finality(
        &self,
        tx_id: &str,
        _oracle_token: &str,
        network: BitcoinNetwork,
    ) -> Result<bool, DriverError> {
        let mut state = self.state();
        state.finality_calls += 1;
        state.finality_chains.push(network.finality_chain());
        if let Some(answer) = state.finality_script.pop_front() {
            return answer;
        }
        Ok(state.final_txs.iter().any(|t| t == tx_id))
    }

    async fn broadcast(&self, tx: &[u8]) -> Result<String, DriverError> {
        let mut state = self.state();
        if let Some(err) = state.broadcast_failures.pop_front() {
            return Err(err);
        }
        state.broadcasts.push(Binary::from(tx.to_vec()));
        Ok(MockTx::decode(tx)?.id())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Deterministic key with secret scalar `seed`.
pub fn test_key(seed: u8) -> SigningKey {
    let mut secret = [0u8; 32];
    secret[31] = seed.max(1);
    SigningKey::from_slice(&secret).unwrap_or_else(|_| unreachable!("non-zero scalar below order"))
}

pub fn address_of(key: &SigningKey) -> Addr {
    ledger_address(&key.verifying_key().to_sec1_bytes())
        .unwrap_or_else(|_| unreachable!("valid key always encodes"))
}

pub fn validator_for(key: &SigningKey) -> Validator {
    Validator {
        address: address_of(key),
        pub_key: Binary::from(key.verifying_key().to_sec1_bytes().to_vec()),
        power: 1,
    }
}

/// `n` validator keys with seeds 1..=n.
pub fn validator_keys(n: u8) -> Vec<SigningKey> {
    (1..=n).map(test_key).collect()
}

/// Sign `msg` as a transaction from `key`.
pub fn signed_bytes<M: TxMsg>(msg: &M, key: &SigningKey, memo: &str) -> Result<Vec<u8>, CustodyError> {
    let raw = RawTx::new(M::KIND, msg.encode()?, Fee::default(), memo);
    sign_tx(raw, &[key])?.encode()
}

/// Everything a handler-level test needs.
pub struct TestChain {
    pub app: Arc<App>,
    pub keys: Vec<SigningKey>,
    pub btc: Arc<MockChainDriver>,
    pub eth: Arc<MockChainDriver>,
}

impl TestChain {
    pub fn new(validators: u8) -> Self {
        let keys = validator_keys(validators);
        let set = StaticValidatorSet::new(keys.iter().map(validator_for).collect());
        let btc = Arc::new(MockChainDriver::new(ChainType::Bitcoin));
        let eth = Arc::new(MockChainDriver::new(ChainType::Ethereum));
        let drivers = ChainDrivers::new()
            .with(btc.clone())
            .with(eth.clone());
        let app = App::new(
            Arc::new(set),
            drivers,
            FeeOptions::default(),
            BitcoinNetwork::Regtest,
        );
        Self {
            app: Arc::new(app),
            keys,
            btc,
            eth,
        }
    }

    pub fn validator(&self, i: usize) -> Addr {
        address_of(&self.keys[i])
    }
}

/// A user-funded custody transaction paying `value` to `to`, normally
/// [`App::vault_address`].
pub fn lock_tx(to: &str, inputs: Vec<UtxoRef>, value: u64) -> Binary {
    MockTx {
        inputs,
        outputs: vec![MockOutput {
            address: to.to_string(),
            value,
        }],
        witness: vec![],
    }
    .encode()
}

pub fn outpoint(tx_id: &str, index: u32) -> UtxoRef {
    UtxoRef {
        tx_id: tx_id.to_string(),
        index,
    }
}

pub fn redeem_payload(recipient: &str, amount: u128) -> Binary {
    Binary::from(
        serde_json::to_vec(&MockRedeem {
            recipient: recipient.to_string(),
            amount: Uint128::new(amount),
        })
        .unwrap_or_default(),
    )
}
