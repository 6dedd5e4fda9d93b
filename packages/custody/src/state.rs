//! State definitions for the custody trackers
//!
//! Trackers are mapping-store entries keyed by vault name (Bitcoin lock side)
//! or by the foreign redemption transaction hash (Ethereum redeem side). They
//! are never deleted; a finished round returns the tracker to `Available`.

use std::fmt;

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Binary, Uint128};
use cw_storage_plus::{Item, Map};

use crate::multisig::Multisig;
use crate::validator::ChainType;

// ============================================================================
// Tracker
// ============================================================================

#[cw_serde]
#[derive(Copy, Eq)]
pub enum TrackerState {
    New,
    Available,
    Requested,
    BusySigning,
    Signed,
    Finalized,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::New => "new",
            TrackerState::Available => "available",
            TrackerState::Requested => "requested",
            TrackerState::BusySigning => "busy_signing",
            TrackerState::Signed => "signed",
            TrackerState::Finalized => "finalized",
        }
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cw_serde]
#[derive(Copy, Eq)]
pub enum ProcessType {
    Lock,
    Redeem,
}

/// Reference to a confirmed custody output on a UTXO chain.
#[cw_serde]
#[derive(Eq, Hash)]
pub struct UtxoRef {
    pub tx_id: String,
    pub index: u32,
}

/// The custody record for one vault lineage.
#[cw_serde]
pub struct Tracker {
    pub name: String,
    pub chain: ChainType,
    pub state: TrackerState,
    /// Operation in flight; `None` while available
    pub process_type: Option<ProcessType>,
    pub process_owner: Option<Addr>,
    /// Balance confirmed on the foreign chain
    pub current_balance: Uint128,
    /// Balance once the in-flight operation finalizes
    pub process_balance: Uint128,
    /// Last confirmed custody output; `None` before the first lock
    pub current_utxo: Option<UtxoRef>,
    pub multisig: Option<Multisig>,
    pub process_unsigned_tx: Option<Binary>,
    /// Partially or fully signed custody transaction
    pub process_tx: Option<Binary>,
    pub process_tx_id: Option<String>,
    /// Address currently holding the vault output
    pub lock_script_address: Option<String>,
    /// Address the vault rotates to once the in-flight round finalizes
    pub next_lock_script_address: Option<String>,
    /// Incremented each time a new operation starts
    pub round: u64,
    /// Validators that reported finality for the current round
    pub finality_votes: Vec<Addr>,
    /// Signed redemption payload kept for release processing
    pub signed_redeem_tx: Option<Binary>,
}

impl Tracker {
    /// Empty Bitcoin vault awaiting its first lock.
    pub fn new_vault(name: impl Into<String>) -> Self {
        Tracker {
            name: name.into(),
            chain: ChainType::Bitcoin,
            state: TrackerState::Available,
            process_type: None,
            process_owner: None,
            current_balance: Uint128::zero(),
            process_balance: Uint128::zero(),
            current_utxo: None,
            multisig: None,
            process_unsigned_tx: None,
            process_tx: None,
            process_tx_id: None,
            lock_script_address: None,
            next_lock_script_address: None,
            round: 0,
            finality_votes: vec![],
            signed_redeem_tx: None,
        }
    }

    /// Redemption tracker keyed by the foreign transaction hash.
    pub fn new_redeem(
        tx_hash: impl Into<String>,
        owner: Addr,
        amount: Uint128,
        multisig: Multisig,
        signed_redeem_tx: Binary,
    ) -> Self {
        Tracker {
            name: tx_hash.into(),
            chain: ChainType::Ethereum,
            state: TrackerState::New,
            process_type: Some(ProcessType::Redeem),
            process_owner: Some(owner),
            current_balance: Uint128::zero(),
            process_balance: amount,
            current_utxo: None,
            multisig: Some(multisig),
            process_unsigned_tx: None,
            process_tx: None,
            process_tx_id: None,
            lock_script_address: None,
            next_lock_script_address: None,
            round: 1,
            finality_votes: vec![],
            signed_redeem_tx: Some(signed_redeem_tx),
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == TrackerState::Available
    }

    /// Clears per-round fields once the vault is ready for the next round.
    pub fn reset_process(&mut self) {
        self.state = TrackerState::Available;
        self.process_type = None;
        self.process_owner = None;
        self.process_balance = self.current_balance;
        self.multisig = None;
        self.process_unsigned_tx = None;
        self.process_tx = None;
        self.process_tx_id = None;
        self.finality_votes.clear();
    }
}

// ============================================================================
// Storage Maps
// ============================================================================

/// Bitcoin vault trackers by name
pub const BTC_TRACKERS: Map<&str, Tracker> = Map::new("btc_trackers");

/// Ethereum redemption trackers by redemption tx hash
pub const ETH_TRACKERS: Map<&str, Tracker> = Map::new("eth_trackers");

/// Multisig witness scripts by the address they pay to
pub const LOCK_SCRIPTS: Map<&str, Binary> = Map::new("lock_scripts");

/// Minted home-ledger representation per owner
pub const MINTED: Map<&Addr, Uint128> = Map::new("minted");

/// Fees collected from delivered transactions
pub const FEE_POOL: Item<Uint128> = Item::new("fee_pool");
