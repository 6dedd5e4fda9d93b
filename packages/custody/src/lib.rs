//! Custody Tracker - Cross-Chain Vault State Machine
//!
//! Deterministic half of the bridge. Every validator replays the same
//! transactions through these handlers in block order and reaches the same
//! tracker state. External chain work (co-signing, finality polling,
//! broadcasting) happens elsewhere and re-enters here only as new
//! transactions.
//!
//! # Lock Flow (Bitcoin)
//! 1. `BtcLock` moves an `Available` vault to `Requested` and emits an
//!    `AddSignature` job
//! 2. Each validator's job submits `BtcAddSignature`; the threshold-th
//!    signature moves the vault to `Signed` and emits a `CheckFinality` job
//! 3. Each validator's job submits `BtcReportFinalityMint` once the custody
//!    transaction is final; the threshold-th vote mints and frees the vault
//!
//! # Redeem Flow (Ethereum)
//! 1. `EthRedeem` parses the signed redemption and opens a tracker keyed by
//!    its transaction hash, in state `New`
//!
//! # Safety
//! - Continuity: every lock spends the vault's last confirmed output
//! - Exclusivity: one operation in flight per tracker
//! - Threshold: `floor(2n/3) + 1` of the validator set signs and votes

pub mod address_codec;
pub mod app;
pub mod context;
pub mod driver;
pub mod error;
pub mod fees;
pub mod handlers;
pub mod hash;
pub mod jobs;
pub mod msg;
pub mod multisig;
pub mod state;
pub mod storage;
pub mod store;
pub mod tx;
pub mod validator;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::address_codec::BitcoinNetwork;
pub use crate::app::{App, StateReader, TxResult};
pub use crate::driver::{ChainDriver, ChainDrivers};
pub use crate::error::{CustodyError, DriverError, ErrorClass};
pub use crate::jobs::{Job, JobKind};
pub use crate::state::{Tracker, TrackerState};
pub use crate::store::TrackerReader;
pub use crate::validator::{ChainType, Validator, ValidatorSetProvider};
