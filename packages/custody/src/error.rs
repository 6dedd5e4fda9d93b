//! Error types for the custody state machine
//!
//! Every error a transaction handler can return is deterministic: the same
//! transaction applied to the same state yields the same variant on every
//! validator. Errors are grouped by [`ErrorClass`] so callers can tell a
//! malformed submission from one that may succeed later.

use cosmwasm_std::{StdError, Uint128};
use thiserror::Error;

use crate::validator::ChainType;

#[derive(Error, Debug, PartialEq)]
pub enum CustodyError {
    #[error("{0}")]
    Std(#[from] StdError),

    // ========================================================================
    // Malformed Input
    // ========================================================================

    #[error("Wrong transaction type: expected {expected}, got {got}")]
    WrongTxType { expected: String, got: String },

    #[error("Unserializable payload: {reason}")]
    Unserializable { reason: String },

    #[error("Missing data: {field}")]
    MissingData { field: String },

    // ========================================================================
    // Policy Violations
    // ========================================================================

    #[error("Tracker mismatch: {reason}")]
    TrackerMismatch { reason: String },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("Unauthorized: {signer} cannot act for {declared}")]
    Unauthorized { signer: String, declared: String },

    #[error("Invalid signature for {signer}")]
    InvalidSignature { signer: String },

    #[error("Insufficient fee: got {got}, need {required}")]
    InsufficientFee { got: Uint128, required: Uint128 },

    #[error("Not a validator in the tracker signer set: {address}")]
    NotAValidator { address: String },

    #[error("Validator {address} already signed round {round}")]
    DuplicateSignature { address: String, round: u64 },

    #[error("Validator {address} already reported finality for round {round}")]
    DuplicateVote { address: String, round: u64 },

    #[error("Unexpected tracker state: expected {expected}, got {got}")]
    UnexpectedTrackerState { expected: String, got: String },

    // ========================================================================
    // Resource Unavailable
    // ========================================================================

    #[error("Tracker not found: {name}")]
    TrackerNotFound { name: String },

    #[error("Tracker busy: {name} is {state}")]
    TrackerBusy { name: String, state: String },

    #[error("Tracker already exists: {name}")]
    TrackerExists { name: String },

    #[error("Stale signature: signed against {got} signatures, tracker has {expected}")]
    StaleSignature { expected: u32, got: u32 },

    #[error("No chain driver registered for {chain}")]
    DriverUnavailable { chain: ChainType },

    // ========================================================================
    // Invariant Failures
    // ========================================================================

    #[error("Insufficient validators: threshold needs at least one")]
    InsufficientValidators,

    // ========================================================================
    // Chain Driver
    // ========================================================================

    #[error("Chain driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Stable result codes, one per [`CustodyError`] variant.
pub mod codes {
    pub const STD: u32 = 1;
    pub const WRONG_TX_TYPE: u32 = 2;
    pub const UNSERIALIZABLE: u32 = 3;
    pub const MISSING_DATA: u32 = 4;
    pub const TRACKER_MISMATCH: u32 = 10;
    pub const INVALID_AMOUNT: u32 = 11;
    pub const UNAUTHORIZED: u32 = 12;
    pub const INVALID_SIGNATURE: u32 = 13;
    pub const INSUFFICIENT_FEE: u32 = 14;
    pub const NOT_A_VALIDATOR: u32 = 15;
    pub const DUPLICATE_SIGNATURE: u32 = 16;
    pub const DUPLICATE_VOTE: u32 = 17;
    pub const UNEXPECTED_TRACKER_STATE: u32 = 18;
    pub const TRACKER_NOT_FOUND: u32 = 20;
    pub const TRACKER_BUSY: u32 = 21;
    pub const TRACKER_EXISTS: u32 = 22;
    pub const STALE_SIGNATURE: u32 = 23;
    pub const DRIVER_UNAVAILABLE: u32 = 24;
    pub const INSUFFICIENT_VALIDATORS: u32 = 30;
    pub const DRIVER: u32 = 40;
}

/// Failure reported by an external chain driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("rpc failed: {0}")]
    Rpc(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("rejected by chain: {0}")]
    Rejected(String),
}

impl DriverError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Rpc(_) | DriverError::Timeout(_))
    }
}

/// Coarse taxonomy used to decide how a rejection is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Never valid; do not retry
    Malformed,
    /// Deterministically rejected by policy
    Policy,
    /// May succeed once the tracker frees up
    Unavailable,
    /// Invariant failure; logged and rejected
    Internal,
    /// External chain driver failure
    Driver,
}

impl CustodyError {
    pub fn class(&self) -> ErrorClass {
        use CustodyError::*;
        match self {
            WrongTxType { .. } | Unserializable { .. } | MissingData { .. } => ErrorClass::Malformed,
            TrackerMismatch { .. }
            | InvalidAmount { .. }
            | Unauthorized { .. }
            | InvalidSignature { .. }
            | InsufficientFee { .. }
            | NotAValidator { .. }
            | DuplicateSignature { .. }
            | DuplicateVote { .. }
            | UnexpectedTrackerState { .. } => ErrorClass::Policy,
            TrackerNotFound { .. }
            | TrackerBusy { .. }
            | TrackerExists { .. }
            | StaleSignature { .. }
            | DriverUnavailable { .. } => ErrorClass::Unavailable,
            InsufficientValidators | Std(_) => ErrorClass::Internal,
            Driver(_) => ErrorClass::Driver,
        }
    }

    /// Stable non-zero result code attached to rejected transactions.
    pub fn code(&self) -> u32 {
        use CustodyError::*;
        match self {
            Std(_) => codes::STD,
            WrongTxType { .. } => codes::WRONG_TX_TYPE,
            Unserializable { .. } => codes::UNSERIALIZABLE,
            MissingData { .. } => codes::MISSING_DATA,
            TrackerMismatch { .. } => codes::TRACKER_MISMATCH,
            InvalidAmount { .. } => codes::INVALID_AMOUNT,
            Unauthorized { .. } => codes::UNAUTHORIZED,
            InvalidSignature { .. } => codes::INVALID_SIGNATURE,
            InsufficientFee { .. } => codes::INSUFFICIENT_FEE,
            NotAValidator { .. } => codes::NOT_A_VALIDATOR,
            DuplicateSignature { .. } => codes::DUPLICATE_SIGNATURE,
            DuplicateVote { .. } => codes::DUPLICATE_VOTE,
            UnexpectedTrackerState { .. } => codes::UNEXPECTED_TRACKER_STATE,
            TrackerNotFound { .. } => codes::TRACKER_NOT_FOUND,
            TrackerBusy { .. } => codes::TRACKER_BUSY,
            TrackerExists { .. } => codes::TRACKER_EXISTS,
            StaleSignature { .. } => codes::STALE_SIGNATURE,
            DriverUnavailable { .. } => codes::DRIVER_UNAVAILABLE,
            InsufficientValidators => codes::INSUFFICIENT_VALIDATORS,
            Driver(_) => codes::DRIVER,
        }
    }

    /// Whether resubmitting later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CustodyError::Driver(e) => e.is_transient(),
            other => other.class() == ErrorClass::Unavailable,
        }
    }
}
