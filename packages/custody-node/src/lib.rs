//! Custody Node - Background Domain
//!
//! Runs the jobs that delivered transactions ask for: co-signing pending
//! custody transactions and reporting their finality. Jobs read consensus
//! state through a read-only view and change it only by submitting new
//! transactions through the node's internal broadcast path.
//!
//! # Flow
//! 1. [`BlockExecutor`] delivers a block and persists the emitted jobs
//! 2. [`Scheduler`] polls the job store, one sequential lane per tracker
//! 3. Jobs sign and submit through [`MempoolBroadcaster`], which admits
//!    transactions with `check_tx` for the next block

pub mod broadcast;
pub mod config;
pub mod db;
pub mod executor;
pub mod jobs;
pub mod metrics;
pub mod node;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use crate::broadcast::{InternalBroadcast, Mempool, MempoolBroadcaster};
pub use crate::config::Config;
pub use crate::executor::BlockExecutor;
pub use crate::jobs::{JobContext, JobOutcome, JobRegistry};
pub use crate::node::Node;
pub use crate::scheduler::{Scheduler, SchedulerConfig, TickSummary};
pub use crate::types::JobStatus;
