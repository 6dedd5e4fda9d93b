//! Background job descriptors
//!
//! Handlers only describe work; the node persists and runs it. A job names
//! its tracker and round, never the tracker itself, and its id is derived
//! from those so every delivery of the same round maps to the same job.

use std::fmt;

use cosmwasm_schema::cw_serde;

use crate::validator::ChainType;

#[cw_serde]
#[derive(Copy, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    AddSignature,
    CheckFinality,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AddSignature => "btc_add_signature",
            JobKind::CheckFinality => "btc_check_finality",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cw_serde]
pub enum Job {
    /// Co-sign the tracker's pending custody transaction
    AddSignature { tracker_name: String, round: u64 },
    /// Poll the finality oracle and vote to mint
    CheckFinality { tracker_name: String, round: u64 },
}

impl Job {
    pub fn add_signature(tracker_name: impl Into<String>, round: u64) -> Self {
        Job::AddSignature {
            tracker_name: tracker_name.into(),
            round,
        }
    }

    pub fn check_finality(tracker_name: impl Into<String>, round: u64) -> Self {
        Job::CheckFinality {
            tracker_name: tracker_name.into(),
            round,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Job::AddSignature { .. } => JobKind::AddSignature,
            Job::CheckFinality { .. } => JobKind::CheckFinality,
        }
    }

    pub fn tracker_name(&self) -> &str {
        match self {
            Job::AddSignature { tracker_name, .. } | Job::CheckFinality { tracker_name, .. } => {
                tracker_name
            }
        }
    }

    pub fn round(&self) -> u64 {
        match self {
            Job::AddSignature { round, .. } | Job::CheckFinality { round, .. } => *round,
        }
    }

    pub fn chain(&self) -> ChainType {
        ChainType::Bitcoin
    }

    /// `<kind>:<tracker>:<round>`
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.kind(), self.tracker_name(), self.round())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_deterministic() {
        let a = Job::add_signature("v1", 3);
        assert_eq!(a.id(), "btc_add_signature:v1:3");
        assert_eq!(a.id(), Job::add_signature("v1", 3).id());
        assert_ne!(a.id(), Job::add_signature("v1", 4).id());
        assert_eq!(
            Job::check_finality("v1", 3).id(),
            "btc_check_finality:v1:3"
        );
    }

    #[test]
    fn test_job_serde_tagged() {
        let job = Job::check_finality("vault", 1);
        let json = serde_json::to_string(&job).unwrap();
        assert_eq!(
            json,
            r#"{"check_finality":{"tracker_name":"vault","round":1}}"#
        );
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), JobKind::CheckFinality);
    }
}
