//! Per-call handler context

use cosmwasm_std::{Attribute, Storage};

use crate::address_codec::BitcoinNetwork;
use crate::driver::ChainDrivers;
use crate::fees::FeeOptions;
use crate::jobs::Job;
use crate::validator::ValidatorSetProvider;

/// Everything a handler may touch during one apply. Built fresh for each
/// phase; nothing in it outlives the call.
pub struct Context<'a> {
    pub storage: &'a mut dyn Storage,
    pub height: u64,
    pub validators: &'a dyn ValidatorSetProvider,
    pub drivers: &'a ChainDrivers,
    pub fee_options: &'a FeeOptions,
    pub network: BitcoinNetwork,
}

/// Outcome of a successful handler phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxResponse {
    pub attributes: Vec<Attribute>,
    pub info: String,
    /// Background work requested by this delivery
    pub jobs: Vec<Job>,
}

impl TxResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(key, value));
        self
    }

    pub fn add_attributes(mut self, attrs: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes.extend(attrs);
        self
    }

    pub fn add_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn set_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }
}
