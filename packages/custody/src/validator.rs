//! Validator identities and the read-only validator set provider

use std::fmt;

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Binary};

use crate::address_codec::{encode_evm_address, p2wsh_address, BitcoinNetwork};
use crate::error::CustodyError;
use crate::hash::{compressed_pubkey, eth_address_from_pubkey};

/// Foreign chain a custody vault lives on.
#[cw_serde]
#[derive(Copy, Eq, Hash)]
pub enum ChainType {
    Bitcoin,
    Ethereum,
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainType::Bitcoin => write!(f, "bitcoin"),
            ChainType::Ethereum => write!(f, "ethereum"),
        }
    }
}

/// A consensus validator and its secp256k1 key.
#[cw_serde]
pub struct Validator {
    /// Home ledger address
    pub address: Addr,
    /// SEC1 secp256k1 public key
    pub pub_key: Binary,
    /// Voting power
    pub power: u64,
}

impl Validator {
    /// Single-key custody address on the given chain.
    ///
    /// Bitcoin keys map to a P2WSH over `<pubkey> OP_CHECKSIG`; Ethereum keys
    /// map to the keccak-derived account.
    pub fn custody_address(
        &self,
        chain: ChainType,
        network: BitcoinNetwork,
    ) -> Result<String, CustodyError> {
        match chain {
            ChainType::Bitcoin => {
                let pk = compressed_pubkey(self.pub_key.as_slice())?;
                let mut script = Vec::with_capacity(pk.len() + 2);
                script.push(pk.len() as u8);
                script.extend_from_slice(&pk);
                script.push(crate::multisig::OP_CHECKSIG);
                p2wsh_address(&script, network)
            }
            ChainType::Ethereum => {
                let raw = eth_address_from_pubkey(self.pub_key.as_slice())?;
                Ok(encode_evm_address(&raw))
            }
        }
    }
}

/// Source of the current validator set. Implementations return a snapshot;
/// handlers never hold on to it past one apply.
pub trait ValidatorSetProvider: Send + Sync {
    fn get_validator_set(&self) -> Result<Vec<Validator>, CustodyError>;
}

/// Fixed validator set, the usual provider for a single height.
#[derive(Debug, Clone, Default)]
pub struct StaticValidatorSet {
    validators: Vec<Validator>,
}

impl StaticValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    pub fn find(&self, address: &Addr) -> Option<&Validator> {
        self.validators.iter().find(|v| &v.address == address)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl ValidatorSetProvider for StaticValidatorSet {
    fn get_validator_set(&self) -> Result<Vec<Validator>, CustodyError> {
        Ok(self.validators.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> Validator {
        Validator {
            address: Addr::unchecked("val1"),
            pub_key: Binary::from(
                hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                    .unwrap(),
            ),
            power: 10,
        }
    }

    #[test]
    fn test_custody_address_bitcoin() {
        let v = generator();
        assert_eq!(
            v.custody_address(ChainType::Bitcoin, BitcoinNetwork::Mainnet)
                .unwrap(),
            "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3"
        );
    }

    #[test]
    fn test_custody_address_ethereum() {
        let v = generator();
        assert_eq!(
            v.custody_address(ChainType::Ethereum, BitcoinNetwork::Mainnet)
                .unwrap(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_static_set_lookup() {
        let set = StaticValidatorSet::new(vec![generator()]);
        assert_eq!(set.len(), 1);
        assert!(set.find(&Addr::unchecked("val1")).is_some());
        assert!(set.find(&Addr::unchecked("val2")).is_none());
        assert_eq!(set.get_validator_set().unwrap().len(), 1);
    }
}
