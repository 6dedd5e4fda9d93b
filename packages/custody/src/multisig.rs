//! Threshold multisig over the validator set
//!
//! Every validator derives the same script from the same snapshot, so signer
//! ordering is canonical: Bitcoin signers are sorted by compressed public key
//! (BIP-67), Ethereum signers by account bytes.
//!
//! # Script layout
//! - Bitcoin: `OP_M <pk_1> .. <pk_n> OP_N OP_CHECKMULTISIG`, paid to as P2WSH
//! - Ethereum: `threshold (uint256 BE) || addr_1 || .. || addr_n`, identified
//!   by the keccak-derived address of that blob

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Addr, Binary};

use crate::address_codec::{encode_evm_address, p2wsh_address, BitcoinNetwork};
use crate::error::CustodyError;
use crate::hash::{compressed_pubkey, eth_address_from_pubkey, keccak256};
use crate::validator::{ChainType, Validator};

pub const OP_0: u8 = 0x00;
pub const OP_1: u8 = 0x51;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// Byzantine-fault-tolerant supermajority: `floor(2n/3) + 1`.
pub fn threshold(n: usize) -> Result<u32, CustodyError> {
    if n == 0 {
        return Err(CustodyError::InsufficientValidators);
    }
    Ok((n * 2 / 3 + 1) as u32)
}

#[cw_serde]
pub struct MultisigSigner {
    pub validator: Addr,
    /// Key as committed to in the script (compressed for Bitcoin)
    pub pub_key: Binary,
    /// The validator's own single-key address on the foreign chain
    pub custody_address: String,
}

#[cw_serde]
pub struct Multisig {
    pub chain: ChainType,
    pub threshold: u32,
    pub signers: Vec<MultisigSigner>,
    pub script: Binary,
    pub address: String,
    /// Payload the signers are asked to sign
    pub msg: Binary,
    /// Validators whose signature has been recorded
    pub signed: Vec<Addr>,
}

impl Multisig {
    pub fn build(
        validators: &[Validator],
        chain: ChainType,
        network: BitcoinNetwork,
        msg: Binary,
    ) -> Result<Self, CustodyError> {
        let threshold = threshold(validators.len())?;

        let mut signers = validators
            .iter()
            .map(|v| {
                let pub_key = match chain {
                    ChainType::Bitcoin => compressed_pubkey(v.pub_key.as_slice())?,
                    ChainType::Ethereum => eth_address_from_pubkey(v.pub_key.as_slice())?.to_vec(),
                };
                Ok(MultisigSigner {
                    validator: v.address.clone(),
                    pub_key: Binary::from(pub_key),
                    custody_address: v.custody_address(chain, network)?,
                })
            })
            .collect::<Result<Vec<_>, CustodyError>>()?;
        signers.sort_by(|a, b| a.pub_key.as_slice().cmp(b.pub_key.as_slice()));

        let (script, address) = match chain {
            ChainType::Bitcoin => {
                let script = bitcoin_script(threshold, &signers);
                let address = p2wsh_address(&script, network)?;
                (script, address)
            }
            ChainType::Ethereum => {
                let script = ethereum_script(threshold, &signers);
                let hash = keccak256(&script);
                let mut raw = [0u8; 20];
                raw.copy_from_slice(&hash[12..]);
                (script, encode_evm_address(&raw))
            }
        };

        Ok(Multisig {
            chain,
            threshold,
            signers,
            script: Binary::from(script),
            address,
            msg,
            signed: vec![],
        })
    }

    pub fn is_signer(&self, validator: &Addr) -> bool {
        self.signers.iter().any(|s| &s.validator == validator)
    }

    pub fn has_signed(&self, validator: &Addr) -> bool {
        self.signed.contains(validator)
    }

    pub fn signed_count(&self) -> u32 {
        self.signed.len() as u32
    }

    /// Threshold reached
    pub fn is_valid(&self) -> bool {
        self.signed_count() >= self.threshold
    }

    /// Record a signature. Returns `false` if the validator already signed.
    pub fn add_signature(&mut self, validator: &Addr) -> Result<bool, CustodyError> {
        if !self.is_signer(validator) {
            return Err(CustodyError::NotAValidator {
                address: validator.to_string(),
            });
        }
        if self.has_signed(validator) {
            return Ok(false);
        }
        self.signed.push(validator.clone());
        Ok(true)
    }
}

fn bitcoin_script(threshold: u32, signers: &[MultisigSigner]) -> Vec<u8> {
    let mut script = Vec::with_capacity(3 + signers.len() * 34);
    push_int(&mut script, threshold as i64);
    for s in signers {
        script.push(s.pub_key.len() as u8);
        script.extend_from_slice(s.pub_key.as_slice());
    }
    push_int(&mut script, signers.len() as i64);
    script.push(OP_CHECKMULTISIG);
    script
}

fn ethereum_script(threshold: u32, signers: &[MultisigSigner]) -> Vec<u8> {
    let mut script = vec![0u8; 32];
    script[28..].copy_from_slice(&threshold.to_be_bytes());
    for s in signers {
        script.extend_from_slice(s.pub_key.as_slice());
    }
    script
}

/// Minimal script number push.
fn push_int(script: &mut Vec<u8>, n: i64) {
    match n {
        0 => script.push(OP_0),
        1..=16 => script.push(OP_1 + (n as u8) - 1),
        _ => {
            let mut abs = n.unsigned_abs();
            let mut bytes = Vec::new();
            while abs > 0 {
                bytes.push((abs & 0xff) as u8);
                abs >>= 8;
            }
            if bytes.last().map_or(false, |b| b & 0x80 != 0) {
                bytes.push(if n < 0 { 0x80 } else { 0x00 });
            } else if n < 0 {
                if let Some(last) = bytes.last_mut() {
                    *last |= 0x80;
                }
            }
            script.push(bytes.len() as u8);
            script.extend(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn validators(n: u8) -> Vec<Validator> {
        (1..=n)
            .map(|i| {
                let mut secret = [0u8; 32];
                secret[31] = i;
                let key = SigningKey::from_slice(&secret).unwrap();
                Validator {
                    address: Addr::unchecked(format!("val{}", i)),
                    pub_key: Binary::from(
                        key.verifying_key().to_encoded_point(true).as_bytes().to_vec(),
                    ),
                    power: 1,
                }
            })
            .collect()
    }

    #[test]
    fn test_threshold_table() {
        let cases = [(1, 1), (3, 3), (4, 3), (7, 5), (100, 67)];
        for (n, expected) in cases {
            assert_eq!(threshold(n).unwrap(), expected, "n = {}", n);
        }
    }

    #[test]
    fn test_threshold_zero_validators() {
        assert_eq!(threshold(0), Err(CustodyError::InsufficientValidators));
        assert_eq!(
            Multisig::build(&[], ChainType::Bitcoin, BitcoinNetwork::Regtest, Binary::default())
                .unwrap_err(),
            CustodyError::InsufficientValidators
        );
    }

    #[test]
    fn test_bitcoin_script_layout() {
        let ms = Multisig::build(
            &validators(4),
            ChainType::Bitcoin,
            BitcoinNetwork::Regtest,
            Binary::from(b"tx".to_vec()),
        )
        .unwrap();
        let script = ms.script.as_slice();
        assert_eq!(ms.threshold, 3);
        assert_eq!(script[0], OP_1 + 2);
        assert_eq!(script[script.len() - 2], OP_1 + 3);
        assert_eq!(script[script.len() - 1], OP_CHECKMULTISIG);
        assert_eq!(script.len(), 1 + 4 * 34 + 1 + 1);
        assert!(ms.address.starts_with("bcrt1q"));
    }

    #[test]
    fn test_build_is_order_independent() {
        let vs = validators(5);
        let mut reversed = vs.clone();
        reversed.reverse();
        let a = Multisig::build(&vs, ChainType::Bitcoin, BitcoinNetwork::Testnet3, Binary::default())
            .unwrap();
        let b = Multisig::build(&reversed, ChainType::Bitcoin, BitcoinNetwork::Testnet3, Binary::default())
            .unwrap();
        assert_eq!(a.script, b.script);
        assert_eq!(a.address, b.address);

        let e = Multisig::build(&vs, ChainType::Ethereum, BitcoinNetwork::Testnet3, Binary::default())
            .unwrap();
        assert_eq!(e.script.len(), 32 + 5 * 20);
        assert!(e.address.starts_with("0x"));
    }

    #[test]
    fn test_add_signature() {
        let mut ms = Multisig::build(
            &validators(3),
            ChainType::Bitcoin,
            BitcoinNetwork::Regtest,
            Binary::default(),
        )
        .unwrap();
        let val1 = Addr::unchecked("val1");
        assert!(ms.add_signature(&val1).unwrap());
        assert!(!ms.add_signature(&val1).unwrap());
        assert_eq!(ms.signed_count(), 1);
        assert!(!ms.is_valid());
        assert!(matches!(
            ms.add_signature(&Addr::unchecked("mallory")),
            Err(CustodyError::NotAValidator { .. })
        ));
        ms.add_signature(&Addr::unchecked("val2")).unwrap();
        ms.add_signature(&Addr::unchecked("val3")).unwrap();
        assert!(ms.is_valid());
    }

    #[test]
    fn test_push_int_large() {
        let mut s = vec![];
        push_int(&mut s, 100);
        assert_eq!(s, vec![1, 100]);
        let mut s = vec![];
        push_int(&mut s, 200);
        assert_eq!(s, vec![2, 200, 0]);
    }
}
