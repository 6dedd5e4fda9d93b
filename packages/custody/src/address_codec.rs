//! Foreign-chain address encoding
//!
//! - Bitcoin: segwit v0 witness programs (P2WPKH/P2WSH) as bech32 with the
//!   network's human-readable part
//! - Ethereum: 0x-prefixed lowercase hex of the 20-byte account

use std::fmt;
use std::str::FromStr;

use bech32::{FromBase32, ToBase32, Variant};
use cosmwasm_schema::cw_serde;
use cosmwasm_std::Addr;

use crate::error::CustodyError;
use crate::hash::{compressed_pubkey, sha256};

/// Human-readable part of home ledger account addresses
pub const LEDGER_HRP: &str = "custody";

/// Bitcoin network the custody vault lives on.
#[cw_serde]
#[derive(Copy, Default, Eq, Hash)]
pub enum BitcoinNetwork {
    Mainnet,
    /// Legacy public test network, `test` to the finality oracle
    Testnet,
    #[default]
    Testnet3,
    Regtest,
    Simnet,
}

impl BitcoinNetwork {
    /// Bech32 human-readable part for segwit addresses
    pub fn hrp(&self) -> &'static str {
        match self {
            BitcoinNetwork::Mainnet => "bc",
            BitcoinNetwork::Testnet | BitcoinNetwork::Testnet3 => "tb",
            BitcoinNetwork::Regtest => "bcrt",
            BitcoinNetwork::Simnet => "sb",
        }
    }

    /// Chain name understood by the finality oracle. Local networks have no
    /// oracle chain of their own and are checked against `test3`.
    pub fn finality_chain(&self) -> &'static str {
        match self {
            BitcoinNetwork::Mainnet => "main",
            BitcoinNetwork::Testnet => "test",
            BitcoinNetwork::Testnet3 | BitcoinNetwork::Regtest | BitcoinNetwork::Simnet => "test3",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BitcoinNetwork::Mainnet => "mainnet",
            BitcoinNetwork::Testnet => "testnet",
            BitcoinNetwork::Testnet3 => "testnet3",
            BitcoinNetwork::Regtest => "regtest",
            BitcoinNetwork::Simnet => "simnet",
        }
    }
}

impl fmt::Display for BitcoinNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BitcoinNetwork {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(BitcoinNetwork::Mainnet),
            "testnet" | "test" => Ok(BitcoinNetwork::Testnet),
            "testnet3" | "test3" => Ok(BitcoinNetwork::Testnet3),
            "regtest" => Ok(BitcoinNetwork::Regtest),
            "simnet" => Ok(BitcoinNetwork::Simnet),
            other => Err(CustodyError::Unserializable {
                reason: format!("unknown bitcoin network: {}", other),
            }),
        }
    }
}

/// Encode a segwit v0 witness program as a bech32 address.
pub fn encode_segwit_v0(program: &[u8], network: BitcoinNetwork) -> Result<String, CustodyError> {
    if program.len() != 20 && program.len() != 32 {
        return Err(CustodyError::Unserializable {
            reason: format!("witness program must be 20 or 32 bytes, got {}", program.len()),
        });
    }
    let mut data = vec![bech32::u5::try_from_u8(0).map_err(bech32_err)?];
    data.extend(program.to_base32());
    bech32::encode(network.hrp(), data, Variant::Bech32).map_err(bech32_err)
}

/// Decode a segwit v0 address back to its witness program.
pub fn decode_segwit_v0(addr: &str, network: BitcoinNetwork) -> Result<Vec<u8>, CustodyError> {
    let (hrp, data, variant) = bech32::decode(addr).map_err(bech32_err)?;
    if hrp != network.hrp() {
        return Err(CustodyError::Unserializable {
            reason: format!("address {} is not for {}", addr, network),
        });
    }
    if variant != Variant::Bech32 || data.first().map(|v| v.to_u8()) != Some(0) {
        return Err(CustodyError::Unserializable {
            reason: format!("address {} is not segwit v0", addr),
        });
    }
    Vec::<u8>::from_base32(&data[1..]).map_err(bech32_err)
}

/// P2WSH address committing to a witness script.
pub fn p2wsh_address(script: &[u8], network: BitcoinNetwork) -> Result<String, CustodyError> {
    encode_segwit_v0(&sha256(script), network)
}

/// Home ledger account for a secp256k1 key: bech32 of the first 20 bytes of
/// `sha256(compressed_pubkey)`.
pub fn ledger_address(pub_key: &[u8]) -> Result<Addr, CustodyError> {
    let compressed = compressed_pubkey(pub_key)?;
    let hash = sha256(&compressed);
    let encoded =
        bech32::encode(LEDGER_HRP, (&hash[..20]).to_base32(), Variant::Bech32).map_err(bech32_err)?;
    Ok(Addr::unchecked(encoded))
}

/// Encode raw 20 bytes as an EVM hex address
pub fn encode_evm_address(bytes: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse an EVM hex address (with or without 0x prefix) to raw 20 bytes
pub fn parse_evm_address(addr: &str) -> Result<[u8; 20], CustodyError> {
    let hex_str = addr.strip_prefix("0x").unwrap_or(addr);
    let bytes = hex::decode(hex_str).map_err(|e| CustodyError::Unserializable {
        reason: format!("invalid hex address {}: {}", addr, e),
    })?;
    if bytes.len() != 20 {
        return Err(CustodyError::Unserializable {
            reason: format!("address must be 20 bytes, got {}", bytes.len()),
        });
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn bech32_err(e: bech32::Error) -> CustodyError {
    CustodyError::Unserializable {
        reason: format!("bech32: {}", e),
    }
}
