//! Hash primitives shared by address derivation and transaction hashing
//!
//! # Derivations
//! - Ethereum address: last 20 bytes of `keccak256(uncompressed_pubkey[1..])`
//! - P2WSH witness program: `sha256(witness_script)`
//! - Transaction hash: hex `sha256` of the canonical JSON envelope

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

use crate::error::CustodyError;

/// Compute keccak256 hash of arbitrary data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Compute sha256 hash of arbitrary data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Parse a SEC1 public key (compressed or uncompressed).
pub fn parse_pubkey(bytes: &[u8]) -> Result<PublicKey, CustodyError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|e| CustodyError::Unserializable {
        reason: format!("invalid secp256k1 public key: {}", e),
    })
}

/// Compressed (33 byte) SEC1 encoding, used inside Bitcoin scripts.
pub fn compressed_pubkey(bytes: &[u8]) -> Result<Vec<u8>, CustodyError> {
    let key = parse_pubkey(bytes)?;
    Ok(key.to_encoded_point(true).as_bytes().to_vec())
}

/// Derive the 20-byte Ethereum account for a secp256k1 public key.
pub fn eth_address_from_pubkey(bytes: &[u8]) -> Result<[u8; 20], CustodyError> {
    let key = parse_pubkey(bytes)?;
    let uncompressed = key.to_encoded_point(false);
    let hash = keccak256(&uncompressed.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Ok(out)
}
