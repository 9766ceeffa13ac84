// src/utils/crypto.rs
//! Cryptographic utilities optimized for registry contract compatibility.
//!
//! Uses Keccak-256 (Ethereum's standard hash function) for all hashing and
//! secp256k1 ECDSA with recoverable signatures. The registry contract rebuilds
//! the signed digest with Solidity's `ecrecover`, so the digest construction
//! and the `(r, s, v)` byte layout here are part of the wire contract.

use crate::errors::DidError;
use ethers_core::types::{Address, RecoveryMessage, Signature, H256, U256};
use ethers_core::utils::{hex, keccak256};
use k256::ecdsa::SigningKey;

/// Prefix applied before the 32-byte message hash (`personal_sign` scheme).
/// The trailing "32" is the ASCII length of the hash being wrapped.
pub const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Offset added to the raw {0,1} recovery id so the contract sees {27,28}.
pub const RECOVERY_ID_OFFSET: u8 = 27;

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
///
/// # Arguments
/// * `data` - Binary data to hash (as bytes slice)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// Double-hash digest that is actually signed:
/// `keccak256(PREFIX || keccak256(message))`.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let message_hash = hash_data(message);
    let mut combo = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + message_hash.len());
    combo.extend_from_slice(PERSONAL_MESSAGE_PREFIX);
    combo.extend_from_slice(&message_hash);
    hash_data(&combo)
}

/// Recoverable ECDSA signature split the way the registry contract takes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureTriple {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Always 27 or 28.
    pub v: u8,
}

impl SignatureTriple {
    /// Splits a raw 65-byte `r || s || recovery_id` signature, shifting the
    /// recovery id from {0,1} to {27,28}.
    pub fn from_raw(raw: &[u8; 65]) -> Result<Self, DidError> {
        let recovery_id = raw[64];
        if recovery_id > 1 {
            return Err(DidError::Signing(format!(
                "raw recovery id must be 0 or 1, got {}",
                recovery_id
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&raw[..32]);
        s.copy_from_slice(&raw[32..64]);
        Ok(Self {
            r,
            s,
            v: recovery_id + RECOVERY_ID_OFFSET,
        })
    }

    /// Builds a triple from caller-supplied components, accepting `v` in
    /// either convention.
    pub fn from_parts(r: [u8; 32], s: [u8; 32], v: u8) -> Result<Self, DidError> {
        let v = match v {
            0 | 1 => v + RECOVERY_ID_OFFSET,
            27 | 28 => v,
            other => {
                return Err(DidError::InvalidInput(format!(
                    "signature v must be 0, 1, 27 or 28, got {}",
                    other
                )))
            }
        };
        Ok(Self { r, s, v })
    }

    /// `r || s || v` with `v` in the {27,28} convention.
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parses the hex form produced by [`SignatureTriple::to_hex`].
    pub fn from_hex(value: &str) -> Result<Self, DidError> {
        let bytes = hex::decode(value.trim_start_matches("0x"))
            .map_err(|e| DidError::InvalidInput(format!("signature is not hex: {}", e)))?;
        if bytes.len() != 65 {
            return Err(DidError::InvalidInput(format!(
                "signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Self::from_parts(r, s, bytes[64])
    }
}

/// Signs `message` with the double-hash scheme and returns the `(r, s, v)`
/// triple expected by the registry contract.
///
/// # Errors
/// `DidError::Signing` if the curve operation fails. A zero signature is
/// never returned.
pub fn sign_message(message: &[u8], key: &SigningKey) -> Result<SignatureTriple, DidError> {
    let digest = personal_message_hash(message);
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| DidError::Signing(e.to_string()))?;

    let mut raw = [0u8; 65];
    raw[..64].copy_from_slice(&signature.to_bytes());
    raw[64] = recovery_id.to_byte();
    SignatureTriple::from_raw(&raw)
}

/// Recovers the account that produced `signature` over `message`, mirroring
/// the contract-side `ecrecover` check.
pub fn recover_signer(message: &[u8], signature: &SignatureTriple) -> Result<Address, DidError> {
    let digest = H256::from(personal_message_hash(message));
    let signature = Signature {
        r: U256::from_big_endian(&signature.r),
        s: U256::from_big_endian(&signature.s),
        v: signature.v as u64,
    };
    signature
        .recover(RecoveryMessage::Hash(digest))
        .map_err(|e| DidError::Signing(e.to_string()))
}
