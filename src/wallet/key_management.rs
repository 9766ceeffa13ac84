// src/wallet/key_management.rs
//! Cryptographic key management for registry signers.
//!
//! Holds the secp256k1 key of an on-chain account and exposes:
//! - Account address derivation
//! - Registry message signing (see [`crate::utils::crypto::sign_message`])
//! - A chain-bound transaction wallet for submitting writes

use crate::errors::DidError;
use crate::utils::crypto::{sign_message, SignatureTriple};
use ethers_core::types::Address;
use ethers_core::utils::{hex, secret_key_to_address};
use ethers::signers::{LocalWallet, Signer};
use k256::ecdsa::SigningKey;
use std::fmt;

/// Key material for one signing account.
///
/// # Security Notes
/// - The secret key is never exposed or printed
/// - `Debug` shows only the derived address
#[derive(Clone)]
pub struct KeyManager {
    signing_key: SigningKey,
    address: Address,
}

impl KeyManager {
    /// Generates a fresh random key.
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Loads a hex-encoded private key (with or without 0x prefix).
    ///
    /// # Errors
    /// `DidError::Signing` if the hex is malformed or the scalar is not a
    /// valid secp256k1 secret.
    pub fn from_hex(private_key: &str) -> Result<Self, DidError> {
        let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|e| DidError::Signing(format!("private key is not hex: {}", e)))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|_| DidError::Signing("invalid secp256k1 private key".into()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = secret_key_to_address(&signing_key);
        KeyManager {
            signing_key,
            address,
        }
    }

    /// Account address controlled by this key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a canonical registry message.
    pub fn sign_message(&self, message: &[u8]) -> Result<SignatureTriple, DidError> {
        sign_message(message, &self.signing_key)
    }

    /// Transaction signer bound to `chain_id` (EIP-155).
    pub fn wallet(&self, chain_id: u64) -> LocalWallet {
        LocalWallet::from(self.signing_key.clone()).with_chain_id(chain_id)
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
