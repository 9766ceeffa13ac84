// src/contracts/messages.rs
//! Canonical messages signed for registry write operations.
//!
//! The registry contract rebuilds these exact bytes before `ecrecover`, so
//! each operation's field order and encoding is frozen:
//!
//! | Operation | Bytes (concatenated, no delimiters) |
//! |---|---|
//! | `createVc` | `credentialKey ‖ did ‖ nonce ‖ "createVc"` |
//! | `setVcAttribute` | `credentialKey ‖ nonce ‖ "setVcAttribute" ‖ fieldName[32] ‖ value` |
//! | `register` | `did ‖ account[20] ‖ nonce ‖ "register"` |
//!
//! Strings are their UTF-8 bytes, `nonce` is the base-10 ASCII rendering of
//! the on-chain counter, `account` is the raw 20-byte address and
//! `fieldName` is right-padded with zeros to 32 bytes.

use crate::errors::DidError;
use ethers_core::types::{Address, U256};

/// A single field of a canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageField<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
    /// Rendered as base-10 ASCII digits.
    Number(U256),
}

/// Registry operations that carry a signed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateVc,
    SetVcAttribute,
    RegisterDid,
}

impl Operation {
    /// Operation tag embedded in the message.
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::CreateVc => "createVc",
            Operation::SetVcAttribute => "setVcAttribute",
            Operation::RegisterDid => "register",
        }
    }
}

/// Concatenates `fields` in order without separators.
pub fn canonicalize(fields: &[MessageField<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        match field {
            MessageField::Text(text) => out.extend_from_slice(text.as_bytes()),
            MessageField::Bytes(bytes) => out.extend_from_slice(bytes),
            MessageField::Number(number) => out.extend_from_slice(number.to_string().as_bytes()),
        }
    }
    out
}

/// Left-aligns `name` into the fixed 32-byte attribute slot.
pub fn field_name_bytes(name: &str) -> Result<[u8; 32], DidError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 32 {
        return Err(DidError::InvalidInput(format!(
            "attribute name must be 1..=32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Reverses [`field_name_bytes`], dropping the zero padding.
pub fn field_name_from_bytes(bytes: &[u8; 32]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Message authorizing `did` as issuer of `credential_key`.
pub fn create_vc_def(credential_key: &str, did: &str, nonce: U256) -> Vec<u8> {
    canonicalize(&[
        MessageField::Text(credential_key),
        MessageField::Text(did),
        MessageField::Number(nonce),
        MessageField::Text(Operation::CreateVc.tag()),
    ])
}

/// Message authorizing `field_name = value` on `credential_key`.
pub fn set_vc_attribute(credential_key: &str, nonce: U256, field_name: &[u8; 32], value: &[u8]) -> Vec<u8> {
    canonicalize(&[
        MessageField::Text(credential_key),
        MessageField::Number(nonce),
        MessageField::Text(Operation::SetVcAttribute.tag()),
        MessageField::Bytes(field_name),
        MessageField::Bytes(value),
    ])
}

/// Message binding `did` to `account`.
pub fn register_did(did: &str, account: Address, nonce: U256) -> Vec<u8> {
    canonicalize(&[
        MessageField::Text(did),
        MessageField::Bytes(account.as_bytes()),
        MessageField::Number(nonce),
        MessageField::Text(Operation::RegisterDid.tag()),
    ])
}
