// src/models/did.rs
//! Decentralized Identifier (DID) data model implementation.
//!
//! Defines the DID Document shape synthesized from the registry's
//! DID-to-account binding, following the
//! [DID Core Specification](https://www.w3.org/TR/did-core/).

use serde::{Deserialize, Serialize};

/// DID method served by this registry.
pub const DID_METHOD_PREFIX: &str = "did:metablox:";

/// JSON-LD context for secp256k1 recovery verification methods.
pub const CONTEXT_SECP256K1: &str = "https://identity.foundation/EcdsaSecp256k1RecoverySignature2020/lds-ecdsa-secp256k1-recovery2020-0.0.jsonld";

/// Base DID JSON-LD context.
pub const CONTEXT_DID: &str = "https://www.w3.org/ns/did/v1";

/// Verification method type anchored by an on-chain account.
pub const SECP256K1_RECOVERY_METHOD: &str = "EcdsaSecp256k1RecoveryMethod2020";

/// Returns the fully qualified DID for a registry key, accepting either form.
pub fn qualified_did(did: &str) -> String {
    if did.starts_with(DID_METHOD_PREFIX) {
        did.to_string()
    } else {
        format!("{}{}", DID_METHOD_PREFIX, did)
    }
}

/// A verification method bound to a CAIP-10 blockchain account.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    /// `eip155:<chain id>:<checksummed address>`
    pub blockchain_account_id: String,
}

impl VerificationMethod {
    /// Extracts the account address from `blockchain_account_id`.
    pub fn account_address(&self) -> Option<&str> {
        self.blockchain_account_id.rsplit(':').next()
    }
}

/// A DID Document representing a decentralized identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DIDDocument {
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// The complete DID string identifier
    /// Example: "did:metablox:abc"
    pub id: String,

    /// RFC 3339 timestamp.
    pub created: String,

    /// RFC 3339 timestamp.
    pub updated: String,

    pub version: u32,

    pub verification_method: Vec<VerificationMethod>,

    /// Id of the verification method used for authentication.
    pub authentication: String,
}

impl DIDDocument {
    /// The verification method referenced by `authentication`.
    pub fn authentication_method(&self) -> Option<&VerificationMethod> {
        self.verification_method
            .iter()
            .find(|vm| vm.id == self.authentication)
    }
}
