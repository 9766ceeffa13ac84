// src/models/presentation.rs
//! Verifiable Presentation data model.
//!
//! A holder wraps one or more credentials together with a [`Proof`] that
//! carries the single-use request nonce and the holder's signature.

use crate::errors::DidError;
use crate::models::credential::{Proof, ProofEncoder, VerifiableCredential};
use serde::{Deserialize, Serialize};

/// `type[0]` of every presentation.
pub const TYPE_VERIFIABLE_PRESENTATION: &str = "VerifiablePresentation";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifiablePresentation {
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    #[serde(rename = "type")]
    pub types: Vec<String>,

    /// DID of the presenting holder.
    pub holder: String,

    pub verifiable_credential: Vec<VerifiableCredential>,

    pub proof: Proof,
}

impl VerifiablePresentation {
    /// The request nonce carried in the proof, if any.
    pub fn nonce(&self) -> Option<&str> {
        self.proof.nonce.as_deref()
    }

    /// Normalizes every embedded credential subject by declared type.
    pub fn normalize_credentials(&mut self) -> Result<(), DidError> {
        for vc in &mut self.verifiable_credential {
            vc.normalize_subject()?;
        }
        Ok(())
    }

    /// The credential a lifecycle request acts on. Further credentials in
    /// the same presentation are ignored.
    pub fn first_credential(&self) -> Result<&VerifiableCredential, DidError> {
        self.verifiable_credential
            .first()
            .ok_or_else(|| DidError::InvalidInput("presentation carries no credential".into()))
    }

    /// Bytes covered by the holder's proof. Excludes `proof.jws`; an
    /// absent nonce encodes as an empty field.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let credentials = self.verifiable_credential.len() as u32;
        let encoder = ProofEncoder::new()
            .list(&self.context)
            .list(&self.types)
            .field(&self.holder)
            .field(credentials.to_be_bytes());
        self.verifiable_credential
            .iter()
            .fold(encoder, |encoder, vc| {
                encoder.field(vc.signing_bytes()).field(&vc.proof.jws)
            })
            .field(&self.proof.proof_type)
            .field(&self.proof.created)
            .field(&self.proof.verification_method)
            .field(&self.proof.proof_purpose)
            .field(self.proof.nonce.as_deref().unwrap_or_default())
            .finish()
    }
}
