// src/services/verifier.rs
//! Presentation verification against the DID registry.
//!
//! A presentation is accepted when the holder's proof recovers to the
//! account the registry binds to the holder DID, and every embedded
//! credential's proof recovers to the account bound to its issuer DID.

use crate::contracts::did_registry::RegistryClient;
use crate::errors::DidError;
use crate::models::presentation::VerifiablePresentation;
use crate::models::did::qualified_did;
use crate::utils::crypto::{recover_signer, SignatureTriple};
use async_trait::async_trait;
use ethers_core::types::Address;
use log::debug;
use std::str::FromStr;

/// Checks a presentation's signatures.
///
/// `Ok(false)` means the proofs did not verify. `Err` means verification
/// could not be completed (for example the registry was unreachable).
#[async_trait]
pub trait PresentationVerifier: Send + Sync {
    async fn verify(&self, presentation: &VerifiablePresentation) -> Result<bool, DidError>;
}

/// [`PresentationVerifier`] resolving signer accounts from the registry.
pub struct RegistryPresentationVerifier {
    client: RegistryClient,
}

impl RegistryPresentationVerifier {
    pub fn new(client: RegistryClient) -> Self {
        RegistryPresentationVerifier { client }
    }

    /// Account the registry binds to `did`, taken from its document's
    /// authentication method.
    async fn document_account(&self, did: &str) -> Result<Option<Address>, DidError> {
        let (document, _) = self.client.resolve_did_document(did).await?;
        Ok(document
            .authentication_method()
            .and_then(|method| method.account_address())
            .and_then(|account| Address::from_str(account).ok()))
    }

    async fn proof_matches(&self, did: &str, message: &[u8], jws: &str) -> Result<bool, DidError> {
        let signature = match SignatureTriple::from_hex(jws) {
            Ok(signature) => signature,
            Err(err) => {
                debug!("proof of {} is malformed: {}", did, err);
                return Ok(false);
            }
        };
        let signer = match recover_signer(message, &signature) {
            Ok(signer) => signer,
            Err(_) => return Ok(false),
        };
        let expected = self.document_account(did).await?;
        Ok(expected == Some(signer))
    }
}

#[async_trait]
impl PresentationVerifier for RegistryPresentationVerifier {
    async fn verify(&self, presentation: &VerifiablePresentation) -> Result<bool, DidError> {
        let holder = qualified_did(&presentation.holder);
        for credential in &presentation.verifiable_credential {
            let subject = credential.credential_subject.subject_id().map(qualified_did);
            if subject.as_deref() != Some(holder.as_str()) {
                debug!("{} is not the subject of {}", holder, credential.id);
                return Ok(false);
            }
        }

        if !self
            .proof_matches(
                &presentation.holder,
                &presentation.signing_bytes(),
                &presentation.proof.jws,
            )
            .await?
        {
            debug!("holder proof of {} did not verify", holder);
            return Ok(false);
        }

        for credential in &presentation.verifiable_credential {
            if !self
                .proof_matches(
                    &credential.issuer,
                    &credential.signing_bytes(),
                    &credential.proof.jws,
                )
                .await?
            {
                debug!("issuer proof of {} did not verify", credential.id);
                return Ok(false);
            }
        }
        Ok(true)
    }
}
