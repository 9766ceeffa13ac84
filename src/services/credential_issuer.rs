// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Issues credentials on behalf of the foundation DID and drives their
//! lifecycle. Revocation and renewal share one gate:
//!
//! 1. consume the presentation's request nonce for the caller's origin
//! 2. normalize every embedded credential subject
//! 3. verify the presentation; anything but `Ok(true)` aborts
//! 4. require the presented credential to be exactly the one stored under
//!    its id, then stage the transition against the stored state
//! 5. mirror it on-chain with `updateVCAttribute`
//! 6. commit locally once the registry accepted the transaction
//!
//! Only the first credential of a presentation is acted upon.

use crate::contracts::did_registry::{PresignedRegistration, RegistryClient};
use crate::errors::DidError;
use crate::models::credential::{
    format_timestamp, CredentialState, CredentialSubject, CredentialTransition, Proof,
    SubjectPayload, VerifiableCredential, CONTEXT_CREDENTIAL, PROOF_TYPE_SECP256K1,
    TYPE_VERIFIABLE_CREDENTIAL,
};
use crate::models::did::qualified_did;
use crate::models::presentation::VerifiablePresentation;
use crate::services::credential_store::{CredentialStore, StoredCredential};
use crate::services::nonce_store::RequestNonceStore;
use crate::services::verifier::PresentationVerifier;
use crate::wallet::key_management::KeyManager;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use ethers_core::types::H256;
use ethers_core::utils::hex;
use log::{info, warn};
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;

/// Attribute written on-chain when a credential is revoked.
pub const STATUS_FIELD: &str = "status";

/// Value of [`STATUS_FIELD`] for revoked credentials.
pub const STATUS_REVOKED: &str = "revoked";

/// Attribute written on-chain when a credential is renewed.
pub const EXPIRATION_FIELD: &str = "expirationDate";

/// Result of issuing or transitioning a credential.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialReceipt {
    pub credential: VerifiableCredential,
    pub state: CredentialState,
    pub tx_hash: H256,
}

/// Service for issuing and managing credentials.
pub struct CredentialIssuer {
    /// Shared registry façade
    registry: RegistryClient,

    verifier: Arc<dyn PresentationVerifier>,

    nonces: RequestNonceStore,

    store: Arc<dyn CredentialStore>,

    /// Key bound on-chain to `issuer_did`; signs proofs and registry writes
    keys: KeyManager,

    issuer_did: String,

    /// Validity of issued and renewed credentials
    renewal_period: Duration,
}

impl CredentialIssuer {
    pub fn new(
        registry: RegistryClient,
        verifier: Arc<dyn PresentationVerifier>,
        nonces: RequestNonceStore,
        store: Arc<dyn CredentialStore>,
        keys: KeyManager,
        issuer_did: String,
        renewal_period: Duration,
    ) -> Self {
        Self {
            registry,
            verifier,
            nonces,
            store,
            keys,
            issuer_did,
            renewal_period,
        }
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn nonces(&self) -> &RequestNonceStore {
        &self.nonces
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    /// Relays a holder-signed DID registration, paying with the issuer key.
    pub async fn submit_registration(
        &self,
        registration: &PresignedRegistration,
    ) -> Result<H256, DidError> {
        self.registry.submit_registration(registration, &self.keys).await
    }

    /// Issues a credential of `credential_type` about `subject`.
    ///
    /// The subject is validated, the credential is signed with the issuer
    /// key, the issuer is recorded on-chain and only then is the credential
    /// stored.
    ///
    /// # Errors
    /// `InvalidInput` for unsupported types or incomplete subjects; any
    /// registry error from recording the issuer.
    pub async fn issue_credential(
        &self,
        credential_type: &str,
        subject: serde_json::Value,
        description: Option<String>,
    ) -> Result<CredentialReceipt, DidError> {
        let issued = Utc::now().trunc_subsecs(0);
        let mut credential = VerifiableCredential {
            context: vec![CONTEXT_CREDENTIAL.to_string()],
            id: random_credential_id(),
            types: vec![
                TYPE_VERIFIABLE_CREDENTIAL.to_string(),
                credential_type.to_string(),
            ],
            issuer: self.issuer_did.clone(),
            issuance_date: issued,
            expiration_date: issued + self.renewal_period,
            description: description.unwrap_or_default(),
            credential_subject: CredentialSubject::Raw(subject),
            proof: Proof::default(),
        };
        credential.normalize_subject()?;
        credential.credential_subject.validate()?;
        self.sign_credential(&mut credential, issued)?;

        let tx_hash = self
            .registry
            .register_vc_issuer(&credential.id, &self.issuer_did, &self.keys)
            .await?;
        self.store.store_credential(credential.clone())?;
        info!("issued {} credential {}", credential_type, credential.id);

        Ok(CredentialReceipt {
            credential,
            state: CredentialState::Active,
            tx_hash,
        })
    }

    /// Revokes the first credential of `presentation`.
    pub async fn revoke_credential(
        &self,
        origin: &str,
        presentation: VerifiablePresentation,
    ) -> Result<CredentialReceipt, DidError> {
        let presented = self.admit(origin, presentation).await?;
        self.transition(&presented, CredentialTransition::Revoke)
            .await
    }

    /// Extends the first credential of `presentation` by the renewal period
    /// and re-signs it.
    pub async fn renew_credential(
        &self,
        origin: &str,
        presentation: VerifiablePresentation,
    ) -> Result<CredentialReceipt, DidError> {
        let presented = self.admit(origin, presentation).await?;
        let stored = self.held(&presented)?;
        let now = Utc::now().trunc_subsecs(0);
        let base = stored.credential.expiration_date.max(now);
        self.transition(
            &presented,
            CredentialTransition::Renew {
                expiration_date: base + self.renewal_period,
            },
        )
        .await
    }

    /// Steps 1-3 of the lifecycle gate. Returns the credential to act on.
    async fn admit(
        &self,
        origin: &str,
        mut presentation: VerifiablePresentation,
    ) -> Result<VerifiableCredential, DidError> {
        self.nonces.consume(origin, presentation.nonce())?;
        presentation.normalize_credentials()?;

        let verified = match self.verifier.verify(&presentation).await {
            Ok(verified) => verified,
            Err(err) => {
                warn!("presentation from {} could not be verified: {}", origin, err);
                false
            }
        };
        if !verified {
            return Err(DidError::VerificationFailure);
        }
        Ok(presentation.first_credential()?.clone())
    }

    /// Stored record of `presented`. A verified presentation only proves
    /// that someone signed the credential it carries, so the carried
    /// credential must be the one this issuer stored under that id.
    fn held(&self, presented: &VerifiableCredential) -> Result<StoredCredential, DidError> {
        let stored = self
            .store
            .get_credential(&presented.id)?
            .ok_or_else(|| DidError::NotFound(format!("credential {} is not stored", presented.id)))?;
        if presented.issuer != self.issuer_did || *presented != stored.credential {
            warn!(
                "presented credential {} does not match the one issued under that id",
                presented.id
            );
            return Err(DidError::VerificationFailure);
        }
        Ok(stored)
    }

    /// Steps 4-6 of the lifecycle gate.
    async fn transition(
        &self,
        presented: &VerifiableCredential,
        transition: CredentialTransition,
    ) -> Result<CredentialReceipt, DidError> {
        let stored = self.held(presented)?;
        let next = stored.state.apply(&transition)?;

        let mut credential = stored.credential;
        let (field, value) = match &transition {
            CredentialTransition::Revoke => (STATUS_FIELD, STATUS_REVOKED.to_string()),
            CredentialTransition::Renew { expiration_date } => {
                credential.expiration_date = *expiration_date;
                self.sign_credential(&mut credential, Utc::now().trunc_subsecs(0))?;
                (EXPIRATION_FIELD, format_timestamp(expiration_date))
            }
        };

        let tx_hash = self
            .registry
            .update_vc_attribute(&credential.id, field, &value, &self.keys)
            .await?;
        self.store
            .commit_transition(credential.clone(), stored.state, next)?;
        info!("{} applied to {}: {:?}", transition, credential.id, tx_hash);

        Ok(CredentialReceipt {
            credential,
            state: next,
            tx_hash,
        })
    }

    fn sign_credential(
        &self,
        credential: &mut VerifiableCredential,
        created: DateTime<Utc>,
    ) -> Result<(), DidError> {
        credential.proof = Proof {
            proof_type: PROOF_TYPE_SECP256K1.to_string(),
            created: format_timestamp(&created),
            verification_method: format!("{}#verification", qualified_did(&self.issuer_did)),
            proof_purpose: "assertionMethod".to_string(),
            jws: String::new(),
            nonce: None,
        };
        credential.proof.jws = self.keys.sign_message(&credential.signing_bytes())?.to_hex();
        Ok(())
    }
}

fn random_credential_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
