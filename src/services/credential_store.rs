// src/services/credential_store.rs
//! Credential persistence.
//!
//! The lifecycle controller only talks to the [`CredentialStore`] trait, so a
//! database-backed store can replace the in-memory one without touching the
//! controller. Lifecycle changes are committed with a compare-and-set on the
//! state the controller staged against, so two racing transitions on the
//! same credential cannot both commit.

use crate::errors::DidError;
use crate::models::credential::{CredentialState, VerifiableCredential};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// A credential together with its lifecycle state.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub credential: VerifiableCredential,
    pub state: CredentialState,
}

/// Persistence collaborator keyed by credential id.
pub trait CredentialStore: Send + Sync {
    /// Stores a newly issued credential as `Active`.
    ///
    /// # Errors
    /// `Storage` if a credential with the same id already exists.
    fn store_credential(&self, credential: VerifiableCredential) -> Result<(), DidError>;

    fn get_credential(&self, id: &str) -> Result<Option<StoredCredential>, DidError>;

    /// Replaces the credential and moves it to `to`, provided it is still
    /// in state `from`.
    ///
    /// # Errors
    /// `NotFound` for an unknown id; `InvalidTransition` when the stored
    /// state is no longer `from`.
    fn commit_transition(
        &self,
        credential: VerifiableCredential,
        from: CredentialState,
        to: CredentialState,
    ) -> Result<(), DidError>;

    /// Whether the credential has been revoked.
    ///
    /// # Errors
    /// `NotFound` for an unknown id.
    fn is_revoked(&self, id: &str) -> Result<bool, DidError> {
        self.get_credential(id)?
            .map(|stored| stored.state == CredentialState::Revoked)
            .ok_or_else(|| DidError::NotFound(format!("credential {} is not stored", id)))
    }

    fn count_credentials(&self) -> Result<usize, DidError>;
}

/// In-memory [`CredentialStore`].
///
/// # Note
/// Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<String, StoredCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn store_credential(&self, credential: VerifiableCredential) -> Result<(), DidError> {
        let mut credentials = self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if credentials.contains_key(&credential.id) {
            return Err(DidError::Storage(format!(
                "credential {} already exists",
                credential.id
            )));
        }
        credentials.insert(
            credential.id.clone(),
            StoredCredential {
                credential,
                state: CredentialState::Active,
            },
        );
        Ok(())
    }

    fn get_credential(&self, id: &str) -> Result<Option<StoredCredential>, DidError> {
        Ok(self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn commit_transition(
        &self,
        credential: VerifiableCredential,
        from: CredentialState,
        to: CredentialState,
    ) -> Result<(), DidError> {
        let mut credentials = self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stored = credentials
            .get_mut(&credential.id)
            .ok_or_else(|| DidError::NotFound(format!("credential {} is not stored", credential.id)))?;
        if stored.state != from {
            return Err(DidError::InvalidTransition {
                from: stored.state.to_string(),
                to: to.to_string(),
            });
        }
        stored.credential = credential;
        stored.state = to;
        Ok(())
    }

    fn count_credentials(&self) -> Result<usize, DidError> {
        Ok(self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len())
    }
}
