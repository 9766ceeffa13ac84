// src/errors.rs
//! Error taxonomy shared by every layer of the anchoring service.
//!
//! Collaborator failures (JSON-RPC, contract reverts, storage) are converted
//! into [`DidError`] at the boundary where they occur and returned to the
//! immediate caller unchanged.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while signing, anchoring or transitioning credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DidError {
    /// Connection or JSON-RPC failure talking to the chain.
    #[error("network error: {0}")]
    Network(String),

    /// Key material was rejected or the curve operation failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// A presentation proof did not verify. Terminal for the request.
    #[error("presentation verification failed")]
    VerificationFailure,

    /// Request nonce missing/used, or an on-chain nonce mismatch.
    #[error("replay rejected: {0}")]
    ReplayRejected(String),

    /// The registry contract rejected the call.
    #[error("contract reverted: {0}")]
    ContractRevert(String),

    /// A registry call did not finish before its deadline.
    #[error("registry call exceeded deadline of {0:?}")]
    Timeout(Duration),

    /// Unknown DID, credential or issuer mapping.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request data (bad hex, oversized field name, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The credential lifecycle does not allow this transition.
    #[error("invalid credential transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Attempted transition.
        to: String,
    },

    /// The persistence collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl DidError {
    /// Whether retrying the same idempotent read may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DidError::Network(_) | DidError::Timeout(_))
    }
}
