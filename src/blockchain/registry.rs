// src/blockchain/registry.rs
//! Remote collaborator interfaces for the on-chain registry.
//!
//! [`ChainClient`] covers the generic network queries needed to submit a
//! transaction, [`Registry`] the registry contract's own read/write surface.
//! Both are object safe so a single long-lived handle can be shared as
//! [`RegistryService`].

use crate::blockchain::authorizer::TxAuthorization;
use crate::errors::DidError;
use crate::utils::crypto::SignatureTriple;
use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256};
use std::sync::Arc;

/// Shared registry handle, built once at startup.
pub type RegistryService = Arc<dyn Registry>;

/// One `VCSchemaChanged` log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcSchemaChange {
    /// Keccak-256 of the credential key (indexed string topic).
    pub vc_name: H256,
    pub field_name: [u8; 32],
    pub value: Vec<u8>,
    pub block_number: Option<u64>,
}

/// Network queries used by the transaction authorizer.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Next transaction nonce for `account`, counting pending transactions.
    async fn pending_nonce(&self, account: Address) -> Result<U256, DidError>;

    /// Gas price currently suggested by the node.
    async fn suggest_gas_price(&self) -> Result<U256, DidError>;
}

/// The registry contract surface.
#[async_trait]
pub trait Registry: ChainClient {
    /// `Dids(did) -> address`; zero address when unbound.
    async fn dids(&self, did: &str) -> Result<Address, DidError>;

    /// `Nonce(address) -> uint256`, the replay counter.
    async fn nonce(&self, account: Address) -> Result<U256, DidError>;

    /// `VcIssuers(credentialKey) -> did`; empty when unknown.
    async fn vc_issuers(&self, credential_key: &str) -> Result<String, DidError>;

    /// `Changed(address) -> blockNumber` of the account's last change.
    async fn changed(&self, account: Address) -> Result<U256, DidError>;

    async fn create_vc_def(
        &self,
        auth: &TxAuthorization,
        credential_key: &str,
        did: &str,
        signature: &SignatureTriple,
    ) -> Result<H256, DidError>;

    async fn set_vc_attribute_signed(
        &self,
        auth: &TxAuthorization,
        credential_key: &str,
        signature: &SignatureTriple,
        field_name: [u8; 32],
        value: &[u8],
    ) -> Result<H256, DidError>;

    async fn register_did(
        &self,
        auth: &TxAuthorization,
        did: &str,
        account: Address,
        signature: &SignatureTriple,
    ) -> Result<H256, DidError>;

    /// `VCSchemaChanged` logs in `[from_block, to_block]` for any of
    /// `credential_keys`.
    async fn filter_vc_schema_changed(
        &self,
        from_block: u64,
        to_block: u64,
        credential_keys: &[String],
    ) -> Result<Vec<VcSchemaChange>, DidError>;
}
