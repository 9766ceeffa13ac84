// src/contracts/did_registry.rs
//! DID Registry client.
//!
//! Composes canonical messages, signing, nonce resolution and transaction
//! authorization into complete registry operations. Every write follows
//! the same skeleton:
//!
//! 1. resolve the authorizing account (DID -> address)
//! 2. take the signing account's write lock
//! 3. resolve the account's next registry nonce
//! 4. canonicalize and sign the operation message
//! 5. build a fresh [`TxAuthorization`]
//! 6. submit and return the transaction hash without waiting for a block
//!
//! Every network call, and the wait for a write lock, is bounded by the
//! client's deadline. Reads are retried with exponential backoff on
//! transient failures; writes are not.

use crate::blockchain::account_locks::{AccountGuard, AccountLocks};
use crate::blockchain::authorizer::{authorize, TxAuthorization};
use crate::blockchain::registry::RegistryService;
use crate::contracts::messages::{self, field_name_bytes, field_name_from_bytes};
use crate::errors::DidError;
use crate::models::credential::format_timestamp;
use crate::models::did::{
    qualified_did, DIDDocument, VerificationMethod, CONTEXT_DID, CONTEXT_SECP256K1,
    SECP256K1_RECOVERY_METHOD,
};
use crate::utils::crypto::SignatureTriple;
use crate::wallet::key_management::KeyManager;
use chrono::Utc;
use ethers_core::types::{Address, H256, U256};
use ethers_core::utils::to_checksum;
use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;

/// Blocks scanned backwards from an account's last-changed marker.
pub const CHANGED_EVENT_WINDOW: u64 = 50;

/// Chain id used in `blockchainAccountId` of synthesized documents.
pub const DOCUMENT_ACCOUNT_CHAIN_ID: u64 = 1666600000;

/// Content hash returned with every resolved document. The registry does
/// not store document hashes yet.
pub const PLACEHOLDER_DOCUMENT_HASH: [u8; 32] = [
    94, 241, 27, 134, 190, 223, 112, 91, 189, 49, 221, 31, 228, 35, 189, 213, 251, 60, 60, 210,
    162, 45, 151, 3, 31, 78, 41, 239, 41, 75, 198, 139,
];

/// First backoff between read retries; doubles per attempt.
pub const READ_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// A DID registration the holder signed themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedRegistration {
    pub did: String,
    pub account: Address,
    pub signature: SignatureTriple,
}

/// Decoded `VCSchemaChanged` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcAttributeChange {
    pub vc_name: H256,
    pub field_name: String,
    pub value: Vec<u8>,
    pub block_number: Option<u64>,
}

/// A signed write waiting for submission, holding its account's lock.
struct PreparedWrite {
    guard: AccountGuard,
    nonce: U256,
    signature: SignatureTriple,
    auth: TxAuthorization,
}

impl PreparedWrite {
    /// Remembers the embedded nonce when the node accepted the write. A
    /// failed submission makes the next write start again from the chain's
    /// nonce, which also recovers from a tracked write that was dropped.
    fn settle(&mut self, result: Result<H256, DidError>) -> Result<H256, DidError> {
        match result {
            Ok(tx_hash) => {
                self.guard.record(self.nonce);
                Ok(tx_hash)
            }
            Err(err) => {
                warn!("write with registry nonce {} failed: {}", self.nonce, err);
                self.guard.reset();
                Err(err)
            }
        }
    }
}

/// Registry façade shared by every service. Cheap to clone.
#[derive(Clone)]
pub struct RegistryClient {
    registry: RegistryService,
    locks: AccountLocks,
    deadline: Duration,
    read_retries: u32,
}

impl RegistryClient {
    pub fn new(registry: RegistryService, deadline: Duration, read_retries: u32) -> Self {
        RegistryClient {
            registry,
            locks: AccountLocks::new(),
            deadline,
            read_retries,
        }
    }

    /// Same client with a different per-call deadline. Write locks are
    /// shared with the original.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        RegistryClient {
            deadline,
            ..self.clone()
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, DidError>>) -> Result<T, DidError> {
        tokio::time::timeout(self.deadline, call)
            .await
            .map_err(|_| DidError::Timeout(self.deadline))?
    }

    async fn read<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, DidError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DidError>>,
    {
        let mut attempt = 0;
        loop {
            match self.bounded(call()).await {
                Err(err) if err.is_transient() && attempt < self.read_retries => {
                    let backoff = READ_RETRY_BACKOFF * 2u32.pow(attempt);
                    warn!("{} failed ({}), retrying in {:?}", what, err, backoff);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Account bound to `did`.
    ///
    /// # Errors
    /// `NotFound` when the DID is not registered.
    pub async fn resolve_account(&self, did: &str) -> Result<Address, DidError> {
        let account = self.read("Dids", || self.registry.dids(did)).await?;
        if account.is_zero() {
            return Err(DidError::NotFound(format!("did {} is not registered", did)));
        }
        Ok(account)
    }

    /// Current replay counter of `account`. Call immediately before
    /// building the message that embeds it.
    pub async fn resolve_nonce(&self, account: Address) -> Result<U256, DidError> {
        let nonce = self.read("Nonce", || self.registry.nonce(account)).await?;
        debug!("registry nonce of {:?} is {}", account, nonce);
        Ok(nonce)
    }

    /// Waits for the write lock of `account`. The wait counts against the
    /// deadline like any other call.
    async fn lock(&self, account: Address) -> Result<AccountGuard, DidError> {
        self.bounded(async { Ok::<_, DidError>(self.locks.acquire(account).await) })
            .await
    }

    /// Steps 2-5 of the write skeleton. The returned write holds the lock
    /// until it is settled and dropped.
    ///
    /// The embedded nonce is the larger of the chain's view and one past
    /// the last nonce this client submitted for the account, so writes sent
    /// back to back do not reuse a nonce that is still pending.
    async fn prepare(
        &self,
        keys: &KeyManager,
        account: Address,
        message: impl FnOnce(U256) -> Vec<u8>,
    ) -> Result<PreparedWrite, DidError> {
        if account != keys.address() {
            return Err(DidError::Signing(format!(
                "{:?} cannot sign for {:?}",
                keys.address(),
                account
            )));
        }
        let guard = self.lock(account).await?;
        let nonce = guard.next_nonce(self.resolve_nonce(account).await?);
        let signature = keys.sign_message(&message(nonce))?;
        let auth = self.bounded(authorize(&*self.registry, keys)).await?;
        Ok(PreparedWrite {
            guard,
            nonce,
            signature,
            auth,
        })
    }

    /// Binds `did` to the account of `keys`.
    pub async fn register_did(&self, did: &str, keys: &KeyManager) -> Result<H256, DidError> {
        let account = keys.address();
        let mut write = self
            .prepare(keys, account, |nonce| messages::register_did(did, account, nonce))
            .await?;
        let result = self
            .bounded(self.registry.register_did(&write.auth, did, account, &write.signature))
            .await;
        let tx_hash = write.settle(result)?;
        info!("registered {} to {:?}: {:?}", did, account, tx_hash);
        Ok(tx_hash)
    }

    /// Submits a registration signed by the holder, paying for it with
    /// `keys`. The holder's signature must embed their current nonce.
    pub async fn submit_registration(
        &self,
        registration: &PresignedRegistration,
        keys: &KeyManager,
    ) -> Result<H256, DidError> {
        let _guard = self.lock(keys.address()).await?;
        let auth = self.bounded(authorize(&*self.registry, keys)).await?;
        let tx_hash = self
            .bounded(self.registry.register_did(
                &auth,
                &registration.did,
                registration.account,
                &registration.signature,
            ))
            .await?;
        info!(
            "submitted registration of {} to {:?}: {:?}",
            registration.did, registration.account, tx_hash
        );
        Ok(tx_hash)
    }

    /// Records `did` as issuer of `credential_key`.
    pub async fn register_vc_issuer(
        &self,
        credential_key: &str,
        did: &str,
        keys: &KeyManager,
    ) -> Result<H256, DidError> {
        let did_account = self.resolve_account(did).await?;
        let mut write = self
            .prepare(keys, did_account, |nonce| {
                messages::create_vc_def(credential_key, did, nonce)
            })
            .await?;
        let result = self
            .bounded(self.registry.create_vc_def(&write.auth, credential_key, did, &write.signature))
            .await;
        let tx_hash = write.settle(result)?;
        info!("registered issuer {} for {}: {:?}", did, credential_key, tx_hash);
        Ok(tx_hash)
    }

    /// Sets `field_name = value` on `credential_key`, signed by the
    /// credential's issuer.
    ///
    /// # Errors
    /// `InvalidInput` when `field_name` does not fit 32 bytes; `NotFound`
    /// when the credential or its issuer DID is unknown; `Signing` when
    /// `keys` do not control the issuer's account.
    pub async fn update_vc_attribute(
        &self,
        credential_key: &str,
        field_name: &str,
        value: &str,
        keys: &KeyManager,
    ) -> Result<H256, DidError> {
        let field = field_name_bytes(field_name)?;
        let owner_did = self.resolve_issuer(credential_key).await?;
        let owner = self.resolve_account(&owner_did).await?;
        let mut write = self
            .prepare(keys, owner, |nonce| {
                messages::set_vc_attribute(credential_key, nonce, &field, value.as_bytes())
            })
            .await?;
        let result = self
            .bounded(self.registry.set_vc_attribute_signed(
                &write.auth,
                credential_key,
                &write.signature,
                field,
                value.as_bytes(),
            ))
            .await;
        let tx_hash = write.settle(result)?;
        info!("set {}.{}: {:?}", credential_key, field_name, tx_hash);
        Ok(tx_hash)
    }

    async fn resolve_issuer(&self, credential_key: &str) -> Result<String, DidError> {
        let owner_did = self
            .read("VcIssuers", || self.registry.vc_issuers(credential_key))
            .await?;
        if owner_did.is_empty() {
            return Err(DidError::NotFound(format!(
                "credential {} has no registered issuer",
                credential_key
            )));
        }
        Ok(owner_did)
    }

    /// Builds the DID Document for `did` from its on-chain account.
    ///
    /// Only the account binding is read from chain. `created`/`updated` are
    /// the resolution time, `version` is 1 and the returned content hash is
    /// [`PLACEHOLDER_DOCUMENT_HASH`].
    pub async fn resolve_did_document(&self, did: &str) -> Result<(DIDDocument, [u8; 32]), DidError> {
        let account = self.resolve_account(did).await?;
        let id = qualified_did(did);
        let now = format_timestamp(&Utc::now());

        let method = VerificationMethod {
            id: format!("{}#verification", id),
            method_type: SECP256K1_RECOVERY_METHOD.to_string(),
            controller: id.clone(),
            blockchain_account_id: format!(
                "eip155:{}:{}",
                DOCUMENT_ACCOUNT_CHAIN_ID,
                to_checksum(&account, None)
            ),
        };
        let document = DIDDocument {
            context: vec![CONTEXT_SECP256K1.to_string(), CONTEXT_DID.to_string()],
            id,
            created: now.clone(),
            updated: now,
            version: 1,
            authentication: method.id.clone(),
            verification_method: vec![method],
        };
        Ok((document, PLACEHOLDER_DOCUMENT_HASH))
    }

    /// Attribute changes of `credential_key` in the
    /// [`CHANGED_EVENT_WINDOW`] blocks up to the issuer's last change.
    pub async fn query_vc_changed_events(
        &self,
        credential_key: &str,
    ) -> Result<Vec<VcAttributeChange>, DidError> {
        let owner_did = self.resolve_issuer(credential_key).await?;
        let owner = self.resolve_account(&owner_did).await?;
        let target = self.read("Changed", || self.registry.changed(owner)).await?;
        if target.is_zero() {
            return Ok(Vec::new());
        }
        if target > U256::from(u64::MAX) {
            return Err(DidError::InvalidInput(format!(
                "changed marker {} is not a block number",
                target
            )));
        }

        let to_block = target.as_u64();
        let from_block = to_block.saturating_sub(CHANGED_EVENT_WINDOW);
        let keys = [credential_key.to_string()];
        let changes = self
            .read("FilterVCSchemaChanged", || {
                self.registry.filter_vc_schema_changed(from_block, to_block, &keys)
            })
            .await?;

        Ok(changes
            .into_iter()
            .map(|change| VcAttributeChange {
                vc_name: change.vc_name,
                field_name: field_name_from_bytes(&change.field_name),
                value: change.value,
                block_number: change.block_number,
            })
            .collect())
    }
}
