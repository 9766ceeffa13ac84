// src/blockchain/mock.rs
//! In-memory registry used by tests.
//!
//! Behaves like the deployed contract for the parts the service relies on:
//! it rebuilds the canonical message from its own state, recovers the
//! signer and only accepts the write when the signer owns the account and
//! the message embeds the account's next nonce.
//!
//! Writes are mined on submission by default. With auto-mining off they
//! queue up like mempool transactions: submission is checked against the
//! pending state, while [`MockRegistry::mine`] applies them in order
//! against the mined state and reverts any whose nonce no longer matches.

use crate::blockchain::authorizer::TxAuthorization;
use crate::blockchain::registry::{ChainClient, Registry, VcSchemaChange};
use crate::contracts::messages;
use crate::errors::DidError;
use crate::utils::crypto::{hash_data, recover_signer, SignatureTriple};
use async_trait::async_trait;
use ethers_core::types::{Address, H256, U256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A submitted write that has not been mined.
struct Queued {
    from: Address,
    account: Address,
    nonce: U256,
    apply: Box<dyn FnOnce(&mut State) + Send>,
}

#[derive(Default)]
struct State {
    dids: HashMap<String, Address>,
    nonces: HashMap<Address, U256>,
    pending: HashMap<Address, U256>,
    vc_issuers: HashMap<String, String>,
    changed: HashMap<Address, U256>,
    events: Vec<VcSchemaChange>,
    block: u64,
    writes: usize,
    reads: usize,
    gas_price_error: Option<String>,
    next_write_error: Option<DidError>,
    latency: Option<Duration>,
    auto_mine: bool,
    queue: Vec<Queued>,
    reverted: usize,
}

impl State {
    fn registry_nonce(&self, account: Address) -> U256 {
        self.nonces.get(&account).copied().unwrap_or_default()
    }

    /// Nonce as seen by a call against the pending block.
    fn pending_registry_nonce(&self, account: Address) -> U256 {
        let queued = self.queue.iter().filter(|tx| tx.account == account).count();
        self.registry_nonce(account) + U256::from(queued)
    }

    /// Applies `tx` when its nonce is still the account's next one.
    fn mine_one(&mut self, tx: Queued) -> bool {
        if self.registry_nonce(tx.account) != tx.nonce {
            self.reverted += 1;
            return false;
        }
        self.nonces.insert(tx.account, tx.nonce + 1);
        self.block += 1;
        let block = self.block;
        self.changed.insert(tx.account, U256::from(block));
        (tx.apply)(self);
        true
    }
}

#[derive(Default)]
pub struct MockRegistry {
    state: Mutex<State>,
}

impl MockRegistry {
    pub const GAS_PRICE: u64 = 30_000_000_000;

    pub fn new() -> Self {
        let registry = Self::default();
        {
            let mut state = registry.state.lock().unwrap();
            state.block = 100;
            state.auto_mine = true;
        }
        registry
    }

    /// Binds `did` to `account` as if registered earlier.
    pub fn bind_did(&self, did: &str, account: Address) {
        self.state.lock().unwrap().dids.insert(did.to_string(), account);
    }

    pub fn set_nonce(&self, account: Address, nonce: U256) {
        self.state.lock().unwrap().nonces.insert(account, nonce);
    }

    pub fn set_pending_nonce(&self, account: Address, nonce: U256) {
        self.state.lock().unwrap().pending.insert(account, nonce);
    }

    pub fn fail_gas_price(&self, message: &str) {
        self.state.lock().unwrap().gas_price_error = Some(message.to_string());
    }

    pub fn fail_next_write(&self, error: DidError) {
        self.state.lock().unwrap().next_write_error = Some(error);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    pub fn set_auto_mine(&self, enabled: bool) {
        self.state.lock().unwrap().auto_mine = enabled;
    }

    /// Mines every queued write in submission order. Returns how many
    /// applied; the rest reverted.
    pub fn mine(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let queued = std::mem::take(&mut state.queue);
        let mut applied = 0;
        for tx in queued {
            if state.mine_one(tx) {
                applied += 1;
            }
        }
        applied
    }

    /// Discards queued writes as if they fell out of the mempool.
    pub fn drop_pending(&self) {
        let mut state = self.state.lock().unwrap();
        for tx in std::mem::take(&mut state.queue) {
            let pending = state.pending.get(&tx.from).copied().unwrap_or_default();
            state.pending.insert(tx.from, pending.saturating_sub(U256::one()));
        }
    }

    pub fn reverted(&self) -> usize {
        self.state.lock().unwrap().reverted
    }

    /// Mined registry nonce of `account`.
    pub fn nonce_of(&self, account: Address) -> U256 {
        self.state.lock().unwrap().registry_nonce(account)
    }

    pub fn issuer_of(&self, credential_key: &str) -> Option<String> {
        self.state.lock().unwrap().vc_issuers.get(credential_key).cloned()
    }

    pub fn did_account(&self, did: &str) -> Option<Address> {
        self.state.lock().unwrap().dids.get(did).copied()
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn events(&self) -> Vec<VcSchemaChange> {
        self.state.lock().unwrap().events.clone()
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Counts the attempt before any latency so abandoned calls show up.
    async fn read<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        self.state.lock().unwrap().reads += 1;
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Shared write path: charges the tx nonce, checks the registry
    /// signature against `account`'s pending nonce and queues `apply`,
    /// mining it right away unless auto-mining is off.
    async fn write(
        &self,
        auth: &TxAuthorization,
        account: Address,
        message: impl FnOnce(U256) -> Vec<u8>,
        signature: &SignatureTriple,
        apply: impl FnOnce(&mut State) + Send + 'static,
    ) -> Result<H256, DidError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        if let Some(error) = state.next_write_error.take() {
            return Err(error);
        }

        let pending = state.pending.get(&auth.from).copied().unwrap_or_default();
        if auth.nonce != pending {
            return Err(DidError::ReplayRejected(format!(
                "transaction nonce {} but account expects {}",
                auth.nonce, pending
            )));
        }

        let nonce = state.pending_registry_nonce(account);
        let signer = recover_signer(&message(nonce), signature)?;
        if signer != account {
            return Err(DidError::ReplayRejected(
                "signature does not match the current registry nonce".into(),
            ));
        }

        state.pending.insert(auth.from, pending + 1);
        let mut seed = auth.from.as_bytes().to_vec();
        seed.extend_from_slice(&auth.nonce.low_u64().to_be_bytes());

        let tx = Queued {
            from: auth.from,
            account,
            nonce,
            apply: Box::new(apply),
        };
        if state.auto_mine {
            state.mine_one(tx);
        } else {
            state.queue.push(tx);
        }
        Ok(H256::from(hash_data(&seed)))
    }
}

#[async_trait]
impl ChainClient for MockRegistry {
    async fn pending_nonce(&self, account: Address) -> Result<U256, DidError> {
        Ok(self.read(|s| s.pending.get(&account).copied().unwrap_or_default()).await)
    }

    async fn suggest_gas_price(&self) -> Result<U256, DidError> {
        let error = self.state.lock().unwrap().gas_price_error.clone();
        match error {
            Some(message) => Err(DidError::Network(message)),
            None => Ok(U256::from(Self::GAS_PRICE)),
        }
    }
}

#[async_trait]
impl Registry for MockRegistry {
    async fn dids(&self, did: &str) -> Result<Address, DidError> {
        Ok(self.read(|s| s.dids.get(did).copied().unwrap_or_default()).await)
    }

    /// Mined nonce, like a node whose pending view lags its mempool.
    async fn nonce(&self, account: Address) -> Result<U256, DidError> {
        Ok(self.read(|s| s.registry_nonce(account)).await)
    }

    async fn vc_issuers(&self, credential_key: &str) -> Result<String, DidError> {
        Ok(self
            .read(|s| s.vc_issuers.get(credential_key).cloned().unwrap_or_default())
            .await)
    }

    async fn changed(&self, account: Address) -> Result<U256, DidError> {
        Ok(self.read(|s| s.changed.get(&account).copied().unwrap_or_default()).await)
    }

    async fn create_vc_def(
        &self,
        auth: &TxAuthorization,
        credential_key: &str,
        did: &str,
        signature: &SignatureTriple,
    ) -> Result<H256, DidError> {
        let owner = self.did_account(did).unwrap_or_default();
        if owner.is_zero() {
            return Err(DidError::ContractRevert("did not registered".into()));
        }
        let (key, owner_did) = (credential_key.to_string(), did.to_string());
        self.write(
            auth,
            owner,
            |nonce| messages::create_vc_def(credential_key, did, nonce),
            signature,
            move |state| {
                state.vc_issuers.insert(key, owner_did);
            },
        )
        .await
    }

    async fn set_vc_attribute_signed(
        &self,
        auth: &TxAuthorization,
        credential_key: &str,
        signature: &SignatureTriple,
        field_name: [u8; 32],
        value: &[u8],
    ) -> Result<H256, DidError> {
        let owner = self
            .issuer_of(credential_key)
            .and_then(|did| self.did_account(&did))
            .unwrap_or_default();
        if owner.is_zero() {
            return Err(DidError::ContractRevert("unknown credential".into()));
        }
        let change = VcSchemaChange {
            vc_name: H256::from(hash_data(credential_key.as_bytes())),
            field_name,
            value: value.to_vec(),
            block_number: None,
        };
        self.write(
            auth,
            owner,
            |nonce| messages::set_vc_attribute(credential_key, nonce, &field_name, value),
            signature,
            move |state| {
                let block = state.block;
                state.events.push(VcSchemaChange {
                    block_number: Some(block),
                    ..change
                });
            },
        )
        .await
    }

    async fn register_did(
        &self,
        auth: &TxAuthorization,
        did: &str,
        account: Address,
        signature: &SignatureTriple,
    ) -> Result<H256, DidError> {
        let did_owned = did.to_string();
        self.write(
            auth,
            account,
            |nonce| messages::register_did(did, account, nonce),
            signature,
            move |state| {
                state.dids.insert(did_owned, account);
            },
        )
        .await
    }

    async fn filter_vc_schema_changed(
        &self,
        from_block: u64,
        to_block: u64,
        credential_keys: &[String],
    ) -> Result<Vec<VcSchemaChange>, DidError> {
        let topics: Vec<H256> = credential_keys
            .iter()
            .map(|key| H256::from(hash_data(key.as_bytes())))
            .collect();
        Ok(self
            .read(|s| {
                s.events
                    .iter()
                    .filter(|e| {
                        let block = e.block_number.unwrap_or_default();
                        block >= from_block && block <= to_block && topics.contains(&e.vc_name)
                    })
                    .cloned()
                    .collect()
            })
            .await)
    }
}
