// src/blockchain/eth_registry.rs
//! JSON-RPC registry client.
//!
//! Provides the [`Registry`] and [`ChainClient`] implementations backed by an
//! ethers HTTP provider. Reads are plain `eth_call`s; the registry nonce and
//! write simulations run against the pending block so writes still in the
//! mempool are accounted for. Writes are simulated first (to surface revert
//! reasons), then signed locally
//! with the caller's [`TxAuthorization`] and sent raw. Submission returns as
//! soon as the node accepts the transaction; confirmation is not awaited.

use crate::blockchain::authorizer::TxAuthorization;
use crate::blockchain::registry::{ChainClient, Registry, VcSchemaChange};
use crate::errors::DidError;
use crate::utils::crypto::{hash_data, SignatureTriple};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::signers::Signer;
use ethers_contract::{BaseContract, Contract, ContractCall, ContractError, EthEvent};
use ethers_core::abi::{parse_abi, Detokenize};
use ethers_core::types::{Address, BlockNumber, Bytes, ValueOrArray, H256, U256};
use log::{debug, info};
use std::sync::Arc;

/// Human-readable ABI of the registry functions and event the service uses.
pub const REGISTRY_ABI: &[&str] = &[
    "function dids(string did) external view returns (address)",
    "function nonce(address account) external view returns (uint256)",
    "function vcIssuers(string credentialKey) external view returns (string)",
    "function changed(address account) external view returns (uint256)",
    "function createVcDef(string credentialKey, string did, uint8 v, bytes32 r, bytes32 s) external",
    "function setVcAttributeSigned(string credentialKey, uint8 v, bytes32 r, bytes32 s, bytes32 name, bytes value) external",
    "function registerDid(string did, address account, uint8 v, bytes32 r, bytes32 s) external",
    "event VCSchemaChanged(string indexed vcName, bytes32 name, bytes value)",
];

/// `VCSchemaChanged` log as decoded from the chain.
#[derive(Clone, Debug, EthEvent)]
#[ethevent(name = "VCSchemaChanged", abi = "VCSchemaChanged(string,bytes32,bytes)")]
pub struct VcSchemaChangedFilter {
    #[ethevent(indexed)]
    pub vc_name: H256,
    pub name: [u8; 32],
    pub value: Bytes,
}

/// Maps a contract-layer failure onto the error taxonomy.
fn contract_error<M: Middleware>(err: ContractError<M>) -> DidError {
    if let Some(reason) = err.decode_revert::<String>() {
        return DidError::ContractRevert(reason);
    }
    if err.is_revert() {
        return DidError::ContractRevert(err.to_string());
    }
    match err {
        ContractError::ProviderError { e } => provider_error(e),
        other => DidError::Network(other.to_string()),
    }
}

/// Maps a JSON-RPC failure onto the error taxonomy.
fn provider_error(err: ProviderError) -> DidError {
    if let Some(response) = err.as_error_response() {
        let message = response.message.to_lowercase();
        if message.contains("revert") {
            return DidError::ContractRevert(response.message.clone());
        }
        if message.contains("nonce") {
            return DidError::ReplayRejected(response.message.clone());
        }
    }
    DidError::Network(err.to_string())
}

/// Registry contract reached over JSON-RPC.
#[derive(Clone)]
pub struct EthRegistry {
    provider: Arc<Provider<Http>>,
    contract: Contract<Provider<Http>>,
}

impl EthRegistry {
    /// Connects to `rpc_url` and binds the registry at `registry_address`.
    ///
    /// # Errors
    /// `InvalidInput` when the URL or address cannot be parsed.
    pub fn new(rpc_url: &str, registry_address: &str) -> Result<Self, DidError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| DidError::InvalidInput(format!("invalid rpc url: {}", e)))?;
        let address: Address = registry_address
            .parse()
            .map_err(|e| DidError::InvalidInput(format!("invalid registry address: {}", e)))?;
        let abi = parse_abi(REGISTRY_ABI)
            .map_err(|e| DidError::InvalidInput(format!("invalid registry abi: {}", e)))?;

        let provider = Arc::new(provider);
        let contract = Contract::new(address, BaseContract::from(abi), provider.clone());
        Ok(Self { provider, contract })
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    async fn query<T, R>(&self, method: &str, args: T, block: BlockNumber) -> Result<R, DidError>
    where
        T: ethers_core::abi::Tokenize,
        R: Detokenize,
    {
        self.contract
            .method::<_, R>(method, args)
            .map_err(|e| DidError::InvalidInput(e.to_string()))?
            .block(block)
            .call()
            .await
            .map_err(contract_error)
    }

    /// Simulates, signs with `auth` and broadcasts a registry write.
    async fn send<T: ethers_core::abi::Tokenize>(
        &self,
        auth: &TxAuthorization,
        method: &str,
        args: T,
    ) -> Result<H256, DidError> {
        let call: ContractCall<Provider<Http>, ()> = self
            .contract
            .method::<_, ()>(method, args)
            .map_err(|e| DidError::InvalidInput(e.to_string()))?
            .legacy()
            .from(auth.from)
            .nonce(auth.nonce)
            .gas(auth.gas_limit)
            .gas_price(auth.gas_price)
            .value(auth.value);
        let mut tx = call.tx.clone();
        tx.set_chain_id(auth.chain_id);

        call.block(BlockNumber::Pending)
            .call()
            .await
            .map_err(contract_error)?;

        let signature = auth
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| DidError::Signing(e.to_string()))?;
        let pending = self
            .provider
            .send_raw_transaction(tx.rlp_signed(&signature))
            .await
            .map_err(provider_error)?;

        let tx_hash = pending.tx_hash();
        info!("{} submitted: transaction hash {:?}", method, tx_hash);
        Ok(tx_hash)
    }
}

#[async_trait]
impl ChainClient for EthRegistry {
    async fn pending_nonce(&self, account: Address) -> Result<U256, DidError> {
        self.provider
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(provider_error)
    }

    async fn suggest_gas_price(&self) -> Result<U256, DidError> {
        self.provider.get_gas_price().await.map_err(provider_error)
    }
}

#[async_trait]
impl Registry for EthRegistry {
    async fn dids(&self, did: &str) -> Result<Address, DidError> {
        self.query("dids", did.to_string(), BlockNumber::Latest).await
    }

    async fn nonce(&self, account: Address) -> Result<U256, DidError> {
        self.query("nonce", account, BlockNumber::Pending).await
    }

    async fn vc_issuers(&self, credential_key: &str) -> Result<String, DidError> {
        self.query("vcIssuers", credential_key.to_string(), BlockNumber::Latest)
            .await
    }

    async fn changed(&self, account: Address) -> Result<U256, DidError> {
        self.query("changed", account, BlockNumber::Latest).await
    }

    async fn create_vc_def(
        &self,
        auth: &TxAuthorization,
        credential_key: &str,
        did: &str,
        signature: &SignatureTriple,
    ) -> Result<H256, DidError> {
        self.send(
            auth,
            "createVcDef",
            (
                credential_key.to_string(),
                did.to_string(),
                signature.v,
                signature.r,
                signature.s,
            ),
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
        self.send(
            auth,
            "setVcAttributeSigned",
            (
                credential_key.to_string(),
                signature.v,
                signature.r,
                signature.s,
                field_name,
                Bytes::from(value.to_vec()),
            ),
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
        self.send(
            auth,
            "registerDid",
            (did.to_string(), account, signature.v, signature.r, signature.s),
        )
        .await
    }

    async fn filter_vc_schema_changed(
        &self,
        from_block: u64,
        to_block: u64,
        credential_keys: &[String],
    ) -> Result<Vec<VcSchemaChange>, DidError> {
        let topics: Vec<Option<H256>> = credential_keys
            .iter()
            .map(|key| Some(H256::from(hash_data(key.as_bytes()))))
            .collect();
        debug!(
            "filtering VCSchemaChanged in blocks {}..={} for {} key(s)",
            from_block,
            to_block,
            topics.len()
        );

        let logs = self
            .contract
            .event::<VcSchemaChangedFilter>()
            .from_block(from_block)
            .to_block(to_block)
            .topic1(ValueOrArray::Array(topics))
            .query_with_meta()
            .await
            .map_err(contract_error)?;

        Ok(logs
            .into_iter()
            .map(|(event, meta)| VcSchemaChange {
                vc_name: event.vc_name,
                field_name: event.name,
                value: event.value.to_vec(),
                block_number: Some(meta.block_number.as_u64()),
            })
            .collect())
    }
}
