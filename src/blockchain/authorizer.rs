// src/blockchain/authorizer.rs
//! Transaction authorization for registry writes.
//!
//! Every write is submitted with a freshly built [`TxAuthorization`]: the
//! signer's pending nonce, the node's suggested gas price and the
//! deployment-fixed chain id and gas limit. Identity operations never move
//! value.

use crate::blockchain::registry::ChainClient;
use crate::errors::DidError;
use crate::wallet::key_management::KeyManager;
use ethers::signers::LocalWallet;
use ethers_core::types::{Address, U256};
use log::debug;

/// Chain the registry is deployed on.
pub const CHAIN_ID: u64 = 1666700000;

/// Gas ceiling for every registry write.
pub const GAS_LIMIT: u64 = 300000;

/// Single-use context for one registry write. Not persisted.
#[derive(Debug, Clone)]
pub struct TxAuthorization {
    pub wallet: LocalWallet,
    pub from: Address,
    pub nonce: U256,
    pub chain_id: u64,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub value: U256,
}

/// Builds the authorization for a write signed by `keys`.
///
/// # Errors
/// The first failing network query is returned as is; no partial
/// authorization is produced.
pub async fn authorize<C>(chain: &C, keys: &KeyManager) -> Result<TxAuthorization, DidError>
where
    C: ChainClient + ?Sized,
{
    let from = keys.address();
    let nonce = chain.pending_nonce(from).await?;
    let gas_price = chain.suggest_gas_price().await?;
    debug!(
        "authorized {:?}: nonce={} gas_price={} gas_limit={}",
        from, nonce, gas_price, GAS_LIMIT
    );

    Ok(TxAuthorization {
        wallet: keys.wallet(CHAIN_ID),
        from,
        nonce,
        chain_id: CHAIN_ID,
        gas_price,
        gas_limit: U256::from(GAS_LIMIT),
        value: U256::zero(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::MockRegistry;
    use ethers::signers::Signer;

    #[tokio::test]
    async fn fills_network_values_and_protocol_constants() {
        let registry = MockRegistry::new();
        let keys = KeyManager::random();
        registry.set_pending_nonce(keys.address(), U256::from(4));

        let auth = authorize(&registry, &keys).await.unwrap();
        assert_eq!(auth.from, keys.address());
        assert_eq!(auth.nonce, U256::from(4));
        assert_eq!(auth.gas_price, U256::from(MockRegistry::GAS_PRICE));
        assert_eq!(auth.chain_id, 1666700000);
        assert_eq!(auth.gas_limit, U256::from(300000u64));
        assert!(auth.value.is_zero());
        assert_eq!(auth.wallet.chain_id(), CHAIN_ID);
    }

    #[tokio::test]
    async fn gas_price_failure_aborts_authorization() {
        let registry = MockRegistry::new();
        registry.fail_gas_price("node unavailable");

        let err = authorize(&registry, &KeyManager::random()).await.unwrap_err();
        assert_eq!(err, DidError::Network("node unavailable".into()));
    }
}
