// src/main.rs

//! # DID Anchoring Service - Main Entry Point
//!
//! Anchors DIDs and Verifiable Credential lifecycle events in the on-chain
//! DID registry and serves the HTTP API.
//!
//! ## Architecture Overview
//! 1. **Blockchain Layer**: `EthRegistry` JSON-RPC client, transaction
//!    authorization and per-account write locks
//! 2. **Contracts Layer**: canonical registry messages and the `RegistryClient`
//! 3. **Services Layer**: credential lifecycle, verification and the API
//! 4. **Cryptography Layer**: key management and registry message signing
//!
//! ## Environment Variables
//! - `DID_ISSUER_PRIVATE_KEY`: key of the foundation issuer account (required)
//! - `DID_ISSUER_DID`: DID bound to that account (required)
//! - `DID_RPC_URL`, `DID_REGISTRY_ADDRESS`, `DID_LISTEN_ADDR`: optional overrides
//! - `RUST_LOG`: log filter (default `info`)

use crate::blockchain::eth_registry::EthRegistry;
use crate::config::Settings;
use crate::contracts::did_registry::RegistryClient;
use crate::services::api_server::ApiServer;
use crate::services::credential_issuer::CredentialIssuer;
use crate::services::credential_store::InMemoryCredentialStore;
use crate::services::nonce_store::RequestNonceStore;
use crate::services::verifier::RegistryPresentationVerifier;
use crate::wallet::key_management::KeyManager;
use anyhow::Context;
use dotenv::dotenv;
use log::info;
use std::sync::Arc;

// Module declarations (organized by functional domain)
mod blockchain;    // Registry RPC, authorization, write locks
mod config;        // Process settings
mod contracts;     // Registry messages and client
mod errors;        // Shared error type
mod models;        // Data structures
mod services;      // Business logic and API
mod utils;         // Hashing and signatures
mod wallet;        // Key material

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load `.env` and settings
/// 2. Connect the registry client
/// 3. Initialize service components
/// 4. Start API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load settings")?;
    info!("starting with {:?}", settings);

    let registry = EthRegistry::new(&settings.rpc_url, &settings.registry_address)
        .context("failed to initialize registry client")?;
    info!("using registry at {:?}", registry.address());
    let client = RegistryClient::new(
        Arc::new(registry),
        settings.rpc_timeout(),
        settings.read_retries,
    );

    let keys = KeyManager::from_hex(&settings.issuer_private_key)
        .context("invalid issuer private key")?;
    info!("issuer {} signs as {:?}", settings.issuer_did, keys.address());

    // Purge expired request nonces once per TTL
    let nonces = RequestNonceStore::init(settings.request_nonce_ttl(), settings.request_nonce_ttl());

    let credential_issuer = CredentialIssuer::new(
        client.clone(),
        Arc::new(RegistryPresentationVerifier::new(client)),
        nonces,
        Arc::new(InMemoryCredentialStore::new()),
        keys,
        settings.issuer_did.clone(),
        settings.renewal_period(),
    );

    ApiServer::new(Arc::new(credential_issuer))
        .run(settings.listen_addr)
        .await
        .context("API server failed")?;
    Ok(())
}
