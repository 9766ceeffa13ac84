// src/services/mod.rs
pub mod api_server;
pub mod credential_issuer;
pub mod credential_store;
pub mod nonce_store;
pub mod verifier;
