// src/blockchain/mod.rs
pub mod account_locks;
pub mod authorizer;
pub mod eth_registry;
pub mod registry;

#[cfg(test)]
pub mod mock;
