// src/contracts/mod.rs
pub mod did_registry;
pub mod messages;
