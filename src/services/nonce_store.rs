// src/services/nonce_store.rs
//! Single-use request nonces.
//!
//! Before submitting a presentation, a requester fetches a nonce bound to
//! its network origin and embeds it in the presentation proof. The nonce is
//! checked and removed under one lock, so a captured presentation can be
//! submitted at most once. These nonces are independent of the registry's
//! on-chain replay counter.

use crate::errors::DidError;
use ethers_core::utils::hex;
use log::{debug, trace};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct IssuedNonce {
    value: String,
    issued_at: Instant,
}

/// Request nonces keyed by requester origin. One outstanding nonce per
/// origin; issuing again replaces the previous one.
#[derive(Clone)]
pub struct RequestNonceStore {
    nonces: Arc<Mutex<HashMap<String, IssuedNonce>>>,
    ttl: Duration,
}

impl RequestNonceStore {
    pub fn new(ttl: Duration) -> Self {
        RequestNonceStore {
            nonces: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Like [`RequestNonceStore::new`], plus a background task purging
    /// expired nonces every `cleanup_interval`. Requires a Tokio runtime.
    pub fn init(ttl: Duration, cleanup_interval: Duration) -> Self {
        let store = Self::new(ttl);
        let store_clone = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                interval.tick().await;
                trace!("purging expired request nonces");
                store_clone.purge_expired();
            }
        });
        store
    }

    /// Issues a fresh random nonce for `origin`.
    pub fn issue(&self, origin: &str) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = hex::encode(bytes);

        self.nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                origin.to_string(),
                IssuedNonce {
                    value: value.clone(),
                    issued_at: Instant::now(),
                },
            );
        debug!("issued request nonce for {}", origin);
        value
    }

    /// Accepts `presented` once for `origin` and deletes it.
    ///
    /// # Errors
    /// `ReplayRejected` when no nonce is outstanding for `origin`, the value
    /// differs, or it has expired. A mismatched value leaves the
    /// outstanding nonce in place.
    pub fn consume(&self, origin: &str, presented: Option<&str>) -> Result<(), DidError> {
        let presented = presented
            .filter(|value| !value.is_empty())
            .ok_or_else(|| DidError::ReplayRejected("presentation carries no nonce".into()))?;

        let mut nonces = self.nonces.lock().unwrap_or_else(PoisonError::into_inner);
        let issued = nonces
            .get(origin)
            .ok_or_else(|| DidError::ReplayRejected(format!("no nonce issued for {}", origin)))?;
        if issued.value != presented {
            return Err(DidError::ReplayRejected(format!(
                "unknown nonce for {}",
                origin
            )));
        }
        let expired = issued.issued_at.elapsed() >= self.ttl;
        nonces.remove(origin);
        if expired {
            return Err(DidError::ReplayRejected(format!(
                "nonce for {} has expired",
                origin
            )));
        }
        Ok(())
    }

    fn purge_expired(&self) {
        let ttl = self.ttl;
        self.nonces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, issued| issued.issued_at.elapsed() < ttl);
    }

    pub fn outstanding(&self) -> usize {
        self.nonces.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
