// src/blockchain/account_locks.rs
//! Per-account write serialization.
//!
//! Resolving the replay nonce, signing and submitting is not atomic. Two
//! writes from the same signing account that overlap would embed the same
//! nonce and the registry would reject one of them, so every write holds
//! its account's lock from nonce resolution until the submission returns.
//!
//! Submission does not wait for a block, so the chain may not reflect the
//! previous write yet when the next one starts. The lock therefore also
//! remembers the last registry nonce the account embedded.

use ethers_core::types::{Address, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held while a write for one account is in flight.
pub struct AccountGuard {
    last_used: OwnedMutexGuard<Option<U256>>,
}

impl AccountGuard {
    /// Registry nonce for the next write given the nonce the chain reports.
    pub fn next_nonce(&self, chain: U256) -> U256 {
        match *self.last_used {
            Some(last) if last >= chain => last + 1,
            _ => chain,
        }
    }

    /// Marks `nonce` as embedded in a submitted write.
    pub fn record(&mut self, nonce: U256) {
        *self.last_used = Some(nonce);
    }

    /// Forgets the last nonce so the next write starts from the chain again.
    pub fn reset(&mut self) {
        *self.last_used = None;
    }
}

/// Lazily created async mutex per account.
#[derive(Clone, Default)]
pub struct AccountLocks {
    locks: Arc<Mutex<HashMap<Address, Arc<AsyncMutex<Option<U256>>>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive write access for `account`.
    pub async fn acquire(&self, account: Address) -> AccountGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(account).or_default().clone()
        };
        AccountGuard {
            last_used: lock.lock_owned().await,
        }
    }
}
