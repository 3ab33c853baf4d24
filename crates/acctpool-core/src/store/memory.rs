//! In-memory control store for tests and local experimentation.
//!
//! Behaves like the production store observed from the outside: writes are
//! last-writer-wins, `put` answers with whatever the slot holds after the
//! write, and a missing slot is distinct from an empty one. On top of that
//! it offers one-shot fault and race injection so the save protocol's
//! failure paths can be exercised deterministically.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ControlStore, StoreError};
use crate::account::AccountIdentity;

#[derive(Default)]
struct Inner {
    slots: HashMap<String, String>,
    // A `None` slot in the queue lets that fetch through unharmed, so a
    // fault behind it lands on a later call.
    fetch_faults: HashMap<String, VecDeque<Option<StoreError>>>,
    put_faults: HashMap<String, VecDeque<StoreError>>,
    put_races: HashMap<String, VecDeque<String>>,
    fetch_calls: u64,
    put_calls: u64,
    create_calls: u64,
}

/// Shared in-memory slot map implementing [`ControlStore`].
#[derive(Default)]
pub struct MemoryControlStore {
    inner: Mutex<Inner>,
}

impl MemoryControlStore {
    /// Creates an empty store: no account has a slot yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the slot for `account` holding `text`, replacing whatever
    /// was there.
    pub async fn seed(&self, account: &AccountIdentity, text: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .slots
            .insert(account.id.to_string(), text.to_string());
    }

    /// Returns the slot contents, `None` when the slot does not exist.
    pub async fn contents(&self, account: &AccountIdentity) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.slots.get(account.id.as_str()).cloned()
    }

    /// Deletes the slot, as when the account is torn down outside the
    /// pool's control.
    pub async fn remove(&self, account: &AccountIdentity) {
        let mut inner = self.inner.lock().await;
        inner.slots.remove(account.id.as_str());
    }

    /// Queues an error for the next `fetch` of `account`. Multiple queued
    /// entries fire in order, one per call.
    pub async fn fail_next_fetch(&self, account: &AccountIdentity, err: StoreError) {
        let mut inner = self.inner.lock().await;
        inner
            .fetch_faults
            .entry(account.id.to_string())
            .or_default()
            .push_back(Some(err));
    }

    /// Queues a pass for the next `fetch` of `account`: that call succeeds
    /// normally, and any fault queued behind it hits the call after.
    pub async fn pass_next_fetch(&self, account: &AccountIdentity) {
        let mut inner = self.inner.lock().await;
        inner
            .fetch_faults
            .entry(account.id.to_string())
            .or_default()
            .push_back(None);
    }

    /// Queues an error for the next `put` of `account`.
    pub async fn fail_next_put(&self, account: &AccountIdentity, err: StoreError) {
        let mut inner = self.inner.lock().await;
        inner
            .put_faults
            .entry(account.id.to_string())
            .or_default()
            .push_back(err);
    }

    /// Makes the next `put` of `account` lose against a concurrent writer:
    /// the slot ends up holding `winner` and `put` reports `winner` back,
    /// exactly as if the other write landed inside the update window.
    pub async fn interpose_put(&self, account: &AccountIdentity, winner: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .put_races
            .entry(account.id.to_string())
            .or_default()
            .push_back(winner.to_string());
    }

    /// Number of `fetch` calls served so far, including failed ones.
    pub async fn fetch_calls(&self) -> u64 {
        self.inner.lock().await.fetch_calls
    }

    /// Number of `put` calls served so far, including failed ones.
    pub async fn put_calls(&self) -> u64 {
        self.inner.lock().await.put_calls
    }

    /// Number of `create` calls served so far, including failed ones.
    pub async fn create_calls(&self) -> u64 {
        self.inner.lock().await.create_calls
    }
}

#[async_trait]
impl ControlStore for MemoryControlStore {
    async fn fetch(&self, account: &AccountIdentity) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.fetch_calls += 1;
        if let Some(err) = pop_fetch_fault(&mut inner.fetch_faults, account) {
            return Err(err);
        }
        Ok(inner.slots.get(account.id.as_str()).cloned())
    }

    async fn put(&self, account: &AccountIdentity, text: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.put_calls += 1;
        if let Some(err) = pop_fault(&mut inner.put_faults, account) {
            return Err(err);
        }
        if !inner.slots.contains_key(account.id.as_str()) {
            return Err(StoreError::NotFound {
                account_id: account.id.to_string(),
            });
        }
        let stored = match pop_race(&mut inner.put_races, account) {
            Some(winner) => winner,
            None => text.to_string(),
        };
        inner
            .slots
            .insert(account.id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn create(&self, account: &AccountIdentity) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.create_calls += 1;
        if inner.slots.contains_key(account.id.as_str()) {
            return Err(StoreError::AlreadyExists {
                account_id: account.id.to_string(),
            });
        }
        inner.slots.insert(account.id.to_string(), String::new());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn pop_fault(
    faults: &mut HashMap<String, VecDeque<StoreError>>,
    account: &AccountIdentity,
) -> Option<StoreError> {
    faults.get_mut(account.id.as_str())?.pop_front()
}

fn pop_fetch_fault(
    faults: &mut HashMap<String, VecDeque<Option<StoreError>>>,
    account: &AccountIdentity,
) -> Option<StoreError> {
    faults.get_mut(account.id.as_str())?.pop_front().flatten()
}

fn pop_race(
    races: &mut HashMap<String, VecDeque<String>>,
    account: &AccountIdentity,
) -> Option<String> {
    races.get_mut(account.id.as_str())?.pop_front()
}
