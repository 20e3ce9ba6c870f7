//! Active job registry
//!
//! At most one conversion per album key. Membership is taken with
//! [`ActiveJobRegistry::acquire`] and released when the returned
//! [`JobGuard`] drops, on every exit path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{TranscodeError, TranscodeResult};

#[derive(Debug, Default)]
struct Memberships {
    /// Key to the token of the acquisition holding it
    active: HashMap<String, u64>,
    next_token: u64,
}

/// Set of album keys currently converting
#[derive(Debug, Clone, Default)]
pub struct ActiveJobRegistry {
    inner: Arc<Mutex<Memberships>>,
}

impl ActiveJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`; fails immediately if it is already active
    pub fn acquire(&self, key: &str) -> TranscodeResult<JobGuard> {
        let mut inner = self.inner.lock();
        if inner.active.contains_key(key) {
            return Err(TranscodeError::Concurrency(key.to_string()));
        }
        let token = inner.next_token;
        inner.next_token += 1;
        inner.active.insert(key.to_string(), token);
        Ok(JobGuard {
            registry: self.clone(),
            key: key.to_string(),
            token,
        })
    }

    /// Drop membership for `key` regardless of holder; returns whether it was present
    ///
    /// A guard from before the release no longer owns the key and will not
    /// touch a later holder's membership when it drops.
    pub fn release(&self, key: &str) -> bool {
        self.inner.lock().active.remove(key).is_some()
    }

    /// Release `key` only if `token` still holds it
    fn release_held(&self, key: &str, token: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.active.get(key) == Some(&token) {
            inner.active.remove(key);
            return true;
        }
        false
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.inner.lock().active.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Snapshot of active keys, sorted
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().active.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Scoped membership of one key
#[derive(Debug)]
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct JobGuard {
    registry: ActiveJobRegistry,
    key: String,
    token: u64,
}

impl JobGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this guard still owns its key
    pub fn is_held(&self) -> bool {
        self.registry.inner.lock().active.get(&self.key) == Some(&self.token)
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.release_held(&self.key, self.token);
    }
}
