//! Caller-keyed provisioning replay cache.
//!
//! A dialer may attach an idempotency key to its contact message.  When the
//! listener side is the builder and has already provisioned for that key,
//! the cached [`ProvisionResult`] is replayed instead of provisioning again,
//! making repeated delivery of the same logical request side-effect free.
//!
//! The store is process-local and time-bounded.  Losing it degrades a retry
//! to "provision again" rather than causing incorrectness, so no durability
//! is required.  Entries are write-once: an insert against an existing,
//! unexpired key leaves the original untouched.  Expired entries are pruned
//! lazily on access; no reaper task is needed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tally_core::ProvisionResult;

struct IdempotencyRecord {
    result: ProvisionResult,
    expires_at: Instant,
}

/// Write-once, TTL-bounded map from idempotency key to provisioning result.
///
/// Owned by the `SessionManager` and shared with its listener sessions by
/// reference; never a process-wide singleton.
pub struct IdempotencyStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached result for `key`, pruning it first if expired.
    pub fn get(&self, key: &str) -> Option<ProvisionResult> {
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        match entries.get(key) {
            Some(record) if record.expires_at > Instant::now() => Some(record.result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Caches `result` under `key`.  Returns `false` (and leaves the store
    /// unchanged) when an unexpired entry already exists.
    pub fn insert(&self, key: &str, result: ProvisionResult) -> bool {
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        let now = Instant::now();
        match entries.get(key) {
            Some(record) if record.expires_at > now => false,
            _ => {
                entries.insert(
                    key.to_string(),
                    IdempotencyRecord {
                        result,
                        expires_at: now + self.ttl,
                    },
                );
                true
            }
        }
    }

    /// Number of live (possibly expired, not yet pruned) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("idempotency lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::TallyRole;

    fn make_result(tally_id: &str) -> ProvisionResult {
        ProvisionResult {
            tally_id: tally_id.to_string(),
            created_by: TallyRole::Stock,
            endpoint: "db.local:5432".to_string(),
            credentials_ref: "cred".to_string(),
        }
    }

    #[test]
    fn test_get_returns_none_for_unknown_key() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_insert_then_get_returns_cached_result() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert!(store.insert("k1", make_result("tally-1")));
        assert_eq!(store.get("k1"), Some(make_result("tally-1")));
    }

    #[test]
    fn test_insert_is_write_once_for_unexpired_keys() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert!(store.insert("k1", make_result("tally-1")));
        // Second write must not overwrite.
        assert!(!store.insert("k1", make_result("tally-2")));
        assert_eq!(store.get("k1"), Some(make_result("tally-1")));
    }

    #[test]
    fn test_expired_entry_is_pruned_and_replaceable() {
        let store = IdempotencyStore::new(Duration::from_millis(10));
        assert!(store.insert("k1", make_result("tally-1")));
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(store.get("k1"), None);
        assert!(store.is_empty(), "expired entry must be pruned on get");
        assert!(store.insert("k1", make_result("tally-2")));
        assert_eq!(store.get("k1"), Some(make_result("tally-2")));
    }

    #[test]
    fn test_independent_keys_do_not_interfere() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        store.insert("k1", make_result("tally-1"));
        store.insert("k2", make_result("tally-2"));
        assert_eq!(store.get("k1"), Some(make_result("tally-1")));
        assert_eq!(store.get("k2"), Some(make_result("tally-2")));
        assert_eq!(store.len(), 2);
    }
}
