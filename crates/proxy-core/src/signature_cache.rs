//! Hash→signature cache with TTL and LRU eviction.
//!
//! A freshness-checked cache keyed by a hash of its input, in-process and
//! LRU-bounded rather than file-backed. Readers never block on each other;
//! a single mutex serializes LRU mutation.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};

const MIN_SIGNATURE_LEN: usize = 10;
const MAX_SIGNATURE_LEN: usize = 10_000;

/// Tunables for [`SignatureCache`].
#[derive(Debug, Clone)]
pub struct SignatureCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    /// `Duration::ZERO` disables the background cleanup timer.
    pub cleanup_interval: Duration,
}

impl Default for SignatureCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    signature: String,
    expires_at: SystemTime,
}

/// Keyed by the SHA-256 hash of the thinking text.
type Key = [u8; 32];

pub struct SignatureCache {
    entries: RwLock<HashMap<Key, Entry>>,
    lru: Mutex<VecDeque<Key>>,
    config: SignatureCacheConfig,
}

impl SignatureCache {
    pub fn new(config: SignatureCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            lru: Mutex::new(VecDeque::new()),
            config,
        }
    }

    fn hash(text: &str) -> Key {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    /// `validate(s) ⇔ s` non-whitespace ∧ `10 ≤ len(s) ≤ 10000`.
    pub fn validate(signature: &str) -> bool {
        let trimmed = signature.trim();
        !trimmed.is_empty()
            && signature.len() >= MIN_SIGNATURE_LEN
            && signature.len() <= MAX_SIGNATURE_LEN
    }

    /// Look up the signature cached for `thinking_text`, if present and not
    /// expired. A hit bumps LRU order; an expired entry is evicted and
    /// treated as a miss.
    pub fn get(&self, thinking_text: &str) -> Option<String> {
        let key = Self::hash(thinking_text);
        let now = SystemTime::now();

        let hit = {
            let entries = self.entries.read().unwrap();
            entries.get(&key).map(|e| (e.signature.clone(), e.expires_at))
        };

        match hit {
            Some((signature, expires_at)) if expires_at > now => {
                self.touch_lru(key);
                Some(signature)
            }
            Some(_) => {
                self.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Cache `signature` for `thinking_text`. Rejects invalid signatures.
    /// Evicts the least-recently-used entry first if the cache is full.
    pub fn set(&self, thinking_text: &str, signature: &str) -> bool {
        if !Self::validate(signature) {
            return false;
        }
        let key = Self::hash(thinking_text);
        let now = SystemTime::now();
        let entry = Entry {
            signature: signature.to_string(),
            expires_at: now + self.config.ttl,
        };

        {
            let mut entries = self.entries.write().unwrap();
            if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
                drop(entries);
                self.evict_lru();
                entries = self.entries.write().unwrap();
            }
            entries.insert(key, entry);
        }
        self.touch_lru(key);
        true
    }

    /// O(n) scan removing every entry whose `expires_at <= now`. Returns the
    /// number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = SystemTime::now();
        let expired: Vec<Key> = {
            let entries = self.entries.read().unwrap();
            entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| *k)
                .collect()
        };
        let removed = expired.len();
        for key in expired {
            self.remove(&key);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch_lru(&self, key: Key) {
        let mut lru = self.lru.lock().unwrap();
        lru.retain(|k| k != &key);
        lru.push_back(key);
    }

    fn evict_lru(&self) {
        let victim = {
            let mut lru = self.lru.lock().unwrap();
            lru.pop_front()
        };
        if let Some(key) = victim {
            self.entries.write().unwrap().remove(&key);
        }
    }

    fn remove(&self, key: &Key) {
        self.entries.write().unwrap().remove(key);
        self.lru.lock().unwrap().retain(|k| k != key);
    }

    /// Spawn the background cleanup loop. Returns a [`tokio::sync::Notify`]
    /// the caller can fire to stop it on shutdown. A no-op when
    /// `cleanup_interval` is zero.
    pub fn spawn_cleanup_task(
        self: std::sync::Arc<Self>,
    ) -> Option<(tokio::task::JoinHandle<()>, std::sync::Arc<tokio::sync::Notify>)> {
        if self.config.cleanup_interval.is_zero() {
            return None;
        }
        let shutdown = std::sync::Arc::new(tokio::sync::Notify::new());
        let shutdown_rx = shutdown.clone();
        let interval = self.config.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.cleanup_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "signature cache cleanup");
                        }
                    }
                    _ = shutdown_rx.notified() => break,
                }
            }
        });
        Some((handle, shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl: Duration, max_entries: usize) -> SignatureCache {
        SignatureCache::new(SignatureCacheConfig {
            ttl,
            max_entries,
            cleanup_interval: Duration::ZERO,
        })
    }

    #[test]
    fn round_trip() {
        let c = cache(Duration::from_secs(60), 10);
        let sig = "s".repeat(20);
        assert!(c.set("thinking text", &sig));
        assert_eq!(c.get("thinking text"), Some(sig));
    }

    #[test]
    fn validate_bounds() {
        assert!(!SignatureCache::validate(""));
        assert!(!SignatureCache::validate("   "));
        assert!(!SignatureCache::validate("short"));
        assert!(SignatureCache::validate(&"a".repeat(10)));
        assert!(SignatureCache::validate(&"a".repeat(10_000)));
        assert!(!SignatureCache::validate(&"a".repeat(10_001)));
    }

    #[test]
    fn set_rejects_invalid_signature() {
        let c = cache(Duration::from_secs(60), 10);
        assert!(!c.set("t", "short"));
        assert_eq!(c.get("t"), None);
    }

    #[test]
    fn expired_entry_is_evicted_on_get() {
        let c = cache(Duration::from_millis(1), 10);
        let sig = "s".repeat(20);
        c.set("t", &sig);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.get("t"), None);
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn cleanup_expired_leaves_only_fresh_entries() {
        let c = cache(Duration::from_millis(1), 10);
        c.set("a", &"s".repeat(20));
        std::thread::sleep(Duration::from_millis(20));
        c.set("b", &"s".repeat(20));
        let removed = c.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(c.get("b"), Some("s".repeat(20)));
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let c = cache(Duration::from_secs(60), 2);
        c.set("a", &"s".repeat(20));
        c.set("b", &"s".repeat(20));
        // touch "a" so "b" becomes the LRU victim
        c.get("a");
        c.set("c", &"s".repeat(20));
        assert_eq!(c.get("b"), None);
        assert!(c.get("a").is_some());
        assert!(c.get("c").is_some());
        assert_eq!(c.len(), 2);
    }
}
