//! Time-boxed in-memory cache
//!
//! Provides:
//! - Content-hash keys (SHA-256 over the request parts)
//! - Per-entry expiry
//! - Mutex-guarded storage shared by concurrent pipeline instances

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::metrics;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry lifetime
    pub ttl: Duration,
    /// Upper bound on stored entries; expired entries are evicted first
    pub max_entries: usize,
    /// Name used in logs and metrics
    pub name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1024,
            name: "default".to_string(),
        }
    }
}

struct Entry {
    json: String,
    expires_at: Instant,
}

/// Shared TTL cache storing JSON-serialized values
pub struct TtlCache {
    entries: Mutex<HashMap<String, Entry>>,
    config: CacheConfig,
}

impl TtlCache {
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get a live value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;

        let hit = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.json.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);

        metrics::record_cache(hit.is_some(), &self.config.name);

        match hit {
            Some(json) => match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!(cache = %self.config.name, key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(cache = %self.config.name, error = %e, "Discarding unreadable cache entry");
                    None
                }
            },
            None => {
                debug!(cache = %self.config.name, key = %key, "Cache miss");
                None
            }
        }
    }

    /// Store a value with the configured TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(cache = %self.config.name, error = %e, "Failed to serialize value, not caching");
                return;
            }
        };

        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if entries.len() >= self.config.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
        }
        if entries.len() >= self.config.max_entries {
            // Still full of live entries: drop the one closest to expiry.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                json,
                expires_at: now + self.config.ttl,
            },
        );
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Build a content-hash key from ordered parts
pub fn content_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // Separator so ("ab", "c") and ("a", "bc") differ
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
