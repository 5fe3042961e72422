//! In-memory, single-use values with expiry.
//!
//! Used for pending authorization flows (keyed by `state`) and for one-time
//! handoff codes. Nothing here is persisted; a restart drops in-flight
//! logins.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::oauth::error::OAuthError;

/// Random bytes behind every state value, PKCE verifier and handoff code.
const RANDOM_TOKEN_BYTES: usize = 32;

/// Server-side half of a pending authorization flow.
#[derive(Clone)]
pub struct PendingFlow {
    pub pkce_verifier: String,
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Map of single-use values that expire after a fixed TTL.
///
/// Holds at most `capacity` entries. When full, expired entries are purged
/// first and then the entry closest to expiry is evicted.
pub struct ExpiringStore<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<V> ExpiringStore<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub async fn insert(&self, key: String, value: V) {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            entries.retain(|_, entry| entry.expires_at > now);
            while entries.len() >= self.capacity {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                entries.remove(&oldest);
                debug!(capacity = self.capacity, "Evicted oldest entry from full store");
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Remove and return the value if it exists and has not expired.
    pub async fn take(&self, key: &str) -> Option<V> {
        let entry = self.entries.lock().await.remove(key)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.value)
    }

    /// Drop expired entries, returning how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// URL-safe random token from the OS RNG.
pub fn random_token() -> Result<String, OAuthError> {
    let mut bytes = [0u8; RANDOM_TOKEN_BYTES];
    getrandom::getrandom(&mut bytes).map_err(|e| OAuthError::Internal(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// PKCE S256 challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
