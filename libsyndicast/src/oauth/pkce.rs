//! PKCE (RFC 7636) verifier generation and ephemeral storage
//!
//! The verifier must survive between building the authorization URL and
//! the callback's token exchange. Entries are keyed by the state token
//! and expire with it, so the store cannot grow past the set of flows
//! currently in progress.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// Generate a high-entropy code verifier (43 base64url chars)
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for a verifier
pub fn challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

struct Entry {
    verifier: String,
    inserted_at: Instant,
}

/// TTL-evicting in-memory verifier store.
///
/// Single-process by design; a deployment running multiple callback
/// handlers would swap this type for a shared cache.
pub struct VerifierStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl VerifierStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn insert(&self, state: &str, verifier: String) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        entries.insert(
            state.to_string(),
            Entry {
                verifier,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove and return the verifier for a state token.
    ///
    /// One-shot: a second take for the same state returns None, so a
    /// replayed callback cannot complete the exchange.
    pub async fn take(&self, state: &str) -> Option<String> {
        let mut entries = self.entries.write().await;
        let entry = entries.remove(state)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.verifier)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
