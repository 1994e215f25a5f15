//! Signed, time-boxed OAuth state tokens
//!
//! The state parameter round-trips through the third-party authorization
//! page, so it carries everything the callback needs (owner, platform,
//! redirect target) under an HMAC so it cannot be forged or replayed
//! after expiry.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{OAuthError, Result};
use crate::types::Platform;

type HmacSha256 = Hmac<Sha256>;

/// State tokens are rejected this many seconds after issuance
pub const STATE_TTL_SECS: i64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatePayload {
    pub user_id: String,
    pub platform: Platform,
    pub return_url: String,
    pub issued_at: i64,
    pub nonce: String,
}

/// Issues and verifies signed state tokens
pub struct StateSigner {
    key: Vec<u8>,
}

impl StateSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    /// Produce `base64url(payload).base64url(mac)`
    pub fn issue(&self, user_id: &str, platform: Platform, return_url: &str) -> Result<String> {
        let payload = StatePayload {
            user_id: user_id.to_string(),
            platform,
            return_url: return_url.to_string(),
            issued_at: chrono::Utc::now().timestamp(),
            nonce: uuid::Uuid::new_v4().to_string(),
        };

        let body = serde_json::to_vec(&payload)
            .map_err(|e| OAuthError::InvalidState(format!("payload encode failed: {}", e)))?;
        let encoded = URL_SAFE_NO_PAD.encode(&body);

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| OAuthError::InvalidState(e.to_string()))?;
        mac.update(encoded.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", encoded, signature))
    }

    /// Check signature and age, returning the embedded payload
    pub fn verify(&self, token: &str, max_age_secs: i64) -> Result<StatePayload> {
        let (encoded, signature) = token
            .split_once('.')
            .ok_or_else(|| OAuthError::InvalidState("missing signature separator".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| OAuthError::InvalidState(e.to_string()))?;
        mac.update(encoded.as_bytes());

        let given = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| OAuthError::InvalidState("signature is not base64url".to_string()))?;
        mac.verify_slice(&given)
            .map_err(|_| OAuthError::InvalidState("signature mismatch".to_string()))?;

        let body = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| OAuthError::InvalidState("payload is not base64url".to_string()))?;
        let payload: StatePayload = serde_json::from_slice(&body)
            .map_err(|e| OAuthError::InvalidState(format!("payload decode failed: {}", e)))?;

        let age = chrono::Utc::now().timestamp() - payload.issued_at;
        if age > max_age_secs || age < -60 {
            return Err(OAuthError::ExpiredState.into());
        }

        Ok(payload)
    }
}
