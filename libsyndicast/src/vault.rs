//! Credential vault: the AEAD codec for OAuth tokens at rest
//!
//! Tokens are stored as `ivHex:tagHex:cipherHex` envelopes produced by
//! AES-256-GCM under a key derived from the configured secret with scrypt
//! and a fixed salt. The vault is a pure codec: no storage, no network.
//!
//! Strings without the envelope structure predate encryption and are
//! passed through unchanged on decrypt. A well-formed envelope that fails
//! to decrypt is logged and returned as-is, so callers must treat a
//! decrypt result that still looks like an envelope as a fatal condition.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use zeroize::Zeroizing;

use crate::error::{CredentialError, Result};

const KDF_SALT: &[u8] = b"syndicast.vault.v1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypts and decrypts stored OAuth tokens
pub struct TokenVault {
    key: Zeroizing<[u8; 32]>,
}

impl TokenVault {
    /// Derive the vault key from the configured secret.
    ///
    /// scrypt with N=2^14, r=8, p=1: slow enough that the stored envelopes
    /// do not fall to a dictionary attack on a weak secret.
    pub fn new(secret: &str) -> Result<Self> {
        let params = scrypt::Params::new(14, 8, 1, 32)
            .map_err(|e| CredentialError::KeyDerivation(e.to_string()))?;

        let mut key = Zeroizing::new([0u8; 32]);
        scrypt::scrypt(secret.as_bytes(), KDF_SALT, &params, key.as_mut())
            .map_err(|e| CredentialError::KeyDerivation(e.to_string()))?;

        Ok(Self { key })
    }

    /// Encrypt a plaintext token into an `ivHex:tagHex:cipherHex` envelope
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_ref()));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CredentialError::Decrypt(format!("encryption failed: {}", e)))?;

        // aes-gcm appends the 16-byte auth tag to the ciphertext
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(body)
        ))
    }

    /// Decrypt an envelope, falling back to the input on legacy or
    /// undecryptable values.
    pub fn decrypt(&self, envelope: &str) -> String {
        let parts: Vec<&str> = envelope.split(':').collect();
        if parts.len() != 3 {
            // Legacy unencrypted token stored before the vault existed
            return envelope.to_string();
        }

        match self.try_decrypt(parts[0], parts[1], parts[2]) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::error!("Token envelope failed to decrypt: {}", e);
                envelope.to_string()
            }
        }
    }

    fn try_decrypt(&self, iv_hex: &str, tag_hex: &str, cipher_hex: &str) -> Result<String> {
        let iv = hex::decode(iv_hex)
            .map_err(|e| CredentialError::Malformed(format!("bad iv hex: {}", e)))?;
        let tag = hex::decode(tag_hex)
            .map_err(|e| CredentialError::Malformed(format!("bad tag hex: {}", e)))?;
        let body = hex::decode(cipher_hex)
            .map_err(|e| CredentialError::Malformed(format!("bad cipher hex: {}", e)))?;

        if iv.len() != NONCE_LEN {
            return Err(CredentialError::Malformed(format!(
                "iv must be {} bytes, got {}",
                NONCE_LEN,
                iv.len()
            ))
            .into());
        }
        if tag.len() != TAG_LEN {
            return Err(CredentialError::Malformed(format!(
                "auth tag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            ))
            .into());
        }

        let mut sealed = body;
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_ref()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| CredentialError::Decrypt("auth tag mismatch".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CredentialError::Decrypt(format!("invalid utf-8: {}", e)).into())
    }
}

/// Whether a string has the `ivHex:tagHex:cipherHex` envelope structure.
///
/// Used by callers to detect a decrypt that fell back to the envelope.
pub fn looks_encrypted(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Refresh-due predicate: true iff `now + buffer >= expires_at`.
///
/// Connections without an expiry (platforms issuing non-expiring tokens)
/// never need a proactive refresh.
pub fn needs_refresh(expires_at: Option<i64>, buffer_minutes: i64) -> bool {
    match expires_at {
        Some(expiry) => chrono::Utc::now().timestamp() + buffer_minutes * 60 >= expiry,
        None => false,
    }
}
