//! Error types for Syndicast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyndicastError>;

#[derive(Error, Debug)]
pub enum SyndicastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyndicastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SyndicastError::InvalidInput(_) => 3,
            SyndicastError::OAuth(_) => 2,
            SyndicastError::Credential(_) => 2,
            SyndicastError::Platform(_) => 1,
            SyndicastError::Config(_) => 1,
            SyndicastError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Record not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    #[error("Malformed token envelope: {0}")]
    Malformed(String),

    #[error("Token decryption failed: {0}")]
    Decrypt(String),

    #[error("Vault key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Errors raised by the OAuth exchange coordinator.
///
/// State-token failures are never retried automatically; the user must
/// restart the authorization flow.
#[derive(Error, Debug, Clone)]
pub enum OAuthError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Missing client credentials for platform: {0}")]
    MissingClientCredentials(String),

    #[error("Invalid authorization state token: {0}")]
    InvalidState(String),

    #[error("Expired authorization state token")]
    ExpiredState,

    #[error("Connection has no refresh token")]
    NoRefreshToken,

    #[error("Token exchange failed: {0}")]
    Exchange(String),

    #[error("User info fetch failed: {0}")]
    UserInfo(String),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Publishing failed: {0}")]
    Publishing(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = SyndicastError::InvalidInput("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_oauth_error() {
        let error = SyndicastError::OAuth(OAuthError::ExpiredState);
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_platform_error() {
        let error = SyndicastError::Platform(PlatformError::Network("timeout".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting_invalid_state() {
        let error = SyndicastError::OAuth(OAuthError::InvalidState("bad signature".to_string()));
        assert_eq!(
            format!("{}", error),
            "OAuth error: Invalid authorization state token: bad signature"
        );
    }

    #[test]
    fn test_error_message_formatting_no_refresh_token() {
        let error = SyndicastError::OAuth(OAuthError::NoRefreshToken);
        assert_eq!(format!("{}", error), "OAuth error: Connection has no refresh token");
    }

    #[test]
    fn test_error_conversion_from_credential_error() {
        let cred_error = CredentialError::Decrypt("auth tag mismatch".to_string());
        let error: SyndicastError = cred_error.into();

        match error {
            SyndicastError::Credential(_) => {}
            _ => panic!("Expected SyndicastError::Credential"),
        }
    }

    #[test]
    fn test_error_conversion_from_platform_error() {
        let platform_error = PlatformError::Publishing("remote rejected".to_string());
        let error: SyndicastError = platform_error.into();

        match error {
            SyndicastError::Platform(_) => {}
            _ => panic!("Expected SyndicastError::Platform"),
        }
    }

    #[test]
    fn test_platform_error_clone() {
        let original = PlatformError::Network("Connection failed".to_string());
        let cloned = original.clone();

        assert_eq!(format!("{}", original), format!("{}", cloned));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<String> {
            Ok("success".to_string())
        }

        fn returns_err() -> Result<String> {
            Err(SyndicastError::InvalidInput("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
