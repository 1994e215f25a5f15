//! OAuth exchange coordinator
//!
//! Drives the authorization-code flow for every platform through one
//! generic routine: profile lookup, signed state, optional PKCE, token
//! exchange, optional long-lived upgrade, user-info normalization, and
//! persistence through the vault. Platform differences live in
//! [`providers`] as data.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::{CredentialError, DbError, OAuthError, Result};
use crate::types::{Connection, ConnectionStatus, Platform};
use crate::vault::{looks_encrypted, TokenVault};

pub mod exchange;
pub mod pkce;
pub mod providers;
pub mod state;

use exchange::{TokenExchanger, TokenGrant};
use pkce::VerifierStore;
use providers::{ProviderProfile, UserProfile};
use state::{StateSigner, STATE_TTL_SECS};

/// Everything the route layer needs to redirect the user out
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Result of a completed callback exchange
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub user_id: String,
    pub return_url: String,
    pub connection_id: String,
    pub profile: UserProfile,
}

pub struct OAuthCoordinator {
    db: Database,
    vault: Arc<TokenVault>,
    config: Arc<Config>,
    signer: StateSigner,
    verifiers: VerifierStore,
    exchanger: Arc<dyn TokenExchanger>,
}

impl OAuthCoordinator {
    pub fn new(
        db: Database,
        vault: Arc<TokenVault>,
        config: Arc<Config>,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Self {
        let signer = StateSigner::new(&config.vault.secret);
        Self {
            db,
            vault,
            config,
            signer,
            verifiers: VerifierStore::new(Duration::from_secs(STATE_TTL_SECS as u64)),
            exchanger,
        }
    }

    fn resolve(&self, platform: &str) -> Result<(&'static ProviderProfile, Platform)> {
        let platform = Platform::from_str(platform)
            .map_err(|_| OAuthError::UnsupportedPlatform(platform.to_string()))?;
        Ok((providers::profile(platform), platform))
    }

    /// Build the platform authorization URL for a user.
    ///
    /// The returned state token is also the PKCE-verifier key for
    /// platforms that require PKCE.
    pub async fn authorization_url(
        &self,
        user_id: &str,
        platform: &str,
        return_url: &str,
    ) -> Result<AuthorizationRequest> {
        let (profile, platform) = self.resolve(platform)?;
        let app = self
            .config
            .oauth_app(platform)
            .ok_or_else(|| OAuthError::MissingClientCredentials(platform.to_string()))?;

        let state = self.signer.issue(user_id, platform, return_url)?;

        let scope = profile.scopes.join(" ");
        let mut params: Vec<(&str, String)> = vec![
            ("response_type", "code".to_string()),
            ("client_id", app.client_id.clone()),
            ("redirect_uri", app.redirect_uri.clone()),
            ("scope", scope),
            ("state", state.clone()),
        ];
        for (key, value) in profile.extra_authorize_params {
            params.push((key, value.to_string()));
        }

        if profile.pkce {
            let verifier = pkce::generate_verifier();
            params.push(("code_challenge", pkce::challenge(&verifier)));
            params.push(("code_challenge_method", "S256".to_string()));
            self.verifiers.insert(&state, verifier).await;
        }

        let url = reqwest::Url::parse_with_params(profile.authorize_url, &params)
            .map_err(|e| OAuthError::Exchange(format!("authorize url invalid: {}", e)))?;

        info!("Issued {} authorization URL for user {}", platform, user_id);

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state,
        })
    }

    /// Complete the callback: verify state, exchange the code, fetch the
    /// user profile, and persist the connection.
    pub async fn exchange_code(
        &self,
        platform: &str,
        code: &str,
        state: &str,
    ) -> Result<ExchangeOutcome> {
        let (profile, platform) = self.resolve(platform)?;
        let app = self
            .config
            .oauth_app(platform)
            .ok_or_else(|| OAuthError::MissingClientCredentials(platform.to_string()))?;

        let payload = self.signer.verify(state, STATE_TTL_SECS)?;
        if payload.platform != platform {
            return Err(OAuthError::InvalidState(format!(
                "state was issued for {}, callback is for {}",
                payload.platform, platform
            ))
            .into());
        }

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", app.redirect_uri.as_str()),
        ];

        let verifier;
        if profile.pkce {
            verifier = self.verifiers.take(state).await.ok_or_else(|| {
                OAuthError::InvalidState("PKCE verifier missing or expired".to_string())
            })?;
            params.push(("code_verifier", verifier.as_str()));
        }

        let mut grant = self.exchanger.exchange(profile, app, &params).await?;

        // Some platforms only hand out a short-lived token at the
        // callback; upgrade it before storing anything.
        if let Some(upgrade) = &profile.long_lived_exchange {
            let short_lived = grant.access_token.clone();
            let upgrade_params: Vec<(&str, &str)> = vec![
                ("grant_type", upgrade.grant_type),
                (upgrade.token_param, short_lived.as_str()),
            ];
            let mut upgraded = self.exchanger.exchange(profile, app, &upgrade_params).await?;
            if upgraded.refresh_token.is_none() {
                upgraded.refresh_token = grant.refresh_token.take();
            }
            grant = upgraded;
        }

        let user_profile = self
            .exchanger
            .fetch_user_info(profile, &grant.access_token)
            .await?;

        let connection_id = self
            .store_tokens(&payload.user_id, platform, &grant, &user_profile)
            .await?;

        info!(
            "Connected {} for user {} as {}",
            platform, payload.user_id, user_profile.platform_user_id
        );

        Ok(ExchangeOutcome {
            user_id: payload.user_id,
            return_url: payload.return_url,
            connection_id,
            profile: user_profile,
        })
    }

    /// Encrypt and persist a grant as the (user, platform) connection
    async fn store_tokens(
        &self,
        user_id: &str,
        platform: Platform,
        grant: &TokenGrant,
        profile: &UserProfile,
    ) -> Result<String> {
        let mut connection = Connection::new(
            user_id.to_string(),
            platform,
            self.vault.encrypt(&grant.access_token)?,
        );
        connection.refresh_token = grant
            .refresh_token
            .as_deref()
            .map(|token| self.vault.encrypt(token))
            .transpose()?;
        connection.token_expires_at = grant
            .expires_in
            .map(|seconds| chrono::Utc::now().timestamp() + seconds);
        connection.platform_user_id = Some(profile.platform_user_id.clone());
        connection.platform_username = profile.username.clone();
        connection.display_name = profile.display_name.clone();
        connection.scopes = grant
            .scope
            .clone()
            .or_else(|| Some(providers::profile(platform).scopes.join(" ")));

        self.db.upsert_connection(&connection).await?;

        // The upsert keeps the original row id when the pair already existed
        let stored = self
            .db
            .get_connection_for(user_id, platform)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("connection {}/{}", user_id, platform)))?;

        Ok(stored.id)
    }

    /// Refresh a connection's access token using its refresh grant.
    ///
    /// On failure the connection is marked `error` with the detail and
    /// the error is re-raised for the refresh scheduler's retry policy.
    pub async fn refresh(&self, connection_id: &str) -> Result<()> {
        let connection = self
            .db
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("connection {}", connection_id)))?;

        let refresh_envelope = connection
            .refresh_token
            .as_deref()
            .ok_or(OAuthError::NoRefreshToken)?;

        let refresh_token = self.vault.decrypt(refresh_envelope);
        if looks_encrypted(&refresh_token) {
            return Err(CredentialError::Decrypt(format!(
                "refresh token for connection {} is undecryptable",
                connection_id
            ))
            .into());
        }

        let profile = providers::profile(connection.platform);
        let app = self
            .config
            .oauth_app(connection.platform)
            .ok_or_else(|| OAuthError::MissingClientCredentials(connection.platform.to_string()))?;

        let params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];

        match self.exchanger.exchange(profile, app, &params).await {
            Ok(grant) => {
                let access_envelope = self.vault.encrypt(&grant.access_token)?;
                let refresh_envelope = grant
                    .refresh_token
                    .as_deref()
                    .map(|token| self.vault.encrypt(token))
                    .transpose()?;
                let expires_at = grant
                    .expires_in
                    .map(|seconds| chrono::Utc::now().timestamp() + seconds);

                self.db
                    .update_connection_tokens(
                        connection_id,
                        &access_envelope,
                        refresh_envelope.as_deref(),
                        expires_at,
                    )
                    .await?;

                info!("Refreshed {} tokens for connection {}", connection.platform, connection_id);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Refresh failed for connection {} ({}): {}",
                    connection_id, connection.platform, e
                );
                self.db
                    .set_connection_status(
                        connection_id,
                        ConnectionStatus::Error,
                        Some(&e.to_string()),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Decrypt a connection's access token for a publish attempt
    pub fn decrypt_access_token(&self, connection: &Connection) -> Result<String> {
        let token = self.vault.decrypt(&connection.access_token);
        if looks_encrypted(&token) {
            return Err(CredentialError::Decrypt(format!(
                "access token for connection {} is undecryptable",
                connection.id
            ))
            .into());
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, OAuthAppConfig, VaultConfig};
    use crate::error::SyndicastError;
    use exchange::MockExchanger;

    fn test_config() -> Arc<Config> {
        let mut config = Config::default_config();
        config.database = DatabaseConfig {
            path: ":memory:".to_string(),
        };
        config.vault = VaultConfig {
            secret: "test-secret".to_string(),
        };
        for platform in ["twitter", "linkedin", "facebook", "reddit"] {
            config.oauth.insert(
                platform.to_string(),
                OAuthAppConfig {
                    client_id: format!("{}-client", platform),
                    client_secret: format!("{}-secret", platform),
                    redirect_uri: format!("https://app.test/oauth/{}/callback", platform),
                },
            );
        }
        Arc::new(config)
    }

    fn test_grant() -> TokenGrant {
        TokenGrant {
            access_token: "fresh-access".to_string(),
            refresh_token: Some("fresh-refresh".to_string()),
            expires_in: Some(7200),
            scope: Some("tweet.write".to_string()),
        }
    }

    fn test_profile() -> UserProfile {
        UserProfile {
            platform_user_id: "pid-42".to_string(),
            username: Some("syndi".to_string()),
            display_name: Some("Syndi".to_string()),
        }
    }

    async fn coordinator_with(exchanger: MockExchanger) -> (OAuthCoordinator, Database) {
        let db = Database::new_in_memory().await.unwrap();
        let vault = Arc::new(TokenVault::new("test-secret").unwrap());
        let coordinator = OAuthCoordinator::new(
            db.clone(),
            vault,
            test_config(),
            Arc::new(exchanger),
        );
        (coordinator, db)
    }

    #[tokio::test]
    async fn test_authorization_url_unknown_platform() {
        let (coordinator, _db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let result = coordinator
            .authorization_url("user-1", "myspace", "/settings")
            .await;
        assert!(matches!(
            result,
            Err(SyndicastError::OAuth(OAuthError::UnsupportedPlatform(_)))
        ));
    }

    #[tokio::test]
    async fn test_authorization_url_unconfigured_platform() {
        let (coordinator, _db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        // instagram is not in the test config
        let result = coordinator
            .authorization_url("user-1", "instagram", "/settings")
            .await;
        assert!(matches!(
            result,
            Err(SyndicastError::OAuth(OAuthError::MissingClientCredentials(_)))
        ));
    }

    #[tokio::test]
    async fn test_authorization_url_includes_pkce_for_twitter() {
        let (coordinator, _db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let request = coordinator
            .authorization_url("user-1", "twitter", "/settings")
            .await
            .unwrap();

        assert!(request.url.contains("code_challenge="));
        assert!(request.url.contains("code_challenge_method=S256"));
        assert!(request.url.contains("client_id=twitter-client"));
    }

    #[tokio::test]
    async fn test_authorization_url_omits_pkce_for_linkedin() {
        let (coordinator, _db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let request = coordinator
            .authorization_url("user-1", "linkedin", "/settings")
            .await
            .unwrap();

        assert!(!request.url.contains("code_challenge"));
    }

    #[tokio::test]
    async fn test_authorization_url_reddit_requests_permanent_duration() {
        let (coordinator, _db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let request = coordinator
            .authorization_url("user-1", "reddit", "/settings")
            .await
            .unwrap();

        assert!(request.url.contains("duration=permanent"));
    }

    #[tokio::test]
    async fn test_exchange_code_persists_encrypted_connection() {
        let (coordinator, db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let request = coordinator
            .authorization_url("user-1", "twitter", "/settings")
            .await
            .unwrap();

        let outcome = coordinator
            .exchange_code("twitter", "auth-code", &request.state)
            .await
            .unwrap();

        assert_eq!(outcome.user_id, "user-1");
        assert_eq!(outcome.return_url, "/settings");
        assert_eq!(outcome.profile.platform_user_id, "pid-42");

        let connection = db
            .get_connection_for("user-1", Platform::Twitter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(connection.status, ConnectionStatus::Active);
        assert_ne!(connection.access_token, "fresh-access");
        assert!(looks_encrypted(&connection.access_token));
        assert!(connection.token_expires_at.is_some());

        // The stored envelope decrypts back to the granted token
        assert_eq!(
            coordinator.decrypt_access_token(&connection).unwrap(),
            "fresh-access"
        );
    }

    #[tokio::test]
    async fn test_exchange_code_rejects_forged_state() {
        let (coordinator, _db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let result = coordinator
            .exchange_code("linkedin", "auth-code", "forged.state")
            .await;
        assert!(matches!(
            result,
            Err(SyndicastError::OAuth(OAuthError::InvalidState(_)))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_rejects_platform_mismatch() {
        let (coordinator, _db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let request = coordinator
            .authorization_url("user-1", "linkedin", "/")
            .await
            .unwrap();

        let result = coordinator
            .exchange_code("reddit", "auth-code", &request.state)
            .await;
        assert!(matches!(
            result,
            Err(SyndicastError::OAuth(OAuthError::InvalidState(_)))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_replayed_pkce_callback_fails() {
        let (coordinator, _db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let request = coordinator
            .authorization_url("user-1", "twitter", "/")
            .await
            .unwrap();

        coordinator
            .exchange_code("twitter", "auth-code", &request.state)
            .await
            .unwrap();

        // The verifier was consumed by the first exchange
        let replay = coordinator
            .exchange_code("twitter", "auth-code", &request.state)
            .await;
        assert!(matches!(
            replay,
            Err(SyndicastError::OAuth(OAuthError::InvalidState(_)))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_runs_long_lived_upgrade() {
        let mock = Arc::new(MockExchanger::succeeding(test_grant(), test_profile()));

        let db = Database::new_in_memory().await.unwrap();
        let vault = Arc::new(TokenVault::new("test-secret").unwrap());
        let coordinator = OAuthCoordinator::new(db, vault, test_config(), mock.clone());

        let request = coordinator
            .authorization_url("user-1", "facebook", "/")
            .await
            .unwrap();
        coordinator
            .exchange_code("facebook", "auth-code", &request.state)
            .await
            .unwrap();

        // Two exchanges: authorization code, then the fb_exchange_token upgrade
        let recorded = mock.exchange_calls();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0][0].1, "authorization_code");
        assert_eq!(recorded[1][0].1, "fb_exchange_token");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let (coordinator, db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let connection = Connection::new(
            "user-1".to_string(),
            Platform::Twitter,
            "envelope".to_string(),
        );
        db.upsert_connection(&connection).await.unwrap();

        let result = coordinator.refresh(&connection.id).await;
        assert!(matches!(
            result,
            Err(SyndicastError::OAuth(OAuthError::NoRefreshToken))
        ));

        // Connection left as-is, not downgraded
        let loaded = db.get_connection(&connection.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConnectionStatus::Active);
    }

    #[tokio::test]
    async fn test_refresh_success_rotates_tokens() {
        let (coordinator, db) =
            coordinator_with(MockExchanger::succeeding(test_grant(), test_profile())).await;

        let vault = TokenVault::new("test-secret").unwrap();
        let mut connection = Connection::new(
            "user-1".to_string(),
            Platform::Twitter,
            vault.encrypt("stale-access").unwrap(),
        );
        connection.refresh_token = Some(vault.encrypt("stale-refresh").unwrap());
        connection.token_expires_at = Some(chrono::Utc::now().timestamp() + 60);
        db.upsert_connection(&connection).await.unwrap();

        coordinator.refresh(&connection.id).await.unwrap();

        let loaded = db.get_connection(&connection.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConnectionStatus::Active);
        assert_eq!(vault.decrypt(&loaded.access_token), "fresh-access");
        assert_eq!(
            vault.decrypt(loaded.refresh_token.as_deref().unwrap()),
            "fresh-refresh"
        );
        assert!(loaded.token_expires_at.unwrap() > chrono::Utc::now().timestamp() + 3600);
    }

    #[tokio::test]
    async fn test_refresh_failure_marks_connection_error() {
        let (coordinator, db) =
            coordinator_with(MockExchanger::always_failing("invalid_grant")).await;

        let vault = TokenVault::new("test-secret").unwrap();
        let mut connection = Connection::new(
            "user-1".to_string(),
            Platform::Reddit,
            vault.encrypt("access").unwrap(),
        );
        connection.refresh_token = Some(vault.encrypt("refresh").unwrap());
        db.upsert_connection(&connection).await.unwrap();

        let result = coordinator.refresh(&connection.id).await;
        assert!(result.is_err());

        let loaded = db.get_connection(&connection.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConnectionStatus::Error);
        assert!(loaded.last_error.unwrap().contains("invalid_grant"));
    }
}
