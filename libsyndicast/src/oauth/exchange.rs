//! The HTTP seam of the OAuth coordinator
//!
//! All token-endpoint and user-info traffic goes through the
//! [`TokenExchanger`] trait, so every grant variant (authorization code,
//! refresh, long-lived upgrade) shares one request path and tests can
//! swap in the mock.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::OAuthAppConfig;
use crate::error::{OAuthError, Result};
use crate::oauth::providers::{normalize_user_info, ProviderProfile, TokenAuthStyle, UserProfile};

/// Tokens returned by a token-endpoint exchange
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until expiry; absent for non-expiring tokens
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// POST the given grant parameters to the profile's token endpoint
    async fn exchange(
        &self,
        profile: &ProviderProfile,
        app: &OAuthAppConfig,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant>;

    /// Fetch and normalize the provider's user-info response
    async fn fetch_user_info(
        &self,
        profile: &ProviderProfile,
        access_token: &str,
    ) -> Result<UserProfile>;
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

/// Production exchanger backed by reqwest
pub struct HttpExchanger {
    client: reqwest::Client,
}

impl HttpExchanger {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpExchanger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenExchanger for HttpExchanger {
    async fn exchange(
        &self,
        profile: &ProviderProfile,
        app: &OAuthAppConfig,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant> {
        let mut form: Vec<(&str, &str)> = params.to_vec();

        let request = match profile.token_auth {
            TokenAuthStyle::BasicHeader => self
                .client
                .post(profile.token_url)
                .basic_auth(&app.client_id, Some(&app.client_secret)),
            TokenAuthStyle::FormBody => {
                form.push(("client_id", app.client_id.as_str()));
                form.push(("client_secret", app.client_secret.as_str()));
                self.client.post(profile.token_url)
            }
        };

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| OAuthError::Exchange(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Exchange(format!(
                "{} token endpoint returned {}: {}",
                profile.platform, status, body
            ))
            .into());
        }

        let body: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::Exchange(format!("malformed token response: {}", e)))?;

        Ok(TokenGrant {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_in: body.expires_in,
            scope: body.scope,
        })
    }

    async fn fetch_user_info(
        &self,
        profile: &ProviderProfile,
        access_token: &str,
    ) -> Result<UserProfile> {
        let response = self
            .client
            .get(profile.user_info_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OAuthError::UserInfo(format!("user info unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::UserInfo(format!(
                "{} user info returned {}",
                profile.platform, status
            ))
            .into());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OAuthError::UserInfo(format!("malformed user info: {}", e)))?;

        normalize_user_info(profile.platform, &body)
    }
}

// Mock exchanger is available for all builds (not just tests) to support
// integration tests.

use std::sync::{Arc, Mutex};

/// Configurable stand-in for the token endpoint.
///
/// Fails the first `fail_times` exchanges with the given error, then
/// hands out the configured grant. Every call is recorded.
pub struct MockExchanger {
    grant: TokenGrant,
    profile: UserProfile,
    fail_remaining: Arc<Mutex<u32>>,
    error: String,
    exchange_calls: Arc<Mutex<Vec<Vec<(String, String)>>>>,
}

impl MockExchanger {
    pub fn succeeding(grant: TokenGrant, profile: UserProfile) -> Self {
        Self {
            grant,
            profile,
            fail_remaining: Arc::new(Mutex::new(0)),
            error: String::new(),
            exchange_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_times(n: u32, error: &str, grant: TokenGrant, profile: UserProfile) -> Self {
        Self {
            grant,
            profile,
            fail_remaining: Arc::new(Mutex::new(n)),
            error: error.to_string(),
            exchange_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always_failing(error: &str) -> Self {
        Self {
            grant: TokenGrant {
                access_token: String::new(),
                refresh_token: None,
                expires_in: None,
                scope: None,
            },
            profile: UserProfile {
                platform_user_id: String::new(),
                username: None,
                display_name: None,
            },
            fail_remaining: Arc::new(Mutex::new(u32::MAX)),
            error: error.to_string(),
            exchange_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn exchange_call_count(&self) -> usize {
        self.exchange_calls.lock().unwrap().len()
    }

    pub fn exchange_calls(&self) -> Vec<Vec<(String, String)>> {
        self.exchange_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenExchanger for MockExchanger {
    async fn exchange(
        &self,
        _profile: &ProviderProfile,
        _app: &OAuthAppConfig,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant> {
        self.exchange_calls.lock().unwrap().push(
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );

        let mut remaining = self.fail_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining = remaining.saturating_sub(1);
            return Err(OAuthError::Exchange(self.error.clone()).into());
        }

        Ok(self.grant.clone())
    }

    async fn fetch_user_info(
        &self,
        _profile: &ProviderProfile,
        _access_token: &str,
    ) -> Result<UserProfile> {
        Ok(self.profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::providers::profile;
    use crate::types::Platform;

    fn test_grant() -> TokenGrant {
        TokenGrant {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_in: Some(3600),
            scope: None,
        }
    }

    fn test_profile() -> UserProfile {
        UserProfile {
            platform_user_id: "pid-1".to_string(),
            username: Some("user".to_string()),
            display_name: None,
        }
    }

    fn test_app() -> OAuthAppConfig {
        OAuthAppConfig {
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
            redirect_uri: "https://app.test/cb".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_succeeding() {
        let mock = MockExchanger::succeeding(test_grant(), test_profile());
        let grant = mock
            .exchange(profile(Platform::Twitter), &test_app(), &[("grant_type", "authorization_code")])
            .await
            .unwrap();

        assert_eq!(grant.access_token, "access");
        assert_eq!(mock.exchange_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_fails_then_succeeds() {
        let mock = MockExchanger::failing_times(2, "upstream 503", test_grant(), test_profile());
        let app = test_app();
        let twitter = profile(Platform::Twitter);

        assert!(mock.exchange(twitter, &app, &[]).await.is_err());
        assert!(mock.exchange(twitter, &app, &[]).await.is_err());
        assert!(mock.exchange(twitter, &app, &[]).await.is_ok());
        assert_eq!(mock.exchange_call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_records_params() {
        let mock = MockExchanger::succeeding(test_grant(), test_profile());
        mock.exchange(
            profile(Platform::Reddit),
            &test_app(),
            &[("grant_type", "refresh_token"), ("refresh_token", "r1")],
        )
        .await
        .unwrap();

        let calls = mock.exchange_calls();
        assert_eq!(calls[0][0], ("grant_type".to_string(), "refresh_token".to_string()));
    }
}
