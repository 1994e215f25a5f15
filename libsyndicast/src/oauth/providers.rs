//! Declarative OAuth provider profiles
//!
//! Each platform's quirks (PKCE, long-lived upgrade, header vs. body
//! client auth) are data consumed by one generic exchange routine. The
//! only per-platform code is user-info normalization, because every
//! provider shapes that response differently.

use crate::error::{OAuthError, Result};
use crate::types::Platform;

/// How the token endpoint expects client authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAuthStyle {
    /// client_id / client_secret in the form body
    FormBody,
    /// HTTP Basic auth header, credentials omitted from the body
    BasicHeader,
}

/// Secondary exchange that upgrades a short-lived token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongLivedExchange {
    pub grant_type: &'static str,
    /// Form parameter carrying the short-lived token
    pub token_param: &'static str,
}

#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub platform: Platform,
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub user_info_url: &'static str,
    pub scopes: &'static [&'static str],
    pub pkce: bool,
    pub long_lived_exchange: Option<LongLivedExchange>,
    pub token_auth: TokenAuthStyle,
    pub supports_refresh: bool,
    /// Platform-specific authorize-URL additions (e.g. reddit's
    /// duration=permanent, which is what makes it issue a refresh token)
    pub extra_authorize_params: &'static [(&'static str, &'static str)],
}

static TWITTER: ProviderProfile = ProviderProfile {
    platform: Platform::Twitter,
    authorize_url: "https://twitter.com/i/oauth2/authorize",
    token_url: "https://api.twitter.com/2/oauth2/token",
    user_info_url: "https://api.twitter.com/2/users/me",
    scopes: &["tweet.read", "tweet.write", "users.read", "offline.access"],
    pkce: true,
    long_lived_exchange: None,
    token_auth: TokenAuthStyle::BasicHeader,
    supports_refresh: true,
    extra_authorize_params: &[],
};

static LINKEDIN: ProviderProfile = ProviderProfile {
    platform: Platform::LinkedIn,
    authorize_url: "https://www.linkedin.com/oauth/v2/authorization",
    token_url: "https://www.linkedin.com/oauth/v2/accessToken",
    user_info_url: "https://api.linkedin.com/v2/userinfo",
    scopes: &["openid", "profile", "w_member_social"],
    pkce: false,
    long_lived_exchange: None,
    token_auth: TokenAuthStyle::FormBody,
    supports_refresh: true,
    extra_authorize_params: &[],
};

static FACEBOOK: ProviderProfile = ProviderProfile {
    platform: Platform::Facebook,
    authorize_url: "https://www.facebook.com/v19.0/dialog/oauth",
    token_url: "https://graph.facebook.com/v19.0/oauth/access_token",
    user_info_url: "https://graph.facebook.com/v19.0/me?fields=id,name",
    scopes: &["pages_manage_posts", "pages_read_engagement"],
    pkce: false,
    long_lived_exchange: Some(LongLivedExchange {
        grant_type: "fb_exchange_token",
        token_param: "fb_exchange_token",
    }),
    token_auth: TokenAuthStyle::FormBody,
    supports_refresh: false,
    extra_authorize_params: &[],
};

static INSTAGRAM: ProviderProfile = ProviderProfile {
    platform: Platform::Instagram,
    authorize_url: "https://api.instagram.com/oauth/authorize",
    token_url: "https://api.instagram.com/oauth/access_token",
    user_info_url: "https://graph.instagram.com/me?fields=id,username",
    scopes: &["instagram_basic", "instagram_content_publish"],
    pkce: false,
    long_lived_exchange: Some(LongLivedExchange {
        grant_type: "ig_exchange_token",
        token_param: "access_token",
    }),
    token_auth: TokenAuthStyle::FormBody,
    supports_refresh: false,
    extra_authorize_params: &[],
};

static REDDIT: ProviderProfile = ProviderProfile {
    platform: Platform::Reddit,
    authorize_url: "https://www.reddit.com/api/v1/authorize",
    token_url: "https://www.reddit.com/api/v1/access_token",
    user_info_url: "https://oauth.reddit.com/api/v1/me",
    scopes: &["identity", "submit"],
    pkce: false,
    long_lived_exchange: None,
    token_auth: TokenAuthStyle::BasicHeader,
    supports_refresh: true,
    extra_authorize_params: &[("duration", "permanent")],
};

pub fn profile(platform: Platform) -> &'static ProviderProfile {
    match platform {
        Platform::Twitter => &TWITTER,
        Platform::LinkedIn => &LINKEDIN,
        Platform::Facebook => &FACEBOOK,
        Platform::Instagram => &INSTAGRAM,
        Platform::Reddit => &REDDIT,
    }
}

/// Normalized identity fields extracted from a provider's user-info response
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub platform_user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// Map a provider's user-info JSON into the common shape
pub fn normalize_user_info(platform: Platform, body: &serde_json::Value) -> Result<UserProfile> {
    let profile = match platform {
        Platform::Twitter => {
            let data = &body["data"];
            UserProfile {
                platform_user_id: require_str(data, "id", platform)?,
                username: opt_str(data, "username"),
                display_name: opt_str(data, "name"),
            }
        }
        Platform::LinkedIn => UserProfile {
            platform_user_id: require_str(body, "sub", platform)?,
            username: opt_str(body, "email"),
            display_name: opt_str(body, "name"),
        },
        Platform::Facebook => UserProfile {
            platform_user_id: require_str(body, "id", platform)?,
            username: None,
            display_name: opt_str(body, "name"),
        },
        Platform::Instagram => UserProfile {
            platform_user_id: require_str(body, "id", platform)?,
            username: opt_str(body, "username"),
            display_name: None,
        },
        Platform::Reddit => UserProfile {
            platform_user_id: require_str(body, "id", platform)?,
            username: opt_str(body, "name"),
            display_name: opt_str(body, "name"),
        },
    };

    Ok(profile)
}

fn require_str(value: &serde_json::Value, field: &str, platform: Platform) -> Result<String> {
    value[field]
        .as_str()
        .map(String::from)
        .ok_or_else(|| {
            OAuthError::UserInfo(format!(
                "{} user info missing field '{}'",
                platform, field
            ))
            .into()
        })
}

fn opt_str(value: &serde_json::Value, field: &str) -> Option<String> {
    value[field].as_str().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_platform_has_a_profile() {
        for platform in Platform::ALL {
            let profile = profile(platform);
            assert_eq!(profile.platform, platform);
            assert!(profile.authorize_url.starts_with("https://"));
            assert!(profile.token_url.starts_with("https://"));
            assert!(!profile.scopes.is_empty());
        }
    }

    #[test]
    fn test_pkce_platforms() {
        assert!(profile(Platform::Twitter).pkce);
        assert!(!profile(Platform::LinkedIn).pkce);
        assert!(!profile(Platform::Reddit).pkce);
    }

    #[test]
    fn test_long_lived_exchange_platforms() {
        assert!(profile(Platform::Facebook).long_lived_exchange.is_some());
        assert!(profile(Platform::Instagram).long_lived_exchange.is_some());
        assert!(profile(Platform::Twitter).long_lived_exchange.is_none());
    }

    #[test]
    fn test_basic_header_platforms() {
        assert_eq!(profile(Platform::Twitter).token_auth, TokenAuthStyle::BasicHeader);
        assert_eq!(profile(Platform::Reddit).token_auth, TokenAuthStyle::BasicHeader);
        assert_eq!(profile(Platform::LinkedIn).token_auth, TokenAuthStyle::FormBody);
    }

    #[test]
    fn test_normalize_twitter_user_info() {
        let body = json!({"data": {"id": "12345", "username": "syndi", "name": "Syndi Cast"}});
        let profile = normalize_user_info(Platform::Twitter, &body).unwrap();

        assert_eq!(profile.platform_user_id, "12345");
        assert_eq!(profile.username, Some("syndi".to_string()));
        assert_eq!(profile.display_name, Some("Syndi Cast".to_string()));
    }

    #[test]
    fn test_normalize_linkedin_user_info() {
        let body = json!({"sub": "abc-def", "name": "Syndi Cast", "email": "s@example.com"});
        let profile = normalize_user_info(Platform::LinkedIn, &body).unwrap();

        assert_eq!(profile.platform_user_id, "abc-def");
        assert_eq!(profile.display_name, Some("Syndi Cast".to_string()));
    }

    #[test]
    fn test_normalize_reddit_user_info() {
        let body = json!({"id": "t2_abc", "name": "syndi_bot"});
        let profile = normalize_user_info(Platform::Reddit, &body).unwrap();

        assert_eq!(profile.platform_user_id, "t2_abc");
        assert_eq!(profile.username, Some("syndi_bot".to_string()));
    }

    #[test]
    fn test_normalize_missing_id_is_an_error() {
        let body = json!({"unexpected": true});
        assert!(normalize_user_info(Platform::Facebook, &body).is_err());
    }
}
