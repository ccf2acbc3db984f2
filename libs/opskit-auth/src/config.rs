use std::time::Duration;

use opskit_utils::SecretString;

use crate::error::AuthError;

/// Token endpoint on the target, relative to its base URL
pub const DEFAULT_TOKEN_PATH: &str = "/uaa/oauth/token";

/// Public UAA client used for the password grant
pub const PASSWORD_GRANT_CLIENT_ID: &str = "opsman";

/// How the client proves who it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// Resource owner password grant through the public `opsman` client
    Password {
        username: String,
        password: SecretString,
    },
    /// Client credentials grant
    ClientCredentials {
        client_id: String,
        client_secret: SecretString,
    },
    /// Requests are sent without credentials
    SkipAuth,
}

impl Grant {
    /// Picks the grant from whatever credentials were configured.
    ///
    /// A client id wins over a username, the same way the UAA login page
    /// prefers client credentials.
    #[must_use]
    pub fn from_credentials(
        username: Option<&str>,
        password: Option<&SecretString>,
        client_id: Option<&str>,
        client_secret: Option<&SecretString>,
    ) -> Self {
        match (client_id, username) {
            (Some(id), _) if !id.is_empty() => Self::ClientCredentials {
                client_id: id.to_owned(),
                client_secret: client_secret.cloned().unwrap_or_default(),
            },
            (_, Some(user)) if !user.is_empty() => Self::Password {
                username: user.to_owned(),
                password: password.cloned().unwrap_or_default(),
            },
            _ => Self::SkipAuth,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::ClientCredentials { .. } => "client_credentials",
            Self::SkipAuth => "skip-auth",
        }
    }
}

/// Credential settings for [`AuthClient`](crate::AuthClient).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Path of the token endpoint on the target
    pub token_path: String,

    pub grant: Grant,

    /// Lifetime assumed when the token response has no `expires_in` (default: 5 min)
    pub default_ttl: Duration,

    /// A token is refreshed this long before it expires (default: 30 s)
    pub refresh_margin: Duration,

    /// Attempts to mint a token when the transport fails (default: 3)
    pub mint_attempts: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_path: DEFAULT_TOKEN_PATH.to_owned(),
            grant: Grant::SkipAuth,
            default_ttl: Duration::from_secs(5 * 60),
            refresh_margin: Duration::from_secs(30),
            mint_attempts: 3,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(grant: Grant) -> Self {
        Self {
            grant,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(Grant::Password {
            username: username.into(),
            password: SecretString::new(password),
        })
    }

    #[must_use]
    pub fn client_credentials(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::new(Grant::ClientCredentials {
            client_id: client_id.into(),
            client_secret: SecretString::new(secret),
        })
    }

    #[must_use]
    pub fn skip_auth() -> Self {
        Self::new(Grant::SkipAuth)
    }

    /// Checks that the configured grant has what it needs.
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] for a missing password or client secret
    /// or an empty token path.
    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.token_path.starts_with('/') {
            return Err(AuthError::Config(format!(
                "token path must be absolute, got '{}'",
                self.token_path
            )));
        }
        match &self.grant {
            Grant::Password { username, password } => {
                if username.trim().is_empty() {
                    return Err(AuthError::Config("username must not be empty".into()));
                }
                if password.is_empty() {
                    return Err(AuthError::Config(
                        "password is required when a username is set".into(),
                    ));
                }
            }
            Grant::ClientCredentials {
                client_id,
                client_secret,
            } => {
                if client_id.trim().is_empty() {
                    return Err(AuthError::Config("client id must not be empty".into()));
                }
                if client_secret.is_empty() {
                    return Err(AuthError::Config(
                        "client secret is required when a client id is set".into(),
                    ));
                }
            }
            Grant::SkipAuth => {}
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn client_id_wins_over_username() {
        let secret = SecretString::new("s");
        let grant = Grant::from_credentials(Some("admin"), None, Some("ci"), Some(&secret));
        assert!(matches!(grant, Grant::ClientCredentials { ref client_id, .. } if client_id == "ci"));
    }

    #[test]
    fn username_selects_password_grant() {
        let password = SecretString::new("p");
        let grant = Grant::from_credentials(Some("admin"), Some(&password), Some(""), None);
        assert_eq!(grant.name(), "password");
    }

    #[test]
    fn nothing_configured_skips_auth() {
        assert_eq!(Grant::from_credentials(None, None, None, None), Grant::SkipAuth);
    }

    #[test]
    fn defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.token_path, "/uaa/oauth/token");
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.refresh_margin, Duration::from_secs(30));
        assert_eq!(config.mint_attempts, 3);
    }

    #[test]
    fn validate_rejects_missing_secrets() {
        let err = AuthConfig::password("admin", "").validate().unwrap_err();
        assert!(err.to_string().contains("password is required"));

        let err = AuthConfig::client_credentials("ci", "").validate().unwrap_err();
        assert!(err.to_string().contains("client secret is required"));

        AuthConfig::password("admin", "pw").validate().unwrap();
        AuthConfig::skip_auth().validate().unwrap();
    }

    #[test]
    fn debug_does_not_leak_secrets() {
        let config = AuthConfig::client_credentials("ci", "very-secret");
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
