//! Token minting and caching.
//!
//! [`TokenCache`] keeps the current token behind an `ArcSwapOption` so that
//! readers never block, and serializes minting behind an async mutex so that
//! concurrent callers that find no usable token share one refresh.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use base64::{Engine as _, engine::general_purpose};
use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderValue, Method, StatusCode};
use opskit_http::{HttpExecutor, RequestBuilder};
use opskit_utils::SecretString;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use zeroize::Zeroizing;

use crate::config::{AuthConfig, Grant, PASSWORD_GRANT_CLIENT_ID};
use crate::error::AuthError;

/// Deserialized token endpoint response.
///
/// Intentionally `Deserialize`-only so the token cannot be serialized into logs.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// An access token with the instant after which it should no longer be used.
#[derive(Debug)]
pub struct CachedToken {
    value: SecretString,
    refresh_at: Instant,
    generation: u64,
}

impl CachedToken {
    #[must_use]
    pub fn value(&self) -> &SecretString {
        &self.value
    }

    /// Monotonic number identifying this mint
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.refresh_at
    }

    /// `Authorization` header value, marked sensitive.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidResponse`] when the token holds characters
    /// that cannot appear in a header.
    pub fn bearer_header(&self) -> Result<HeaderValue, AuthError> {
        let mut value = HeaderValue::try_from(format!("Bearer {}", self.value.expose()))
            .map_err(|_| AuthError::InvalidResponse("access token is not a valid header value".into()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// A token handed out by the cache
#[derive(Debug, Clone)]
pub struct Lease {
    pub token: Arc<CachedToken>,
    /// `true` when the token was minted for this very call
    pub minted: bool,
}

/// Shared token slot with single-flight refresh.
#[derive(Debug, Default)]
pub struct TokenCache {
    current: ArcSwapOption<CachedToken>,
    mint_lock: Mutex<()>,
    generation: AtomicU64,
}

impl TokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, if it is still fresh.
    #[must_use]
    pub fn fresh(&self) -> Option<Arc<CachedToken>> {
        self.current.load_full().filter(|token| token.is_fresh())
    }

    /// Returns the cached token or mints a new one with `mint`.
    ///
    /// Only one caller mints at a time; callers that waited for the mint
    /// lock reuse the token minted while they waited.
    ///
    /// # Errors
    /// Returns whatever `mint` returns.
    pub async fn get_or_mint<F, Fut>(&self, mint: F) -> Result<Lease, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MintedToken, AuthError>>,
    {
        if let Some(token) = self.fresh() {
            return Ok(Lease {
                token,
                minted: false,
            });
        }

        let _guard = self.mint_lock.lock().await;
        if let Some(token) = self.fresh() {
            return Ok(Lease {
                token,
                minted: false,
            });
        }

        let minted = mint().await?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = Arc::new(CachedToken {
            value: minted.value,
            refresh_at: minted.refresh_at,
            generation,
        });
        self.current.store(Some(Arc::clone(&token)));
        tracing::debug!(generation, "stored new access token");
        Ok(Lease {
            token,
            minted: true,
        })
    }

    /// Drops the cached token if it is still the one identified by `generation`.
    pub fn invalidate(&self, generation: u64) {
        self.current.rcu(|current| match current {
            Some(token) if token.generation == generation => None,
            other => other.clone(),
        });
    }
}

/// Output of a mint, before the cache assigns it a generation
#[derive(Debug)]
pub struct MintedToken {
    value: SecretString,
    refresh_at: Instant,
}

/// Instant at which a token of `lifetime` issued now should be refreshed.
///
/// `margin` before expiry, or halfway through the lifetime when the margin
/// would eat all of it.
fn refresh_deadline(issued: Instant, lifetime: Duration, margin: Duration) -> Instant {
    let usable = if margin < lifetime {
        lifetime.saturating_sub(margin)
    } else {
        lifetime.div_f64(2.0)
    };
    issued + usable
}

/// Mints tokens against the token endpoint through `executor`.
///
/// Transport failures are retried up to `config.mint_attempts` times; any
/// response from the server is final.
///
/// # Errors
/// See [`AuthError`].
pub async fn mint_token<E>(executor: &E, config: &AuthConfig) -> Result<MintedToken, AuthError>
where
    E: HttpExecutor + ?Sized,
{
    let attempts = config.mint_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let issued = Instant::now();
        match request_token(executor, config).await {
            Err(AuthError::Mint(err)) if err.is_transport() && attempt < attempts => {
                tracing::warn!(
                    attempt,
                    attempts,
                    error = &err as &dyn std::error::Error,
                    "token could not be retrieved from target url; retrying"
                );
            }
            Err(err) => return Err(err),
            Ok(response) => return finish_mint(response, issued, config),
        }
    }
}

async fn request_token<E>(executor: &E, config: &AuthConfig) -> Result<TokenResponse, AuthError>
where
    E: HttpExecutor + ?Sized,
{
    let (fields, client_id, client_secret): (Vec<(&str, &str)>, &str, &str) = match &config.grant {
        Grant::Password { username, password } => (
            vec![
                ("grant_type", "password"),
                ("username", username.as_str()),
                ("password", password.expose()),
            ],
            PASSWORD_GRANT_CLIENT_ID,
            "",
        ),
        Grant::ClientCredentials {
            client_id,
            client_secret,
        } => (
            vec![("grant_type", "client_credentials")],
            client_id.as_str(),
            client_secret.expose(),
        ),
        Grant::SkipAuth => {
            return Err(AuthError::Config(
                "no credentials configured; cannot request a token".into(),
            ));
        }
    };

    let credentials = Zeroizing::new(format!("{client_id}:{client_secret}"));
    let encoded = Zeroizing::new(general_purpose::STANDARD.encode(credentials.as_bytes()));
    let basic = HeaderValue::try_from(format!("Basic {}", &*encoded))
        .map_err(|e| AuthError::Config(format!("client credentials are not header-safe: {e}")))?;

    let response = RequestBuilder::new(Method::POST, config.token_path.as_str())
        .sensitive_header(AUTHORIZATION, basic)
        .header(ACCEPT.as_str(), "application/json")
        .form(fields.as_slice())
        .send(executor)
        .await
        .map_err(AuthError::Mint)?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Rejected { status, body });
    }

    let bytes = response.bytes().await.map_err(AuthError::Mint)?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidResponse(e.to_string()))
}

fn finish_mint(
    response: TokenResponse,
    issued: Instant,
    config: &AuthConfig,
) -> Result<MintedToken, AuthError> {
    if let Some(kind) = &response.token_type
        && !kind.eq_ignore_ascii_case("bearer")
    {
        return Err(AuthError::UnsupportedTokenType(kind.clone()));
    }
    if response.access_token.is_empty() {
        return Err(AuthError::InvalidResponse("empty access_token".into()));
    }

    let lifetime = response
        .expires_in
        .map_or(config.default_ttl, Duration::from_secs);
    Ok(MintedToken {
        value: SecretString::new(response.access_token),
        refresh_at: refresh_deadline(issued, lifetime, config.refresh_margin),
    })
}
