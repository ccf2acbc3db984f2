use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{Request, Response, StatusCode};
use opskit_http::{HttpError, HttpExecutor, RequestBody, ResponseBody, clone_parts};

use crate::config::{AuthConfig, Grant};
use crate::error::AuthError;
use crate::token::{CachedToken, Lease, TokenCache, mint_token};

/// Executor that attaches a bearer token to every request.
///
/// Tokens are minted through the wrapped executor and cached until shortly
/// before they expire. When the server answers 401 to a request that used a
/// cached token, the token is dropped and the request is sent once more with
/// a fresh one, provided its body can be replayed.
///
/// Clones share the token cache.
#[derive(Debug, Clone)]
pub struct AuthClient<E> {
    inner: E,
    config: Arc<AuthConfig>,
    cache: Arc<TokenCache>,
}

impl<E> AuthClient<E>
where
    E: HttpExecutor,
{
    /// # Errors
    /// Returns [`AuthError::Config`] when the configuration is incomplete.
    pub fn new(inner: E, config: AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;
        Ok(Self {
            inner,
            config: Arc::new(config),
            cache: Arc::new(TokenCache::new()),
        })
    }

    /// Same credentials and token cache in front of another executor.
    ///
    /// Used to authenticate the streaming transport with the token minted
    /// for regular calls.
    pub fn share_with<F>(&self, inner: F) -> AuthClient<F>
    where
        F: HttpExecutor,
    {
        AuthClient {
            inner,
            config: Arc::clone(&self.config),
            cache: Arc::clone(&self.cache),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &E {
        &self.inner
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Returns a usable token, minting one if needed.
    ///
    /// # Errors
    /// Returns the mint failure.
    pub async fn token(&self) -> Result<Arc<CachedToken>, AuthError> {
        self.lease().await.map(|lease| lease.token)
    }

    async fn lease(&self) -> Result<Lease, AuthError> {
        self.cache
            .get_or_mint(|| mint_token(&self.inner, &self.config))
            .await
    }
}

fn authorize(request: &mut Request<RequestBody>, token: &CachedToken) -> Result<(), HttpError> {
    let value = token.bearer_header()?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[async_trait]
impl<E> HttpExecutor for AuthClient<E>
where
    E: HttpExecutor,
{
    async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        if matches!(self.config.grant, Grant::SkipAuth) {
            return self.inner.execute(request).await;
        }

        let lease = self.lease().await?;
        let (parts, body) = request.into_parts();

        // A freshly minted token that is refused will not fare better the second time.
        let spare = if lease.minted {
            None
        } else {
            let replay = body.replay();
            replay.await.ok().flatten()
        };

        let mut first = Request::from_parts(clone_parts(&parts), body);
        authorize(&mut first, &lease.token)?;
        let response = self.inner.execute(first).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(body) = spare else {
            return Ok(response);
        };
        drop(response);

        tracing::debug!(
            method = %parts.method,
            path = %parts.uri,
            "cached access token was rejected; requesting a new one"
        );
        self.cache.invalidate(lease.token.generation());
        let lease = self.lease().await?;

        let mut retry = Request::from_parts(parts, body);
        authorize(&mut retry, &lease.token)?;
        self.inner.execute(retry).await
    }
}
