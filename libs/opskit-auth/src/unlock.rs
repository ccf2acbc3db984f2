//! Unlocking an installation encrypted with a decryption passphrase.
//!
//! After a reboot Ops Manager refuses every API call until it has been
//! unlocked. [`UnlockClient`] does that before the first request it forwards
//! and then waits for the authentication system to come up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::LOCATION;
use http::{Method, Request, Response, StatusCode, Uri};
use opskit_http::{HttpError, HttpExecutor, RequestBody, RequestBuilder, ResponseBody};
use opskit_utils::SecretString;
use rand::Rng;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::AuthError;

pub const UNLOCK_PATH: &str = "/api/v0/unlock";
pub const ENSURE_AVAILABILITY_PATH: &str = "/login/ensure_availability";

const UNLOCK_ATTEMPTS: usize = 3;
const PENDING_MARKER: &str = "Waiting for authentication system to start...";

/// Default pause between two availability checks
pub const DEFAULT_AVAILABILITY_INTERVAL: Duration = Duration::from_secs(1);

/// State of the authentication system as reported by `ensure_availability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Authentication has never been configured
    Unstarted,
    /// The authentication system is starting
    Pending,
    /// Ready to hand out tokens
    Complete,
}

impl Availability {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Pending => "pending",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asks the target where its authentication system stands.
///
/// The endpoint redirects to `/auth/cloudfoundry` once auth is up and to
/// `/setup` before it has been configured; while it starts, it answers 200
/// with a waiting page. The executor must not follow redirects.
///
/// # Errors
/// Returns [`AuthError::Availability`] for any other answer or a failed request.
pub async fn check_availability<E>(executor: &E) -> Result<Availability, AuthError>
where
    E: HttpExecutor + ?Sized,
{
    let response = RequestBuilder::new(Method::GET, ENSURE_AVAILABILITY_PATH)
        .send(executor)
        .await
        .map_err(|e| AuthError::Availability(format!("could not make request round trip: {e}")))?;

    match response.status() {
        StatusCode::FOUND => {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let uri: Uri = location.parse().map_err(|e| {
                AuthError::Availability(format!("could not parse redirect url: {e}"))
            })?;
            match uri.path() {
                "/auth/cloudfoundry" => Ok(Availability::Complete),
                "/setup" => Ok(Availability::Unstarted),
                other => Err(AuthError::Availability(format!(
                    "unexpected redirect location: {other}"
                ))),
            }
        }
        StatusCode::OK => {
            let body = response
                .text()
                .await
                .map_err(|e| AuthError::Availability(e.to_string()))?;
            if body.contains(PENDING_MARKER) {
                Ok(Availability::Pending)
            } else {
                Err(AuthError::Availability(format!(
                    "received OK with an unexpected body: {body}"
                )))
            }
        }
        status => Err(AuthError::Availability(format!(
            "unexpected response code: {status}"
        ))),
    }
}

#[derive(Serialize)]
struct UnlockRequest<'a> {
    passphrase: &'a str,
}

/// Executor that unlocks the installation once, then forwards every request
/// to the authenticated executor.
///
/// The unlock call and the availability checks go through the
/// unauthenticated executor. A failed unlock is attempted again on the next
/// request. Clients made with [`share_with`](Self::share_with) unlock at
/// most once between them.
#[derive(Debug)]
pub struct UnlockClient<A, U> {
    authed: A,
    unauthed: U,
    passphrase: SecretString,
    poll_interval: Duration,
    unlocked: Arc<OnceCell<()>>,
}

impl<A, U> UnlockClient<A, U>
where
    A: HttpExecutor,
    U: HttpExecutor,
{
    pub fn new(authed: A, unauthed: U, passphrase: SecretString) -> Self {
        Self {
            authed,
            unauthed,
            passphrase,
            poll_interval: DEFAULT_AVAILABILITY_INTERVAL,
            unlocked: Arc::new(OnceCell::new()),
        }
    }

    /// Same passphrase and unlock state in front of another executor.
    pub fn share_with<B>(&self, authed: B) -> UnlockClient<B, U>
    where
        B: HttpExecutor,
        U: Clone,
    {
        UnlockClient {
            authed,
            unauthed: self.unauthed.clone(),
            passphrase: self.passphrase.clone(),
            poll_interval: self.poll_interval,
            unlocked: Arc::clone(&self.unlocked),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlocked.initialized()
    }

    /// Unlocks the installation unless that already happened.
    ///
    /// # Errors
    /// See [`AuthError::UnlockRequest`], [`AuthError::UnlockRejected`] and
    /// [`AuthError::Availability`].
    pub async fn ensure_unlocked(&self) -> Result<(), AuthError> {
        self.unlocked
            .get_or_try_init(|| async {
                self.unlock().await?;
                self.wait_until_available().await
            })
            .await
            .map(|()| ())
    }

    async fn unlock(&self) -> Result<(), AuthError> {
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let result = RequestBuilder::new(Method::PUT, UNLOCK_PATH)
                .json(&UnlockRequest {
                    passphrase: self.passphrase.expose(),
                })
                .send(&self.unauthed)
                .await;
            match result {
                Err(HttpError::Timeout { .. }) if attempt < UNLOCK_ATTEMPTS => {
                    let jitter = rand::rng().random_range(0..50);
                    tracing::debug!(attempt, "unlock request timed out; retrying");
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                }
                Err(err) => return Err(AuthError::UnlockRequest(err)),
                Ok(response) => break response,
            }
        };

        let status = response.status();
        response.discard().await;
        if status != StatusCode::OK {
            tracing::debug!(%status, "unlock was refused");
            return Err(AuthError::UnlockRejected);
        }
        Ok(())
    }

    async fn wait_until_available(&self) -> Result<(), AuthError> {
        let mut trial = 1;
        loop {
            if trial == 2 {
                tracing::info!(
                    "Waiting for Ops Manager's auth systems to start. This may take a few minutes..."
                );
            }
            match check_availability(&self.unauthed).await? {
                Availability::Complete => return Ok(()),
                state => tracing::debug!(%state, trial, "auth system not ready"),
            }
            trial += 1;
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl<A, U> HttpExecutor for UnlockClient<A, U>
where
    A: HttpExecutor,
    U: HttpExecutor,
{
    async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        self.ensure_unlocked().await?;
        self.authed.execute(request).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use opskit_http::HttpClient;
    use url::Url;

    fn transport(server: &MockServer) -> HttpClient {
        HttpClient::builder(Url::parse(&server.base_url()).unwrap())
            .allow_insecure_http()
            .build()
            .unwrap()
    }

    fn client(server: &MockServer) -> UnlockClient<HttpClient, HttpClient> {
        UnlockClient::new(
            transport(server),
            transport(server),
            SecretString::new("passphrase"),
        )
        .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn classifies_availability() {
        let server = MockServer::start();
        let mut mock = server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(302).header("location", "https://example.com/setup");
        });
        let executor = transport(&server);
        assert_eq!(
            check_availability(&executor).await.unwrap(),
            Availability::Unstarted
        );
        mock.delete();

        mock = server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(302).header("location", "/auth/cloudfoundry");
        });
        assert_eq!(
            check_availability(&executor).await.unwrap(),
            Availability::Complete
        );
        mock.delete();

        mock = server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(200)
                .body("<p>Waiting for authentication system to start...</p>");
        });
        assert_eq!(
            check_availability(&executor).await.unwrap(),
            Availability::Pending
        );
        mock.delete();

        server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(502);
        });
        let err = check_availability(&executor).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not check Ops Manager status: unexpected response code: 502 Bad Gateway"
        );
    }

    #[tokio::test]
    async fn unexpected_redirect_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(302).header("location", "/elsewhere");
        });
        let err = check_availability(&transport(&server)).await.unwrap_err();
        assert!(err.to_string().contains("unexpected redirect location: /elsewhere"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn unlocks_once_then_forwards() {
        let server = MockServer::start();
        let unlock = server.mock(|when, then| {
            when.method(PUT)
                .path(UNLOCK_PATH)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"passphrase": "passphrase"}));
            then.status(200);
        });
        let available = server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(302).header("location", "/auth/cloudfoundry");
        });
        let api = server.mock(|when, then| {
            when.path("/api/v0/info");
            then.status(200);
        });

        let client = Arc::new(client(&server));
        for _ in 0..3 {
            let response = RequestBuilder::new(Method::GET, "/api/v0/info")
                .send(&client)
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        unlock.assert_calls(1);
        available.assert_calls(1);
        api.assert_calls(3);
        assert!(client.is_unlocked());
        assert!(!logs_contain("Waiting for Ops Manager's auth systems to start"));
    }

    #[tokio::test]
    async fn shared_clients_unlock_once() {
        let server = MockServer::start();
        let unlock = server.mock(|when, then| {
            when.method(PUT).path(UNLOCK_PATH);
            then.status(200);
        });
        server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(302).header("location", "/auth/cloudfoundry");
        });
        let api = server.mock(|when, then| {
            when.path("/api/v0/info");
            then.status(200);
        });

        let first = client(&server);
        let second = first.share_with(transport(&server));
        assert!(!second.is_unlocked());
        for executor in [&first, &second] {
            RequestBuilder::new(Method::GET, "/api/v0/info")
                .send(executor)
                .await
                .unwrap();
        }

        unlock.assert_calls(1);
        api.assert_calls(2);
        assert!(first.is_unlocked());
    }

    #[tokio::test]
    async fn wrong_passphrase_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path(UNLOCK_PATH);
            then.status(403);
        });
        let api = server.mock(|when, then| {
            when.path("/api/v0/info");
            then.status(200);
        });

        let client = client(&server);
        let err = RequestBuilder::new(Method::GET, "/api/v0/info")
            .send(&client)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "could not unlock ops manager, check if the decryption passphrase is correct"
        );
        assert!(!client.is_unlocked());
        api.assert_calls(0);
    }

    #[tokio::test]
    async fn unreachable_unlock_endpoint_is_reported() {
        let server = MockServer::start();
        let port = server.port();
        drop(server);

        let url = Url::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        let executor = || {
            HttpClient::builder(url.clone())
                .allow_insecure_http()
                .build()
                .unwrap()
        };
        let client = UnlockClient::new(executor(), executor(), SecretString::new("p"));
        let err = client.ensure_unlocked().await.unwrap_err();
        assert_eq!(err.to_string(), "could not make api request to unlock endpoint");
        let rendered = format!("{:#}", anyhow::Error::new(err));
        assert!(
            rendered.starts_with(&format!(
                "could not make api request to unlock endpoint: could not send api request to PUT http://127.0.0.1:{port}/api/v0/unlock: "
            )),
            "{rendered}"
        );
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn waits_while_auth_system_starts() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path(UNLOCK_PATH);
            then.status(200);
        });
        let mut pending = server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(200)
                .body("Waiting for authentication system to start...");
        });

        let client = Arc::new(client(&server));
        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.ensure_unlocked().await })
        };

        while pending.calls() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pending.delete();
        server.mock(|when, then| {
            when.path(ENSURE_AVAILABILITY_PATH);
            then.status(302).header("location", "/auth/cloudfoundry");
        });

        task.await.unwrap().unwrap();
        assert!(client.is_unlocked());
        assert!(logs_contain(
            "Waiting for Ops Manager's auth systems to start. This may take a few minutes..."
        ));
    }
}
