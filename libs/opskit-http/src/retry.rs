//! Transport retry.
//!
//! Only failures that happen before a complete response arrives are retried.
//! Status codes are returned to the caller untouched. The body of every
//! attempt after the first comes from [`RequestBody::replay`]; a body that
//! cannot be replayed is sent exactly once.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use http::{Request, Response};
use rand::Rng;

use crate::body::RequestBody;
use crate::config::{ExponentialBackoff, RetryConfig};
use crate::error::HttpError;
use crate::executor::HttpExecutor;
use crate::request::clone_parts;
use crate::response::ResponseBody;

/// Executor wrapper that retries transport failures.
#[derive(Debug, Clone)]
pub struct RetryingClient<E> {
    inner: E,
    config: RetryConfig,
}

impl<E> RetryingClient<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    #[must_use]
    pub fn inner(&self) -> &E {
        &self.inner
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl<E> HttpExecutor for RetryingClient<E>
where
    E: HttpExecutor,
{
    async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let max_attempts = self.config.max_attempts.max(1);
        let (parts, mut body) = request.into_parts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let spare = if attempt < max_attempts {
                let replay = prepare_replay(&body);
                replay.await
            } else {
                None
            };

            let result = self
                .inner
                .execute(Request::from_parts(clone_parts(&parts), body))
                .await;

            match result {
                Err(err) if err.is_transport() && attempt < max_attempts => {
                    let Some(next) = spare else {
                        tracing::debug!(
                            method = %parts.method,
                            path = %parts.uri,
                            "request body cannot be replayed; not retrying"
                        );
                        return Err(err);
                    };
                    tracing::warn!(
                        method = %parts.method,
                        path = %parts.uri,
                        attempt,
                        max_attempts,
                        error = &err as &dyn std::error::Error,
                        "transport error; retrying request"
                    );
                    if let Some(backoff) = &self.config.backoff {
                        tokio::time::sleep(calculate_backoff(backoff, attempt - 1)).await;
                    }
                    body = next;
                }
                other => return other,
            }
        }
    }
}

fn prepare_replay(body: &RequestBody) -> impl Future<Output = Option<RequestBody>> + use<> {
    let replay = body.replay();
    async move {
        match replay.await {
            Ok(spare) => spare,
            Err(err) => {
                tracing::debug!(error = %err, "could not prepare request body for retry");
                None
            }
        }
    }
}

/// Delay before retry number `attempt` (0-based).
///
/// `min(initial * multiplier^attempt, max)`, plus up to 25% jitter when
/// enabled, never above `max`.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let base = backoff.initial.as_secs_f64() * multiplier.powi(exponent);
    let clamped = if base.is_finite() {
        base.min(max_secs).max(0.0)
    } else {
        max_secs
    };
    let mut delay = Duration::from_secs_f64(clamped);

    if backoff.jitter {
        let factor = rand::rng().random_range(0.0..=0.25);
        delay += delay.mul_f64(factor);
    }
    delay.min(Duration::from_secs_f64(max_secs))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::response::full_body;
    use bytes::Bytes;
    use futures::stream;
    use http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    enum Outcome {
        Refused,
        Status(u16),
    }

    /// Replays scripted outcomes and records every body it was sent.
    #[derive(Clone, Default)]
    struct ScriptedExecutor {
        script: Arc<Mutex<VecDeque<Outcome>>>,
        bodies: Arc<Mutex<Vec<Bytes>>>,
    }

    impl ScriptedExecutor {
        fn new(script: Vec<Outcome>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                bodies: Arc::default(),
            }
        }

        fn calls(&self) -> usize {
            self.bodies.lock().len()
        }
    }

    #[async_trait]
    impl HttpExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            request: Request<RequestBody>,
        ) -> Result<Response<ResponseBody>, HttpError> {
            let method = request.method().clone();
            let url = request.uri().to_string();
            let body = request
                .into_body()
                .collect()
                .await
                .map(http_body_util::Collected::to_bytes)
                .unwrap_or_default();
            self.bodies.lock().push(body);

            match self.script.lock().pop_front().unwrap_or(Outcome::Status(200)) {
                Outcome::Refused => Err(HttpError::Transport {
                    method,
                    url,
                    source: "connection refused".into(),
                }),
                Outcome::Status(code) => Ok(Response::builder()
                    .status(code)
                    .body(full_body("{}"))
                    .unwrap()),
            }
        }
    }

    fn put(body: RequestBody) -> Request<RequestBody> {
        Request::builder()
            .method(Method::PUT)
            .uri("/api/v0/staged/director/properties")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn transport_failure_is_retried_once_with_same_body() {
        let inner = ScriptedExecutor::new(vec![Outcome::Refused, Outcome::Status(200)]);
        let client = RetryingClient::new(inner.clone(), RetryConfig::default());

        let response = client
            .execute(put(RequestBody::from_bytes(r#"{"a":1}"#)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bodies = inner.bodies.lock().clone();
        assert_eq!(bodies, vec![Bytes::from(r#"{"a":1}"#), Bytes::from(r#"{"a":1}"#)]);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let inner = ScriptedExecutor::new(vec![Outcome::Refused, Outcome::Refused, Outcome::Refused]);
        let client = RetryingClient::new(inner.clone(), RetryConfig::default());

        let err = client.execute(put(RequestBody::empty())).await.unwrap_err();
        assert!(err.is_transport());
        assert!(
            err.to_string()
                .starts_with("could not send api request to PUT /api/v0/staged/director/properties")
        );
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn status_codes_are_never_retried() {
        let inner = ScriptedExecutor::new(vec![Outcome::Status(500), Outcome::Status(200)]);
        let client = RetryingClient::new(inner.clone(), RetryConfig::default());

        let response = client.execute(put(RequestBody::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn one_shot_body_is_not_retried() {
        let inner = ScriptedExecutor::new(vec![Outcome::Refused, Outcome::Status(200)]);
        let client = RetryingClient::new(inner.clone(), RetryConfig::default());

        let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"tile"))];
        let body = RequestBody::from_stream(stream::iter(chunks), 4);
        let err = client.execute(put(body)).await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn disabled_retry_sends_once() {
        let inner = ScriptedExecutor::new(vec![Outcome::Refused, Outcome::Status(200)]);
        let client = RetryingClient::new(inner.clone(), RetryConfig::disabled());

        client.execute(put(RequestBody::empty())).await.unwrap_err();
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn headers_survive_retry() {
        #[derive(Clone, Default)]
        struct HeaderRecorder {
            seen: Arc<Mutex<Vec<Option<String>>>>,
        }

        #[async_trait]
        impl HttpExecutor for HeaderRecorder {
            async fn execute(
                &self,
                request: Request<RequestBody>,
            ) -> Result<Response<ResponseBody>, HttpError> {
                let value = request
                    .headers()
                    .get("content-type")
                    .map(|v| v.to_str().unwrap().to_owned());
                let mut seen = self.seen.lock();
                seen.push(value);
                if seen.len() == 1 {
                    return Err(HttpError::Transport {
                        method: request.method().clone(),
                        url: request.uri().to_string(),
                        source: "reset".into(),
                    });
                }
                Ok(Response::new(full_body("")))
            }
        }

        let inner = HeaderRecorder::default();
        let client = RetryingClient::new(inner.clone(), RetryConfig::default());
        let mut request = put(RequestBody::from_bytes("{}"));
        request
            .headers_mut()
            .insert("content-type", "application/json".parse().unwrap());
        client.execute(request).await.unwrap();

        let seen = inner.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                Some("application/json".to_owned()),
                Some("application/json".to_owned())
            ]
        );
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(calculate_backoff(&backoff, 0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(&backoff, 2), Duration::from_millis(400));
        assert_eq!(calculate_backoff(&backoff, 10), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(5));
        for _ in 0..50 {
            let delay = calculate_backoff(&backoff, 0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }
}
