//! Sends API calls through the right client stack.
//!
//! Every call goes through one of four executor stacks (authenticated or
//! not, with or without progress reporting), each wrapped in the transport
//! retry layer. Responses come back unvalidated from [`Orchestrator::execute`];
//! the other entry points apply the call's [`StatusPolicy`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, Request};
use opskit_http::progress::PollingInterval;
use opskit_http::{
    HttpExecutor, HttpResponse, RequestBody, RequestBuilder, RetryConfig, RetryingClient,
    SharedExecutor,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::validate::{StatusPolicy, Validated, validate};

/// Which client stack a call travels through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    #[default]
    Authed,
    /// No bearer token; used before authentication exists
    Unauthed,
    /// Authenticated with upload/download progress
    Progress,
    /// Unauthenticated with progress; installation imports
    UnauthedProgress,
}

/// One API call: where it goes, what it carries and which statuses it accepts.
#[must_use = "a Call does nothing until handed to the Orchestrator"]
pub struct Call {
    method: Method,
    path: String,
    variant: Variant,
    policy: StatusPolicy,
    request: RequestBuilder,
    polling_interval: Option<Duration>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("variant", &self.variant)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Call {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            request: RequestBuilder::new(method.clone(), path.clone()),
            method,
            path,
            variant: Variant::Authed,
            policy: StatusPolicy::Ok,
            polling_interval: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// JSON body with `Content-Type: application/json`
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.request = self.request.json(value);
        self
    }

    /// Pre-serialized JSON body
    pub fn json_bytes(mut self, bytes: impl Into<bytes::Bytes>) -> Self {
        self.request = self.request.json_bytes(bytes);
        self
    }

    /// `application/x-www-form-urlencoded` body
    pub fn form<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.request = self.request.form(value);
        self
    }

    /// Streamed body with its own content type
    pub fn body(mut self, body: RequestBody, content_type: &str) -> Self {
        self.request = self.request.body(body).header("content-type", content_type);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request = self.request.header(name, value);
        self
    }

    pub fn via(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn policy(mut self, policy: StatusPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Heartbeat cadence for progress calls
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn into_request(self) -> Result<Request<RequestBody>, ApiError> {
        let mut request = self.request.build()?;
        if let Some(interval) = self.polling_interval {
            request.extensions_mut().insert(PollingInterval(interval));
        }
        Ok(request)
    }
}

/// Client stacks the orchestrator dispatches onto.
#[derive(Clone)]
pub struct Executors {
    pub authed: SharedExecutor,
    pub unauthed: SharedExecutor,
    pub progress: SharedExecutor,
    pub unauthed_progress: SharedExecutor,
}

impl Executors {
    /// Sends every variant through the same executor.
    #[must_use]
    pub fn uniform<E>(executor: E) -> Self
    where
        E: HttpExecutor + 'static,
    {
        let shared: SharedExecutor = Arc::new(executor);
        Self {
            authed: Arc::clone(&shared),
            unauthed: Arc::clone(&shared),
            progress: Arc::clone(&shared),
            unauthed_progress: shared,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    authed: SharedExecutor,
    unauthed: SharedExecutor,
    progress: SharedExecutor,
    unauthed_progress: SharedExecutor,
    cancel: CancellationToken,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wraps each stack in the transport retry layer.
    #[must_use]
    pub fn new(executors: Executors, retry: &RetryConfig) -> Self {
        let wrap = |executor: SharedExecutor| -> SharedExecutor {
            Arc::new(RetryingClient::new(executor, retry.clone()))
        };
        Self {
            authed: wrap(executors.authed),
            unauthed: wrap(executors.unauthed),
            progress: wrap(executors.progress),
            unauthed_progress: wrap(executors.unauthed_progress),
            cancel: CancellationToken::new(),
        }
    }

    /// Same stacks, cancelled by `token`.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn executor(&self, variant: Variant) -> &SharedExecutor {
        match variant {
            Variant::Authed => &self.authed,
            Variant::Unauthed => &self.unauthed,
            Variant::Progress => &self.progress,
            Variant::UnauthedProgress => &self.unauthed_progress,
        }
    }

    /// Runs `work` unless the cancellation token fires first.
    ///
    /// # Errors
    /// Returns [`ApiError::Cancelled`] on cancellation, otherwise whatever
    /// `work` returns.
    pub async fn guard<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ApiError::Cancelled),
            result = work => result,
        }
    }

    /// Sends the call and returns the response as is, whatever its status.
    ///
    /// # Errors
    /// Returns [`ApiError::Transport`] when no response could be obtained,
    /// [`ApiError::Auth`] when credentials failed and [`ApiError::Cancelled`]
    /// on cancellation.
    #[tracing::instrument(skip_all, fields(method = %call.method, path = %call.path))]
    pub async fn execute(&self, call: Call) -> Result<HttpResponse, ApiError> {
        let executor = self.executor(call.variant);
        let request = call.into_request()?;
        let response = self
            .guard(async { executor.execute(request).await.map_err(ApiError::from) })
            .await?;
        tracing::debug!(status = response.status().as_u16(), "api response");
        Ok(HttpResponse::new(response))
    }

    /// Sends the call and applies its status policy.
    ///
    /// # Errors
    /// As [`execute`](Self::execute), plus [`ApiError::UnexpectedStatus`].
    pub async fn fetch(&self, call: Call) -> Result<Validated, ApiError> {
        let method = call.method.clone();
        let path = call.path.clone();
        let policy = call.policy;
        let response = self.execute(call).await?;
        self.guard(validate(response, policy, &method, &path)).await
    }

    /// Sends the call, applies its status policy and decodes the body.
    ///
    /// `None` when the policy mapped the status to "absent".
    ///
    /// # Errors
    /// As [`fetch`](Self::fetch), plus [`ApiError::Decode`].
    pub async fn fetch_json<T: DeserializeOwned>(&self, call: Call) -> Result<Option<T>, ApiError> {
        let path = call.path.clone();
        let validated = self.fetch(call).await?;
        self.guard(validated.json(&path)).await
    }

    /// Sends the call, applies its status policy and drops the body.
    ///
    /// Returns whether the resource was present.
    ///
    /// # Errors
    /// As [`fetch`](Self::fetch).
    pub async fn send(&self, call: Call) -> Result<bool, ApiError> {
        let validated = self.fetch(call).await?;
        let present = !validated.is_absent();
        validated.discard().await;
        Ok(present)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::{Response, StatusCode};
    use opskit_http::{HttpError, ResponseBody, full_body};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with a transport error the first `failures` times.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        seen: Mutex<Vec<(Method, String, Option<String>)>>,
    }

    impl Flaky {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpExecutor for Flaky {
        async fn execute(
            &self,
            request: Request<RequestBody>,
        ) -> Result<Response<ResponseBody>, HttpError> {
            let content_type = request
                .headers()
                .get("content-type")
                .map(|v| v.to_str().unwrap().to_owned());
            self.seen.lock().unwrap().push((
                request.method().clone(),
                request.uri().to_string(),
                content_type,
            ));
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(HttpError::Transport {
                    method: request.method().clone(),
                    url: request.uri().to_string(),
                    source: "connection reset by peer".into(),
                });
            }
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(full_body(r#"{"ok":true}"#))
                .unwrap())
        }
    }

    fn orchestrator(executor: Arc<Flaky>) -> Orchestrator {
        Orchestrator::new(Executors::uniform(executor), &RetryConfig::default())
    }

    #[tokio::test]
    async fn json_calls_carry_content_type() {
        let flaky = Flaky::new(0);
        let api = orchestrator(Arc::clone(&flaky));
        api.send(Call::put("/api/v0/staged/director/networks").json(&serde_json::json!({})))
            .await
            .unwrap();
        let seen = flaky.seen.lock().unwrap();
        assert_eq!(seen[0].2.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn one_transport_failure_is_retried() {
        let flaky = Flaky::new(1);
        let api = orchestrator(Arc::clone(&flaky));
        let value: Option<serde_json::Value> =
            api.fetch_json(Call::get("/api/v0/installations")).await.unwrap();
        assert_eq!(value, Some(serde_json::json!({"ok": true})));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn two_transport_failures_surface() {
        let flaky = Flaky::new(2);
        let api = orchestrator(Arc::clone(&flaky));
        let err = api.send(Call::get("/api/v0/installations")).await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(
            err.to_string()
                .starts_with("could not send api request to GET /api/v0/installations")
        );
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_shot_bodies_are_not_retried() {
        let flaky = Flaky::new(1);
        let api = orchestrator(Arc::clone(&flaky));
        let stream = futures::stream::iter([Ok::<_, std::io::Error>(bytes::Bytes::from_static(b"bundle"))]);
        let err = api
            .send(
                Call::post("/api/v0/available_products")
                    .body(RequestBody::from_stream(stream, 6), "application/octet-stream"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_calls_report_cancellation() {
        struct Hang;

        #[async_trait]
        impl HttpExecutor for Hang {
            async fn execute(
                &self,
                _request: Request<RequestBody>,
            ) -> Result<Response<ResponseBody>, HttpError> {
                std::future::pending().await
            }
        }

        let token = CancellationToken::new();
        let api = Orchestrator::new(Executors::uniform(Hang), &RetryConfig::default())
            .with_cancellation(token.clone());
        let call = tokio::spawn(async move { api.send(Call::get("/api/v0/installations")).await });
        tokio::task::yield_now().await;
        token.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn polling_interval_lands_in_extensions() {
        let request = Call::post("/api/v0/available_products")
            .polling_interval(Duration::from_secs(5))
            .into_request()
            .unwrap();
        assert_eq!(
            request.extensions().get::<PollingInterval>(),
            Some(&PollingInterval(Duration::from_secs(5)))
        );
    }
}
