use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderValue, Method, Request, Response, Uri};
use tower::buffer::Buffer;
use tower::util::BoxCloneService;
use tower::{BoxError, Service, ServiceExt};
use url::Url;

use crate::body::RequestBody;
use crate::builder::HttpClientBuilder;
use crate::error::HttpError;
use crate::executor::HttpExecutor;
use crate::response::ResponseBody;

/// Future returned by the type-erased inner service
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, BoxError>> + Send>>;

pub(crate) type InnerService =
    BoxCloneService<Request<RequestBody>, Response<ResponseBody>, BoxError>;

/// Buffered service shared by all clones of an [`HttpClient`]
pub type BufferedService = Buffer<Request<RequestBody>, ServiceFuture>;

/// Base URL every relative request path is resolved against
#[derive(Debug, Clone)]
pub(crate) struct Target {
    base: Url,
}

impl Target {
    pub(crate) fn new(base: Url) -> Self {
        Self { base }
    }

    /// Joins `uri` onto the base URL unless it is already absolute.
    fn resolve(&self, uri: &Uri) -> Result<Uri, HttpError> {
        if uri.scheme().is_some() {
            return Ok(uri.clone());
        }
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        let joined = self.base.join(path_and_query).map_err(|e| HttpError::InvalidUri {
            url: path_and_query.to_owned(),
            reason: e.to_string(),
        })?;
        joined.as_str().parse::<Uri>().map_err(|e| HttpError::InvalidUri {
            url: joined.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Raw HTTP transport to the platform.
///
/// Relative request paths are resolved against the base URL. Every response
/// is returned as-is with its body unread; nothing is retried here and no
/// status code is treated as a failure.
///
/// `HttpClient` is `Clone + Send + Sync`; clones share one connection pool.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) target: Target,
    pub(crate) user_agent: HeaderValue,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_body_size: usize,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.target.base.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    #[must_use]
    pub fn builder(base_url: Url) -> HttpClientBuilder {
        HttpClientBuilder::new(base_url)
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.target.base
    }

    /// Limit for response bodies read fully into memory
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

#[async_trait]
impl HttpExecutor for HttpClient {
    async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = self.target.resolve(&parts.uri)?;
        parts
            .headers
            .entry(http::header::USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());

        let method = parts.method.clone();
        let url = parts.uri.to_string();
        tracing::debug!(%method, %url, "sending request");

        let mut service = self.service.clone();
        service.ready().await.map_err(map_buffer_error)?;

        match service.call(Request::from_parts(parts, body)).await {
            Ok(response) => {
                tracing::debug!(%method, %url, status = response.status().as_u16(), "received response");
                Ok(response)
            }
            Err(err) => Err(self.classify(err, method, url)),
        }
    }
}

impl HttpClient {
    fn classify(&self, err: BoxError, method: Method, url: String) -> HttpError {
        if err.is::<tower::timeout::error::Elapsed>() {
            return HttpError::Timeout {
                method,
                url,
                timeout: self.timeout.unwrap_or_default(),
            };
        }
        match err.downcast::<HttpError>() {
            Ok(http_err) => *http_err,
            Err(source) => HttpError::Transport {
                method,
                url,
                source,
            },
        }
    }
}

/// Maps errors coming out of the buffer.
///
/// Errors from the inner service pass through; anything else means the
/// buffer worker is gone.
fn map_buffer_error(err: BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(error = %err, "buffer worker closed unexpectedly; service unavailable");
            HttpError::ServiceClosed
        }
    }
}
