use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, Response};

use crate::body::RequestBody;
use crate::error::HttpError;
use crate::response::ResponseBody;

/// The one capability every client layer offers: turn a request into a response.
///
/// The transport, the retry wrapper, the authenticating client and the
/// progress client all implement it and wrap one another. A response with any
/// status code is `Ok`; only the failure to obtain a response is an error.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Sends the request and returns the response with its body unread.
    ///
    /// # Errors
    /// Returns [`HttpError`] when no response could be obtained.
    async fn execute(&self, request: Request<RequestBody>)
    -> Result<Response<ResponseBody>, HttpError>;
}

#[async_trait]
impl<T> HttpExecutor for Arc<T>
where
    T: HttpExecutor + ?Sized,
{
    async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        (**self).execute(request).await
    }
}

#[async_trait]
impl<T> HttpExecutor for Box<T>
where
    T: HttpExecutor + ?Sized,
{
    async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        (**self).execute(request).await
    }
}

/// Shared, type-erased executor
pub type SharedExecutor = Arc<dyn HttpExecutor>;
