use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use super::Api;
use crate::error::ApiError;
use crate::orchestrator::Call;

/// An arbitrary authenticated request.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl RawRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }
}

/// Whatever the server answered, unvalidated.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Api {
    /// Sends `request` as is and returns the response whatever its status.
    ///
    /// A body without a `Content-Type` header is sent as JSON.
    ///
    /// # Errors
    /// Transport, credential and cancellation failures only.
    pub async fn raw_request(&self, request: RawRequest) -> Result<RawResponse, ApiError> {
        let mut call = Call::new(request.method, request.path);
        if let Some(body) = request.body {
            call = call.json_bytes(body);
        }
        // explicit headers replace the JSON content type
        for (name, value) in &request.headers {
            call = call.header(name, value);
        }

        let response = self.orchestrator.execute(call).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = self
            .orchestrator
            .guard(async { Ok(response.bytes().await?) })
            .await?;
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
