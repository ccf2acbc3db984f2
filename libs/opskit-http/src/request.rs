use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue};
use http::request::Parts;
use http::{Method, Request};
use serde::Serialize;

use crate::body::RequestBody;
use crate::error::HttpError;
use crate::executor::HttpExecutor;
use crate::response::HttpResponse;

pub const APPLICATION_JSON: &str = "application/json";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Fluent builder for a `Request<RequestBody>`
///
/// Header and serialization errors are deferred until [`build`](Self::build)
/// or [`send`](Self::send), so calls can be chained without `?` on each step.
///
/// ```ignore
/// let response = RequestBuilder::new(Method::PUT, "/api/v0/staged/director/properties")
///     .json(&properties)
///     .send(&client)
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .build() or .send() is called"]
pub struct RequestBuilder {
    method: Method,
    path: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: RequestBody,
    content_type: Option<&'static str>,
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: RequestBody::empty(),
            content_type: None,
            error: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Adds a header whose value must not be logged (credentials).
    pub fn sensitive_header(mut self, name: HeaderName, mut value: HeaderValue) -> Self {
        value.set_sensitive(true);
        self.headers.push((name, value));
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type: application/json`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.body = RequestBody::from_bytes(bytes);
                self.content_type = Some(APPLICATION_JSON);
            }
            Err(e) => self.error = Some(HttpError::Json(e)),
        }
        self
    }

    /// Pre-serialized JSON body.
    pub fn json_bytes(mut self, bytes: impl Into<bytes::Bytes>) -> Self {
        self.body = RequestBody::from_bytes(bytes);
        self.content_type = Some(APPLICATION_JSON);
        self
    }

    /// URL-encodes `value` as the body.
    pub fn form<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_urlencoded::to_string(value) {
            Ok(encoded) => {
                self.body = RequestBody::from_bytes(encoded);
                self.content_type = Some(FORM_URLENCODED);
            }
            Err(e) => self.error = Some(HttpError::FormEncode(e)),
        }
        self
    }

    /// Arbitrary body; the caller sets the content type via [`header`](Self::header).
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self.content_type = None;
        self
    }

    /// Assembles the request.
    ///
    /// # Errors
    /// Returns the first error recorded while building.
    pub fn build(self) -> Result<Request<RequestBody>, HttpError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut request = Request::builder()
            .method(self.method)
            .uri(self.path.as_str())
            .body(self.body)?;

        let headers = request.headers_mut();
        if let Some(content_type) = self.content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        for (name, value) in self.headers {
            headers.insert(name, value);
        }
        if let Some(len) = request.body().content_length()
            && len > 0
        {
            request
                .headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
        Ok(request)
    }

    /// Builds the request and sends it through `executor`.
    ///
    /// # Errors
    /// Returns build errors or whatever the executor returns.
    pub async fn send<E>(self, executor: &E) -> Result<HttpResponse, HttpError>
    where
        E: HttpExecutor + ?Sized,
    {
        let request = self.build()?;
        let response = executor.execute(request).await?;
        Ok(HttpResponse::new(response))
    }
}

/// Copies request metadata so the same request can be sent again with a
/// fresh body.
#[must_use]
pub fn clone_parts(parts: &Parts) -> Parts {
    let mut request = Request::new(());
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    *request.extensions_mut() = parts.extensions.clone();
    request.into_parts().0
}
