use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response, StatusCode, Version};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

use crate::error::{BoxError, HttpError};

/// Maximum number of body bytes included in a response dump
pub const DUMP_BODY_LIMIT: usize = 8 * 1024;

/// Default limit for bodies read fully into memory (64 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Type-erased response body.
///
/// Holds either the raw connection body or a decompressed one.
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Builds a [`ResponseBody`] from an in-memory buffer.
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    http_body_util::Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Response wrapper with body-reading helpers
///
/// Dropping an `HttpResponse` (or any of the consuming readers returning)
/// releases the underlying connection.
#[derive(Debug)]
pub struct HttpResponse {
    inner: Response<ResponseBody>,
    max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn new(inner: Response<ResponseBody>) -> Self {
        Self {
            inner,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Unwraps into the raw `http::Response`
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.inner.into_body()
    }

    /// Reads the whole body, failing when it exceeds the size limit.
    ///
    /// # Errors
    /// Returns [`HttpError::Body`] on read failure and
    /// [`HttpError::BodyTooLarge`] when the limit is exceeded.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        let limit = self.max_body_size;
        let (bytes, truncated) = read_capped(self.inner.into_body(), limit).await?;
        if truncated {
            return Err(HttpError::BodyTooLarge { limit });
        }
        Ok(bytes)
    }

    /// Reads the body and decodes it as JSON.
    ///
    /// # Errors
    /// Returns [`HttpError::Json`] when the body is not valid JSON for `T`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads the body as UTF-8 text, replacing invalid sequences.
    ///
    /// # Errors
    /// Same as [`bytes`](Self::bytes).
    pub async fn text(self) -> Result<String, HttpError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Drains and drops the body so the connection can be reused.
    pub async fn discard(self) {
        let mut body = self.inner.into_body();
        while let Some(frame) = body.frame().await {
            if frame.is_err() {
                break;
            }
        }
    }

    /// Renders status line, headers and the first [`DUMP_BODY_LIMIT`] body
    /// bytes for diagnostics. Consumes the response.
    pub async fn dump(self) -> String {
        dump_response(self.inner).await
    }
}

impl From<Response<ResponseBody>> for HttpResponse {
    fn from(inner: Response<ResponseBody>) -> Self {
        Self::new(inner)
    }
}

/// Renders a response the way it appeared on the wire, body capped at
/// [`DUMP_BODY_LIMIT`] bytes.
pub async fn dump_response(response: Response<ResponseBody>) -> String {
    let (parts, body) = response.into_parts();
    let reason = parts.status.canonical_reason().unwrap_or("");
    let mut lines = vec![format!(
        "{} {} {reason}",
        version_label(parts.version),
        parts.status.as_u16()
    )];
    for (name, value) in &parts.headers {
        lines.push(format!("{name}: {}", String::from_utf8_lossy(value.as_bytes())));
    }
    lines.push(String::new());

    match read_capped(body, DUMP_BODY_LIMIT).await {
        Ok((bytes, truncated)) => {
            lines.push(String::from_utf8_lossy(&bytes).into_owned());
            if truncated {
                lines.push("[body truncated]".to_owned());
            }
        }
        Err(e) => lines.push(format!("[body unreadable: {e}]")),
    }
    lines.join("\n")
}

fn version_label(version: Version) -> &'static str {
    if version == Version::HTTP_2 {
        "HTTP/2.0"
    } else if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

/// Reads up to `limit` bytes; the flag reports whether more data was left.
async fn read_capped(mut body: ResponseBody, limit: usize) -> Result<(Bytes, bool), HttpError> {
    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Body)?;
        let Ok(data) = frame.into_data() else {
            continue;
        };
        let room = limit.saturating_sub(buf.len());
        if data.len() > room {
            buf.extend_from_slice(&data[..room]);
            return Ok((buf.freeze(), true));
        }
        buf.extend_from_slice(&data);
    }
    Ok((buf.freeze(), false))
}
