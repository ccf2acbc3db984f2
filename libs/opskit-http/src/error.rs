use std::time::Duration;

use http::Method;
use thiserror::Error;

/// Boxed error used for sources that come from hyper, tower or body streams
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP client error types
///
/// Only [`HttpError::Transport`] and [`HttpError::Timeout`] describe a failure
/// to obtain a response; a response with any status code is never an error at
/// this layer.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Network, TLS handshake or connection failure before a complete response arrived
    #[error("could not send api request to {method} {url}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },

    /// The per-call deadline elapsed
    #[error(
        "could not send api request to {method} {url}: request timed out after {}",
        humantime::format_duration(*timeout)
    )]
    Timeout {
        method: Method,
        url: String,
        timeout: Duration,
    },

    /// Request building failed
    #[error("failed to build request")]
    RequestBuild(#[from] http::Error),

    #[error("invalid header name")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// TLS setup failed while building the client
    #[error("TLS configuration error")]
    Tls(#[source] BoxError),

    /// URL could not be parsed or joined onto the base URL
    #[error("invalid URL '{url}': {reason}")]
    InvalidUri { url: String, reason: String },

    /// URL scheme rejected by the transport security mode
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// Reading the response body failed
    #[error("failed to read response body")]
    Body(#[source] BoxError),

    /// Response body exceeded the configured in-memory limit
    #[error("response body too large: limit {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// An upload source could not be reopened for another attempt
    #[error("could not rewind upload body")]
    Rewind(#[source] std::io::Error),

    #[error("JSON parsing failed")]
    Json(#[from] serde_json::Error),

    #[error("form encoding failed")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// A wrapping client layer failed on its own account (credentials,
    /// unlocking the installation). The source carries the layer's error type.
    #[error(transparent)]
    Layer(BoxError),

    /// Internal service failure (buffer worker died, channel closed)
    #[error("http service unavailable: internal failure")]
    ServiceClosed,
}

impl HttpError {
    /// Whether the failure happened before any response was received
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

/// Upload body produced a different number of bytes than it declared.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("upload body length mismatch: declared {declared} bytes, produced {produced} bytes")]
pub struct BodyLengthMismatch {
    pub declared: u64,
    pub produced: u64,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn transport_error_names_method_and_url() {
        let err = HttpError::Transport {
            method: Method::PUT,
            url: "https://opsman.example.com/api/v0/staged/director/properties".to_owned(),
            source: "connection reset by peer".into(),
        };
        assert_eq!(
            err.to_string(),
            "could not send api request to PUT https://opsman.example.com/api/v0/staged/director/properties"
        );
        assert!(err.is_transport());
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("connection reset by peer")
        );
    }

    #[test]
    fn timeout_is_transport() {
        let err = HttpError::Timeout {
            method: Method::GET,
            url: "https://x/api".to_owned(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_transport());
        assert!(err.to_string().starts_with("could not send api request to GET https://x/api"));
    }

    #[test]
    fn other_errors_are_not_transport() {
        assert!(!HttpError::ServiceClosed.is_transport());
        assert!(!HttpError::BodyTooLarge { limit: 1 }.is_transport());
    }

    #[test]
    fn length_mismatch_renders_both_sizes() {
        let err = BodyLengthMismatch {
            declared: 10,
            produced: 12,
        };
        assert_eq!(
            err.to_string(),
            "upload body length mismatch: declared 10 bytes, produced 12 bytes"
        );
    }
}
