use http::{Method, StatusCode};
use opskit_auth::AuthError;
use opskit_http::HttpError;
use thiserror::Error;

/// Problems with an HTML form page.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormError {
    #[error("could not find the form authenticity token on {path}")]
    MissingToken { path: String },

    #[error("could not find the expected form on {path}")]
    FormNotFound { path: String },

    #[error("could not parse html from {path}: {reason}")]
    Html { path: String, reason: String },

    #[error(
        "availability zone form lists {names} zone names but {guids} guids; refusing to guess which belongs to which"
    )]
    GuidCountMismatch { names: usize, guids: usize },
}

/// Everything a call through the API layer can end with besides success.
///
/// Each variant renders with a stable leading clause so that callers and
/// scripts can match on it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// No response was obtained, even after retrying
    #[error(transparent)]
    Transport(HttpError),

    /// The request could not be built or its body could not be read
    #[error(transparent)]
    Request(HttpError),

    /// The status code is not one the call accepts
    #[error("request failed: unexpected response from {method} {path}:\n{dump}")]
    UnexpectedStatus {
        method: Method,
        path: String,
        status: StatusCode,
        dump: String,
    },

    #[error("could not decode response from {path}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Form(#[from] FormError),

    /// The caller cancelled the call
    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    /// The HTTP transport could not be built from the settings
    #[error("could not set up the http client")]
    Client(#[source] HttpError),

    /// Caller-provided data the server would reject anyway
    #[error("{0}")]
    InvalidInput(String),

    /// A 2xx response without the fields the call needs
    #[error("unexpected response from {path}: {reason}")]
    MalformedResponse { path: String, reason: String },

    #[error("{path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "could not find product \"{0}\": it may be invalid, not yet be staged, or be marked for deletion"
    )]
    ProductNotFound(String),

    #[error("diagnostic report is currently unavailable")]
    DiagnosticReportUnavailable,

    /// Another error, prefixed with what was being attempted
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<ApiError>,
    },
}

impl ApiError {
    /// Prefixes the error with what the caller was doing.
    ///
    /// Cancellation is passed through untouched so that it stays
    /// recognizable at the top.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            other => Self::Context {
                context: context.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error behind any [`Context`](Self::Context) wrappers
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Status of an [`UnexpectedStatus`](Self::UnexpectedStatus) error
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self.root() {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Layer(source) => match source.downcast::<AuthError>() {
                Ok(auth) => Self::Auth(*auth),
                Err(other) => Self::Request(HttpError::Layer(other)),
            },
            err if err.is_transport() => Self::Transport(err),
            err => Self::Request(err),
        }
    }
}

/// Attaches context to the error of a fallible API result.
pub trait ResultExt<T> {
    /// # Errors
    /// Returns the original error wrapped in [`ApiError::Context`].
    fn context(self, context: &str) -> Result<T, ApiError>;
}

impl<T> ResultExt<T> for Result<T, ApiError> {
    fn context(self, context: &str) -> Result<T, ApiError> {
        self.map_err(|e| e.context(context))
    }
}
