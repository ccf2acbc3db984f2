use http::StatusCode;
use opskit_http::HttpError;
use thiserror::Error;

/// Errors raised while obtaining credentials or unlocking the installation.
///
/// No variant ever formats a password, client secret, passphrase or token.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The token endpoint could not be reached
    #[error("token could not be retrieved from target url")]
    Mint(#[source] HttpError),

    /// The token endpoint answered with something other than 200
    #[error("token could not be retrieved from target url: unexpected response {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("token could not be retrieved from target url: invalid token response: {0}")]
    InvalidResponse(String),

    #[error("token could not be retrieved from target url: unsupported token type: {0}")]
    UnsupportedTokenType(String),

    #[error("auth configuration error: {0}")]
    Config(String),

    #[error("could not make api request to unlock endpoint")]
    UnlockRequest(#[source] HttpError),

    #[error("could not unlock ops manager, check if the decryption passphrase is correct")]
    UnlockRejected,

    #[error("could not check Ops Manager status: {0}")]
    Availability(String),
}

impl AuthError {
    /// Wraps the error so it can travel through an executor chain.
    #[must_use]
    pub fn into_http(self) -> HttpError {
        HttpError::Layer(Box::new(self))
    }

    /// Recovers an auth error that was wrapped by [`into_http`](Self::into_http).
    #[must_use]
    pub fn from_http(err: &HttpError) -> Option<&Self> {
        match err {
            HttpError::Layer(source) => source.downcast_ref::<Self>(),
            _ => None,
        }
    }
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        err.into_http()
    }
}
