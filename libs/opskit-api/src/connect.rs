//! Assembles the executor stacks for one target.

use std::sync::Arc;
use std::time::Duration;

use opskit_auth::{AuthClient, AuthConfig, Grant, UnlockClient};
use opskit_http::progress::{DEFAULT_POLLING_INTERVAL, ProgressClient};
use opskit_http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, HttpClient, HttpClientConfig, RetryConfig,
    SharedExecutor, TransportSecurity, parse_target,
};
use opskit_utils::SecretString;
use url::Url;

use crate::error::ApiError;
use crate::facades::Api;
use crate::merge::MergeStrategy;
use crate::orchestrator::{Executors, Orchestrator};

const PEM_MARKER: &str = "-----BEGIN";

/// Everything needed to talk to one Ops Manager.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host name or URL; `https` is assumed without a scheme
    pub target: String,

    pub grant: Grant,

    pub skip_ssl_validation: bool,

    /// PEM bundle, inline or as a file path
    pub ca_cert: Option<String>,

    pub connect_timeout: Duration,

    /// Deadline for regular calls. Uploads and downloads have none.
    pub request_timeout: Duration,

    pub polling_interval: Duration,

    /// Unlocks the installation before the first authenticated call
    pub decryption_passphrase: Option<SecretString>,

    pub retry: RetryConfig,

    pub merge_strategy: MergeStrategy,
}

impl ApiConfig {
    #[must_use]
    pub fn new(target: impl Into<String>, grant: Grant) -> Self {
        Self {
            target: target.into(),
            grant,
            skip_ssl_validation: false,
            ca_cert: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            decryption_passphrase: None,
            retry: RetryConfig::default(),
            merge_strategy: MergeStrategy::default(),
        }
    }

    /// Parses the target URL.
    ///
    /// # Errors
    /// [`ApiError::Config`] for an empty or unparsable target.
    pub fn target_url(&self) -> Result<Url, ApiError> {
        if self.target.trim().is_empty() {
            return Err(ApiError::Config("target is required".to_owned()));
        }
        parse_target(&self.target).map_err(|err| ApiError::Config(err.to_string()))
    }

    /// The CA bundle as PEM text, read from disk when a path was given.
    ///
    /// # Errors
    /// [`ApiError::Io`] when the file cannot be read.
    pub fn ca_pem(&self) -> Result<Option<String>, ApiError> {
        let Some(value) = self.ca_cert.as_deref().filter(|v| !v.trim().is_empty()) else {
            return Ok(None);
        };
        if value.contains(PEM_MARKER) {
            return Ok(Some(value.to_owned()));
        }
        std::fs::read_to_string(value)
            .map(Some)
            .map_err(|source| ApiError::Io {
                path: value.to_owned(),
                source,
            })
    }

    fn transport(
        &self,
        url: &Url,
        config: HttpClientConfig,
        pem: Option<&str>,
    ) -> Result<HttpClient, ApiError> {
        let mut builder = HttpClient::builder(url.clone())
            .with_config(config)
            .connect_timeout(self.connect_timeout)
            .skip_tls_verify(self.skip_ssl_validation);
        // an explicit http:// target is taken at its word
        if url.scheme() == "http" {
            builder = builder.transport(TransportSecurity::AllowInsecureHttp);
        }
        if let Some(pem) = pem {
            builder = builder.ca_certificates(pem);
        }
        builder.build().map_err(ApiError::Client)
    }
}

/// Builds the client for `config`.
///
/// Four executor stacks share one token cache, and one unlock when a
/// decryption passphrase is set:
///
/// | variant           | layers                                 |
/// |-------------------|----------------------------------------|
/// | authed            | unlock, auth, transport                |
/// | unauthed          | transport                              |
/// | progress          | progress, unlock, auth, streaming      |
/// | unauthed progress | progress, streaming                    |
///
/// The orchestrator adds the retry layer on top of each.
///
/// Must be called inside a tokio runtime.
///
/// # Errors
/// [`ApiError::Config`] for a bad target, [`ApiError::Client`] for bad TLS
/// material, [`ApiError::Auth`] for incomplete credentials and
/// [`ApiError::Io`] for an unreadable CA file.
pub fn connect(config: &ApiConfig) -> Result<Api, ApiError> {
    let url = config.target_url()?;
    let pem = config.ca_pem()?;
    if url.scheme() == "http" {
        tracing::warn!(url = %url, "target uses plain HTTP, credentials are sent unencrypted");
    }

    let standard = config.transport(
        &url,
        HttpClientConfig {
            request_timeout: Some(config.request_timeout),
            ..HttpClientConfig::standard()
        },
        pem.as_deref(),
    )?;
    let streaming = config.transport(&url, HttpClientConfig::streaming(), pem.as_deref())?;

    let auth = AuthClient::new(standard.clone(), AuthConfig::new(config.grant.clone()))?;
    let streaming_auth = auth.share_with(streaming.clone());

    let (authed, progress): (SharedExecutor, SharedExecutor) = match &config.decryption_passphrase {
        Some(passphrase) => {
            let unlock = UnlockClient::new(auth, standard.clone(), passphrase.clone())
                .with_poll_interval(config.polling_interval);
            let progress = ProgressClient::for_terminal(unlock.share_with(streaming_auth))
                .with_polling_interval(config.polling_interval);
            (Arc::new(unlock), Arc::new(progress))
        }
        None => (
            Arc::new(auth),
            Arc::new(
                ProgressClient::for_terminal(streaming_auth)
                    .with_polling_interval(config.polling_interval),
            ),
        ),
    };
    let unauthed_progress: SharedExecutor = Arc::new(
        ProgressClient::for_terminal(streaming).with_polling_interval(config.polling_interval),
    );

    tracing::debug!(
        url = %url,
        grant = config.grant.name(),
        unlock = config.decryption_passphrase.is_some(),
        "client configured"
    );

    let executors = Executors {
        authed,
        unauthed: Arc::new(standard),
        progress,
        unauthed_progress,
    };
    Ok(Api::new(Orchestrator::new(executors, &config.retry))
        .with_merge_strategy(config.merge_strategy)
        .with_polling_interval(config.polling_interval))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use opskit_http::HttpError;
    use std::io::Write;

    #[test]
    fn empty_target_is_rejected() {
        let config = ApiConfig::new("  ", Grant::SkipAuth);
        let err = config.target_url().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: target is required");
    }

    #[test]
    fn target_defaults_to_https() {
        let config = ApiConfig::new("opsman.example.com", Grant::SkipAuth);
        assert_eq!(config.target_url().unwrap().scheme(), "https");
    }

    #[test]
    fn inline_pem_is_used_as_is() {
        let mut config = ApiConfig::new("opsman.example.com", Grant::SkipAuth);
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        config.ca_cert = Some(pem.to_owned());
        assert_eq!(config.ca_pem().unwrap().as_deref(), Some(pem));
    }

    #[test]
    fn ca_path_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"-----BEGIN CERTIFICATE-----\n").unwrap();
        let mut config = ApiConfig::new("opsman.example.com", Grant::SkipAuth);
        config.ca_cert = Some(file.path().display().to_string());
        assert_eq!(
            config.ca_pem().unwrap().as_deref(),
            Some("-----BEGIN CERTIFICATE-----\n")
        );

        config.ca_cert = Some("/does/not/exist.pem".to_owned());
        assert!(matches!(config.ca_pem(), Err(ApiError::Io { .. })));
    }

    #[tokio::test]
    async fn bad_ca_bundle_keeps_its_cause() {
        let mut config = ApiConfig::new("opsman.example.com", Grant::SkipAuth);
        config.ca_cert =
            Some("-----BEGIN CERTIFICATE-----\n!!!\n-----END CERTIFICATE-----\n".to_owned());
        let err = connect(&config).unwrap_err();
        assert!(matches!(err, ApiError::Client(HttpError::Tls(_))), "{err}");
        let rendered = format!("{:#}", anyhow::Error::new(err));
        assert!(
            rendered.starts_with(
                "could not set up the http client: TLS configuration error: could not parse CA certificate"
            ),
            "{rendered}"
        );
    }

    #[tokio::test]
    async fn missing_password_fails_before_any_request() {
        let config = ApiConfig::new(
            "http://127.0.0.1:1",
            Grant::Password {
                username: "admin".to_owned(),
                password: SecretString::default(),
            },
        );
        assert!(matches!(connect(&config), Err(ApiError::Auth(_))));
    }
}
