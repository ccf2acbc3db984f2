use std::time::Duration;

use url::Url;

use crate::error::HttpError;

/// Default User-Agent string for outgoing requests
pub const DEFAULT_USER_AGENT: &str = concat!("opsctl/", env!("CARGO_PKG_VERSION"));

/// Deadline applied to ordinary API calls when nothing else is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Deadline for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport security mode for the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Only `https://` targets are accepted
    #[default]
    TlsOnly,

    /// Plain `http://` is accepted as well
    ///
    /// Meant for mock servers in tests.
    AllowInsecureHttp,
}

/// Source of trusted root certificates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsRootConfig {
    /// Mozilla roots compiled into the binary
    #[default]
    WebPki,

    /// Roots from the operating system certificate store
    Native,
}

/// TLS verification settings
#[derive(Clone, Default)]
pub struct TlsConfig {
    pub roots: TlsRootConfig,

    /// Additional PEM encoded CA certificates appended to the root store
    pub ca_certificates: Option<String>,

    /// Accept any server certificate
    ///
    /// Appliances are commonly deployed with self-signed certificates.
    pub skip_verify: bool,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("roots", &self.roots)
            .field("ca_certificates", &self.ca_certificates.as_ref().map(String::len))
            .field("skip_verify", &self.skip_verify)
            .finish()
    }
}

/// Exponential backoff configuration for retries
///
/// Computes delay as: `min(initial * multiplier^attempt, max)` with optional jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Initial backoff duration (default: 100ms)
    pub initial: Duration,

    /// Maximum backoff duration (default: 5s)
    pub max: Duration,

    /// Backoff multiplier for exponential growth (default: 2.0)
    pub multiplier: f64,

    /// Adds a random 0-25% to each delay
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Create fast backoff for testing (1ms initial, 100ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Transport retry policy
///
/// Only failures that happen before a complete response arrives are retried.
/// HTTP status codes are never a retry trigger.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts including the first one (default: 2)
    pub max_attempts: usize,

    /// Delay between attempts; `None` retries immediately
    pub backoff: Option<ExponentialBackoff>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: None,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retry
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            backoff: None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// Overall transport configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-call deadline; `None` means the call may run forever
    ///
    /// Uploads and downloads use `None` because the server-side processing
    /// time after the last byte is unknown.
    pub request_timeout: Option<Duration>,

    /// Deadline for the TCP connect
    pub connect_timeout: Duration,

    pub user_agent: String,

    pub transport: TransportSecurity,

    pub tls: TlsConfig,

    /// Upper bound for responses read into memory (default: 64 MiB)
    pub max_body_size: usize,

    /// Queue depth of the internal request buffer (default: 256)
    pub buffer_capacity: usize,

    /// Idle connections are closed after this long (default: 90s)
    pub pool_idle_timeout: Option<Duration>,

    /// Idle connections kept per host (default: 8)
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            tls: TlsConfig::default(),
            max_body_size: 64 * 1024 * 1024,
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 8,
        }
    }
}

impl HttpClientConfig {
    /// Configuration for regular API calls
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
    }

    /// Configuration for uploads and downloads: no call deadline
    #[must_use]
    pub fn streaming() -> Self {
        Self {
            request_timeout: None,
            ..Self::default()
        }
    }

    /// Configuration for tests against local mock servers
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(10)),
            connect_timeout: Duration::from_secs(2),
            transport: TransportSecurity::AllowInsecureHttp,
            ..Self::default()
        }
    }
}

/// Parses a target such as `opsman.example.com` or `https://10.0.0.5:443`.
///
/// A missing scheme defaults to `https`. Paths are dropped since every request
/// carries an absolute path of its own.
///
/// # Errors
/// Returns [`HttpError::InvalidUri`] when the target cannot be parsed or has no host.
pub fn parse_target(target: &str) -> Result<Url, HttpError> {
    let trimmed = target.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&candidate).map_err(|e| HttpError::InvalidUri {
        url: target.to_owned(),
        reason: e.to_string(),
    })?;

    if url.host_str().is_none_or(str::is_empty) {
        return Err(HttpError::InvalidUri {
            url: target.to_owned(),
            reason: "missing host".to_owned(),
        });
    }

    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HttpClientConfig::default();
        assert_eq!(config.request_timeout, Some(Duration::from_secs(1800)));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert!(!config.tls.skip_verify);
        assert!(config.user_agent.starts_with("opsctl/"));
    }

    #[test]
    fn streaming_has_no_deadline() {
        assert_eq!(HttpClientConfig::streaming().request_timeout, None);
    }

    #[test]
    fn retry_defaults_to_two_attempts_without_backoff() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 2);
        assert!(retry.backoff.is_none());
        assert_eq!(RetryConfig::disabled().max_attempts, 1);
    }

    #[test]
    fn target_without_scheme_defaults_to_https() {
        let url = parse_target("opsman.example.com").unwrap();
        assert_eq!(url.as_str(), "https://opsman.example.com/");
    }

    #[test]
    fn target_keeps_explicit_scheme_and_port() {
        let url = parse_target("http://127.0.0.1:8080/some/path?x=1").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn target_must_have_host() {
        let err = parse_target("https://").unwrap_err();
        assert!(matches!(err, HttpError::InvalidUri { .. }), "{err:?}");
    }

    #[test]
    fn tls_debug_hides_certificate_text() {
        let tls = TlsConfig {
            ca_certificates: Some("-----BEGIN CERTIFICATE-----".to_owned()),
            ..TlsConfig::default()
        };
        let rendered = format!("{tls:?}");
        assert!(!rendered.contains("BEGIN"), "{rendered}");
    }
}
