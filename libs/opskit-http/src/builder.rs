use std::time::Duration;

use bytes::Bytes;
use http::{HeaderValue, Response};
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use url::Url;

use crate::body::RequestBody;
use crate::client::{BufferedService, HttpClient, InnerService, Target};
use crate::config::{HttpClientConfig, TlsConfig, TransportSecurity};
use crate::error::HttpError;
use crate::response::ResponseBody;
use crate::tls;

/// Builder for [`HttpClient`]
pub struct HttpClientBuilder {
    base_url: Url,
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    /// Creates a builder for a client that resolves relative request paths
    /// against `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            config: HttpClientConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Per-call deadline; `None` lets calls run until the server answers.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    #[must_use]
    pub fn skip_tls_verify(mut self, skip: bool) -> Self {
        self.config.tls.skip_verify = skip;
        self
    }

    /// Adds PEM encoded CA certificates to the trust store.
    #[must_use]
    pub fn ca_certificates(mut self, pem: impl Into<String>) -> Self {
        self.config.tls.ca_certificates = Some(pem.into());
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain `http://` targets.
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Builds the client.
    ///
    /// Must be called inside a Tokio runtime: the request buffer spawns its worker task.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidScheme`] when the base URL scheme is not
    /// allowed, [`HttpError::Tls`] when TLS setup fails, and
    /// [`HttpError::InvalidHeaderValue`] for a malformed user agent.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let config = self.config;
        check_scheme(&self.base_url, config.transport)?;
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::debug!(url = %self.base_url, "plain HTTP transport");
        }

        let user_agent = HeaderValue::from_str(&config.user_agent)?;
        let https = build_https_connector(&config)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(idle) = config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle);
        }
        let hyper_client = client_builder.build::<_, RequestBody>(https);

        // Request flow: Buffer -> [Timeout] -> Decompression -> hyper
        let base = ServiceBuilder::new()
            .layer(DecompressionLayer::new())
            .service(hyper_client)
            .map_response(box_response)
            .map_err(BoxError::from);

        let inner: InnerService = match config.request_timeout {
            Some(timeout) => ServiceBuilder::new()
                .layer(TimeoutLayer::new(timeout))
                .service(base)
                .boxed_clone(),
            None => base.boxed_clone(),
        };

        let service: BufferedService = Buffer::new(inner, config.buffer_capacity.max(1));

        Ok(HttpClient {
            service,
            target: Target::new(self.base_url),
            user_agent,
            timeout: config.request_timeout,
            max_body_size: config.max_body_size,
        })
    }
}

fn check_scheme(url: &Url, transport: TransportSecurity) -> Result<(), HttpError> {
    match (url.scheme(), transport) {
        ("https", _) | ("http", TransportSecurity::AllowInsecureHttp) => Ok(()),
        ("http", TransportSecurity::TlsOnly) => Err(HttpError::InvalidScheme {
            scheme: "http".to_owned(),
            reason: "plain HTTP targets are not allowed".to_owned(),
        }),
        (other, _) => Err(HttpError::InvalidScheme {
            scheme: other.to_owned(),
            reason: "only http and https are supported".to_owned(),
        }),
    }
}

fn box_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

fn build_https_connector(
    config: &HttpClientConfig,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(config.connect_timeout));

    let builder = match tls::custom_client_config(&config.tls)? {
        Some(tls_config) => hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls_config),
        None => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::get_crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
    };

    let connector = if config.transport == TransportSecurity::AllowInsecureHttp {
        builder
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(http)
    } else {
        builder.https_only().enable_all_versions().wrap_connector(http)
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn builder_defaults() {
        let builder = HttpClientBuilder::new(url("https://opsman.example.com"));
        assert_eq!(builder.config.request_timeout, Some(Duration::from_secs(1800)));
        assert_eq!(builder.config.transport, TransportSecurity::TlsOnly);
    }

    #[test]
    fn builder_setters() {
        let builder = HttpClientBuilder::new(url("https://opsman.example.com"))
            .timeout(None)
            .connect_timeout(Duration::from_secs(3))
            .skip_tls_verify(true)
            .ca_certificates("pem")
            .user_agent("custom/1.0");
        assert_eq!(builder.config.request_timeout, None);
        assert_eq!(builder.config.connect_timeout, Duration::from_secs(3));
        assert!(builder.config.tls.skip_verify);
        assert_eq!(builder.config.tls.ca_certificates.as_deref(), Some("pem"));
        assert_eq!(builder.config.user_agent, "custom/1.0");
    }

    #[test]
    fn http_target_rejected_when_tls_only() {
        let err = check_scheme(&url("http://opsman"), TransportSecurity::TlsOnly).unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { .. }));
        check_scheme(&url("http://opsman"), TransportSecurity::AllowInsecureHttp).unwrap();
        check_scheme(&url("https://opsman"), TransportSecurity::TlsOnly).unwrap();
    }

    #[test]
    fn unsupported_scheme_rejected() {
        let err =
            check_scheme(&url("ftp://opsman"), TransportSecurity::AllowInsecureHttp).unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }

    #[tokio::test]
    async fn build_with_skip_verify() {
        HttpClientBuilder::new(url("https://opsman.example.com"))
            .skip_tls_verify(true)
            .build()
            .unwrap();
    }

    #[tokio::test]
    async fn build_rejects_bad_user_agent() {
        let result = HttpClientBuilder::new(url("https://opsman.example.com"))
            .user_agent("bad\x00agent")
            .build();
        assert!(matches!(result, Err(HttpError::InvalidHeaderValue(_))));
    }
}
