//! TLS client configuration.
//!
//! Native root certificates are loaded once per process and cached, since the
//! OS certificate store lookup can be slow.

use std::sync::{Arc, OnceLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::config::{TlsConfig, TlsRootConfig};
use crate::error::HttpError;

static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_certs() -> Vec<CertificateDer<'static>> {
    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }
    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result.certs
}

/// Cached native root certificates (may be empty)
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE.get_or_init(load_native_certs).as_slice()
}

/// The globally installed crypto provider, or aws-lc-rs when none is installed.
pub fn get_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Parses every certificate in a PEM bundle.
///
/// # Errors
/// Returns [`HttpError::Tls`] when the text holds no certificate or a block is malformed.
pub fn parse_pem_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>, HttpError> {
    let certs = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| HttpError::Tls(format!("could not parse CA certificate: {e}").into()))?;
    if certs.is_empty() {
        return Err(HttpError::Tls(
            "could not parse CA certificate: no PEM certificate found".into(),
        ));
    }
    Ok(certs)
}

/// Builds a rustls client configuration when the settings need one.
///
/// Returns `Ok(None)` for the plain case (bundled web PKI roots, verification
/// on, no extra CA); the connector then uses the roots bundled with
/// hyper-rustls. An extra CA bundle is added on top of the selected roots.
///
/// # Errors
/// Returns [`HttpError::Tls`] when no usable root certificate is available or
/// the extra CA bundle is invalid.
pub fn custom_client_config(tls: &TlsConfig) -> Result<Option<rustls::ClientConfig>, HttpError> {
    if !tls.skip_verify && tls.ca_certificates.is_none() && tls.roots == TlsRootConfig::WebPki {
        return Ok(None);
    }

    let provider = get_crypto_provider();
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?;

    if tls.skip_verify {
        tracing::warn!("TLS certificate verification disabled");
        return Ok(Some(
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth(),
        ));
    }

    let mut roots = root_store(tls.roots);

    if let Some(pem) = &tls.ca_certificates {
        for cert in parse_pem_certificates(pem)? {
            roots
                .add(cert)
                .map_err(|e| HttpError::Tls(format!("could not add CA certificate: {e}").into()))?;
        }
    }

    if roots.is_empty() {
        return Err(HttpError::Tls("no root CA certificates available".into()));
    }

    Ok(Some(builder.with_root_certificates(roots).with_no_client_auth()))
}

/// Root store for the configured root source, before any extra CA is added.
fn root_store(source: TlsRootConfig) -> rustls::RootCertStore {
    match source {
        TlsRootConfig::WebPki => rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
        TlsRootConfig::Native => {
            let mut roots = rustls::RootCertStore::empty();
            let (added, ignored) =
                roots.add_parsable_certificates(native_root_certs().iter().cloned());
            if ignored > 0 {
                tracing::warn!(added, ignored, "some native root certificates could not be parsed");
            }
            roots
        }
    }
}

/// Verifier used when certificate validation is switched off.
///
/// Signatures are still checked so the handshake itself stays well-formed.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
