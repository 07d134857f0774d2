//! TLS settings taken from endpoint URL parameters.
//!
//! Every driver reads the same `sslmode` parameter (`ssl-mode` and MySQL's
//! `useSSL=true` are accepted too) and maps it onto its client library.
//! PostgreSQL gets a rustls connector from [`TlsBuilder`].

use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::warn;

use crate::config::Endpoint;
use crate::error::{CopyError, Result};

/// TLS verification modes, named after PostgreSQL's `sslmode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// Encrypt but accept any server certificate.
    Require,
    /// Verify the certificate chain.
    VerifyCa,
    /// Verify the chain and the host name.
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "disable" | "disabled" => Ok(SslMode::Disable),
            "require" | "required" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify-identity" => Ok(SslMode::VerifyFull),
            other => Err(CopyError::Config(format!(
                "Invalid sslmode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    /// Mode requested by an endpoint's parameters, `Disable` when none is given.
    pub fn from_endpoint(endpoint: &Endpoint) -> Result<Self> {
        if let Some(mode) = endpoint
            .param("sslmode")
            .or_else(|| endpoint.param("ssl-mode"))
        {
            return Self::parse(mode);
        }
        match endpoint.param("usessl") {
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(SslMode::Require),
            _ => Ok(SslMode::Disable),
        }
    }

    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Whether the server certificate is checked at all.
    pub fn verifies(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }
}

/// Builds rustls connectors for tokio-postgres.
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    /// `None` when TLS is disabled.
    pub fn build(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.ssl_mode.requires_tls() {
            return Ok(None);
        }
        Ok(Some(MakeRustlsConnect::new(self.client_config())))
    }

    fn client_config(&self) -> ClientConfig {
        if self.ssl_mode.verifies() {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            return ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
        }

        warn!(
            "sslmode=require encrypts the connection but does not verify the server \
             certificate; use verify-full to protect against man-in-the-middle attacks"
        );
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth()
    }
}

/// Certificate verifier for `sslmode=require`.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, ConnectionSpec};

    fn endpoint(url: &str) -> Endpoint {
        resolve(&ConnectionSpec {
            name: "t".into(),
            url: url.into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_ssl_mode_parsing() {
        assert_eq!(SslMode::parse("disable").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::parse("REQUIRED").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("verify_ca").unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("verify-identity").unwrap(), SslMode::VerifyFull);
        assert!(SslMode::parse("sometimes").is_err());
    }

    #[test]
    fn test_ssl_mode_from_endpoint() {
        assert_eq!(
            SslMode::from_endpoint(&endpoint("postgres://h/db?sslmode=verify-full")).unwrap(),
            SslMode::VerifyFull
        );
        assert_eq!(
            SslMode::from_endpoint(&endpoint("jdbc:mysql://h/db?useSSL=true")).unwrap(),
            SslMode::Require
        );
        assert_eq!(
            SslMode::from_endpoint(&endpoint("postgres://h/db")).unwrap(),
            SslMode::Disable
        );
    }

    #[test]
    fn test_tls_builder() {
        assert!(TlsBuilder::new(SslMode::Disable).build().unwrap().is_none());
        assert!(TlsBuilder::new(SslMode::Require).build().unwrap().is_some());
        assert!(TlsBuilder::new(SslMode::VerifyFull).build().unwrap().is_some());
    }
}
