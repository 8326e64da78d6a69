use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::ROOT_CERT_STORE;

/// Lowest protocol version the client will offer.
///
/// `Tls12` exists for gear that predates TLS 1.3 and will never see a
/// firmware update; leave the default alone otherwise.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    #[default]
    Tls13,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TlsSettings {
    #[serde(default)]
    pub min_version: TlsVersion,

    /// Restrict the offered cipher suites to these names (rustls notation,
    /// e.g. `TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384`). Empty means provider
    /// defaults.
    #[serde(default)]
    pub cipher_suites: Vec<String>,

    /// Accept any server certificate. For lab devices with self-signed
    /// certificates only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl TlsSettings {
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, rustls::Error> {
        let mut provider = rustls::crypto::aws_lc_rs::default_provider();

        if !self.cipher_suites.is_empty() {
            provider.cipher_suites.retain(|suite| {
                self.cipher_suites
                    .iter()
                    .any(|name| name == &format!("{:?}", suite.suite()))
            });
            if provider.cipher_suites.is_empty() {
                warn!(requested=?self.cipher_suites, "no cipher suite matched, falling back to provider defaults");
                provider = rustls::crypto::aws_lc_rs::default_provider();
            }
        }

        let versions: &[&SupportedProtocolVersion] = match self.min_version {
            TlsVersion::Tls12 => &[&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::Tls13 => &[&rustls::version::TLS13],
        };

        let provider = Arc::new(provider);
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(versions)?;

        let config = if self.accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier { provider }))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(ROOT_CERT_STORE.clone())
                .with_no_client_auth()
        };

        Ok(Arc::new(config))
    }
}

/// Certificate verifier that trusts everything. Signature checks are still
/// delegated to the provider so the handshake itself stays well-formed.
#[derive(Debug)]
struct AcceptAllVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAllVerifier {
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
        rustls::crypto::verify_tls12_signature(
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
        rustls::crypto::verify_tls13_signature(
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_tls13_only() {
        let settings: TlsSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.min_version, TlsVersion::Tls13);
        assert!(!settings.accept_invalid_certs);
    }

    #[test]
    fn test_min_version_rename() {
        let settings: TlsSettings = serde_json::from_str(r#"{"min_version": "1.2"}"#).unwrap();
        assert_eq!(settings.min_version, TlsVersion::Tls12);
    }
}
