//! TLS setup for `wss://` sessions.
//!
//! # Feature Flags
//!
//! TLS support requires both a crypto provider and root certificates:
//!
//! - **Crypto providers** (choose one):
//!   - `tls-ring` - Use ring crypto (default with `tls` feature)
//!   - `tls-aws-lc` - Use AWS LC crypto
//!
//! - **Root certificates** (choose one):
//!   - `tls-native-roots` - Use system root certificates (default with `tls` feature)
//!   - `tls-webpki-roots` - Use bundled Mozilla root certificates
//!
//! The `tls` feature enables `tls-ring` + `tls-native-roots` for convenience.
//!
//! Without a feature-gated provider, a provider installed via
//! `rustls::crypto::CryptoProvider::install_default()` is used.

use std::sync::Arc;

use rustls::ClientConfig;

use crate::error::TransportError;

/// Check if TLS features are properly configured.
///
/// Returns true if both a crypto provider AND root certificates are available.
#[inline]
pub const fn has_tls_support() -> bool {
    cfg!(any(feature = "tls-ring", feature = "tls-aws-lc"))
        && cfg!(any(
            feature = "tls-native-roots",
            feature = "tls-webpki-roots"
        ))
}

/// Try to get a crypto provider ConfigBuilder.
///
/// Priority:
/// 1. Feature-gated provider (tls-ring or tls-aws-lc)
/// 2. User-installed global default provider
/// 3. None if no provider available
fn try_get_crypto_provider_builder()
-> Option<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>> {
    #[cfg(feature = "tls-ring")]
    let provider = Some(Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    let provider = Some(Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    let provider = rustls::crypto::CryptoProvider::get_default().cloned();

    ClientConfig::builder_with_provider(provider?)
        .with_safe_default_protocol_versions()
        .ok()
}

/// Build the TLS configuration used when certificate verification is on.
///
/// Uses feature-gated root certificates (native or webpki). Returns `None`
/// if no crypto provider is available.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub fn default_tls_config() -> Option<ClientConfig> {
    let builder = try_get_crypto_provider_builder()?;
    let roots = build_root_store();

    Some(builder.with_root_certificates(roots).with_no_client_auth())
}

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn build_root_store() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();

    // Prefer native over webpki if both are enabled.
    #[cfg(feature = "tls-native-roots")]
    {
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            // Some certs may still have loaded.
            #[cfg(feature = "tracing")]
            tracing::debug!("errors loading native certs: {:?}", native_certs.errors);
        }
        roots.add_parsable_certificates(native_certs.certs);
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

/// A certificate verifier that accepts any certificate.
///
/// # Warning
///
/// The session is open to man-in-the-middle attacks. Used only for endpoints
/// configured with `tls_verify_cert = false`, which is how daemons with
/// self-signed certificates are reached.
#[derive(Debug)]
pub struct DangerousAcceptAnyCertVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousAcceptAnyCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Create a TLS config that accepts any certificate.
///
/// Returns `None` if no crypto provider is available.
pub fn danger_accept_invalid_certs_config() -> Option<ClientConfig> {
    let builder = try_get_crypto_provider_builder()?;

    Some(
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertVerifier))
            .with_no_client_auth(),
    )
}

/// Select the TLS configuration for an endpoint's verification flag.
pub(crate) fn tls_config_for(verify_cert: bool) -> Result<Arc<ClientConfig>, TransportError> {
    let config = if verify_cert {
        verified_config()?
    } else {
        danger_accept_invalid_certs_config().ok_or_else(no_provider)?
    };
    Ok(Arc::new(config))
}

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn verified_config() -> Result<ClientConfig, TransportError> {
    default_tls_config().ok_or_else(no_provider)
}

#[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
fn verified_config() -> Result<ClientConfig, TransportError> {
    Err(TransportError::Tls(
        "certificate verification requires root certificates; enable \
         `tls-native-roots` or `tls-webpki-roots`"
            .into(),
    ))
}

fn no_provider() -> TransportError {
    TransportError::Tls(
        "no crypto provider; enable `tls-ring` or `tls-aws-lc`, or install one via \
         `CryptoProvider::install_default()`"
            .into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_tls_support_matches_features() {
        let expected = cfg!(any(feature = "tls-ring", feature = "tls-aws-lc"))
            && cfg!(any(feature = "tls-native-roots", feature = "tls-webpki-roots"));
        assert_eq!(has_tls_support(), expected);
    }

    #[test]
    fn test_has_tls_support_means_verified_config_builds() {
        // No test installs a process-wide provider, so only features count.
        assert_eq!(has_tls_support(), tls_config_for(true).is_ok());
    }

    #[cfg(all(
        any(feature = "tls-ring", feature = "tls-aws-lc"),
        any(feature = "tls-native-roots", feature = "tls-webpki-roots")
    ))]
    #[test]
    fn test_default_tls_config() {
        let config = default_tls_config().expect("should build with features enabled");
        assert!(config.alpn_protocols.is_empty());
    }

    #[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
    #[test]
    fn test_accept_invalid_certs_config() {
        assert!(danger_accept_invalid_certs_config().is_some());
        assert!(tls_config_for(false).is_ok());
    }

    #[cfg(all(
        any(feature = "tls-ring", feature = "tls-aws-lc"),
        any(feature = "tls-native-roots", feature = "tls-webpki-roots")
    ))]
    #[test]
    fn test_tls_config_for_verified() {
        assert!(tls_config_for(true).is_ok());
    }
}
