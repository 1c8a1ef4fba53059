use log::debug;
use rustls::pki_types::ServerName;
use rustls::{CertificateError, ClientConfig, ClientConnection};
use std::io;
use std::sync::{Arc, OnceLock};

use crate::diagnostic::DiagnosticKind;
use crate::error::CheckError;

// --- Global Crypto Provider Setup ---
static CRYPTO_PROVIDER_INSTALLATION: OnceLock<()> = OnceLock::new();

/// Installs aws-lc-rs as the process-wide rustls provider unless one is
/// already there. Safe to call any number of times.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER_INSTALLATION.get_or_init(|| {
        let provider = rustls::crypto::aws_lc_rs::default_provider();
        match provider.install_default() {
            Ok(()) => debug!("Installed default rustls crypto provider (aws-lc-rs)."),
            Err(current) => {
                debug!("Default crypto provider already installed: {current:?}. Using existing.");
            }
        }
    });
}
// -----------------------------------

/// Client config used when the caller supplies none: the platform's trust
/// store and hostname checks, no client auth.
pub fn default_client_config() -> Arc<ClientConfig> {
    install_crypto_provider();
    let verifier = rustls_platform_verifier::Verifier::new();
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Arc::new(config)
}

/// Client config that accepts any certificate chain. Handshake signatures
/// are still verified, and the checker's own leaf checks (validity window,
/// hostname) still run on what the server sent.
pub fn insecure_client_config() -> Arc<ClientConfig> {
    install_crypto_provider();
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification {}))
        .with_no_client_auth();
    Arc::new(config)
}

// The name to verify against: the logical hostname if given, otherwise
// whatever host the address points at (which may be an IP literal).
pub fn server_name_for(hostname: &str, address: &str) -> Result<ServerName<'static>, CheckError> {
    let name = if hostname.is_empty() {
        host_part(address)
    } else {
        hostname
    };
    let name = name.trim_end_matches('.');
    ServerName::try_from(name.to_string())
        .map_err(|_| CheckError::InvalidServerName(name.to_string()))
}

// "mx.example.com:25" -> "mx.example.com", "[::1]:25" -> "::1"
pub fn host_part(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    match address.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 address
        Some((host, _)) if !host.contains(':') => host,
        _ => address,
    }
}

/// Sorts a failed handshake into the finding it represents.
pub fn classify_handshake_error(err: &io::Error) -> DiagnosticKind {
    if err.kind() == io::ErrorKind::TimedOut {
        return DiagnosticKind::Timeout;
    }
    let Some(tls_err) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    else {
        return match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => DiagnosticKind::ConnectionError,
            _ => DiagnosticKind::HandshakeError,
        };
    };
    match tls_err {
        rustls::Error::InvalidCertificate(cert_err) => match cert_err {
            CertificateError::UnknownIssuer | CertificateError::BadSignature => {
                DiagnosticKind::Untrusted
            }
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. } => {
                DiagnosticKind::HostnameMismatch
            }
            CertificateError::Expired
            | CertificateError::ExpiredContext { .. }
            | CertificateError::NotValidYet
            | CertificateError::NotValidYetContext { .. } => DiagnosticKind::Expired,
            _ => DiagnosticKind::HandshakeError,
        },
        _ => DiagnosticKind::HandshakeError,
    }
}

// Negotiated protocol version and cipher suite, for the session report
pub fn negotiated_parameters(conn: &ClientConnection) -> (Option<String>, Option<String>) {
    let version = conn.protocol_version().map(|v| format!("{v:?}"));
    let suite = conn
        .negotiated_cipher_suite()
        .map(|s| format!("{:?}", s.suite()));
    (version, suite)
}

// --- Module for Dangerous TLS Config (Use with extreme caution) ---
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::verify_tls12_signature;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoCertificateVerification {}

    impl ServerCertVerifier for NoCertificateVerification {
        // Dangerously verify any certificate
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        // Use default verification logic for signatures (important!)
        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                // Use the default provider's algorithms
                &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
            )
        }

        // Use default verification logic for signatures (important!)
        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                // Use the default provider's algorithms
                &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
            )
        }

        // Provide supported schemes from the default provider
        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
// ---------------------------------------------------------------------
