use serde::{Deserialize, Serialize};
use std::fmt;

/// What a single check found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Clean,
    NoTls,
    Untrusted,
    HostnameMismatch,
    Expired,
    HandshakeError,
    ProtocolError,
    ConnectionError,
    Timeout,
}

impl DiagnosticKind {
    // Findings about the server itself, as opposed to the check failing to run
    pub fn is_security_finding(self) -> bool {
        matches!(
            self,
            Self::NoTls | Self::Untrusted | Self::HostnameMismatch | Self::Expired
        )
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Clean => "CLEAN",
            Self::NoTls => "NO-TLS",
            Self::Untrusted => "UNTRUSTED",
            Self::HostnameMismatch => "HOSTNAME-MISMATCH",
            Self::Expired => "EXPIRED",
            Self::HandshakeError => "HANDSHAKE-ERROR",
            Self::ProtocolError => "PROTOCOL-ERROR",
            Self::ConnectionError => "CONNECTION-ERROR",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(label)
    }
}

/// Summary of the leaf certificate the server presented.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub not_before: String,
    pub not_after: String,
    pub dns_names: Vec<String>,
}

/// What was learned about the server along the way. Filled in as far as the
/// exchange got before it stopped.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub banner: String,
    pub capabilities: Vec<String>,
    pub supports_starttls: bool,
    pub protocol_version: Option<String>,
    pub cipher_suite: Option<String>,
    pub certificate: Option<CertificateSummary>,
}

/// Result of a check: a kind plus a human-readable message.
///
/// `to_string()` yields the legacy diagnostic string: empty when the check
/// found nothing, the message otherwise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

impl Diagnostic {
    pub fn clean() -> Self {
        Self {
            kind: DiagnosticKind::Clean,
            message: String::new(),
            session: None,
        }
    }

    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = Some(session);
        self
    }

    pub fn is_clean(&self) -> bool {
        self.kind == DiagnosticKind::Clean
    }
}

impl PartialEq for Diagnostic {
    // Session details (timings, banner text) don't make two results differ
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return Ok(());
        }
        if self.message.is_empty() {
            // A finding must never render as the empty "clean" string
            return write!(f, "{}", self.kind);
        }
        f.write_str(&self.message)
    }
}
