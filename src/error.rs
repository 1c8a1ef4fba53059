use std::io;
use thiserror::Error;

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::tls;

/// Everything that can stop a check. Never leaves the crate as an error: the
/// checker turns it into a [`Diagnostic`] at the boundary.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("could not resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out {0}")]
    Timeout(&'static str),

    #[error("connection closed {0}")]
    Closed(&'static str),

    #[error("network error {stage}: {source}")]
    Io {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Protocol(String),

    #[error("server does not advertise STARTTLS")]
    NoStartTls,

    #[error("server rejected STARTTLS: {0}")]
    StartTlsRejected(String),

    #[error("invalid TLS server name '{0}'")]
    InvalidServerName(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("{message}")]
    Certificate {
        kind: DiagnosticKind,
        message: String,
    },

    #[error("could not start I/O runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl CheckError {
    pub fn io(stage: &'static str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::TimedOut => Self::Timeout(stage),
            io::ErrorKind::UnexpectedEof => Self::Closed(stage),
            _ => Self::Io { stage, source },
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::Resolve { .. }
            | Self::Connect { .. }
            | Self::Closed(_)
            | Self::Io { .. }
            | Self::Runtime(_) => DiagnosticKind::ConnectionError,
            Self::Timeout(_) => DiagnosticKind::Timeout,
            Self::Protocol(_) | Self::StartTlsRejected(_) => DiagnosticKind::ProtocolError,
            Self::NoStartTls => DiagnosticKind::NoTls,
            Self::InvalidServerName(_) => DiagnosticKind::HandshakeError,
            Self::Handshake(e) => tls::classify_handshake_error(e),
            Self::Certificate { kind, .. } => *kind,
        }
    }
}

impl From<CheckError> for Diagnostic {
    fn from(err: CheckError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
