//! Checks whether an SMTP server offers STARTTLS and presents a usable
//! certificate.
//!
//! ```no_run
//! let finding = starttls_check::check_hostname("mx.example.com", "mx.example.com:25", None);
//! if finding.is_empty() {
//!     println!("STARTTLS ok");
//! } else {
//!     println!("problem: {finding}");
//! }
//! ```

pub mod certificate;
pub mod checker;
pub mod connection;
pub mod diagnostic;
pub mod error;
pub mod tls;

pub use checker::{
    Checker, CheckerConfig, DEFAULT_TIMEOUT, check_hostname, check_hostname_async,
};
pub use diagnostic::{CertificateSummary, Diagnostic, DiagnosticKind, SessionInfo};
pub use error::CheckError;
