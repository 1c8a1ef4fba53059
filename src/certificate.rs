//! Leaf certificate inspection.
//!
//! The handshake verifier already enforces these rules under the default
//! config. Running them again on the presented leaf catches what a permissive
//! caller config lets through.

use std::net::IpAddr;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::diagnostic::{CertificateSummary, DiagnosticKind};
use crate::error::CheckError;

/// Parsed facts about a leaf certificate.
pub struct LeafCertificate {
    pub summary: CertificateSummary,
    pub ip_addresses: Vec<IpAddr>,
    pub currently_valid: bool,
}

pub fn parse_leaf(der: &[u8]) -> Result<LeafCertificate, CheckError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| CheckError::Certificate {
        kind: DiagnosticKind::HandshakeError,
        message: format!("could not parse server certificate: {e}"),
    })?;

    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        ip_addresses.push(ip);
                    }
                }
                _ => {}
            }
        }
    }

    // Legacy certificates only carry the name in the subject CN
    if dns_names.is_empty() {
        dns_names.extend(
            cert.subject()
                .iter_common_name()
                .filter_map(|cn| cn.as_str().ok())
                .map(str::to_string),
        );
    }

    let validity = cert.validity();
    Ok(LeafCertificate {
        summary: CertificateSummary {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: validity.not_before.to_string(),
            not_after: validity.not_after.to_string(),
            dns_names,
        },
        ip_addresses,
        currently_valid: validity.is_valid(),
    })
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

// RFC 6125 style: case-insensitive, a wildcard only as the whole left-most
// label, covering exactly one label.
pub fn name_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let hostname = hostname.trim_end_matches('.').to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(suffix) => hostname
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == hostname,
    }
}

impl LeafCertificate {
    pub fn covers(&self, hostname: &str) -> bool {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return self.ip_addresses.contains(&ip);
        }
        self.summary
            .dns_names
            .iter()
            .any(|pattern| name_matches(pattern, hostname))
    }

    // Validity window first, then the name. An empty hostname skips the name check.
    pub fn check(&self, hostname: &str) -> Result<(), CheckError> {
        if !self.currently_valid {
            return Err(CheckError::Certificate {
                kind: DiagnosticKind::Expired,
                message: format!(
                    "certificate is outside its validity period ({} to {})",
                    self.summary.not_before, self.summary.not_after
                ),
            });
        }
        if !hostname.is_empty() && !self.covers(hostname) {
            return Err(CheckError::Certificate {
                kind: DiagnosticKind::HostnameMismatch,
                message: format!(
                    "certificate is not valid for {hostname} (names: {})",
                    self.summary.dns_names.join(", ")
                ),
            });
        }
        Ok(())
    }
}
