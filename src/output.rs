use colored::{ColoredString, Colorize};

use crate::cli::OutputFormat;
use starttls_check::{Diagnostic, DiagnosticKind, SessionInfo};

#[derive(Clone, Debug)]
pub struct OutputHandler {
    pub format: OutputFormat,
    is_color: bool,
}

impl OutputHandler {
    pub fn new(format: OutputFormat, is_color: bool) -> Self {
        // JSON goes to stdout untouched; colors only matter for standard output
        colored::control::set_override(is_color && format == OutputFormat::Standard);
        Self { format, is_color }
    }

    fn paint(&self, text: &str, kind: DiagnosticKind) -> ColoredString {
        if !self.is_color {
            return text.normal();
        }
        match kind {
            DiagnosticKind::Clean => text.green().bold(),
            k if k.is_security_finding() => text.red().bold(),
            _ => text.yellow().bold(),
        }
    }

    pub fn print_target_info(
        &self,
        address: &str,
        hostname: &str,
        timeout_secs: u64,
        insecure: bool,
    ) {
        if self.format != OutputFormat::Standard {
            return;
        }
        let label_width = 15;
        let separator_len = label_width + 25;
        let separator = "-".repeat(separator_len).dimmed();

        eprintln!("{separator}");
        let title = "Target Configuration";
        let centered_title = format!("{title:^separator_len$}");
        eprintln!("{}", centered_title.bold());
        eprintln!("{separator}");

        eprintln!("{:<width$}: {}", "Address", address.cyan(), width = label_width);
        let hostname_display = if hostname.is_empty() {
            "(address host)"
        } else {
            hostname
        };
        eprintln!("{:<width$}: {}", "Hostname", hostname_display, width = label_width);
        eprintln!("{:<width$}: {}s", "Timeout", timeout_secs, width = label_width);
        let verification = if insecure {
            "leaf only (chain not verified)"
        } else {
            "platform trust store"
        };
        eprintln!("{:<width$}: {}", "Verification", verification, width = label_width);

        eprintln!("{separator}");
        eprintln!();
    }

    /// Formats an SMTP reply line, coloring the status code.
    pub fn format_server_response(&self, raw_response: &str) -> String {
        if raw_response.is_empty() {
            return if self.is_color {
                "No server response".dimmed().to_string()
            } else {
                "No server response".to_string()
            };
        }
        let first_line = raw_response.lines().next().unwrap_or(raw_response);
        let status_code = first_line
            .get(..3)
            .filter(|c| c.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or("");

        if status_code.is_empty() {
            return first_line.trim().to_string();
        }
        let message = first_line.get(4..).unwrap_or("").trim();
        if self.is_color {
            let colored_code = match &status_code[0..1] {
                "2" => status_code.green(),
                "4" => status_code.yellow(),
                "5" => status_code.red(),
                _ => status_code.normal(),
            };
            format!("{colored_code} {message}")
        } else {
            format!("{status_code} {message}")
        }
    }

    pub fn render_json(&self, address: &str, hostname: &str, diagnostic: &Diagnostic) -> String {
        let json = serde_json::json!({
            "address": address,
            "hostname": hostname,
            "kind": diagnostic.kind,
            "diagnostic": diagnostic.to_string(),
            "session": diagnostic.session,
        });
        serde_json::to_string(&json).unwrap_or_default()
    }

    /// Prints the result: a status line to stdout for standard format, one
    /// JSON object for JSON format.
    pub fn print_result(
        &self,
        address: &str,
        hostname: &str,
        diagnostic: &Diagnostic,
        verbose: bool,
    ) {
        match self.format {
            OutputFormat::Json => println!("{}", self.render_json(address, hostname, diagnostic)),
            OutputFormat::Standard => {
                let (prefix, status) = if diagnostic.is_clean() {
                    ("[+]", "STARTTLS OK")
                } else {
                    ("[-]", "")
                };
                let prefix = self.paint(prefix, diagnostic.kind);
                let label = self.paint(&format!("{}", diagnostic.kind), diagnostic.kind);
                if diagnostic.is_clean() {
                    println!("{prefix} {address:<20} {label} {status}");
                } else {
                    println!("{prefix} {address:<20} {label} {diagnostic}");
                }
                if verbose {
                    if let Some(session) = &diagnostic.session {
                        self.print_session(session);
                    }
                }
            }
        }
    }

    fn print_session(&self, session: &SessionInfo) {
        let label_width = 15;
        eprintln!();
        eprintln!(
            "{:<width$}: {}",
            "Banner",
            self.format_server_response(&session.banner),
            width = label_width
        );
        if !session.capabilities.is_empty() {
            eprintln!(
                "{:<width$}: {}",
                "Extensions",
                session.capabilities.join(", "),
                width = label_width
            );
        }
        if let Some(version) = &session.protocol_version {
            eprintln!("{:<width$}: {}", "Protocol", version, width = label_width);
        }
        if let Some(suite) = &session.cipher_suite {
            eprintln!("{:<width$}: {}", "Cipher", suite, width = label_width);
        }
        if let Some(cert) = &session.certificate {
            eprintln!("{:<width$}: {}", "Subject", cert.subject, width = label_width);
            eprintln!("{:<width$}: {}", "Issuer", cert.issuer, width = label_width);
            eprintln!(
                "{:<width$}: {} to {}",
                "Valid",
                cert.not_before,
                cert.not_after,
                width = label_width
            );
            eprintln!(
                "{:<width$}: {}",
                "Names",
                cert.dns_names.join(", "),
                width = label_width
            );
        }
    }
}
