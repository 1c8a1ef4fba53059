use log::{debug, info, warn};
use rustls::ClientConfig;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::certificate;
use crate::connection::{SmtpSession, close_stream, has_capability};
use crate::diagnostic::{Diagnostic, DiagnosticKind, SessionInfo};
use crate::error::CheckError;
use crate::tls;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const FALLBACK_HELO_NAME: &str = "starttls-check.local";

/// Knobs for a [`Checker`]. `Default` gives 10 second timeouts, the local
/// hostname for EHLO and the platform trust store.
#[derive(Clone, Debug)]
pub struct CheckerConfig {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub helo_name: String,
    pub tls_config: Option<Arc<ClientConfig>>,
    pub check_leaf: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        let helo_name = hostname::get().map_or_else(
            |_| FALLBACK_HELO_NAME.to_string(),
            |h| h.to_string_lossy().to_string(),
        );
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            io_timeout: DEFAULT_TIMEOUT,
            helo_name,
            tls_config: None,
            check_leaf: true,
        }
    }
}

impl CheckerConfig {
    // Sets both the connect and the per-step I/O timeout
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = limit;
        self.io_timeout = limit;
        self
    }

    pub fn with_helo_name(mut self, helo_name: impl Into<String>) -> Self {
        let helo_name = helo_name.into();
        if !helo_name.trim().is_empty() {
            self.helo_name = helo_name;
        }
        self
    }

    pub fn with_tls_config(mut self, tls_config: Option<Arc<ClientConfig>>) -> Self {
        self.tls_config = tls_config;
        self
    }

    pub fn with_leaf_check(mut self, check_leaf: bool) -> Self {
        self.check_leaf = check_leaf;
        self
    }
}

/// Runs STARTTLS checks. Holds configuration only; every check opens and
/// owns its own connection, so one `Checker` can serve concurrent checks.
#[derive(Clone, Debug, Default)]
pub struct Checker {
    config: CheckerConfig,
}

impl Checker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Connects to `address`, negotiates STARTTLS and verifies the
    /// certificate against `hostname` (or the address host when empty).
    pub async fn check(&self, hostname: &str, address: &str) -> Diagnostic {
        let mut session = SessionInfo::default();
        let diagnostic = match self.run(hostname, address, &mut session).await {
            Ok(()) => Diagnostic::clean(),
            Err(e) => Diagnostic::from(e),
        };

        match diagnostic.kind {
            DiagnosticKind::Clean => info!("{address}: STARTTLS negotiated, certificate accepted"),
            kind if kind.is_security_finding() => {
                warn!("{address}: {kind}: {}", diagnostic.message);
            }
            kind => info!("{address}: check did not complete ({kind}): {}", diagnostic.message),
        }
        diagnostic.with_session(session)
    }

    /// Blocking form of [`Checker::check`]. Spins up a single-threaded
    /// runtime for the duration of the call. Inside an async context the
    /// runtime gets a thread of its own, which still blocks the caller; async
    /// code should prefer [`Checker::check`].
    pub fn check_blocking(&self, hostname: &str, address: &str) -> Diagnostic {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.block_on_check(hostname, address);
        }

        // Nested block_on panics, so run outside the caller's runtime context
        debug!("Blocking check called inside a runtime, using a separate thread");
        std::thread::scope(|scope| {
            scope
                .spawn(|| self.block_on_check(hostname, address))
                .join()
                .unwrap_or_else(|_| {
                    Diagnostic::from(CheckError::Runtime(io::Error::other(
                        "check thread panicked",
                    )))
                })
        })
    }

    fn block_on_check(&self, hostname: &str, address: &str) -> Diagnostic {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();
        match runtime {
            Ok(rt) => rt.block_on(self.check(hostname, address)),
            Err(e) => Diagnostic::from(CheckError::Runtime(e)),
        }
    }

    async fn run(
        &self,
        hostname: &str,
        address: &str,
        info: &mut SessionInfo,
    ) -> Result<(), CheckError> {
        let tcp = self.connect(address).await?;
        let mut smtp = SmtpSession::new(tcp, self.config.io_timeout);

        let greeting = smtp.read_greeting().await?;
        info.banner = greeting.summary();

        let capabilities = smtp.hello(&self.config.helo_name).await?;
        info.supports_starttls = has_capability(&capabilities, "STARTTLS");
        info.capabilities = capabilities;
        if !info.supports_starttls {
            smtp.quit().await;
            return Err(CheckError::NoStartTls);
        }

        smtp.starttls().await?;

        let server_name = tls::server_name_for(hostname, address)?;
        let tls_config = self
            .config
            .tls_config
            .clone()
            .unwrap_or_else(tls::default_client_config);
        let connector = TlsConnector::from(tls_config);

        debug!("Starting TLS handshake with {address} as {server_name:?}");
        let handshake = connector.connect(server_name, smtp.into_inner());
        let mut tls_stream = match timeout(self.config.io_timeout, handshake).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(CheckError::Handshake(e)),
            Err(_) => return Err(CheckError::Timeout("during TLS handshake")),
        };

        let (_, conn) = tls_stream.get_ref();
        let (version, suite) = tls::negotiated_parameters(conn);
        debug!("Negotiated {version:?} with {suite:?}");
        info.protocol_version = version;
        info.cipher_suite = suite;

        let leaf_der = conn
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|der| der.as_ref().to_vec());

        let outcome = match leaf_der {
            None => Err(CheckError::Certificate {
                kind: DiagnosticKind::HandshakeError,
                message: "server presented no certificate".to_string(),
            }),
            Some(der) => certificate::parse_leaf(&der).and_then(|leaf| {
                info.certificate = Some(leaf.summary.clone());
                if self.config.check_leaf {
                    leaf.check(hostname)
                } else {
                    Ok(())
                }
            }),
        };

        close_stream(&mut tls_stream, CLOSE_TIMEOUT).await;
        outcome
    }

    // Resolve and dial, trying each resolved address in turn. The connect
    // timeout covers the whole sequence.
    async fn connect(&self, address: &str) -> Result<TcpStream, CheckError> {
        let dial = async {
            let addrs: Vec<_> = match lookup_host(address).await {
                Ok(resolved) => resolved.collect(),
                Err(source) => {
                    return Err(CheckError::Resolve {
                        address: address.to_string(),
                        source,
                    });
                }
            };
            if addrs.is_empty() {
                return Err(CheckError::Resolve {
                    address: address.to_string(),
                    source: io::Error::new(ErrorKind::NotFound, "no addresses found"),
                });
            }

            let mut last_error = None;
            for addr in addrs {
                debug!("Connecting to {addr}");
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        debug!("Connection to {addr} failed: {e}");
                        last_error = Some(e);
                    }
                }
            }
            let source = last_error.unwrap_or_else(|| io::Error::other("no address connected"));
            if source.kind() == ErrorKind::TimedOut {
                return Err(CheckError::Timeout("connecting to server"));
            }
            Err(CheckError::Connect {
                address: address.to_string(),
                source,
            })
        };

        let stream = match timeout(self.config.connect_timeout, dial).await {
            Ok(result) => result?,
            Err(_) => return Err(CheckError::Timeout("connecting to server")),
        };
        stream.set_nodelay(true).map_err(|e| CheckError::io("connecting to server", e))?;
        Ok(stream)
    }
}

/// Checks `address` and returns the legacy diagnostic string: empty when
/// STARTTLS was negotiated with an acceptable certificate, a description of
/// the problem otherwise.
///
/// `hostname` is the name the certificate must be valid for; when empty the
/// host part of `address` is used. `tls_config` replaces the default
/// platform-verifier config.
///
/// Blocks the calling thread, even when called from async code; there
/// [`check_hostname_async`] is the better fit.
pub fn check_hostname(
    hostname: &str,
    address: &str,
    tls_config: Option<Arc<ClientConfig>>,
) -> String {
    let checker = Checker::new(CheckerConfig::default().with_tls_config(tls_config));
    checker.check_blocking(hostname, address).to_string()
}

/// Async form of [`check_hostname`].
pub async fn check_hostname_async(
    hostname: &str,
    address: &str,
    tls_config: Option<Arc<ClientConfig>>,
) -> String {
    let checker = Checker::new(CheckerConfig::default().with_tls_config(tls_config));
    checker.check(hostname, address).await.to_string()
}
