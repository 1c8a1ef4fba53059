//! A small SMTP server for exercising the checker against real sockets.

#![allow(dead_code)]

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, date_time_ymd, generate_simple_self_signed,
};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// How the server behaves once a client connects.
#[derive(Clone)]
pub enum Mode {
    /// Plain SMTP, STARTTLS never advertised
    Plain,
    /// Advertises STARTTLS and upgrades with the given config
    StartTls(Arc<ServerConfig>),
    /// Advertises STARTTLS, then answers it with 454
    RejectStartTls,
    /// Drops the socket right after accept
    CloseOnAccept,
    /// Accepts and never says anything
    Silent,
}

pub struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(hostname: &str, mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hostname = hostname.to_string();

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let hostname = hostname.clone();
                let mode = mode.clone();
                tokio::spawn(async move {
                    handle_session(stream, &hostname, mode).await;
                });
            }
        });

        Self { addr, handle }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_session(stream: TcpStream, hostname: &str, mode: Mode) {
    match mode {
        Mode::CloseOnAccept => return,
        Mode::Silent => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return;
        }
        _ => {}
    }

    let mut reader = BufReader::new(stream);
    let greeting = format!("220 {hostname} ESMTP Service ready\r\n");
    if reader.get_mut().write_all(greeting.as_bytes()).await.is_err() {
        return;
    }

    let offers_tls = matches!(mode, Mode::StartTls(_) | Mode::RejectStartTls);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = line.trim_end();
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        let arg = command.get(verb.len()..).unwrap_or("").trim();

        let reply = match verb.as_str() {
            "EHLO" => ehlo_reply(hostname, arg, offers_tls),
            "HELO" => format!("250 {hostname} greets {arg}\r\n"),
            "NOOP" => "250 2.0.0 Ok\r\n".to_string(),
            "QUIT" => {
                let _ = reader.get_mut().write_all(b"221 2.0.0 Bye\r\n").await;
                return;
            }
            "STARTTLS" => match &mode {
                Mode::StartTls(config) => {
                    if reader
                        .get_mut()
                        .write_all(b"220 2.0.0 Ready to start TLS\r\n")
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let acceptor = TlsAcceptor::from(config.clone());
                    if let Ok(tls) = acceptor.accept(reader.into_inner()).await {
                        serve_after_tls(tls).await;
                    }
                    return;
                }
                Mode::RejectStartTls => "454 4.7.0 TLS not available\r\n".to_string(),
                _ => "502 5.5.1 Command not implemented\r\n".to_string(),
            },
            _ => "502 5.5.2 Error: command not recognized\r\n".to_string(),
        };

        if reader.get_mut().write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn ehlo_reply(hostname: &str, client: &str, offers_tls: bool) -> String {
    let mut lines = vec![
        format!("{hostname} greets {client}"),
        "SIZE 10240000".to_string(),
        "8BITMIME".to_string(),
    ];
    if offers_tls {
        lines.push("STARTTLS".to_string());
    }
    lines.push("ENHANCEDSTATUSCODES".to_string());

    let last = lines.len() - 1;
    lines
        .iter()
        .enumerate()
        .map(|(i, l)| format!("250{}{l}\r\n", if i == last { ' ' } else { '-' }))
        .collect()
}

// Over TLS the session only needs to say goodbye properly
async fn serve_after_tls<S>(stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if line.trim_end().eq_ignore_ascii_case("QUIT") {
            let _ = reader.get_mut().write_all(b"221 2.0.0 Bye\r\n").await;
            let _ = reader.get_mut().shutdown().await;
            return;
        }
        if reader.get_mut().write_all(b"250 2.0.0 Ok\r\n").await.is_err() {
            return;
        }
    }
}

/// STARTTLS with a certificate that signs itself, as rcgen makes by default.
pub fn self_signed_mode(names: &[&str]) -> Mode {
    starttls_check::tls::install_crypto_provider();

    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let certified = generate_simple_self_signed(names).unwrap();
    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![certified.cert.der().clone()],
            PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()).into(),
        )
        .unwrap();
    Mode::StartTls(Arc::new(server_config))
}

/// A throwaway CA plus one server certificate it issued.
pub struct TestPki {
    pub ca_der: CertificateDer<'static>,
    pub server_config: Arc<ServerConfig>,
}

impl TestPki {
    pub fn new(names: &[&str]) -> Self {
        Self::build(names, false)
    }

    pub fn expired(names: &[&str]) -> Self {
        Self::build(names, true)
    }

    fn build(names: &[&str], expired: bool) -> Self {
        starttls_check::tls::install_crypto_provider();

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let mut ca_name = DistinguishedName::new();
        ca_name.push(DnType::CommonName, "starttls-check test CA");
        ca_params.distinguished_name = ca_name;
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut leaf_params = CertificateParams::new(names.clone()).unwrap();
        let mut leaf_name = DistinguishedName::new();
        leaf_name.push(DnType::CommonName, names.first().cloned().unwrap_or_default());
        leaf_params.distinguished_name = leaf_name;
        if expired {
            leaf_params.not_before = date_time_ymd(2019, 1, 1);
            leaf_params.not_after = date_time_ymd(2020, 1, 1);
        } else {
            leaf_params.not_before = date_time_ymd(2024, 1, 1);
            leaf_params.not_after = date_time_ymd(2044, 1, 1);
        }
        let leaf_cert = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![leaf_cert.der().clone(), ca_cert.der().clone()],
                PrivatePkcs8KeyDer::from(leaf_key.serialize_der()).into(),
            )
            .unwrap();

        Self {
            ca_der: ca_cert.der().clone(),
            server_config: Arc::new(server_config),
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::StartTls(self.server_config.clone())
    }

    /// Client config whose only trust anchor is this CA.
    pub fn trusting_client_config(&self) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_der.clone()).unwrap();
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }
}
