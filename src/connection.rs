use log::debug;
use std::io;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::time::timeout;

use crate::error::CheckError;

// A reply longer than this is treated as a misbehaving server
const MAX_REPLY_LINES: usize = 128;
// Per line, CRLF excluded. RFC 5321 asks for 512; real servers stay well under this.
const MAX_LINE_LEN: usize = 4096;

/// One complete SMTP reply, possibly spread over several lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    // Text of every line with the status code and separator stripped
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|l| l.get(4..).unwrap_or("").trim())
    }

    pub fn summary(&self) -> String {
        self.lines.join(" / ")
    }
}

// Split "250-SIZE 1000" into (250, false, "SIZE 1000"). The bool is true on the
// last line of a reply.
pub fn parse_reply_line(line: &str) -> Result<(u16, bool), CheckError> {
    let code = line
        .get(..3)
        .filter(|c| c.chars().all(|ch| ch.is_ascii_digit()))
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| CheckError::Protocol(format!("malformed reply line: {line:?}")))?;
    match line.as_bytes().get(3) {
        None | Some(b' ') => Ok((code, true)),
        Some(b'-') => Ok((code, false)),
        Some(_) => Err(CheckError::Protocol(format!(
            "malformed reply line: {line:?}"
        ))),
    }
}

// Whether an EHLO capability list names `keyword` (case-insensitive, first token only)
pub fn has_capability(capabilities: &[String], keyword: &str) -> bool {
    capabilities.iter().any(|cap| {
        cap.split_whitespace()
            .next()
            .is_some_and(|first| first.eq_ignore_ascii_case(keyword))
    })
}

// The client side of the short plaintext exchange that precedes STARTTLS
pub struct SmtpSession<S> {
    reader: BufReader<S>,
    io_timeout: Duration,
}

impl<S> SmtpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self {
            reader: BufReader::new(stream),
            io_timeout,
        }
    }

    // Read a full reply. The whole reply shares one timeout so a server can't
    // keep the check alive by trickling continuation lines.
    pub async fn read_reply(&mut self, stage: &'static str) -> Result<Reply, CheckError> {
        match timeout(self.io_timeout, Self::read_reply_lines(&mut self.reader, stage)).await {
            Ok(result) => result,
            Err(_) => Err(CheckError::Timeout(stage)),
        }
    }

    async fn read_reply_lines(
        reader: &mut BufReader<S>,
        stage: &'static str,
    ) -> Result<Reply, CheckError> {
        let mut lines = Vec::new();
        let mut code = None;
        let mut buf = Vec::new();
        // Room for the line, its CRLF and one byte to detect overflow
        let cap = (MAX_LINE_LEN + 3) as u64;

        loop {
            buf.clear();
            let n = (&mut *reader)
                .take(cap)
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|e| CheckError::io(stage, e))?;
            if n == 0 {
                return Err(CheckError::Closed(stage));
            }
            let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.len() > MAX_LINE_LEN {
                return Err(CheckError::Protocol(format!(
                    "reply line longer than {MAX_LINE_LEN} bytes {stage}"
                )));
            }
            // Banners are not always UTF-8 (Latin-1 is common)
            let line = String::from_utf8_lossy(raw);
            debug!("< {line}");

            let (line_code, last) = parse_reply_line(&line)?;
            match code {
                None => code = Some(line_code),
                Some(c) if c != line_code => {
                    return Err(CheckError::Protocol(format!(
                        "inconsistent reply codes {c} and {line_code} {stage}"
                    )));
                }
                Some(_) => {}
            }
            lines.push(line.into_owned());

            if last {
                break;
            }
            if lines.len() >= MAX_REPLY_LINES {
                return Err(CheckError::Protocol(format!(
                    "reply exceeded {MAX_REPLY_LINES} lines {stage}"
                )));
            }
        }

        Ok(Reply {
            code: code.unwrap_or_default(),
            lines,
        })
    }

    pub async fn send_command(
        &mut self,
        command: &str,
        stage: &'static str,
    ) -> Result<(), CheckError> {
        debug!("> {command}");
        let line = format!("{command}\r\n");
        let limit = self.io_timeout;
        let stream = self.reader.get_mut();
        let write = async {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await
        };
        match timeout(limit, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CheckError::io(stage, e)),
            Err(_) => Err(CheckError::Timeout(stage)),
        }
    }

    pub async fn command(
        &mut self,
        command: &str,
        stage: &'static str,
    ) -> Result<Reply, CheckError> {
        self.send_command(command, stage).await?;
        self.read_reply(stage).await
    }

    // Greeting must be a 220; anything else (554 and friends) means the server
    // refuses to talk to us.
    pub async fn read_greeting(&mut self) -> Result<Reply, CheckError> {
        let greeting = self.read_reply("reading greeting").await?;
        if greeting.code != 220 {
            return Err(CheckError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.summary()
            )));
        }
        Ok(greeting)
    }

    // EHLO, falling back to HELO. Returns the advertised extensions, which is
    // an empty list if only HELO worked.
    pub async fn hello(&mut self, helo_name: &str) -> Result<Vec<String>, CheckError> {
        let ehlo = self
            .command(&format!("EHLO {helo_name}"), "sending EHLO")
            .await?;
        if ehlo.code == 250 {
            return Ok(ehlo.texts().skip(1).map(str::to_string).collect());
        }

        debug!("EHLO refused with {}, trying HELO", ehlo.code);
        let helo = self
            .command(&format!("HELO {helo_name}"), "sending HELO")
            .await?;
        if helo.code == 250 {
            return Ok(Vec::new());
        }
        Err(CheckError::Protocol(format!(
            "server rejected EHLO and HELO: {}",
            helo.summary()
        )))
    }

    pub async fn starttls(&mut self) -> Result<(), CheckError> {
        let reply = self.command("STARTTLS", "sending STARTTLS").await?;
        if reply.code != 220 {
            return Err(CheckError::StartTlsRejected(reply.summary()));
        }
        // Anything already buffered was sent in the clear before the handshake
        if !self.reader.buffer().is_empty() {
            return Err(CheckError::Protocol(
                "server sent data after accepting STARTTLS".to_string(),
            ));
        }
        Ok(())
    }

    // Polite goodbye; failures are irrelevant at this point
    pub async fn quit(&mut self) {
        if let Err(e) = self.command("QUIT", "sending QUIT").await {
            debug!("QUIT failed: {e}");
        }
    }

    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

// Best-effort QUIT and shutdown over an established stream
pub async fn close_stream<S>(stream: &mut S, limit: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let goodbye = async {
        stream.write_all(b"QUIT\r\n").await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok::<(), io::Error>(())
    };
    match timeout(limit, goodbye).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Error closing stream: {e}"),
        Err(_) => debug!("Timeout closing stream"),
    }
}
