//! The after-queue SMTP side: the MTA hands us a message over SMTP and
//! waits for the final reply to its end of DATA.
//!
//! Like the milter session, a [`SmtpSession`] stops at the end of DATA
//! with [`Step::AwaitingVerdict`]; the caller scans the
//! [`Transaction`] and answers with [`SmtpSession::reply_verdict`].

mod address;
mod data;

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, error, warn};

use mailgate_common::actions::ReplyCode;
use mailgate_utils::{starts_with_ignore_case, ByteParsing};

use crate::config::{SessionSettings, SmtpSettings};
use crate::scanner::Verdict;
use crate::spool::{Spool, SpoolError};
use crate::suspect::{ClientInfo, Extension, Transaction};
use crate::Step;

pub use self::address::{extract_address, parse_mail_parameters, ParameterError};
use self::data::DataReceiver;

/// Longest command line we accept, including CRLF
pub const MAX_LINE_LENGTH: usize = 4096;

const READ_CHUNK: usize = 8192;

/// Where in the SMTP conversation a session is.
///
/// The order is the order commands have to arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum Phase {
    /// Greeted, waiting for HELO or EHLO
    Init,
    /// Ready for a transaction
    Helo,
    /// Sender known
    Mail,
    /// At least one recipient known
    Rcpt,
    /// Receiving the message
    Data,
    /// Terminal
    Quit,
}

/// Things that end a SMTP session early
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The message could not be spooled, the client got a 421
    #[error(transparent)]
    Spool(#[from] SpoolError),
    /// The client stalled in the middle of DATA
    #[error("timeout while receiving DATA")]
    Timeout,
    /// A caller operation at the wrong time
    #[error("{0}")]
    InvalidState(&'static str),
}

enum Read {
    Data,
    Eof,
    Timeout,
}

/// One SMTP connection, see the module documentation.
pub struct SmtpSession<RW> {
    socket: RW,
    buffer: BytesMut,
    settings: SmtpSettings,
    spool_dir: PathBuf,
    timeout: Duration,
    phase: Phase,
    advertised: BTreeSet<Extension>,
    client: ClientInfo,
    from: String,
    recipients: Vec<Vec<u8>>,
    extensions: BTreeSet<Extension>,
    spooled: Option<TempPath>,
    awaiting_verdict: bool,
    discarding_line: bool,
}

impl<RW: AsyncRead + AsyncWrite + Unpin + Send> SmtpSession<RW> {
    /// Start a session on an accepted connection from `peer`
    #[must_use]
    pub fn new(socket: RW, settings: &SessionSettings, peer: Option<SocketAddr>) -> Self {
        let client = ClientInfo {
            address: peer.map(|p| p.ip().to_string()).unwrap_or_default(),
            port: peer.map(|p| p.port()),
            ..ClientInfo::default()
        };
        Self {
            socket,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            settings: settings.smtp.clone(),
            spool_dir: settings.spool_dir.clone(),
            timeout: settings.timeout,
            phase: Phase::Init,
            advertised: BTreeSet::new(),
            client,
            from: String::new(),
            recipients: Vec::new(),
            extensions: BTreeSet::new(),
            spooled: None,
            awaiting_verdict: false,
            discarding_line: false,
        }
    }

    /// The current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Send the `220` greeting
    ///
    /// # Errors
    /// If writing failed
    pub async fn greet(&mut self) -> Result<(), Error> {
        let greeting = format!("220 {} {}", self.settings.hostname, self.settings.banner);
        self.reply(&greeting).await
    }

    /// Read and answer one command; DATA is received completely.
    ///
    /// # Errors
    /// If writing failed, spooling failed (the client got a 421 first) or
    /// the client stalled during DATA. A vanished client or a timeout
    /// between commands is not an error, they end in [`Step::Closed`].
    pub async fn step(&mut self) -> Result<Step, Error> {
        if self.phase == Phase::Quit {
            return Ok(Step::Closed);
        }
        if self.awaiting_verdict {
            return Err(Error::InvalidState("a verdict is pending"));
        }

        let line = loop {
            if let Some(line) = self.next_line() {
                break line;
            }
            if self.buffer.len() > MAX_LINE_LENGTH {
                self.buffer.clear();
                self.discarding_line = true;
                self.reply("500 Line too long").await?;
                return Ok(Step::Continue);
            }
            match self.fill().await? {
                Read::Data => {}
                Read::Eof => {
                    debug!("Client closed the connection");
                    return Ok(self.close());
                }
                Read::Timeout => {
                    debug!("Timed out waiting for a command");
                    let reply = format!(
                        "421 4.4.2 {} Error: timeout exceeded",
                        self.settings.hostname
                    );
                    // The client is probably gone
                    let _ = self.reply(&reply).await;
                    return Ok(self.close());
                }
            }
        };

        if line.len() > MAX_LINE_LENGTH {
            self.reply("500 Line too long").await?;
            return Ok(Step::Continue);
        }
        self.handle_command(&line).await
    }

    async fn handle_command(&mut self, line: &str) -> Result<Step, Error> {
        debug!("Received {line:?}");
        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        match verb.as_str() {
            "HELO" | "EHLO" => self.helo(line, verb == "EHLO").await?,
            "MAIL" => self.mail(line).await?,
            "RCPT" => self.rcpt(line).await?,
            "DATA" => {
                if self.phase != Phase::Rcpt {
                    self.reply("503 Bad command sequence").await?;
                } else {
                    return self.data().await;
                }
            }
            "RSET" => {
                self.reset_transaction();
                if self.phase > Phase::Helo {
                    self.phase = Phase::Helo;
                }
                self.reply("250 OK").await?;
            }
            "NOOP" => self.reply("250 OK").await?,
            "QUIT" => {
                let bye = format!("221 {} closing connection", self.settings.hostname);
                self.reply(&bye).await?;
                return Ok(self.close());
            }
            _ => {
                warn!("Unrecognized command {line:?}");
                self.reply("505 Bad SMTP command").await?;
            }
        }
        Ok(Step::Continue)
    }

    async fn helo(&mut self, line: &str, extended: bool) -> Result<(), Error> {
        self.reset_transaction();
        self.client.helo = line
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();
        self.advertised.clear();
        self.phase = Phase::Helo;

        let hostname = self.settings.hostname.clone();
        if !extended {
            return self.reply(&format!("250 {hostname}")).await;
        }

        if self.settings.advertise_smtputf8 {
            self.advertised.insert(Extension::SmtpUtf8);
        }
        if self.settings.advertise_8bitmime {
            self.advertised.insert(Extension::EightBitMime);
        }
        let mut lines = vec![format!("250-{hostname}")];
        lines.extend(self.advertised.iter().map(|ext| format!("250-{ext}")));
        lines.push("250 HELP".to_string());
        self.reply(&lines.join("\r\n")).await
    }

    async fn mail(&mut self, line: &str) -> Result<(), Error> {
        if self.phase != Phase::Helo {
            return self.reply("503 Bad command sequence").await;
        }
        if !starts_with_ignore_case(line.as_bytes(), b"MAIL FROM:") {
            return self.reply("501 5.5.2 Syntax error").await;
        }
        let parsed = extract_address(line).and_then(|(from, params)| {
            parse_mail_parameters(&params, &self.advertised).map(|extensions| (from, extensions))
        });
        match parsed {
            Ok((from, extensions)) => {
                self.from = from;
                self.extensions = extensions;
                self.phase = Phase::Mail;
                self.reply("250 OK").await
            }
            Err(e) => {
                warn!("Refusing MAIL: {e}");
                self.reply(&e.reply()).await
            }
        }
    }

    async fn rcpt(&mut self, line: &str) -> Result<(), Error> {
        if !matches!(self.phase, Phase::Mail | Phase::Rcpt) {
            return self.reply("503 Bad command sequence").await;
        }
        if !starts_with_ignore_case(line.as_bytes(), b"RCPT TO:") {
            return self.reply("501 5.5.2 Syntax error").await;
        }
        match extract_address(line) {
            Ok((recipient, _params)) if !recipient.is_empty() => {
                self.recipients.push(recipient.into_bytes());
                self.phase = Phase::Rcpt;
                self.reply("250 OK").await
            }
            Ok(_) | Err(_) => self.reply("501 5.5.2 Syntax error").await,
        }
    }

    async fn data(&mut self) -> Result<Step, Error> {
        let mut spool = match Spool::create(&self.spool_dir) {
            Ok(spool) => spool,
            Err(e) => return self.spool_failed(e).await,
        };
        self.reply("354 End data with <CR><LF>.<CR><LF>").await?;
        self.phase = Phase::Data;

        let limit = self.settings.max_message_size;
        let mut receiver = DataReceiver::new();
        let mut content = Vec::with_capacity(READ_CHUNK);
        let mut received: u64 = 0;
        let mut oversized = false;
        loop {
            if !self.buffer.is_empty() {
                let consumed = receiver.feed(&self.buffer, &mut content);
                self.buffer.advance(consumed);
                received += content.len() as u64;
                if limit > 0 && received > limit {
                    oversized = true;
                }
                if !oversized {
                    if let Err(e) = spool.write_all(&content).await {
                        return self.spool_failed(e).await;
                    }
                }
                content.clear();
                if receiver.is_done() {
                    break;
                }
            }
            match self.fill().await? {
                Read::Data => {}
                Read::Eof => {
                    debug!("Client vanished during DATA");
                    return Ok(self.close());
                }
                Read::Timeout => {
                    self.close();
                    return Err(Error::Timeout);
                }
            }
        }

        self.phase = Phase::Helo;
        if oversized {
            warn!("Message exceeds {limit} bytes");
            self.reset_transaction();
            self.reply("552 5.3.4 Message size exceeds fixed limit").await?;
            return Ok(Step::Continue);
        }
        match spool.finish().await {
            Ok(path) => self.spooled = Some(path),
            Err(e) => return self.spool_failed(e).await,
        }
        self.awaiting_verdict = true;
        Ok(Step::AwaitingVerdict)
    }

    /// The received message, available once after [`Step::AwaitingVerdict`]
    pub fn take_transaction(&mut self) -> Option<Transaction> {
        let spool = self.spooled.take()?;
        Some(Transaction {
            from: self.from.clone(),
            recipients: self.recipients.clone(),
            spool,
            extensions: self.extensions.clone(),
            client: self.client.clone(),
            macros: HashMap::new(),
        })
    }

    /// Answer the end of DATA.
    ///
    /// `accepted` is the text relayed for an accepted message, usually the
    /// downstream server's reply.
    ///
    /// # Errors
    /// If no message is waiting for a verdict or writing failed
    pub async fn reply_verdict(&mut self, verdict: &Verdict, accepted: &str) -> Result<(), Error> {
        if !self.awaiting_verdict {
            return Err(Error::InvalidState("no message is waiting for a verdict"));
        }
        let reply = match verdict {
            Verdict::Accept if accepted.is_empty() => "250 OK".to_string(),
            Verdict::Accept => format!("250 {accepted}"),
            Verdict::Defer(reason) => ReplyCode::with_reason(451, reason).to_string(),
            Verdict::Reject(reason) => ReplyCode::with_reason(550, reason).to_string(),
            Verdict::Discard => "250 OK: discarded".to_string(),
        };
        self.awaiting_verdict = false;
        self.reset_transaction();
        self.reply(&reply).await
    }

    /// Pop a complete command line off the buffer, skipping the remainder
    /// of a line that was too long
    fn next_line(&mut self) -> Option<String> {
        loop {
            let line = self.buffer.crlf_line()?;
            if self.discarding_line {
                self.discarding_line = false;
                continue;
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }

    async fn fill(&mut self) -> Result<Read, Error> {
        let mut chunk = [0_u8; READ_CHUNK];
        match tokio::time::timeout(self.timeout, self.socket.read(&mut chunk)).await {
            Err(_elapsed) => Ok(Read::Timeout),
            Ok(Ok(0)) => Ok(Read::Eof),
            Ok(Ok(read)) => {
                self.buffer.extend_from_slice(&chunk[..read]);
                Ok(Read::Data)
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => Ok(Read::Eof),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn spool_failed(&mut self, e: SpoolError) -> Result<Step, Error> {
        error!("Spooling failed: {e}");
        let _ = self.reply("421 could not write to temp file").await;
        self.close();
        Err(Error::Spool(e))
    }

    fn reset_transaction(&mut self) {
        self.from.clear();
        self.recipients.clear();
        self.extensions.clear();
        self.spooled = None;
    }

    fn close(&mut self) -> Step {
        self.reset_transaction();
        self.phase = Phase::Quit;
        Step::Closed
    }

    async fn reply(&mut self, reply: &str) -> Result<(), Error> {
        debug!("Sending {reply:?}");
        self.socket.write_all(reply.as_bytes()).await?;
        self.socket.write_all(b"\r\n").await?;
        self.socket.flush().await?;
        Ok(())
    }
}
