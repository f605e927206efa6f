//! Handing accepted messages back to the MTA

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use lettre::address::{AddressError, Envelope};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use thiserror::Error;
use tracing::debug;

use crate::config::ReinjectSettings;
use crate::suspect::Suspect;

/// Re-injection failed, the message has to be deferred
#[derive(Debug, Error)]
pub enum ReinjectError {
    /// The spooled message could not be read
    #[error("could not read spooled message")]
    Io(#[from] io::Error),
    /// An envelope address is not acceptable downstream
    #[error("invalid envelope address")]
    Address(#[from] AddressError),
    /// The envelope as a whole is invalid, e.g. has no recipients
    #[error("invalid envelope")]
    Envelope(#[from] lettre::error::Error),
    /// The downstream server refused or the connection failed
    #[error("downstream delivery failed")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Delivers an accepted message with its committed changes
#[async_trait]
pub trait Reinjector: Send + Sync {
    /// Deliver `suspect`, returning the downstream server's reply text
    async fn reinject(&self, suspect: &Suspect) -> Result<String, ReinjectError>;
}

/// Re-injects over plain SMTP, typically into the MTA's after-queue return
/// port
#[derive(Clone)]
pub struct SmtpReinjector {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpReinjector {
    /// Create a re-injector talking to `host:port`
    #[must_use]
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .timeout(Some(timeout))
            .build();
        Self { transport }
    }

    /// Create a re-injector from the `[reinject]` settings
    #[must_use]
    pub fn from_settings(settings: &ReinjectSettings) -> Self {
        Self::new(&settings.host, settings.port, settings.timeout)
    }
}

#[async_trait]
impl Reinjector for SmtpReinjector {
    async fn reinject(&self, suspect: &Suspect) -> Result<String, ReinjectError> {
        let raw = tokio::fs::read(suspect.spool_path()).await?;
        let message = compose_message(&raw, suspect.added_headers(), suspect.changed_headers());

        let from = if suspect.from.is_empty() {
            None
        } else {
            Some(suspect.from.parse::<Address>()?)
        };
        let to = suspect
            .recipients
            .iter()
            .map(|rcpt| rcpt.parse::<Address>())
            .collect::<Result<Vec<_>, _>>()?;
        let envelope = Envelope::new(from, to)?;

        let response = self.transport.send_raw(&envelope, &message).await?;
        let text = response.message().collect::<Vec<_>>().join(" ");
        debug!(id = %suspect.id(), code = %response.code(), "re-injected: {text}");

        Ok(text)
    }
}

/// Apply queued header changes to a raw message.
///
/// Added headers are prepended to the header block. A changed header
/// replaces the first header of the same name (case-insensitive), an empty
/// value removes it, and a change of a missing header appends it.
#[must_use]
pub fn compose_message(
    raw: &[u8],
    added: &[(String, String)],
    changed: &[(String, String)],
) -> Vec<u8> {
    let header_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or(raw.len(), |pos| pos + 2);
    let (header_block, rest) = raw.split_at(header_end);

    let mut fields: Vec<Vec<u8>> = Vec::new();
    for line in header_block.split_inclusive(|&b| b == b'\n') {
        match (line.first(), fields.last_mut()) {
            (Some(b' ' | b'\t'), Some(field)) => field.extend_from_slice(line),
            _ => fields.push(line.to_vec()),
        }
    }

    for (name, value) in changed {
        let position = fields.iter().position(|field| field_named(field, name));
        match (position, value.is_empty()) {
            (Some(index), true) => {
                fields.remove(index);
            }
            (Some(index), false) => fields[index] = format_field(name, value),
            (None, false) => fields.push(format_field(name, value)),
            (None, true) => {}
        }
    }

    let mut message = Vec::with_capacity(raw.len());
    for (name, value) in added {
        message.extend_from_slice(&format_field(name, value));
    }
    for field in fields {
        message.extend_from_slice(&field);
    }
    message.extend_from_slice(rest);
    message
}

fn field_named(field: &[u8], name: &str) -> bool {
    field
        .iter()
        .position(|&b| b == b':')
        .is_some_and(|colon| field[..colon].trim_ascii_end().eq_ignore_ascii_case(name.as_bytes()))
}

fn format_field(name: &str, value: &str) -> Vec<u8> {
    format!("{name}: {value}\r\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspect::tests::transaction;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    const MESSAGE: &str = "Subject: hello\r\nX-Folded: one\r\n two\r\nTo: b@example.com\r\n\r\nbody\r\n";

    fn header(name: &str, value: &str) -> (String, String) {
        (name.to_string(), value.to_string())
    }

    #[test]
    fn test_added_headers_are_prepended() {
        let message = compose_message(MESSAGE.as_bytes(), &[header("X-Spam", "no")], &[]);

        assert_eq!(
            String::from_utf8_lossy(&message),
            format!("X-Spam: no\r\n{MESSAGE}")
        );
    }

    #[test]
    fn test_changed_header_replaces_first_match() {
        let message = compose_message(
            MESSAGE.as_bytes(),
            &[],
            &[header("subject", "[SPAM] hello"), header("x-folded", "")],
        );

        assert_eq!(
            String::from_utf8_lossy(&message),
            "subject: [SPAM] hello\r\nTo: b@example.com\r\n\r\nbody\r\n"
        );
    }

    #[test]
    fn test_change_of_missing_header_appends() {
        let changed = [header("X-Tag", "1")];
        let message = compose_message(b"To: b@example.com\r\n\r\nbody", &[], &changed);

        assert_eq!(
            String::from_utf8_lossy(&message),
            "To: b@example.com\r\nX-Tag: 1\r\n\r\nbody"
        );
    }

    #[test]
    fn test_unchanged_message_is_identical() {
        assert_eq!(compose_message(MESSAGE.as_bytes(), &[], &[]), MESSAGE.as_bytes());
    }

    /// Accept one SMTP delivery and return the lines received after DATA
    async fn downstream(listener: TcpListener) -> Vec<String> {
        let (socket, _) = listener.accept().await.expect("Failed accepting");
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read);
        let mut data = Vec::new();
        let mut in_data = false;
        write
            .write_all(b"220 downstream ESMTP\r\n")
            .await
            .expect("Failed greeting");
        loop {
            let mut line = String::new();
            if lines.read_line(&mut line).await.expect("Failed reading") == 0 {
                break;
            }
            let reply: &[u8] = if in_data {
                if line == ".\r\n" {
                    in_data = false;
                    b"250 2.0.0 Ok: queued as 4AbCdE\r\n"
                } else {
                    data.push(line);
                    continue;
                }
            } else {
                match line.get(..4).map(str::to_ascii_uppercase).as_deref() {
                    Some("EHLO" | "HELO") => b"250 downstream\r\n",
                    Some("DATA") => {
                        in_data = true;
                        b"354 go ahead\r\n"
                    }
                    Some("QUIT") => {
                        write.write_all(b"221 bye\r\n").await.expect("Failed writing");
                        break;
                    }
                    _ => b"250 Ok\r\n",
                }
            };
            write.write_all(reply).await.expect("Failed writing");
        }
        data
    }

    #[tokio::test]
    async fn test_reinject_relays_downstream_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed binding");
        let port = listener.local_addr().expect("No address").port();
        let server = tokio::spawn(downstream(listener));

        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let transaction = transaction(dir.path(), "a@example.com", &["b@example.com"]);
        std::fs::write(&transaction.spool, MESSAGE).expect("Failed writing spool");
        let mut suspect = Suspect::new(transaction);
        suspect.add_header("X-Scanned", "yes");

        let reinjector = SmtpReinjector::new("127.0.0.1", port, Duration::from_secs(10));
        let text = reinjector
            .reinject(&suspect)
            .await
            .expect("Failed re-injecting");

        assert!(text.ends_with("Ok: queued as 4AbCdE"), "unexpected reply {text}");
        let data = server.await.expect("Downstream panicked");
        assert_eq!(data.first().map(String::as_str), Some("X-Scanned: yes\r\n"));
        assert_eq!(data.get(1).map(String::as_str), Some("Subject: hello\r\n"));
    }
}
