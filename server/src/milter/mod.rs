//! The filter side of a milter connection.
//!
//! A [`MilterSession`] decodes the MTA's commands one frame at a time,
//! answers everything up to end-of-body with `continue` and spools the
//! message. At end-of-body it stops and hands control back to the caller,
//! who scans the [`Transaction`], optionally sends modifications and
//! finally writes the verdict with [`MilterSession::apply_verdict`].

mod modify;

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use asynchronous_codec::Framed;
use futures::{AsyncRead, AsyncWrite, SinkExt, StreamExt};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, error, warn};

use mailgate_common::{
    actions::{Action, Continue, Discard, ReplyCode, Tempfail},
    commands::{Connect, Mail},
    decoding::ClientCommand,
    encoding::ServerMessage,
    optneg::{CapabilitySet, OptNeg},
    ProtocolError,
};

use crate::codec::MilterCodec;
use crate::config::SessionSettings;
use crate::scanner::Verdict;
use crate::spool::{Spool, SpoolError};
use crate::suspect::{ClientInfo, Extension, Transaction};
use crate::Step;

/// Where in the milter conversation a session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum State {
    /// Waiting for the option negotiation
    AwaitConnect,
    /// Negotiated, waiting for the client's connect information
    Negotiating,
    /// Collecting helo, sender and recipients
    CollectingEnvelope,
    /// Receiving headers
    CollectingHeaders,
    /// Receiving body chunks
    CollectingBody,
    /// End of body received, waiting for the verdict
    Complete,
    /// Terminal
    Closed,
}

/// Things that end a milter session early
#[derive(Debug, Error)]
pub enum Error {
    /// The transport failed
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The MTA sent something we could not decode
    #[error(transparent)]
    Codec(ProtocolError),
    /// The message could not be spooled, the MTA got a tempfail
    #[error(transparent)]
    Spool(#[from] SpoolError),
    /// A command that makes no sense at this point of the conversation
    #[error("received {command} while in state {state}")]
    UnexpectedCommand {
        /// The offending command
        command: String,
        /// Where we were
        state: State,
    },
    /// Writing to a session that already ended
    #[error("the milter session is closed")]
    Closed,
    /// A caller operation in the wrong state, e.g. a verdict before end of body
    #[error("{operation} is not possible in state {state}")]
    InvalidState {
        /// What the caller tried
        operation: &'static str,
        /// Where we were
        state: State,
    },
}

impl From<ProtocolError> for Error {
    fn from(value: ProtocolError) -> Self {
        match value {
            ProtocolError::CodecError(io) => Self::Io(io),
            other => Self::Codec(other),
        }
    }
}

#[derive(Debug, Default)]
struct Envelope {
    connect: Option<Connect>,
    helo: String,
    from: String,
    recipients: Vec<Vec<u8>>,
    extensions: BTreeSet<Extension>,
    macros: HashMap<String, String>,
}

impl Envelope {
    fn reset_message(&mut self) {
        self.from.clear();
        self.recipients.clear();
        self.extensions.clear();
    }

    fn client(&self) -> ClientInfo {
        let (address, reverse_dns, port) = self.connect.as_ref().map_or_else(
            || (String::new(), String::new(), None),
            |connect| {
                (
                    connect.address().to_string(),
                    connect.hostname().to_string(),
                    connect.port,
                )
            },
        );
        ClientInfo {
            helo: self.helo.clone(),
            address,
            reverse_dns,
            port,
        }
    }
}

/// One milter connection, see the module documentation.
pub struct MilterSession<RW> {
    framed: Framed<RW, MilterCodec>,
    state: State,
    capabilities: CapabilitySet,
    envelope: Envelope,
    spool: Option<Spool>,
    spooled: Option<TempPath>,
    spool_dir: PathBuf,
    timeout: Duration,
    max_frame_size: usize,
}

impl<RW: AsyncRead + AsyncWrite + Unpin + Send> MilterSession<RW> {
    /// Start a session on an accepted connection
    #[must_use]
    pub fn new(socket: RW, settings: &SessionSettings) -> Self {
        let max_frame_size = settings.milter.max_frame_size;
        Self {
            framed: Framed::new(socket, MilterCodec::new(max_frame_size)),
            state: State::AwaitConnect,
            capabilities: CapabilitySet::default(),
            envelope: Envelope::default(),
            spool: None,
            spooled: None,
            spool_dir: settings.spool_dir.clone(),
            timeout: settings.timeout,
            max_frame_size,
        }
    }

    /// The current state
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// What both sides agreed on during option negotiation
    #[must_use]
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Read and handle exactly one frame.
    ///
    /// # Errors
    /// If the MTA sent garbage or a command out of order (the session is
    /// closed), or if spooling failed (the MTA got a tempfail first).
    /// A vanished peer or a read timeout is not an error, they end in
    /// [`Step::Closed`].
    pub async fn step(&mut self) -> Result<Step, Error> {
        let Some(command) = self.next_command().await? else {
            return Ok(Step::Closed);
        };
        debug!("Received {command}");

        match command {
            ClientCommand::OptNeg(offer) => {
                self.expect(&[State::AwaitConnect, State::Negotiating], "OptNeg")?;
                self.negotiate(&offer).await?;
            }
            ClientCommand::Macro(macro_) => {
                for (name, value) in macro_.macros() {
                    self.envelope
                        .macros
                        .insert(name.to_string(), value.to_string());
                }
            }
            ClientCommand::Connect(connect) => {
                self.expect(&[State::Negotiating], "Connect")?;
                self.envelope.connect = Some(connect);
                self.state = State::CollectingEnvelope;
                self.reply(Continue).await?;
            }
            ClientCommand::Helo(helo) => {
                self.expect(&[State::CollectingEnvelope], "Helo")?;
                self.envelope.helo = helo.name().to_string();
                self.reply(Continue).await?;
            }
            ClientCommand::Mail(mail) => {
                self.expect(&[State::CollectingEnvelope], "Mail")?;
                self.start_message(&mail);
                self.reply(Continue).await?;
            }
            ClientCommand::Recipient(rcpt) => {
                self.expect(&[State::CollectingEnvelope], "Recipient")?;
                self.envelope.recipients.push(rcpt.as_bytes().to_vec());
                self.reply(Continue).await?;
            }
            ClientCommand::Data(_) => {
                self.expect(&[State::CollectingEnvelope], "Data")?;
                self.reply(Continue).await?;
            }
            ClientCommand::Header(header) => {
                self.expect(
                    &[State::CollectingEnvelope, State::CollectingHeaders],
                    "Header",
                )?;
                self.state = State::CollectingHeaders;
                self.spool_write(&header.to_line()).await?;
                self.reply(Continue).await?;
            }
            ClientCommand::EndOfHeader(_) => {
                self.expect(
                    &[State::CollectingEnvelope, State::CollectingHeaders],
                    "EndOfHeader",
                )?;
                self.state = State::CollectingBody;
                self.spool_write(b"\r\n").await?;
                self.reply(Continue).await?;
            }
            ClientCommand::Body(body) => {
                self.expect(&[State::CollectingBody], "Body")?;
                self.spool_write(body.as_bytes()).await?;
                self.reply(Continue).await?;
            }
            ClientCommand::EndOfBody(_) => {
                self.expect(
                    &[State::CollectingHeaders, State::CollectingBody],
                    "EndOfBody",
                )?;
                self.finish_spool().await?;
                self.state = State::Complete;
                return Ok(Step::AwaitingVerdict);
            }
            ClientCommand::Unknown(_) => {
                self.reply(Continue).await?;
            }
            ClientCommand::Abort(_) => {
                self.abort_message();
            }
            ClientCommand::Quit(_) => {
                self.close();
                return Ok(Step::Closed);
            }
            ClientCommand::QuitNc(_) => {
                self.abort_message();
                self.envelope = Envelope::default();
                self.state = State::Negotiating;
            }
        }

        Ok(Step::Continue)
    }

    /// The collected message, available once after [`Step::AwaitingVerdict`]
    pub fn take_transaction(&mut self) -> Option<Transaction> {
        if self.state != State::Complete {
            return None;
        }
        let spool = self.spooled.take()?;
        Some(Transaction {
            from: self.envelope.from.clone(),
            recipients: self.envelope.recipients.clone(),
            spool,
            extensions: self.envelope.extensions.clone(),
            client: self.envelope.client(),
            macros: self.envelope.macros.clone(),
        })
    }

    /// Answer the end of body with the final decision.
    ///
    /// Exactly one reply is sent, afterwards the session waits for the next
    /// message on the same connection.
    ///
    /// # Errors
    /// If no message is complete or writing failed
    pub async fn apply_verdict(&mut self, verdict: &Verdict) -> Result<(), Error> {
        if self.state != State::Complete {
            return Err(Error::InvalidState {
                operation: "applying a verdict",
                state: self.state,
            });
        }

        let action: Action = match verdict {
            Verdict::Accept => Continue.into(),
            Verdict::Defer(reason) => ReplyCode::with_reason(451, reason).into(),
            Verdict::Reject(reason) => ReplyCode::with_reason(550, reason).into(),
            Verdict::Discard => Discard.into(),
        };
        self.reply(action).await?;

        self.abort_message();
        Ok(())
    }

    /// Turn the MTA away: negotiate, answer the first real command with a
    /// tempfail and close.
    ///
    /// Used when the pool is shutting down.
    ///
    /// # Errors
    /// If the MTA sent garbage or writing failed
    pub async fn refuse(&mut self) -> Result<(), Error> {
        while let Some(command) = self.next_command().await? {
            match command {
                ClientCommand::OptNeg(offer) => self.negotiate(&offer).await?,
                ClientCommand::Macro(_) | ClientCommand::Abort(_) | ClientCommand::QuitNc(_) => {}
                ClientCommand::Quit(_) => break,
                other => {
                    debug!("Refusing {other}");
                    self.reply(Tempfail).await?;
                    break;
                }
            }
        }
        self.close();
        Ok(())
    }

    async fn next_command(&mut self) -> Result<Option<ClientCommand>, Error> {
        if self.state == State::Closed {
            return Ok(None);
        }

        match tokio::time::timeout(self.timeout, self.framed.next()).await {
            Err(_elapsed) => {
                debug!("Timed out waiting for the MTA");
                self.close();
                Ok(None)
            }
            Ok(None) => {
                debug!("MTA closed the connection");
                self.close();
                Ok(None)
            }
            Ok(Some(Err(ProtocolError::CodecError(e)))) => {
                debug!("Connection failed: {e}");
                self.close();
                Ok(None)
            }
            Ok(Some(Err(e))) => {
                warn!("Failed decoding milter command: {e}");
                self.close();
                Err(Error::Codec(e))
            }
            Ok(Some(Ok(command))) => Ok(Some(command)),
        }
    }

    async fn negotiate(&mut self, offer: &OptNeg) -> Result<(), Error> {
        let ours = OptNeg::filter_request();
        let requested = ours.capabilities;
        let reply = match ours.merge_compatible(offer) {
            Ok(reply) => reply,
            Err(e) => {
                self.close();
                return Err(Error::Codec(e.into()));
            }
        };

        self.capabilities = CapabilitySet::new(requested, offer.capabilities);
        debug!(
            version = reply.version,
            "Negotiated capabilities {:?}",
            self.capabilities.effective()
        );
        self.state = State::Negotiating;
        self.send(ServerMessage::Optneg(reply)).await
    }

    fn start_message(&mut self, mail: &Mail) {
        self.abort_message();
        self.envelope.from = mail.address();
        for arg in mail.esmtp_args() {
            if arg.eq_ignore_ascii_case("SMTPUTF8") {
                self.envelope.extensions.insert(Extension::SmtpUtf8);
            } else if arg.eq_ignore_ascii_case("BODY=8BITMIME") {
                self.envelope.extensions.insert(Extension::EightBitMime);
            }
        }
    }

    /// Drop whatever is spooled and forget the envelope of the current
    /// message, the connection information stays.
    fn abort_message(&mut self) {
        self.spool = None;
        self.spooled = None;
        self.envelope.reset_message();
        if !matches!(
            self.state,
            State::AwaitConnect | State::Negotiating | State::Closed
        ) {
            self.state = State::CollectingEnvelope;
        }
    }

    fn expect(&mut self, allowed: &[State], command: &str) -> Result<(), Error> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        warn!("Received {command} while in state {}", self.state);
        let state = self.state;
        self.close();
        Err(Error::UnexpectedCommand {
            command: command.to_string(),
            state,
        })
    }

    async fn spool_write(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.spool.is_none() {
            match Spool::create(&self.spool_dir) {
                Ok(spool) => self.spool = Some(spool),
                Err(e) => return self.spool_failed(e).await,
            }
        }
        if let Some(spool) = &mut self.spool {
            if let Err(e) = spool.write_all(data).await {
                return self.spool_failed(e).await;
            }
        }
        Ok(())
    }

    async fn finish_spool(&mut self) -> Result<(), Error> {
        let spool = match self.spool.take() {
            Some(spool) => Ok(spool),
            None => Spool::create(&self.spool_dir),
        };
        let finished = match spool {
            Ok(spool) => spool.finish().await,
            Err(e) => Err(e),
        };
        match finished {
            Ok(path) => {
                self.spooled = Some(path);
                Ok(())
            }
            Err(e) => self.spool_failed(e).await,
        }
    }

    async fn spool_failed(&mut self, e: SpoolError) -> Result<(), Error> {
        error!("Spooling failed: {e}");
        self.spool = None;
        // Best effort, the MTA may be gone already
        let _ = self.reply(Tempfail).await;
        self.close();
        Err(Error::Spool(e))
    }

    async fn reply(&mut self, action: impl Into<Action>) -> Result<(), Error> {
        self.send(ServerMessage::Action(action.into())).await
    }

    async fn send(&mut self, message: ServerMessage) -> Result<(), Error> {
        if self.state == State::Closed {
            return Err(Error::Closed);
        }
        debug!("Sending {message}");
        self.framed.send(&message).await.map_err(Error::from)
    }

    fn close(&mut self) {
        self.state = State::Closed;
        self.spool = None;
        self.spooled = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::{BufMut, BytesMut};
    use futures::{AsyncReadExt, AsyncWriteExt};
    use mailgate_common::actions::{Abort, Quit};
    use mailgate_common::commands::{
        Body, Command, Data, EndOfBody, EndOfHeader, Family, Header, Helo, Macro, Recipient,
    };
    use mailgate_common::decoding::ServerCommand;
    use mailgate_common::encoding::Writable;
    use mailgate_common::optneg::Capability;
    use pretty_assertions::assert_eq;
    use tokio::io::DuplexStream;
    use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

    /// The MTA end of a milter connection
    pub(crate) struct FakeMta {
        socket: Compat<DuplexStream>,
    }

    impl FakeMta {
        pub(crate) async fn send(&mut self, message: impl Writable) {
            let mut buffer = BytesMut::new();
            buffer.put_u32(message.len() as u32 + 1);
            buffer.put_u8(message.code());
            message.write(&mut buffer);
            self.socket
                .write_all(&buffer)
                .await
                .expect("Failed writing to session");
        }

        pub(crate) async fn receive(&mut self) -> ServerCommand {
            let mut length = [0_u8; 4];
            self.socket
                .read_exact(&mut length)
                .await
                .expect("Failed reading frame length");
            let mut frame = vec![0_u8; u32::from_be_bytes(length) as usize];
            self.socket
                .read_exact(&mut frame)
                .await
                .expect("Failed reading frame");
            ServerCommand::parse(BytesMut::from(&frame[..])).expect("Failed parsing reply")
        }

        pub(crate) async fn negotiate(&mut self, capabilities: Capability) -> OptNeg {
            self.send(OptNeg {
                capabilities,
                ..OptNeg::default()
            })
            .await;
            match self.receive().await {
                ServerCommand::OptNeg(optneg) => optneg,
                other => panic!("Expected optneg, got {other}"),
            }
        }
    }

    /// Negotiate with a session driven by the same task
    pub(crate) async fn negotiate(
        session: &mut MilterSession<Compat<DuplexStream>>,
        mta: &mut FakeMta,
        capabilities: Capability,
    ) -> OptNeg {
        mta.send(OptNeg {
            capabilities,
            ..OptNeg::default()
        })
        .await;
        assert_eq!(
            session.step().await.expect("Negotiation failed"),
            Step::Continue
        );
        match mta.receive().await {
            ServerCommand::OptNeg(optneg) => optneg,
            other => panic!("Expected optneg, got {other}"),
        }
    }

    pub(crate) fn settings(spool_dir: &std::path::Path) -> SessionSettings {
        SessionSettings {
            spool_dir: spool_dir.to_path_buf(),
            timeout: Duration::from_secs(5),
            ..SessionSettings::default()
        }
    }

    /// A connected socket pair, ours and the MTA's
    pub(crate) fn connect() -> (Compat<DuplexStream>, FakeMta) {
        let (ours, theirs) = tokio::io::duplex(1 << 20);
        (
            ours.compat(),
            FakeMta {
                socket: theirs.compat(),
            },
        )
    }

    pub(crate) fn pair(
        settings: &SessionSettings,
    ) -> (MilterSession<Compat<DuplexStream>>, FakeMta) {
        let (socket, mta) = connect();
        (MilterSession::new(socket, settings), mta)
    }

    /// Drive the session through a full message up to end of body
    pub(crate) async fn deliver(
        session: &mut MilterSession<Compat<DuplexStream>>,
        mta: &mut FakeMta,
        from: &str,
        recipients: &[&str],
    ) {
        let recipients: Vec<Vec<u8>> = recipients
            .iter()
            .map(|rcpt| format!("<{rcpt}>").into_bytes())
            .collect();
        deliver_raw(session, mta, from, &recipients, Header::new(b"Subject", b"hello")).await;
    }

    /// Like [`deliver`], with recipients and the header as raw bytes
    pub(crate) async fn deliver_raw(
        session: &mut MilterSession<Compat<DuplexStream>>,
        mta: &mut FakeMta,
        from: &str,
        recipients: &[Vec<u8>],
        header: Header,
    ) {
        let mut commands: Vec<Command> = vec![
            Connect::new("client.example.com", Family::Inet, Some(4711), "192.0.2.1").into(),
            Helo::new("client.example.com").into(),
            Mail::new(format!("<{from}>").as_bytes(), &[]).into(),
        ];
        for rcpt in recipients {
            commands.push(Recipient::new(rcpt, &[]).into());
        }
        commands.push(Data.into());
        commands.push(header.into());
        commands.push(EndOfHeader.into());
        commands.push(Body::from(&b"Hi there\r\n"[..]).into());

        for command in commands {
            mta.send(command).await;
            assert_eq!(session.step().await.expect("Step failed"), Step::Continue);
            assert_matches!(mta.receive().await, ServerCommand::Continue(_));
        }

        mta.send(EndOfBody).await;
        assert_eq!(
            session.step().await.expect("End of body failed"),
            Step::AwaitingVerdict
        );
    }

    #[tokio::test]
    async fn test_full_message() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let (mut session, mut mta) = pair(&settings(dir.path()));

        let optneg = negotiate(&mut session, &mut mta, Capability::all()).await;
        assert_eq!(optneg.capabilities, Capability::all());
        assert_eq!(session.state(), State::Negotiating);

        deliver(&mut session, &mut mta, "a@example.com", &["b@example.com"]).await;
        let transaction = session.take_transaction().expect("No transaction");

        assert_eq!(transaction.from, "a@example.com");
        assert_eq!(transaction.recipients, [b"<b@example.com>".to_vec()]);
        assert_eq!(transaction.client.helo, "client.example.com");
        assert_eq!(transaction.client.address, "192.0.2.1");
        assert_eq!(transaction.client.port, Some(4711));
        assert_eq!(
            std::fs::read(&transaction.spool).expect("Failed reading spool"),
            b"Subject: hello\r\n\r\nHi there\r\n"
        );
        assert!(session.take_transaction().is_none());

        session
            .apply_verdict(&Verdict::Reject("virus found".into()))
            .await
            .expect("Failed applying verdict");
        assert_matches!(mta.receive().await, ServerCommand::ReplyCode(reply) => {
            assert_eq!(reply.to_string(), "550 5.7.1 virus found");
        });
        assert_eq!(session.state(), State::CollectingEnvelope);
    }

    #[tokio::test]
    async fn test_eight_bit_header_spooled_unchanged() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let (mut session, mut mta) = pair(&settings(dir.path()));
        negotiate(&mut session, &mut mta, Capability::all()).await;

        let recipients = [b"<b@example.com>".to_vec()];
        let header = Header::new(b"Subject", b"caf\xe9");
        deliver_raw(&mut session, &mut mta, "a@example.com", &recipients, header).await;
        let transaction = session.take_transaction().expect("No transaction");

        assert_eq!(
            std::fs::read(&transaction.spool).expect("Failed reading spool"),
            b"Subject: caf\xe9\r\n\r\nHi there\r\n"
        );
    }

    #[tokio::test]
    async fn test_macros_are_recorded_without_reply() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let (mut session, mut mta) = pair(&settings(dir.path()));
        negotiate(&mut session, &mut mta, Capability::all()).await;

        mta.send(Macro::new(b'E', &[("i", "4AbCdE")])).await;
        assert_eq!(session.step().await.expect("Macro failed"), Step::Continue);

        deliver(&mut session, &mut mta, "a@example.com", &["b@example.com"]).await;
        let transaction = session.take_transaction().expect("No transaction");

        assert_eq!(transaction.macros.get("i").map(String::as_str), Some("4AbCdE"));
    }

    #[tokio::test]
    async fn test_abort_drops_spool_and_keeps_connection() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let (mut session, mut mta) = pair(&settings(dir.path()));
        negotiate(&mut session, &mut mta, Capability::all()).await;
        mta.send(Connect::new("h", Family::Unknown, None, "")).await;
        session.step().await.expect("Connect failed");
        mta.receive().await;
        mta.send(Header::new(b"Subject", b"x")).await;
        session.step().await.expect("Header failed");
        mta.receive().await;
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 1);

        mta.send(Abort).await;
        assert_eq!(session.step().await.expect("Abort failed"), Step::Continue);

        assert_eq!(session.state(), State::CollectingEnvelope);
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[tokio::test]
    async fn test_quit_and_eof_close() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let (mut session, mut mta) = pair(&settings(dir.path()));
        mta.send(Quit).await;
        assert_eq!(session.step().await.expect("Quit failed"), Step::Closed);

        let (mut session, mta) = pair(&settings(dir.path()));
        drop(mta);
        assert_eq!(session.step().await.expect("EOF failed"), Step::Closed);
        assert_eq!(session.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_command_out_of_order() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let (mut session, mut mta) = pair(&settings(dir.path()));
        negotiate(&mut session, &mut mta, Capability::all()).await;

        mta.send(Body::from(&b"too early"[..])).await;

        assert_matches!(
            session.step().await,
            Err(Error::UnexpectedCommand { state: State::Negotiating, .. })
        );
        assert_eq!(session.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_garbage_is_an_error() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let (mut session, mut mta) = pair(&settings(dir.path()));

        mta.socket
            .write_all(&[0, 0, 0, 1, b'#'])
            .await
            .expect("Failed writing");

        assert_matches!(session.step().await, Err(Error::Codec(_)));
    }

    #[tokio::test]
    async fn test_spool_failure_tempfails() {
        let (mut session, mut mta) = pair(&settings(std::path::Path::new(
            "/nonexistent/mailgate/spool",
        )));
        negotiate(&mut session, &mut mta, Capability::all()).await;
        mta.send(Connect::new("h", Family::Unknown, None, "")).await;
        session.step().await.expect("Connect failed");
        mta.receive().await;

        mta.send(Header::new(b"Subject", b"x")).await;

        assert_matches!(session.step().await, Err(Error::Spool(_)));
        assert_matches!(mta.receive().await, ServerCommand::Tempfail(_));
    }

    #[tokio::test]
    async fn test_refuse_tempfails_first_command() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let (mut session, mut mta) = pair(&settings(dir.path()));

        let refusal = tokio::spawn(async move { session.refuse().await });
        mta.negotiate(Capability::all()).await;
        mta.send(Connect::new("h", Family::Unknown, None, "")).await;

        assert_matches!(mta.receive().await, ServerCommand::Tempfail(_));
        refusal
            .await
            .expect("Refusal panicked")
            .expect("Refusal failed");
    }
}
