//! A gateway on localhost and clients to talk to it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use miette::{miette, IntoDiagnostic, Result, WrapErr};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use mailgate_common::decoding::ServerCommand;
use mailgate_common::encoding::Writable;
use mailgate_common::optneg::{Capability, OptNeg};
use mailgate_server::config::ListenerConfig;
use mailgate_server::pool::Backend;
use mailgate_server::reinject::ReinjectError;
use mailgate_server::{
    Context, Dispatcher, HandlerKind, Listener, PoolSettings, Reinjector, Scanner,
    SessionSettings, Suspect, Verdict,
};

/// Log to the test output, filtered by `RUST_LOG`
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn settings(spool_dir: &Path, timeout: Duration) -> SessionSettings {
    SessionSettings {
        spool_dir: spool_dir.to_path_buf(),
        timeout,
        ..SessionSettings::default()
    }
}

pub fn pool_settings(backend: Backend, workers: usize) -> PoolSettings {
    PoolSettings {
        backend,
        workers,
        queue_size: 16,
        join_timeout: Duration::from_secs(10),
    }
}

/// Accepts everything, optionally replacing the recipients
#[derive(Default)]
pub struct Rewriter {
    pub recipients: Option<Vec<String>>,
}

#[async_trait]
impl Scanner for Rewriter {
    async fn scan(&self, suspect: &mut Suspect) -> Verdict {
        if let Some(recipients) = &self.recipients {
            suspect.recipients.clone_from(recipients);
        }
        Verdict::Accept
    }
}

/// A downstream MTA keeping what it receives
#[derive(Default)]
pub struct Downstream {
    pub messages: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl Reinjector for Downstream {
    async fn reinject(&self, suspect: &Suspect) -> Result<String, ReinjectError> {
        let message = tokio::fs::read(suspect.spool_path()).await?;
        self.messages
            .lock()
            .map_err(|_| ReinjectError::Io(std::io::Error::other("poisoned")))?
            .push(message);
        Ok("2.0.0 Ok: queued as 4AbCdE".to_string())
    }
}

pub fn context(
    settings: SessionSettings,
    scanner: impl Scanner + 'static,
    downstream: Arc<Downstream>,
) -> Context {
    Context {
        settings,
        scanner: Arc::new(scanner),
        reinjector: downstream,
    }
}

/// A listener and its pool running in the background
pub struct Gateway {
    pub address: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
    stop: oneshot::Sender<()>,
    serving: JoinHandle<()>,
}

impl Gateway {
    pub async fn start(kind: HandlerKind, pool: PoolSettings, context: Context) -> Result<Self> {
        init_logging();
        let dispatcher = Arc::new(
            Dispatcher::new(pool, context)
                .into_diagnostic()
                .wrap_err("Failed starting pool")?,
        );
        let listener = Listener::bind(&ListenerConfig {
            protocol: kind,
            address: "127.0.0.1:0".parse().into_diagnostic()?,
        })
        .await
        .into_diagnostic()
        .wrap_err("Failed binding listener")?;
        let address = listener.local_addr().into_diagnostic()?;

        let (stop, stopped) = oneshot::channel::<()>();
        let serving = tokio::spawn(listener.serve(dispatcher.clone(), async move {
            let _ = stopped.await;
        }));

        Ok(Self {
            address,
            dispatcher,
            stop,
            serving,
        })
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.stop.send(());
        self.serving.await.into_diagnostic()?;
        self.dispatcher.shutdown().await;
        Ok(())
    }
}

/// The client side of an SMTP conversation
pub struct SmtpClient {
    stream: BufReader<TcpStream>,
}

impl SmtpClient {
    pub async fn connect(address: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .into_diagnostic()
            .wrap_err("Failed connecting")?;
        Ok(Self::new(stream))
    }

    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub async fn send(&mut self, raw: &str) -> Result<()> {
        self.stream
            .get_mut()
            .write_all(raw.as_bytes())
            .await
            .into_diagnostic()
    }

    /// The next reply line without CRLF, empty at EOF
    pub async fn line(&mut self) -> Result<String> {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(10), self.stream.read_line(&mut line))
            .await
            .map_err(|_| miette!("No reply within 10s"))?
            .into_diagnostic()?;
        Ok(line.trim_end().to_string())
    }

    /// Whatever arrived so far, without waiting more than a moment
    pub async fn pending(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            match tokio::time::timeout(
                Duration::from_millis(200),
                self.stream.read_line(&mut line),
            )
            .await
            {
                Ok(Ok(0)) | Err(_) => return Ok(lines),
                Ok(Ok(_)) => lines.push(line.trim_end().to_string()),
                Ok(Err(e)) => return Err(miette!("Failed reading: {e}")),
            }
        }
    }

    /// Run one accepted transaction and quit
    pub async fn transact(&mut self) -> Result<()> {
        let steps = [
            ("EHLO mta.example.com\r\n", "250 HELP"),
            ("MAIL FROM:<a@example.com>\r\n", "250 OK"),
            ("RCPT TO:<b@example.com>\r\n", "250 OK"),
            ("DATA\r\n", "354 End data with <CR><LF>.<CR><LF>"),
            (
                "Subject: hi\r\n\r\nbody\r\n.\r\n",
                "250 2.0.0 Ok: queued as 4AbCdE",
            ),
            ("QUIT\r\n", "221 localhost closing connection"),
        ];
        for (command, expected) in steps {
            let reply = self.command(command).await?;
            if reply != expected {
                return Err(miette!("{command:?} got {reply:?}, expected {expected:?}"));
            }
        }
        Ok(())
    }

    /// Send a command and return the last line of its reply
    pub async fn command(&mut self, raw: &str) -> Result<String> {
        self.send(raw).await?;
        loop {
            let line = self.line().await?;
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                return Ok(line);
            }
        }
    }
}

/// The MTA side of a milter conversation
pub struct MtaClient {
    stream: TcpStream,
}

impl MtaClient {
    pub async fn connect(address: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .into_diagnostic()
            .wrap_err("Failed connecting")?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, message: impl Writable) -> Result<()> {
        let mut buffer = BytesMut::new();
        buffer.put_u32(message.len() as u32 + 1);
        buffer.put_u8(message.code());
        message.write(&mut buffer);
        self.stream.write_all(&buffer).await.into_diagnostic()
    }

    pub async fn receive(&mut self) -> Result<ServerCommand> {
        let mut length = [0_u8; 4];
        tokio::time::timeout(Duration::from_secs(10), self.stream.read_exact(&mut length))
            .await
            .map_err(|_| miette!("No reply within 10s"))?
            .into_diagnostic()?;
        let mut frame = vec![0_u8; u32::from_be_bytes(length) as usize];
        self.stream.read_exact(&mut frame).await.into_diagnostic()?;
        ServerCommand::parse(BytesMut::from(&frame[..])).into_diagnostic()
    }

    pub async fn negotiate(&mut self, capabilities: Capability) -> Result<OptNeg> {
        self.send(OptNeg {
            capabilities,
            ..OptNeg::default()
        })
        .await?;
        match self.receive().await? {
            ServerCommand::OptNeg(optneg) => Ok(optneg),
            other => Err(miette!("Expected option negotiation, got {other}")),
        }
    }
}
