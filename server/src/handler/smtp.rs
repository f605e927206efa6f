use std::io;
use std::net::SocketAddr;

use futures::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{info, instrument, warn};

use super::Context;
use crate::scanner::Verdict;
use crate::smtp::{Error, SmtpSession};
use crate::suspect::Suspect;
use crate::Step;

const SHUTTING_DOWN: &[u8] = b"421 4.3.2 Service shutting down\r\n";

#[instrument(skip_all, fields(peer = ?peer))]
pub(crate) async fn handle<RW>(
    socket: RW,
    peer: Option<SocketAddr>,
    context: &Context,
) -> Result<(), Error>
where
    RW: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut session = SmtpSession::new(socket, &context.settings, peer);
    session.greet().await?;
    loop {
        match session.step().await? {
            Step::Continue => {}
            Step::Closed => return Ok(()),
            Step::AwaitingVerdict => {
                let transaction = session
                    .take_transaction()
                    .ok_or(Error::InvalidState("no transaction after DATA"))?;
                let mut suspect = Suspect::new(transaction);
                let mut verdict = context.scanner.scan(&mut suspect).await;

                let mut accepted = String::new();
                if verdict == Verdict::Accept {
                    match context.reinjector.reinject(&suspect).await {
                        Ok(reply) => accepted = reply,
                        Err(e) => {
                            warn!(id = %suspect.id(), "Re-injection failed: {e}");
                            verdict = Verdict::Defer("could not re-inject message".to_string());
                        }
                    }
                }
                info!(id = %suspect.id(), from = %suspect.from, "Verdict: {verdict}");

                session.reply_verdict(&verdict, &accepted).await?;
            }
        }
    }
}

pub(crate) async fn refuse<RW>(mut socket: RW) -> io::Result<()>
where
    RW: AsyncWrite + Unpin,
{
    socket.write_all(SHUTTING_DOWN).await?;
    socket.flush().await?;
    socket.close().await
}
