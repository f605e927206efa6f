use std::io::SeekFrom;
use std::net::SocketAddr;

use futures::{AsyncRead, AsyncWrite};
use tokio::io::AsyncSeekExt;
use tracing::{info, instrument};

use super::Context;
use crate::milter::{Error, MilterSession};
use crate::scanner::Verdict;
use crate::spool;
use crate::suspect::Suspect;
use crate::Step;

#[instrument(skip_all, fields(peer = %peer))]
pub(crate) async fn handle<RW>(socket: RW, peer: SocketAddr, context: &Context) -> Result<(), Error>
where
    RW: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut session = MilterSession::new(socket, &context.settings);
    loop {
        match session.step().await? {
            Step::Continue => {}
            Step::Closed => return Ok(()),
            Step::AwaitingVerdict => {
                let transaction = session.take_transaction().ok_or(Error::InvalidState {
                    operation: "taking the transaction",
                    state: session.state(),
                })?;
                let mut suspect = Suspect::new(transaction);
                let verdict = context.scanner.scan(&mut suspect).await;
                info!(
                    id = %suspect.id(),
                    queue_id = suspect.macro_value("i").unwrap_or_default(),
                    from = %suspect.from,
                    "Verdict: {verdict}"
                );

                if verdict == Verdict::Accept {
                    commit(&mut session, &suspect).await?;
                }
                session.apply_verdict(&verdict).await?;
            }
        }
    }
}

/// Send the header, envelope and body changes queued on `suspect`
async fn commit<RW>(session: &mut MilterSession<RW>, suspect: &Suspect) -> Result<(), Error>
where
    RW: AsyncRead + AsyncWrite + Unpin + Send,
{
    for (name, value) in suspect.added_headers() {
        session.add_header(name, value).await?;
    }
    for (name, value) in suspect.changed_headers() {
        session.change_header(1, name, value).await?;
    }
    session.commit_envelope(suspect).await?;

    if suspect.body_replaced() {
        let offset = spool::body_offset(suspect.spool_path()).await?;
        let mut body = tokio::fs::File::open(suspect.spool_path()).await?;
        body.seek(SeekFrom::Start(offset)).await?;
        session.replace_body(body).await?;
    }
    Ok(())
}

pub(crate) async fn refuse<RW>(socket: RW, context: &Context) -> Result<(), Error>
where
    RW: AsyncRead + AsyncWrite + Unpin + Send,
{
    MilterSession::new(socket, &context.settings).refuse().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::handler::tests::{context, RecordingReinjector, StubScanner};
    use crate::milter::tests::{connect, settings};
    use assert_matches::assert_matches;
    use mailgate_common::actions::Quit;
    use mailgate_common::commands::{
        Body, Connect, Data, EndOfBody, EndOfHeader, Family, Header, Helo, Mail, Recipient,
    };
    use mailgate_common::decoding::ServerCommand;
    use mailgate_common::optneg::Capability;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_accept_commits_changes() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let context = context(
            settings(dir.path()),
            StubScanner {
                verdict: Verdict::Accept,
                rewrite: true,
            },
            Arc::new(RecordingReinjector::default()),
        );
        let (socket, mut mta) = connect();
        let peer = SocketAddr::from(([127, 0, 0, 1], 4711));
        let handler = tokio::spawn(async move { handle(socket, peer, &context).await });

        mta.negotiate(Capability::all()).await;
        mta.send(Connect::new("h", Family::Unknown, None, "")).await;
        mta.receive().await;
        mta.send(Helo::new("h")).await;
        mta.receive().await;
        mta.send(Mail::new(b"<a@example.com>", &[])).await;
        mta.receive().await;
        mta.send(Recipient::new(b"<b@example.com>", &[])).await;
        mta.receive().await;
        mta.send(Data).await;
        mta.receive().await;
        mta.send(Header::new(b"Subject", b"hello")).await;
        mta.receive().await;
        mta.send(EndOfHeader).await;
        mta.receive().await;
        mta.send(Body::from(&b"body\r\n"[..])).await;
        mta.receive().await;
        mta.send(EndOfBody).await;

        assert_matches!(mta.receive().await, ServerCommand::AddHeader(header) => {
            assert_eq!(header.name(), "X-Scanned");
        });
        assert_matches!(mta.receive().await, ServerCommand::ChangeHeader(header) => {
            assert_eq!(header.index(), 1);
            assert_eq!(header.value(), "[checked] hello");
        });
        assert_matches!(mta.receive().await, ServerCommand::DeleteRecipient(rcpt) => {
            assert_eq!(rcpt.recipient(), "<b@example.com>");
        });
        assert_matches!(mta.receive().await, ServerCommand::AddRecipient(rcpt) => {
            assert_eq!(rcpt.recipient(), "<rewritten@example.com>");
        });
        assert_matches!(mta.receive().await, ServerCommand::Continue(_));

        mta.send(Quit).await;
        handler
            .await
            .expect("Handler panicked")
            .expect("Handler failed");
    }

    #[tokio::test]
    async fn test_reject_sends_no_changes() {
        let dir = tempfile::tempdir().expect("Failed creating spool dir");
        let context = context(
            settings(dir.path()),
            StubScanner {
                verdict: Verdict::Reject("5.7.0 spam".into()),
                rewrite: true,
            },
            Arc::new(RecordingReinjector::default()),
        );
        let (socket, mut mta) = connect();
        let peer = SocketAddr::from(([127, 0, 0, 1], 4711));
        let handler = tokio::spawn(async move { handle(socket, peer, &context).await });

        mta.negotiate(Capability::all()).await;
        mta.send(Connect::new("h", Family::Unknown, None, "")).await;
        mta.receive().await;
        mta.send(Mail::new(b"<a@example.com>", &[])).await;
        mta.receive().await;
        mta.send(EndOfHeader).await;
        mta.receive().await;
        mta.send(EndOfBody).await;

        assert_matches!(mta.receive().await, ServerCommand::ReplyCode(reply) => {
            assert_eq!(reply.to_string(), "550 5.7.0 spam");
        });
        drop(mta);
        handler
            .await
            .expect("Handler panicked")
            .expect("Handler failed");
    }
}
