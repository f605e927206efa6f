use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use miette::{miette, IntoDiagnostic, Result};
use pretty_assertions::assert_eq;
use rstest::rstest;

use mailgate_common::actions::Quit;
use mailgate_common::commands::{
    Body, Command, Connect, Data, EndOfBody, EndOfHeader, Family, Header, Helo, Mail, Recipient,
};
use mailgate_common::decoding::ServerCommand;
use mailgate_common::optneg::Capability;
use mailgate_server::pool::Backend;
use mailgate_server::HandlerKind;

use crate::utils::{context, pool_settings, settings, Downstream, Gateway, MtaClient, Rewriter};

mod utils;

async fn gateway(dir: &std::path::Path, recipients: &[&str]) -> Result<Gateway> {
    Gateway::start(
        HandlerKind::Milter,
        pool_settings(Backend::Threads, 2),
        context(
            settings(dir, Duration::from_secs(5)),
            Rewriter {
                recipients: Some(recipients.iter().map(ToString::to_string).collect()),
            },
            Arc::new(Downstream::default()),
        ),
    )
    .await
}

/// Report a message from a@example.com to `recipients` up to end of body
async fn deliver(mta: &mut MtaClient, recipients: &[&str]) -> Result<()> {
    let mut commands: Vec<Command> = vec![
        Connect::new("client.example.com", Family::Inet, Some(4711), "192.0.2.1").into(),
        Helo::new("client.example.com").into(),
        Mail::new(b"<a@example.com>", &[]).into(),
    ];
    for rcpt in recipients {
        commands.push(Recipient::new(format!("<{rcpt}>").as_bytes(), &[]).into());
    }
    commands.push(Data.into());
    commands.push(Header::new(b"Subject", b"hello").into());
    commands.push(EndOfHeader.into());
    commands.push(Body::from(&b"Hi there\r\n"[..]).into());

    for command in commands {
        mta.send(command).await?;
        match mta.receive().await? {
            ServerCommand::Continue(_) => {}
            other => return Err(miette!("Expected continue, got {other}")),
        }
    }
    mta.send(EndOfBody).await
}

/// Everything the filter sends after end of body, up to its verdict
async fn modifications(mta: &mut MtaClient) -> Result<Vec<String>> {
    let mut seen = Vec::new();
    loop {
        match mta.receive().await? {
            ServerCommand::Continue(_) => return Ok(seen),
            ServerCommand::DeleteRecipient(rcpt) => seen.push(format!("-{}", rcpt.recipient())),
            ServerCommand::AddRecipient(rcpt) => seen.push(format!("+{}", rcpt.recipient())),
            other => seen.push(other.to_string()),
        }
    }
}

#[tokio::test]
async fn test_recipients_replaced_in_order() -> Result<()> {
    let dir = tempfile::tempdir().into_diagnostic()?;
    let gateway = gateway(dir.path(), &["a@example.org", "c@example.org"]).await?;

    let mut mta = MtaClient::connect(gateway.address).await?;
    mta.negotiate(Capability::all()).await?;
    deliver(&mut mta, &["a@example.org", "b@example.org"]).await?;

    assert_eq!(
        modifications(&mut mta).await?,
        vec![
            "-<a@example.org>",
            "-<b@example.org>",
            "+<a@example.org>",
            "+<c@example.org>",
        ]
    );
    mta.send(Quit).await?;

    gateway.stop().await
}

#[rstest]
#[case(Capability::empty())]
#[case(Capability::SMFIF_ADDRCPT)]
#[case(Capability::SMFIF_DELRCPT)]
#[tokio::test]
async fn test_modifications_need_both_sides(#[case] offered: Capability) -> Result<()> {
    let dir = tempfile::tempdir().into_diagnostic()?;
    let gateway = gateway(dir.path(), &["c@example.org"]).await?;

    let mut mta = MtaClient::connect(gateway.address).await?;
    mta.negotiate(offered).await?;
    deliver(&mut mta, &["b@example.org"]).await?;

    // Without both recipient capabilities only the verdict arrives
    let frames = modifications(&mut mta).await?;
    assert!(
        frames
            .iter()
            .all(|frame| offered.contains(Capability::SMFIF_ADDRCPT) || !frame.starts_with('+')),
        "{frames:?}"
    );
    assert!(
        frames
            .iter()
            .all(|frame| offered.contains(Capability::SMFIF_DELRCPT) || !frame.starts_with('-')),
        "{frames:?}"
    );
    mta.send(Quit).await?;

    gateway.stop().await
}

#[tokio::test]
async fn test_refused_after_shutdown() -> Result<()> {
    let dir = tempfile::tempdir().into_diagnostic()?;
    let gateway = gateway(dir.path(), &["c@example.org"]).await?;
    gateway.dispatcher.shutdown().await;

    let mut mta = MtaClient::connect(gateway.address).await?;
    mta.negotiate(Capability::all()).await?;
    let connect = Connect::new("client.example.com", Family::Inet, Some(4711), "192.0.2.1");
    mta.send(connect).await?;
    assert_matches!(mta.receive().await?, ServerCommand::Tempfail(_));

    gateway.stop().await
}
