//! Glue between an accepted connection, its protocol session and the
//! scanner.
//!
//! A handler runs one connection to completion: receive a message, scan
//! it, commit the changes or refuse it, and repeat until the client leaves.

pub(crate) mod milter;
pub(crate) mod smtp;

use std::fmt;
use std::io;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::config::SessionSettings;
use crate::pool::Job;
use crate::reinject::Reinjector;
use crate::scanner::Scanner;

/// The protocol spoken on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HandlerKind {
    /// An MTA asking for a milter decision
    Milter,
    /// An MTA delivering over SMTP, expecting us to re-inject
    Smtp,
}

/// Everything a handler needs besides the connection
#[derive(Clone)]
pub struct Context {
    /// Protocol settings
    pub settings: SessionSettings,
    /// Who decides about messages
    pub scanner: Arc<dyn Scanner>,
    /// Where accepted SMTP messages go
    pub reinjector: Arc<dyn Reinjector>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A connection that ended badly
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The socket could not be used
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The milter session failed
    #[error(transparent)]
    Milter(#[from] crate::milter::Error),
    /// The SMTP session failed
    #[error(transparent)]
    Smtp(#[from] crate::smtp::Error),
}

/// Run `job`'s connection to completion
///
/// # Errors
/// If the session ended with an error; the client got a reply where the
/// protocol allows one
pub async fn handle(job: Job, context: &Context) -> Result<(), HandlerError> {
    let socket = tokio::net::TcpStream::from_std(job.stream)?.compat();
    match job.kind {
        HandlerKind::Milter => milter::handle(socket, job.peer, context).await?,
        HandlerKind::Smtp => smtp::handle(socket, Some(job.peer), context).await?,
    }
    Ok(())
}

/// Turn `job`'s client away with a temporary failure
///
/// # Errors
/// If the socket could not be used or the MTA misbehaved
pub async fn refuse(job: Job, context: &Context) -> Result<(), HandlerError> {
    let socket = tokio::net::TcpStream::from_std(job.stream)?.compat();
    match job.kind {
        HandlerKind::Milter => milter::refuse(socket, context).await?,
        HandlerKind::Smtp => smtp::refuse(socket).await?,
    }
    Ok(())
}
