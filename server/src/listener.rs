//! Accepting connections and handing them to the worker pool.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::handler::HandlerKind;
use crate::pool::{Dispatcher, Job, PoolError};

/// A bound socket whose connections all speak one protocol
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    kind: HandlerKind,
}

impl Listener {
    /// Bind the configured address
    ///
    /// # Errors
    /// If the address can not be bound
    pub async fn bind(config: &ListenerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.address).await?;
        info!(
            address = %listener.local_addr()?,
            protocol = %config.protocol,
            "Listening"
        );
        Ok(Self {
            listener,
            kind: config.protocol,
        })
    }

    /// The address actually bound, useful with port 0
    ///
    /// # Errors
    /// If the socket is gone
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// What connections to this listener speak
    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Accept connections and dispatch them until `shutdown` completes.
    ///
    /// A connection no pool takes any more is refused right away.
    pub async fn serve<F>(self, dispatcher: Arc<Dispatcher>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let (stream, peer) = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed accepting connection: {e}");
                        continue;
                    }
                },
            };
            debug!(%peer, protocol = %self.kind, "Accepted connection");

            let job = match Job::from_tokio(stream, peer, self.kind) {
                Ok(job) => job,
                Err(e) => {
                    warn!(%peer, "Could not hand over connection: {e}");
                    continue;
                }
            };
            match dispatcher.dispatch(job).await {
                Ok(()) => {}
                Err(PoolError::Rejected(job)) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move { dispatcher.refuse(job).await });
                }
                Err(e) => warn!(%peer, "Could not dispatch connection: {e}"),
            }
        }
        info!(protocol = %self.kind, "Stopped listening");
    }
}
