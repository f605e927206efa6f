#![doc = include_str!("../Readme.md")]

pub mod config;
pub mod handler;
pub mod listener;
pub mod milter;
pub mod pool;
pub mod reinject;
pub mod scanner;
pub mod smtp;
pub mod spool;
pub mod suspect;

mod codec;

#[cfg(feature = "_fuzzing")]
pub mod fuzzing;

pub use config::{Config, ConfigError, SessionSettings};
pub use handler::{Context, HandlerKind};
pub use listener::Listener;
pub use milter::MilterSession;
pub use pool::{Dispatcher, Job, PoolError, PoolSettings, WorkerPool};
pub use reinject::{Reinjector, SmtpReinjector};
pub use scanner::{Pipeline, Plugin, Scanner, Verdict};
pub use smtp::SmtpSession;
pub use suspect::Suspect;

pub(crate) use self::codec::MilterCodec;

/// What a session wants from its caller after handling input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to decide yet, keep stepping
    Continue,
    /// A complete message is spooled, take the transaction and answer it
    AwaitingVerdict,
    /// The connection is over
    Closed,
}
