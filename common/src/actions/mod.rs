//! Control-flow packets.
//!
//! The MTA uses [`Abort`], [`Quit`] and [`QuitNc`] to steer the conversation,
//! the filter answers each command with one of the remaining actions.

mod reply;

use enum_dispatch::enum_dispatch;

pub use self::reply::{ReplyCode, StatusCode};

unit_packet!(
    /// Abort processing of the current mail, the connection stays open
    #[doc(alias = "SMFIC_ABORT")]
    Abort = b'A'
);

unit_packet!(
    /// Close this milter connection
    #[doc(alias = "SMFIC_QUIT")]
    Quit = b'Q'
);

unit_packet!(
    /// Close the current conversation but keep the connection for a new one
    #[doc(alias = "SMFIC_QUIT_NC")]
    QuitNc = b'K'
);

unit_packet!(
    /// Continue with the next step in the milter protocol
    #[doc(alias = "SMFIR_CONTINUE")]
    Continue = b'c'
);

unit_packet!(
    /// Accept the mail but silently drop it
    #[doc(alias = "SMFIR_DISCARD")]
    Discard = b'd'
);

unit_packet!(
    /// Reject the mail with the MTA's default permanent failure
    #[doc(alias = "SMFIR_REJECT")]
    Reject = b'r'
);

unit_packet!(
    /// Defer the mail with the MTA's default temporary failure
    #[doc(alias = "SMFIR_TEMPFAIL")]
    Tempfail = b't'
);

/// All control-flow actions combined
///
/// See the contained variants for more.
#[allow(missing_docs)]
#[enum_dispatch]
#[derive(Debug, Clone, strum::Display)]
pub enum Action {
    Continue,
    Abort,

    Discard,
    Reject,
    Tempfail,
    ReplyCode,

    Quit,
    QuitNc,
}
