//! Events the messenger reports to the user interface.

use crate::transfer::TransferProgress;
use chrono::{DateTime, Local};
use slcp_core::peers::Sender;
use slcp_core::protocol::UserEntry;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    PeerJoined {
        handle: String,
        addr: SocketAddr,
    },
    PeerLeft {
        handle: String,
    },
    /// All `KNOWNUSERS` answers that arrived within one collection window.
    KnownUsers(Vec<UserEntry>),
    Message {
        from: Sender,
        text: String,
        at: DateTime<Local>,
    },
    ImageAnnounced {
        from: Sender,
        size: u64,
    },
    /// A stored image. `from` is matched by host address only, so it is
    /// [`Sender::SameIp`] or [`Sender::Unknown`].
    ImageReceived {
        from: Sender,
        path: PathBuf,
        size: u64,
    },
    Located(UserEntry),
    Transfer(TransferProgress),
    TransferFailed {
        peer: String,
        error: String,
    },
}
