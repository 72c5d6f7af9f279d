//! Tokio networking for the Simple Local Chat Protocol.
//!
//! # Architecture
//!
//! - **messenger**: a chat client's UDP endpoint and TCP image server
//! - **discovery**: the participant directory answering `WHO` and `WHOIS` on the whois port
//! - **transfer**: the TCP image stream (`IMG <to> <size>` header, then raw bytes)
//! - **socket**: socket setup shared by the above

pub mod discovery;
pub mod error;
pub mod events;
pub mod messenger;
pub mod socket;
pub mod transfer;

pub use discovery::DiscoveryService;
pub use error::NetError;
pub use events::ChatEvent;
pub use messenger::Messenger;
pub use transfer::{Direction, TransferOptions, TransferProgress};
