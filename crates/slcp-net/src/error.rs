use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors from SLCP sockets and transfers.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to bind {what} socket on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("no known peer with handle '{0}' (try /who first)")]
    UnknownPeer(String),
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("not an image (jpg, png, gif, bmp): {}", .0.display())]
    NotAnImage(PathBuf),
    #[error("{op} with {peer} timed out")]
    Timeout { op: &'static str, peer: String },
    #[error("connection closed after {received} of {expected} bytes")]
    ConnectionClosed { received: u64, expected: u64 },
    #[error("invalid transfer header: {0}")]
    BadHeader(String),
    #[error("image of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("failed to store image: {0}")]
    Storage(String),
}
