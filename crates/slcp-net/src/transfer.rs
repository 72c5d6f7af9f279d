//! TCP image transfer.
//!
//! The sender connects to the recipient's chat port, writes one
//! `IMG <to> <size>\n` header line and then exactly `size` raw bytes.

use crate::error::NetError;
use slcp_core::config::NetworkConfig;
use slcp_core::media::ImageKind;
use slcp_core::protocol::Message;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Longest header line we read before giving up on a connection.
const MAX_HEADER_LEN: u64 = 512;

/// Chunks reserved up front for an incoming image.
const INITIAL_CHUNKS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Receive,
}

/// Progress of one image transfer, reported after every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub direction: Direction,
    /// Handle or address of the other side.
    pub peer: String,
    pub transferred: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.transferred as f64 / self.total as f64 * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.transferred >= self.total
    }
}

/// Chunking, limits and deadlines for transfers.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    pub header_timeout: Duration,
    pub chunk_timeout: Duration,
    pub max_image_bytes: u64,
}

impl From<&NetworkConfig> for TransferOptions {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            connect_timeout: config.connect_timeout(),
            header_timeout: config.header_timeout(),
            chunk_timeout: config.chunk_timeout(),
            max_image_bytes: config.max_image_bytes,
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

/// A fully received image.
#[derive(Debug)]
pub struct IncomingImage {
    /// Recipient handle named in the header.
    pub to: String,
    pub bytes: Vec<u8>,
}

/// Send the image at `path` to `to`, listening on `addr`.
/// Returns the number of image bytes sent.
pub async fn send_image(
    addr: SocketAddr,
    to: &str,
    path: &Path,
    options: &TransferOptions,
    mut on_progress: impl FnMut(TransferProgress),
) -> Result<u64, NetError> {
    if !path.is_file() {
        return Err(NetError::FileNotFound(path.to_path_buf()));
    }
    if ImageKind::from_path(path).is_none() {
        return Err(NetError::NotAnImage(path.to_path_buf()));
    }

    let bytes = tokio::fs::read(path).await?;
    let total = bytes.len() as u64;
    tracing::info!("sending {} bytes to {} at {}", total, to, addr);

    let mut stream = timeout(options.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| NetError::Timeout {
            op: "connect",
            peer: to.to_string(),
        })??;

    let header = Message::Img {
        to: to.to_string(),
        size: total,
    };
    stream.write_all(header.to_line().as_bytes()).await?;

    let mut sent = 0u64;
    for chunk in bytes.chunks(options.chunk_size.max(1)) {
        stream.write_all(chunk).await?;
        sent += chunk.len() as u64;
        on_progress(TransferProgress {
            direction: Direction::Send,
            peer: to.to_string(),
            transferred: sent,
            total,
        });
    }
    stream.flush().await?;
    stream.shutdown().await?;

    Ok(total)
}

/// Read one transfer from `reader`: the header line, then the announced bytes.
///
/// `peer` only labels progress reports and errors.
pub async fn receive_image<R: AsyncRead + Unpin>(
    reader: R,
    peer: &str,
    options: &TransferOptions,
    mut on_progress: impl FnMut(TransferProgress),
) -> Result<IncomingImage, NetError> {
    let mut reader = BufReader::new(reader);

    let mut header = String::new();
    timeout(
        options.header_timeout,
        (&mut reader).take(MAX_HEADER_LEN).read_line(&mut header),
    )
    .await
    .map_err(|_| NetError::Timeout {
        op: "header",
        peer: peer.to_string(),
    })??;
    if !header.ends_with('\n') {
        return Err(NetError::BadHeader(if header.is_empty() {
            "connection closed before header".to_string()
        } else {
            "header line too long or unterminated".to_string()
        }));
    }

    let (to, size) = match Message::parse(&header) {
        Ok(Message::Img { to, size }) => (to, size),
        Ok(other) => {
            return Err(NetError::BadHeader(format!(
                "expected IMG, got {}",
                other.command()
            )));
        }
        Err(e) => return Err(NetError::BadHeader(e.to_string())),
    };
    if size > options.max_image_bytes {
        return Err(NetError::TooLarge {
            size,
            limit: options.max_image_bytes,
        });
    }

    let announced = usize::try_from(size).map_err(|_| NetError::TooLarge {
        size,
        limit: options.max_image_bytes,
    })?;
    let chunk_size = options.chunk_size.max(1);
    // The header is unverified; memory grows with the bytes that arrive.
    let mut bytes = Vec::with_capacity(announced.min(chunk_size.saturating_mul(INITIAL_CHUNKS)));
    let mut buf = vec![0u8; chunk_size];
    let mut received = 0u64;

    while received < size {
        let remaining = usize::try_from(size - received).unwrap_or(usize::MAX);
        let want = buf.len().min(remaining);
        let n = timeout(options.chunk_timeout, reader.read(&mut buf[..want]))
            .await
            .map_err(|_| NetError::Timeout {
                op: "image transfer",
                peer: peer.to_string(),
            })??;
        if n == 0 {
            return Err(NetError::ConnectionClosed {
                received,
                expected: size,
            });
        }
        bytes.extend_from_slice(&buf[..n]);
        received += n as u64;
        on_progress(TransferProgress {
            direction: Direction::Receive,
            peer: peer.to_string(),
            transferred: received,
            total: size,
        });
    }

    Ok(IncomingImage { to, bytes })
}
