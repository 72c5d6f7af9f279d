//! Socket setup shared by the messenger and the discovery service.

use crate::error::NetError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Largest datagram we accept.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Bind a UDP socket with broadcast enabled.
pub async fn bind_udp(addr: SocketAddr, what: &'static str) -> Result<UdpSocket, NetError> {
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| NetError::Bind { what, addr, source })?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// The address other hosts reach us on.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outgoing interface, whose address we then read back. Falls back to
/// loopback on hosts without a route.
pub async fn local_ip() -> IpAddr {
    async fn probe() -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).await?;
        Ok(socket.local_addr()?.ip())
    }

    match probe().await {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            tracing::debug!("local address probe failed, using loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}
