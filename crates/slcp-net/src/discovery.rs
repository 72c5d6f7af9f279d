//! Discovery service: the participant directory on the whois port.
//!
//! Clients broadcast JOIN, LEAVE and WHO to the whois port. The service
//! records who is present and answers WHO with a unicast KNOWNUSERS and
//! WHOIS with IAM. Any number of services may run on a segment; clients
//! consolidate their answers.

use crate::error::NetError;
use crate::socket::{MAX_DATAGRAM, bind_udp};
use slcp_core::config::SlcpConfig;
use slcp_core::peers::PeerTable;
use slcp_core::session::{Action, Event, Session};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

pub struct DiscoveryService {
    socket: UdpSocket,
    session: Session,
}

impl DiscoveryService {
    /// Bind on all interfaces at `config.whoisport`.
    pub async fn bind(config: &SlcpConfig) -> Result<Self, NetError> {
        Self::bind_on(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            config.whoisport,
        ))
        .await
    }

    pub async fn bind_on(addr: SocketAddr) -> Result<Self, NetError> {
        let socket = bind_udp(addr, "discovery").await?;
        Ok(Self {
            socket,
            session: Session::directory(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peers(&self) -> &PeerTable {
        self.session.peers()
    }

    /// Serve until `shutdown` completes.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), NetError> {
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; MAX_DATAGRAM];
        tracing::info!("discovery service listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("discovery service stopped");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (n, from) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::debug!("discovery receive error: {}", e);
                            continue;
                        }
                    };
                    let Ok(text) = std::str::from_utf8(&buf[..n]) else {
                        tracing::warn!("dropping non-UTF-8 datagram from {}", from);
                        continue;
                    };
                    for action in self.session.handle_datagram(text, from) {
                        self.perform(action).await;
                    }
                }
            }
        }
    }

    async fn perform(&self, action: Action) {
        match action {
            Action::Send { to, message } => {
                match self.socket.send_to(message.to_line().as_bytes(), to).await {
                    Ok(_) => tracing::debug!("answered {} with {}", to, message.command()),
                    Err(e) => tracing::warn!("failed to answer {}: {}", to, e),
                }
            }
            Action::Emit(Event::PeerJoined { handle, addr }) => {
                tracing::info!("{} joined at {} ({} known)", handle, addr, self.peers().len());
            }
            Action::Emit(Event::PeerLeft { handle }) => {
                tracing::info!("{} left ({} known)", handle, self.peers().len());
            }
            Action::Emit(Event::Malformed { from, line, error }) => {
                tracing::warn!("ignoring line from {}: {} ({:?})", from, error, line);
            }
            Action::Emit(other) => tracing::debug!("discovery event: {:?}", other),
        }
    }
}
