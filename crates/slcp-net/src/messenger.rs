//! Chat client networking.
//!
//! A [`Messenger`] owns the client's UDP socket and TCP image listener, both on
//! the configured port. Incoming datagrams run through a [`Session`]; whatever
//! the user should see is pushed into an unbounded channel of [`ChatEvent`]s.

use crate::error::NetError;
use crate::events::ChatEvent;
use crate::socket::{MAX_DATAGRAM, bind_udp, local_ip};
use crate::transfer::{self, TransferOptions};
use chrono::{Local, Utc};
use slcp_core::config::SlcpConfig;
use slcp_core::media::ImageKind;
use slcp_core::peers::{Sender, consolidate};
use slcp_core::protocol::{Message, UserEntry};
use slcp_core::session::{Action, Event, Identity, Session};
use slcp_core::storage;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{RwLock, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle to a running chat endpoint. Cheap to clone.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<Inner>,
}

struct Inner {
    config: SlcpConfig,
    identity: Identity,
    udp: UdpSocket,
    session: RwLock<Session>,
    events: mpsc::UnboundedSender<ChatEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("identity", &self.inner.identity)
            .finish()
    }
}

impl Messenger {
    /// Bind on all interfaces at `config.port` and start the receive loops.
    pub async fn start(
        config: SlcpConfig,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<Self, NetError> {
        Self::start_on(config, IpAddr::V4(Ipv4Addr::UNSPECIFIED), events).await
    }

    /// Like [`Messenger::start`], bound to a specific local address.
    ///
    /// A port of 0 picks a free one; the TCP listener then takes the same
    /// number as the UDP socket.
    pub async fn start_on(
        config: SlcpConfig,
        bind_ip: IpAddr,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Result<Self, NetError> {
        let udp = bind_udp(SocketAddr::new(bind_ip, config.port), "UDP").await?;
        let port = udp.local_addr()?.port();

        let tcp_addr = SocketAddr::new(bind_ip, port);
        let listener = TcpListener::bind(tcp_addr)
            .await
            .map_err(|source| NetError::Bind {
                what: "TCP",
                addr: tcp_addr,
                source,
            })?;

        let ip = if bind_ip.is_unspecified() {
            local_ip().await
        } else {
            bind_ip
        };
        let identity = Identity::new(config.handle.clone(), SocketAddr::new(ip, port));
        let session = Session::client(identity.clone(), config.autoreply.clone());

        let inner = Arc::new(Inner {
            config,
            identity,
            udp,
            session: RwLock::new(session),
            events,
            tasks: Mutex::new(Vec::new()),
        });

        let udp_task = tokio::spawn(udp_loop(Arc::clone(&inner)));
        let tcp_task = tokio::spawn(tcp_loop(Arc::clone(&inner), listener));
        if let Ok(mut tasks) = inner.tasks.lock() {
            tasks.extend([udp_task, tcp_task]);
        }

        tracing::info!(
            "messenger for '{}' listening on port {} (advertised as {})",
            inner.identity.handle,
            port,
            inner.identity.addr
        );
        Ok(Self { inner })
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.inner.udp.local_addr()?)
    }

    pub fn config(&self) -> &SlcpConfig {
        &self.inner.config
    }

    /// Where JOIN, LEAVE, WHO and WHOIS are broadcast.
    pub fn broadcast_addr(&self) -> SocketAddr {
        let network = &self.inner.config.network;
        SocketAddr::new(IpAddr::V4(network.broadcast), self.inner.config.whoisport)
    }

    pub async fn join(&self) -> Result<(), NetError> {
        let message = Message::Join {
            handle: self.inner.identity.handle.clone(),
            port: self.inner.identity.addr.port(),
        };
        self.inner.send_to(&message, self.broadcast_addr()).await
    }

    pub async fn leave(&self) -> Result<(), NetError> {
        let message = Message::Leave {
            handle: self.inner.identity.handle.clone(),
        };
        self.inner.send_to(&message, self.broadcast_addr()).await
    }

    /// Ask for the participant list; answers arrive as one
    /// [`ChatEvent::KnownUsers`] after the collection window.
    pub async fn who(&self) -> Result<(), NetError> {
        self.inner.send_to(&Message::Who, self.broadcast_addr()).await
    }

    pub async fn whois(&self, handle: &str) -> Result<(), NetError> {
        let message = Message::Whois {
            handle: handle.to_string(),
        };
        self.inner.send_to(&message, self.broadcast_addr()).await
    }

    /// Send a text message to a known peer.
    pub async fn send_message(&self, handle: &str, text: &str) -> Result<(), NetError> {
        let addr = self.peer_addr(handle).await?;
        let message = Message::Msg {
            to: handle.to_string(),
            text: text.to_string(),
        };
        self.inner.send_to(&message, addr).await
    }

    /// Send an image file to a known peer over TCP.
    /// Progress is reported as [`ChatEvent::Transfer`].
    pub async fn send_image(&self, handle: &str, path: &Path) -> Result<u64, NetError> {
        let addr = self.peer_addr(handle).await?;
        let options = TransferOptions::from(&self.inner.config.network);
        let result = transfer::send_image(addr, handle, path, &options, |progress| {
            self.inner.emit(ChatEvent::Transfer(progress));
        })
        .await;
        match &result {
            Ok(size) => tracing::info!("sent {} bytes to {}", size, handle),
            Err(e) => tracing::warn!("image transfer to {} failed: {}", handle, e),
        }
        result
    }

    /// Snapshot of every known peer, ordered by handle.
    pub async fn peers(&self) -> Vec<UserEntry> {
        self.inner.session.read().await.peers().entries()
    }

    async fn peer_addr(&self, handle: &str) -> Result<SocketAddr, NetError> {
        self.inner
            .session
            .read()
            .await
            .peers()
            .get(handle)
            .ok_or_else(|| NetError::UnknownPeer(handle.to_string()))
    }

    /// Stop the receive loops. Transfers already in flight finish on their own.
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Inner {
    async fn send_to(&self, message: &Message, to: SocketAddr) -> Result<(), NetError> {
        self.udp.send_to(message.to_line().as_bytes(), to).await?;
        tracing::debug!("sent {} to {}", message.command(), to);
        Ok(())
    }

    fn emit(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    /// Forward a session event; malformed input only goes to the log.
    fn emit_session_event(&self, event: Event) {
        let event = match event {
            Event::PeerJoined { handle, addr } => {
                tracing::info!("{} joined from {}", handle, addr);
                ChatEvent::PeerJoined { handle, addr }
            }
            Event::PeerLeft { handle } => {
                tracing::info!("{} left the chat", handle);
                ChatEvent::PeerLeft { handle }
            }
            Event::KnownUsers(users) => ChatEvent::KnownUsers(users),
            Event::Message { from, text } => ChatEvent::Message {
                from,
                text,
                at: Local::now(),
            },
            Event::ImageAnnounced { from, size } => ChatEvent::ImageAnnounced { from, size },
            Event::Located(user) => ChatEvent::Located(user),
            Event::Malformed { from, line, error } => {
                tracing::warn!("ignoring line from {}: {} ({:?})", from, error, line);
                return;
            }
        };
        self.emit(event);
    }

    /// Receive one image connection; failures are reported as
    /// [`ChatEvent::TransferFailed`] labelled like the progress events.
    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let sender = self.session.read().await.peers().resolve_connection(peer);
        let label = sender.to_string();
        tracing::info!("incoming image connection from {}", label);

        if let Err(e) = self.receive_from(stream, peer, sender, &label).await {
            tracing::warn!("image transfer from {} failed: {}", label, e);
            self.emit(ChatEvent::TransferFailed {
                peer: label,
                error: e.to_string(),
            });
        }
    }

    async fn receive_from(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        sender: Sender,
        label: &str,
    ) -> Result<(), NetError> {
        let options = TransferOptions::from(&self.config.network);
        let image = transfer::receive_image(stream, label, &options, |progress| {
            self.emit(ChatEvent::Transfer(progress));
        })
        .await?;
        if image.to != self.identity.handle {
            tracing::warn!("image from {} was addressed to '{}'", label, image.to);
        }

        let size = image.bytes.len() as u64;
        let name = storage::image_file_name(
            peer.ip(),
            Utc::now(),
            sender.handle().unwrap_or("unknown"),
            ImageKind::sniff(&image.bytes),
        );
        let dir = self.config.image_dir();
        let path = tokio::task::spawn_blocking(move || storage::save_image(&dir, &name, &image.bytes))
            .await
            .map_err(|e| NetError::Storage(e.to_string()))?
            .map_err(|e| NetError::Storage(format!("{e:#}")))?;

        tracing::info!("stored {} bytes from {} at {}", size, label, path.display());
        self.emit(ChatEvent::ImageReceived {
            from: sender,
            path,
            size,
        });
        Ok(())
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn udp_loop(inner: Arc<Inner>) {
    let window = inner.config.network.who_window();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    // KNOWNUSERS answers collected until the window closes.
    let mut answers: Vec<Vec<UserEntry>> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            received = inner.udp.recv_from(&mut buf) => {
                let (n, from) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        // ICMP port-unreachable from an earlier send surfaces here on some platforms.
                        tracing::debug!("UDP receive error: {}", e);
                        continue;
                    }
                };
                let Ok(text) = std::str::from_utf8(&buf[..n]) else {
                    tracing::warn!("dropping non-UTF-8 datagram from {}", from);
                    continue;
                };
                let actions = inner.session.write().await.handle_datagram(text, from);
                for action in actions {
                    match action {
                        Action::Send { to, message } => {
                            if let Err(e) = inner.send_to(&message, to).await {
                                tracing::warn!("failed to answer {}: {}", to, e);
                            }
                        }
                        Action::Emit(Event::KnownUsers(users)) => {
                            answers.push(users);
                            if deadline.is_none() {
                                deadline = Some(Instant::now() + window);
                            }
                        }
                        Action::Emit(event) => inner.emit_session_event(event),
                    }
                }
            }
            () = sleep_until_some(deadline) => {
                let users = consolidate(answers.iter().map(Vec::as_slice));
                answers.clear();
                deadline = None;
                inner.emit(ChatEvent::KnownUsers(users));
            }
        }
    }
}

async fn tcp_loop(inner: Arc<Inner>, listener: TcpListener) {
    let slots = Arc::new(Semaphore::new(
        inner.config.network.max_incoming_transfers.max(1),
    ));
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
                    tracing::warn!("refusing image connection from {}: too many transfers", peer);
                    drop(stream);
                    continue;
                };
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner.handle_connection(stream, peer).await;
                    drop(permit);
                });
            }
            Err(e) => {
                tracing::warn!("TCP accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
