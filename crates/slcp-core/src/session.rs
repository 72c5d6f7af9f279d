//! Sans-IO SLCP state machine.
//!
//! A [`Session`] consumes decoded datagrams and answers with [`Action`]s: lines
//! to send back and [`Event`]s for the user interface. The same machine runs
//! in a chat client (with an [`Identity`]) and in a discovery service
//! (directory mode, no identity of its own), so both answer `WHO` and `WHOIS`
//! identically.

use crate::peers::{PeerTable, Sender};
use crate::protocol::{Message, ParseError, UserEntry, parse_datagram};
use std::collections::HashSet;
use std::net::SocketAddr;

/// The local participant: handle plus the address peers should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub handle: String,
    pub addr: SocketAddr,
}

impl Identity {
    pub fn new(handle: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            handle: handle.into(),
            addr,
        }
    }

    pub fn entry(&self) -> UserEntry {
        UserEntry::new(self.handle.clone(), self.addr)
    }
}

/// Something the session wants the network layer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send `message` as a unicast datagram.
    Send { to: SocketAddr, message: Message },
    Emit(Event),
}

/// Protocol-level happenings worth telling the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PeerJoined { handle: String, addr: SocketAddr },
    PeerLeft { handle: String },
    /// One `KNOWNUSERS` answer, unconsolidated.
    KnownUsers(Vec<UserEntry>),
    Message { from: Sender, text: String },
    ImageAnnounced { from: Sender, size: u64 },
    /// Answer to a `WHOIS`.
    Located(UserEntry),
    Malformed {
        from: SocketAddr,
        line: String,
        error: ParseError,
    },
}

#[derive(Debug, Clone)]
pub struct Session {
    identity: Option<Identity>,
    autoreply: Option<String>,
    /// Senders that already received the autoreply; one per peer stops two
    /// away clients from answering each other forever.
    autoreplied: HashSet<String>,
    peers: PeerTable,
}

impl Session {
    /// A chat participant.
    pub fn client(identity: Identity, autoreply: Option<String>) -> Self {
        Self {
            identity: Some(identity),
            autoreply: autoreply.filter(|text| !text.trim().is_empty()),
            autoreplied: HashSet::new(),
            peers: PeerTable::new(),
        }
    }

    /// A discovery service that only keeps the participant directory.
    pub fn directory() -> Self {
        Self {
            identity: None,
            autoreply: None,
            autoreplied: HashSet::new(),
            peers: PeerTable::new(),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn own_handle(&self) -> Option<&str> {
        self.identity.as_ref().map(|id| id.handle.as_str())
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerTable {
        &mut self.peers
    }

    fn is_me(&self, handle: &str) -> bool {
        self.own_handle() == Some(handle)
    }

    /// Everyone we would list in a `KNOWNUSERS` answer: ourselves first.
    pub fn known_users(&self) -> Vec<UserEntry> {
        let mut users: Vec<UserEntry> = self.identity.iter().map(Identity::entry).collect();
        users.extend(
            self.peers
                .entries()
                .into_iter()
                .filter(|e| !self.is_me(&e.handle)),
        );
        users
    }

    /// Process every line of a datagram received from `from`.
    pub fn handle_datagram(&mut self, text: &str, from: SocketAddr) -> Vec<Action> {
        let mut actions = Vec::new();
        for (line, parsed) in text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .zip(parse_datagram(text))
        {
            match parsed {
                Ok(message) => actions.extend(self.handle_message(message, from)),
                Err(error) => actions.push(Action::Emit(Event::Malformed {
                    from,
                    line: line.trim().to_string(),
                    error,
                })),
            }
        }
        actions
    }

    /// Apply a single decoded message.
    pub fn handle_message(&mut self, message: Message, from: SocketAddr) -> Vec<Action> {
        match message {
            Message::Join { handle, port } => {
                if self.is_me(&handle) {
                    return Vec::new();
                }
                // Repeats are reported too.
                let addr = SocketAddr::new(from.ip(), port);
                self.peers.insert(handle.clone(), addr);
                vec![Action::Emit(Event::PeerJoined { handle, addr })]
            }
            Message::Leave { handle } => {
                self.autoreplied.remove(&handle);
                match self.peers.remove(&handle) {
                    Some(_) => vec![Action::Emit(Event::PeerLeft { handle })],
                    None => Vec::new(),
                }
            }
            Message::Who => vec![Action::Send {
                to: from,
                message: Message::KnownUsers(self.known_users()),
            }],
            Message::KnownUsers(users) => {
                let own = self.own_handle().map(str::to_string);
                self.peers.merge(&users, own.as_deref());
                vec![Action::Emit(Event::KnownUsers(users))]
            }
            Message::Msg { to, text } => {
                if !self.is_me(&to) {
                    return Vec::new();
                }
                let sender = self.peers.resolve_sender(from);
                let mut actions = vec![Action::Emit(Event::Message {
                    from: sender.clone(),
                    text,
                })];
                if let Some(reply) = self.autoreply_for(&sender) {
                    actions.push(reply);
                }
                actions
            }
            Message::Img { to, size } => {
                if !self.is_me(&to) {
                    return Vec::new();
                }
                vec![Action::Emit(Event::ImageAnnounced {
                    from: self.peers.resolve_sender(from),
                    size,
                })]
            }
            Message::Whois { handle } => {
                let located = match &self.identity {
                    Some(id) if id.handle == handle => Some(id.entry()),
                    // Only a directory answers on behalf of others.
                    None => self.peers.get(&handle).map(|addr| UserEntry::new(handle, addr)),
                    Some(_) => None,
                };
                located
                    .map(|user| Action::Send {
                        to: from,
                        message: Message::Iam {
                            handle: user.handle,
                            ip: user.ip,
                            port: user.port,
                        },
                    })
                    .into_iter()
                    .collect()
            }
            Message::Iam { handle, ip, port } => {
                let user = UserEntry { handle, ip, port };
                if !self.is_me(&user.handle) {
                    self.peers.insert(user.handle.clone(), user.addr());
                }
                vec![Action::Emit(Event::Located(user))]
            }
        }
    }

    fn autoreply_for(&mut self, sender: &Sender) -> Option<Action> {
        let text = self.autoreply.as_ref()?;
        let handle = sender.handle()?;
        let addr = self.peers.get(handle)?;
        if !self.autoreplied.insert(handle.to_string()) {
            return None;
        }
        Some(Action::Send {
            to: addr,
            message: Message::Msg {
                to: handle.to_string(),
                text: text.clone(),
            },
        })
    }
}
