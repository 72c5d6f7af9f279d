//! Known participants and sender resolution.

use crate::protocol::UserEntry;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Handle → unicast address of every participant we know about.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: BTreeMap<String, SocketAddr>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer. Returns true if the handle is new or its address changed.
    pub fn insert(&mut self, handle: impl Into<String>, addr: SocketAddr) -> bool {
        self.peers.insert(handle.into(), addr) != Some(addr)
    }

    pub fn remove(&mut self, handle: &str) -> Option<SocketAddr> {
        self.peers.remove(handle)
    }

    pub fn get(&self, handle: &str) -> Option<SocketAddr> {
        self.peers.get(handle).copied()
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.peers.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SocketAddr)> {
        self.peers.iter().map(|(h, a)| (h.as_str(), *a))
    }

    /// All peers as wire entries, ordered by handle.
    pub fn entries(&self) -> Vec<UserEntry> {
        self.iter().map(|(h, a)| UserEntry::new(h, a)).collect()
    }

    /// Merge a `KNOWNUSERS` list, ignoring our own handle.
    /// Returns how many entries were added or changed.
    pub fn merge(&mut self, entries: &[UserEntry], own_handle: Option<&str>) -> usize {
        entries
            .iter()
            .filter(|e| Some(e.handle.as_str()) != own_handle)
            .filter(|e| self.insert(e.handle.clone(), e.addr()))
            .count()
    }

    /// First peer registered on `ip`, for connections whose source port
    /// carries no meaning (TCP transfers).
    pub fn handle_for_ip(&self, ip: IpAddr) -> Option<&str> {
        self.iter().find(|(_, a)| a.ip() == ip).map(|(h, _)| h)
    }

    /// Work out who sent a datagram from `addr`.
    ///
    /// An exact address match wins; otherwise a peer on the same host is
    /// reported together with the unexpected source port.
    pub fn resolve_sender(&self, addr: SocketAddr) -> Sender {
        if let Some((handle, _)) = self.iter().find(|(_, a)| *a == addr) {
            return Sender::Known(handle.to_string());
        }
        if let Some(handle) = self.handle_for_ip(addr.ip()) {
            return Sender::SameHost {
                handle: handle.to_string(),
                port: addr.port(),
            };
        }
        Sender::Unknown(addr)
    }

    /// Work out who opened a connection from `addr` when the source port
    /// says nothing about the sender. A match is only a guess by host.
    pub fn resolve_connection(&self, addr: SocketAddr) -> Sender {
        match self.handle_for_ip(addr.ip()) {
            Some(handle) => Sender::SameIp(handle.to_string()),
            None => Sender::Unknown(addr),
        }
    }
}

/// Display identity of a message sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    Known(String),
    SameHost { handle: String, port: u16 },
    /// Guessed from the host address alone.
    SameIp(String),
    Unknown(SocketAddr),
}

impl Sender {
    /// The handle the sender most likely uses, if any.
    pub fn handle(&self) -> Option<&str> {
        match self {
            Self::Known(handle) | Self::SameIp(handle) | Self::SameHost { handle, .. } => {
                Some(handle.as_str())
            }
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(handle) => f.write_str(handle),
            Self::SameHost { handle, port } => write!(f, "{handle} (port {port})"),
            Self::SameIp(handle) => write!(f, "{handle} (by IP)"),
            Self::Unknown(addr) => write!(f, "unknown ({addr})"),
        }
    }
}

/// Merge several `KNOWNUSERS` answers into one list with a single entry per
/// handle. Later answers win; the result is sorted by handle.
pub fn consolidate<'a>(batches: impl IntoIterator<Item = &'a [UserEntry]>) -> Vec<UserEntry> {
    let mut merged: BTreeMap<&str, &UserEntry> = BTreeMap::new();
    for batch in batches {
        for entry in batch {
            merged.insert(entry.handle.as_str(), entry);
        }
    }
    merged.into_values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_insert_reports_changes() {
        let mut table = PeerTable::new();
        assert!(table.insert("alice", addr("10.0.0.1:5001")));
        assert!(!table.insert("alice", addr("10.0.0.1:5001")));
        assert!(table.insert("alice", addr("10.0.0.1:6001")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolve_sender_variants() {
        let mut table = PeerTable::new();
        table.insert("alice", addr("10.0.0.1:5001"));

        assert_eq!(
            table.resolve_sender(addr("10.0.0.1:5001")),
            Sender::Known("alice".into())
        );
        let same_host = table.resolve_sender(addr("10.0.0.1:40000"));
        assert_eq!(same_host.to_string(), "alice (port 40000)");
        assert_eq!(same_host.handle(), Some("alice"));

        let unknown = table.resolve_sender(addr("10.0.0.9:5001"));
        assert_eq!(unknown.to_string(), "unknown (10.0.0.9:5001)");
        assert_eq!(unknown.handle(), None);
    }

    #[test]
    fn test_resolve_connection_is_marked_as_guess() {
        let mut table = PeerTable::new();
        table.insert("alice", addr("10.0.0.1:5001"));

        let guessed = table.resolve_connection(addr("10.0.0.1:51234"));
        assert_eq!(guessed, Sender::SameIp("alice".into()));
        assert_eq!(guessed.to_string(), "alice (by IP)");
        assert_eq!(guessed.handle(), Some("alice"));

        let stranger = table.resolve_connection(addr("10.0.0.9:51234"));
        assert_eq!(stranger, Sender::Unknown(addr("10.0.0.9:51234")));
    }

    #[test]
    fn test_merge_skips_own_handle() {
        let mut table = PeerTable::new();
        let entries = vec![
            UserEntry::new("me", addr("10.0.0.1:5001")),
            UserEntry::new("bob", addr("10.0.0.2:5002")),
        ];
        assert_eq!(table.merge(&entries, Some("me")), 1);
        assert!(!table.contains("me"));
        assert_eq!(table.get("bob"), Some(addr("10.0.0.2:5002")));
        assert_eq!(table.merge(&entries, Some("me")), 0);
    }

    #[test]
    fn test_consolidate_dedupes_by_handle() {
        let first = vec![
            UserEntry::new("carol", addr("10.0.0.3:5003")),
            UserEntry::new("alice", addr("10.0.0.1:5001")),
        ];
        let second = vec![
            UserEntry::new("alice", addr("10.0.0.1:7001")),
            UserEntry::new("bob", addr("10.0.0.2:5002")),
        ];
        let merged = consolidate([first.as_slice(), second.as_slice()]);
        let handles: Vec<&str> = merged.iter().map(|e| e.handle.as_str()).collect();
        assert_eq!(handles, ["alice", "bob", "carol"]);
        assert_eq!(merged[0].port, 7001);
    }
}
