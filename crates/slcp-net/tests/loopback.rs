//! End-to-end tests over the loopback interface.
//! "Broadcasts" go to 127.0.0.1 so a local discovery service receives them.

use slcp_core::config::SlcpConfig;
use slcp_core::peers::Sender;
use slcp_net::{ChatEvent, DiscoveryService, Messenger, NetError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn test_config(handle: &str, whoisport: u16, base_dir: &Path) -> SlcpConfig {
    let mut config = SlcpConfig {
        handle: handle.to_string(),
        port: 0,
        whoisport,
        base_dir: base_dir.to_path_buf(),
        ..SlcpConfig::default()
    };
    config.network.broadcast = Ipv4Addr::LOCALHOST;
    config.network.who_window_ms = 100;
    config
}

async fn start(
    handle: &str,
    whoisport: u16,
    base_dir: &Path,
) -> (Messenger, mpsc::UnboundedReceiver<ChatEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let messenger = Messenger::start_on(test_config(handle, whoisport, base_dir), LOCALHOST, tx)
        .await
        .unwrap();
    (messenger, rx)
}

/// Start a discovery service on a free loopback port.
async fn start_discovery() -> (SocketAddr, oneshot::Sender<()>) {
    let service = DiscoveryService::bind_on(SocketAddr::new(LOCALHOST, 0))
        .await
        .unwrap();
    let addr = service.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(service.run(async {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx)
}

/// Wait for the first event matching `pred`, skipping everything else.
async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<ChatEvent>,
    pred: impl Fn(&ChatEvent) -> bool,
) -> ChatEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_for_peer(messenger: &Messenger, handle: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !messenger.peers().await.iter().any(|p| p.handle == handle) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("peer never became known");
}

#[tokio::test]
async fn test_discovery_answers_who_with_joined_users() {
    let dir = tempfile::tempdir().unwrap();
    let (whois, _stop) = start_discovery().await;

    let (alice, _alice_rx) = start("alice", whois.port(), dir.path()).await;
    let (bob, mut bob_rx) = start("bob", whois.port(), dir.path()).await;
    alice.join().await.unwrap();
    bob.join().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    bob.who().await.unwrap();
    let event = next_matching(&mut bob_rx, |e| matches!(e, ChatEvent::KnownUsers(_))).await;
    let ChatEvent::KnownUsers(users) = event else {
        unreachable!()
    };
    let handles: Vec<&str> = users.iter().map(|u| u.handle.as_str()).collect();
    assert_eq!(handles, vec!["alice", "bob"]);

    // Bob learned alice's address, never his own.
    let peers = bob.peers().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].handle, "alice");
    assert_eq!(peers[0].addr(), alice.local_addr().unwrap());
}

#[tokio::test]
async fn test_message_between_two_clients() {
    let dir = tempfile::tempdir().unwrap();
    let (whois, _stop) = start_discovery().await;

    let (alice, _alice_rx) = start("alice", whois.port(), dir.path()).await;
    let (bob, mut bob_rx) = start("bob", whois.port(), dir.path()).await;
    alice.join().await.unwrap();
    bob.join().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.who().await.unwrap();
    bob.who().await.unwrap();
    wait_for_peer(&alice, "bob").await;
    wait_for_peer(&bob, "alice").await;

    alice.send_message("bob", "hello there bob").await.unwrap();
    let event = next_matching(&mut bob_rx, |e| matches!(e, ChatEvent::Message { .. })).await;
    match event {
        ChatEvent::Message { from, text, .. } => {
            assert_eq!(from, Sender::Known("alice".into()));
            assert_eq!(text, "hello there bob");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_autoreply_reaches_sender_once() {
    let dir = tempfile::tempdir().unwrap();
    let (whois, _stop) = start_discovery().await;

    let (alice, mut alice_rx) = start("alice", whois.port(), dir.path()).await;
    let (tx, _bob_rx) = mpsc::unbounded_channel();
    let mut bob_config = test_config("bob", whois.port(), dir.path());
    bob_config.autoreply = Some("away for lunch".into());
    let bob = Messenger::start_on(bob_config, LOCALHOST, tx).await.unwrap();

    alice.join().await.unwrap();
    bob.join().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.who().await.unwrap();
    bob.who().await.unwrap();
    wait_for_peer(&alice, "bob").await;
    wait_for_peer(&bob, "alice").await;

    alice.send_message("bob", "are you there?").await.unwrap();
    let event = next_matching(&mut alice_rx, |e| matches!(e, ChatEvent::Message { .. })).await;
    let ChatEvent::Message { from, text, .. } = event else {
        unreachable!()
    };
    assert_eq!(from, Sender::Known("bob".into()));
    assert_eq!(text, "away for lunch");
}

#[tokio::test]
async fn test_image_transfer_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let (whois, _stop) = start_discovery().await;

    let (alice, _alice_rx) = start("alice", whois.port(), dir.path()).await;
    let (bob, mut bob_rx) = start("bob", whois.port(), dir.path()).await;
    alice.join().await.unwrap();
    bob.join().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    alice.who().await.unwrap();
    bob.who().await.unwrap();
    wait_for_peer(&alice, "bob").await;
    wait_for_peer(&bob, "alice").await;

    let mut image = b"\x89PNG\r\n\x1a\n".to_vec();
    image.extend((0..20_000u32).map(|i| (i % 251) as u8));
    let source = dir.path().join("cat.png");
    std::fs::write(&source, &image).unwrap();

    let sent = alice.send_image("bob", &source).await.unwrap();
    assert_eq!(sent, image.len() as u64);

    let event = next_matching(&mut bob_rx, |e| matches!(e, ChatEvent::ImageReceived { .. })).await;
    let ChatEvent::ImageReceived { from, path, size } = event else {
        unreachable!()
    };
    assert_eq!(from, Sender::SameIp("alice".into()));
    assert_eq!(size, image.len() as u64);
    assert!(path.starts_with(dir.path().join("received_images")));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
    assert_eq!(std::fs::read(&path).unwrap(), image);
}

#[tokio::test]
async fn test_unknown_peer_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, _rx) = start("alice", 9, dir.path()).await;

    let err = alice.send_message("nobody", "hi").await.unwrap_err();
    assert!(matches!(err, NetError::UnknownPeer(ref h) if h == "nobody"));

    let err = alice
        .send_image("nobody", &dir.path().join("x.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::UnknownPeer(_)));
}

#[tokio::test]
async fn test_client_answers_whois_for_itself() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, _rx) = start("alice", 9, dir.path()).await;
    let alice_addr = alice.local_addr().unwrap();

    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    probe.send_to(b"WHOIS alice\n", alice_addr).await.unwrap();

    let mut buf = [0u8; 512];
    let (n, from) = tokio::time::timeout(Duration::from_secs(5), probe.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, alice_addr);
    let reply = std::str::from_utf8(&buf[..n]).unwrap();
    assert_eq!(reply.trim_end(), format!("IAM alice 127.0.0.1 {}", alice_addr.port()));
}

#[tokio::test]
async fn test_unicast_join_seeds_peer_table() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, mut rx) = start("alice", 9, dir.path()).await;

    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    probe
        .send_to(b"JOIN carol 6123\n", alice.local_addr().unwrap())
        .await
        .unwrap();

    let event = next_matching(&mut rx, |e| matches!(e, ChatEvent::PeerJoined { .. })).await;
    assert_eq!(
        event,
        ChatEvent::PeerJoined {
            handle: "carol".into(),
            addr: SocketAddr::new(LOCALHOST, 6123),
        }
    );
}

#[tokio::test]
async fn test_known_users_answers_are_consolidated() {
    let dir = tempfile::tempdir().unwrap();
    let (alice, mut rx) = start("alice", 9, dir.path()).await;
    let alice_addr = alice.local_addr().unwrap();

    // Two directories answer within one collection window.
    let first = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let second = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    first
        .send_to(
            b"KNOWNUSERS bob 10.0.0.2 5002, carol 10.0.0.3 5003\n",
            alice_addr,
        )
        .await
        .unwrap();
    second
        .send_to(
            b"KNOWNUSERS alice 127.0.0.1 1, bob 10.0.0.9 6002, dave 10.0.0.4 5004\n",
            alice_addr,
        )
        .await
        .unwrap();

    let event = next_matching(&mut rx, |e| matches!(e, ChatEvent::KnownUsers(_))).await;
    let ChatEvent::KnownUsers(users) = event else {
        unreachable!()
    };
    let listed: Vec<String> = users.iter().map(ToString::to_string).collect();
    assert_eq!(
        listed,
        vec![
            "alice 127.0.0.1 1",
            "bob 10.0.0.9 6002",
            "carol 10.0.0.3 5003",
            "dave 10.0.0.4 5004",
        ]
    );

    // The later answer also wins in the peer table; our own entry is skipped.
    let peers = alice.peers().await;
    let handles: Vec<&str> = peers.iter().map(|p| p.handle.as_str()).collect();
    assert_eq!(handles, vec!["bob", "carol", "dave"]);
    assert_eq!(peers[0].addr(), "10.0.0.9:6002".parse::<SocketAddr>().unwrap());

    // Nothing else arrives once the window has closed.
    let extra = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            if let Some(ChatEvent::KnownUsers(_)) = rx.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(extra.is_err(), "answers were split across several events");
}
