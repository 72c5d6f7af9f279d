//! Integration tests for slcp-cli functionality.
//! Tests the underlying library functions that the CLI commands invoke.

use slcp_core::config::SlcpConfig;
use slcp_net::{ChatEvent, DiscoveryService, Messenger};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::sync::mpsc;

#[test]
fn test_config_set_then_reload() {
    let tmpdir = tempfile::tempdir().unwrap();
    let path = tmpdir.path().join("slcp_config.toml");

    let mut config = SlcpConfig::load(&path).unwrap();
    assert!(!config.is_complete(), "fresh config needs prompting");

    config.set("handle", "alice").unwrap();
    config.set("port", "5001").unwrap();
    config.set("network.who_window_ms", "250").unwrap();
    config.save(&path).unwrap();

    let loaded = SlcpConfig::load(&path).unwrap();
    assert_eq!(loaded.handle, "alice");
    assert_eq!(loaded.port, 5001);
    assert_eq!(loaded.network.who_window_ms, 250);
    assert!(loaded.is_complete());
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_config_set_rejects_bad_values() {
    let mut config = SlcpConfig::default();
    assert!(config.set("port", "seventy").is_err());
    assert!(config.set("handle", "two words").is_err());
    assert!(config.set("colour", "blue").is_err());
    assert_eq!(config.port, 0);
}

#[test]
fn test_received_images_land_next_to_config() {
    let tmpdir = tempfile::tempdir().unwrap();
    let path = tmpdir.path().join("slcp_config.toml");
    std::fs::write(&path, "handle = \"bob\"\nport = 5002\nimagepath = \"inbox\"\n").unwrap();

    let config = SlcpConfig::load(&path).unwrap();
    assert_eq!(config.image_dir(), tmpdir.path().join("inbox"));
}

#[tokio::test]
async fn test_peers_listing_via_discovery() {
    let tmpdir = tempfile::tempdir().unwrap();
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let service = DiscoveryService::bind_on(SocketAddr::new(localhost, 0))
        .await
        .unwrap();
    let whois = service.local_addr().unwrap();
    tokio::spawn(service.run(std::future::pending()));

    let mut config = SlcpConfig {
        handle: "alice".into(),
        whoisport: whois.port(),
        base_dir: tmpdir.path().to_path_buf(),
        ..SlcpConfig::default()
    };
    config.network.broadcast = Ipv4Addr::LOCALHOST;
    config.network.who_window_ms = 100;

    let (tx, _rx) = mpsc::unbounded_channel();
    let alice = Messenger::start_on(config.clone(), localhost, tx).await.unwrap();
    alice.join().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // What `slcp peers` does: a throwaway client sends WHO and waits.
    config.handle = "lister".into();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let lister = Messenger::start_on(config, localhost, tx).await.unwrap();
    lister.who().await.unwrap();

    let users = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(ChatEvent::KnownUsers(users)) = rx.recv().await {
                return users;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].handle, "alice");
    assert_eq!(users[0].addr(), alice.local_addr().unwrap());
}
