use crate::*;

use hostshare_core::PresenceMessage;

/// A presence datagram reaching A's discovery port surfaces as a
/// peer-discovered event on A's manager, and the peer is listed.
#[tokio::test]
async fn test_presence_relayed_as_network_event() -> Result<()> {
    let a = node("desk-a", true, &[]).await?;
    let mut events = a.manager.subscribe();

    let port = a.manager.network_status().await.discovery_service.broadcast_port;
    let remote = DeviceInfo::from_parts("desk-b", "tester");
    let bytes = PresenceMessage::new(&remote, 8890, 3, hostshare_core::now_ms()).encode()?;
    let sender = std::net::UdpSocket::bind("127.0.0.1:0")?;
    sender.send_to(&bytes, ("127.0.0.1", port))?;

    let event = wait_for_event(&mut events, |e| matches!(e, NetworkEvent::PeerDiscovered(_))).await?;
    let NetworkEvent::PeerDiscovered(peer) = event else {
        unreachable!();
    };
    assert_eq!(peer.device_name, "desk-b");
    assert_eq!(peer.shared_count, 3);

    let peers = a.manager.get_discovered_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].device_id, remote.device_id);
    assert_eq!(a.manager.get_all_peers().len(), 1);

    // A repeat announcement refreshes without a second discovery.
    sender.send_to(&bytes, ("127.0.0.1", port))?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, NetworkEvent::PeerDiscovered(_)));
    }

    a.manager.cleanup().await;
    Ok(())
}

/// Peers are forgotten when sharing is disabled.
#[tokio::test]
async fn test_disable_clears_peers() -> Result<()> {
    let a = node("desk-a", true, &[]).await?;
    let mut events = a.manager.subscribe();
    let port = a.manager.network_status().await.discovery_service.broadcast_port;

    let remote = DeviceInfo::from_parts("desk-c", "tester");
    let bytes = PresenceMessage::new(&remote, 8891, 0, 1).encode()?;
    std::net::UdpSocket::bind("127.0.0.1:0")?.send_to(&bytes, ("127.0.0.1", port))?;
    wait_for_event(&mut events, |e| matches!(e, NetworkEvent::PeerDiscovered(_))).await?;

    a.manager.disable_sharing().await?;
    assert!(a.manager.get_all_peers().is_empty());
    assert!(!a.manager.network_status().await.discovery_service.is_enabled);

    a.manager.cleanup().await;
    Ok(())
}
