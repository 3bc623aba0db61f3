use crate::*;

use hostshared::{ManagerError, RemoteError};

/// Share on A, list and fetch from B. Only allow-listed fields travel.
#[tokio::test]
async fn test_fetch_remote_nodes() -> Result<()> {
    let a = node("desk-a", true, &[]).await?;
    let b = node("desk-b", false, &[]).await?;

    let mut record = host("web1", "192.168.1.100");
    record.identity_file = Some("~/.ssh/id_ed25519".to_string());
    record.remark = Some("prod".to_string());
    record
        .extra
        .insert("ProxyJump".to_string(), serde_json::json!("bastion"));
    a.manager.share_node("web1", &record).await?;
    a.manager.share_node("db", &host("db", "192.168.1.101")).await?;

    let peer = peer_of(&a).await?;
    let nodes = b.manager.fetch_remote_nodes(&peer).await?;
    assert_eq!(nodes.len(), 2);

    let web1 = nodes.iter().find(|n| n.id == "web1").context("web1 missing")?;
    assert_eq!(web1.host_name.as_deref(), Some("192.168.1.100"));
    assert_eq!(web1.identity_file.as_deref(), Some("~/.ssh/id_ed25519"));
    assert_eq!(web1.owner.device_name, "desk-a");

    let raw = serde_json::to_value(web1)?;
    assert!(raw.get("ProxyJump").is_none(), "non-allow-listed field leaked");

    a.manager.cleanup().await;
    b.manager.cleanup().await;
    Ok(())
}

/// Importing `web1` into a store that already has one saves `web1-1` and
/// leaves the original alone.
#[tokio::test]
async fn test_import_resolves_name_conflict() -> Result<()> {
    let a = node("desk-a", true, &[]).await?;
    let existing = host("web1", "10.9.9.9");
    let b = node("desk-b", false, &[existing.clone()]).await?;
    let mut events = b.manager.subscribe();

    let mut record = host("web1", "192.168.1.100");
    record.identity_file = Some("~/.ssh/id_ed25519".to_string());
    record.remark = Some("prod".to_string());
    a.manager.share_node("web1", &record).await?;

    let peer = peer_of(&a).await?;
    let imported = b.manager.import_remote_node(&peer, "web1", &b.store).await?;
    assert_eq!(imported.host, "web1-1");
    assert_eq!(imported.remark.as_deref(), Some("prod (from desk-a)"));
    assert!(imported.identity_file.is_none());

    let hosts = b.store.list_hosts()?;
    assert_eq!(hosts.len(), 2);
    assert_eq!(hosts[0].host, "web1");
    assert_eq!(hosts[0].host_name.as_deref(), Some("10.9.9.9"));
    assert_eq!(hosts[1].host, "web1-1");
    assert_eq!(hosts[1].host_name.as_deref(), Some("192.168.1.100"));
    assert!(hosts[1].identity_file.is_none());

    let event = wait_for_event(&mut events, |e| matches!(e, NetworkEvent::NodeImported { .. })).await?;
    let NetworkEvent::NodeImported {
        original_node,
        imported_node,
        source,
    } = event
    else {
        unreachable!();
    };
    assert_eq!(original_node.host, "web1");
    assert_eq!(imported_node.host, "web1-1");
    assert_eq!(source.device_name, "desk-a");

    // A second import keeps counting.
    let again = b.manager.import_remote_node(&peer, "web1", &b.store).await?;
    assert_eq!(again.host, "web1-2");

    a.manager.cleanup().await;
    b.manager.cleanup().await;
    Ok(())
}

/// Failed imports write nothing.
#[tokio::test]
async fn test_import_failures_leave_store_untouched() -> Result<()> {
    let a = node("desk-a", true, &[]).await?;
    let b = node("desk-b", false, &[host("local", "10.0.0.1")]).await?;
    a.manager.share_node("web1", &host("web1", "192.168.1.100")).await?;
    let peer = peer_of(&a).await?;

    let err = b
        .manager
        .import_remote_node(&peer, "missing", &b.store)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Remote(RemoteError::NotFound(_))), "{err}");

    a.manager.unshare_node("web1").await?;
    let err = b
        .manager
        .import_remote_node(&peer, "web1", &b.store)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Remote(RemoteError::NotFound(_))), "{err}");

    a.manager.disable_sharing().await?;
    let err = b.manager.fetch_remote_nodes(&peer).await.unwrap_err();
    assert!(matches!(err, ManagerError::Remote(RemoteError::Transport { .. })), "{err}");

    assert_eq!(b.store.list_hosts()?.len(), 1);

    b.manager.cleanup().await;
    a.manager.cleanup().await;
    Ok(())
}

/// Disable then enable on A: remote listing is empty until A restores from
/// its ssh config, then carries the same node again.
#[tokio::test]
async fn test_restore_after_reenable() -> Result<()> {
    let web1 = host("web1", "192.168.1.100");
    let a = node("desk-a", true, &[web1.clone()]).await?;
    let b = node("desk-b", false, &[]).await?;
    a.manager.share_node("web1", &web1).await?;

    a.manager.disable_sharing().await?;
    assert!(a.manager.is_node_shared("web1").await);

    a.manager.enable_sharing().await?;
    let peer = peer_of(&a).await?;
    assert!(b.manager.fetch_remote_nodes(&peer).await?.is_empty());

    let restored = a.manager.restore_shared_nodes(&a.store.list_hosts()?).await;
    assert_eq!(restored, 1);
    let nodes = b.manager.fetch_remote_nodes(&peer).await?;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, "web1");

    a.manager.cleanup().await;
    b.manager.cleanup().await;
    Ok(())
}
