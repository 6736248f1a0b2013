use crate::*;

use lookout_core::wire::{MulticastAnnouncement, PROTOCOL_VERSION};
use tokio::net::UdpSocket;

async fn announce(port: u16, ann: &MulticastAnnouncement) -> Result<()> {
    let packet = wire::encode_announcement(ann, PROTOCOL_VERSION)?;
    let sender = UdpSocket::bind("127.0.0.1:0").await?;
    sender.send_to(&packet, ("127.0.0.1", port)).await?;
    Ok(())
}

/// A datagram on the announcement port leads to unicast discovery of the
/// announced locator.
#[tokio::test]
async fn test_announced_registry_is_discovered() {
    let port = free_udp_port().unwrap();
    let mut s = settings(DesiredGroups::only(["A"]));
    s.multicast_enabled = true;
    s.interfaces = vec!["127.0.0.1".to_string()];
    s.port = port;
    let (discovery, history) = match start(s) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("SKIP: cannot bind announcement listener: {e}");
            return;
        }
    };

    let registry = SimRegistry::spawn(&["A", "B"]).await.unwrap();
    let ann = MulticastAnnouncement {
        service_id: registry.service_id,
        locator: registry.locator.clone(),
        groups: names(&["A", "B"]),
        sequence: Some(1),
    };

    let result = async {
        // Junk on the port is dropped without disturbing the listener.
        let junk = UdpSocket::bind("127.0.0.1:0").await?;
        junk.send_to(b"not a packet", ("127.0.0.1", port)).await?;
        announce(port, &ann).await?;

        wait_until(Duration::from_secs(5), || {
            count_kind(&history, "discovered") == 1
        })
        .await?;

        let found = discovery.registrars()?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_id, registry.service_id);
        assert_eq!(found[0].locator, registry.locator);

        // A repeat of the same announcement is only a liveness refresh.
        announce(port, &ann).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(history.len(), 1);
        Ok::<_, anyhow::Error>(())
    }
    .await;

    discovery.terminate().await;
    registry.stop().await;
    result.unwrap();
}

/// A registry outside the desired groups is never contacted.
#[tokio::test]
async fn test_announcement_for_other_groups_is_ignored() {
    let port = free_udp_port().unwrap();
    let mut s = settings(DesiredGroups::only(["A"]));
    s.multicast_enabled = true;
    s.interfaces = vec!["127.0.0.1".to_string()];
    s.port = port;
    let (discovery, history) = match start(s) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("SKIP: cannot bind announcement listener: {e}");
            return;
        }
    };

    let registry = SimRegistry::spawn(&["C"]).await.unwrap();
    let ann = MulticastAnnouncement {
        service_id: registry.service_id,
        locator: registry.locator.clone(),
        groups: names(&["C"]),
        sequence: Some(1),
    };
    announce(port, &ann).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(discovery.registrars().unwrap().is_empty());
    assert!(history.is_empty());
    discovery.terminate().await;
    registry.stop().await;
}
