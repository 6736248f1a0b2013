use crate::*;

/// Group changes after discovery: removing the only matching group
/// discards the registry.
#[tokio::test]
async fn test_remove_groups_discards_registry() {
    let (discovery, history) = match start(settings(DesiredGroups::only(["A", "B"]))) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("SKIP: cannot start discovery: {e}");
            return;
        }
    };
    let Some(port) = discovery.response_port() else {
        discovery.terminate().await;
        panic!("a requestor should hold the response port open");
    };
    let registry = SimRegistry::spawn(&["A"]).await.unwrap();

    let result = async {
        registry.respond_to(port).await?;
        wait_until(Duration::from_secs(5), || {
            count_kind(&history, "discovered") == 1
        })
        .await?;

        discovery.remove_groups(["B"])?;
        assert_eq!(discovery.registrars()?.len(), 1);

        discovery.remove_groups(["A"])?;
        assert!(discovery.registrars()?.is_empty());
        wait_until(Duration::from_secs(5), || {
            count_kind(&history, "discarded") == 1
        })
        .await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    discovery.terminate().await;
    registry.stop().await;
    result.unwrap();
}

/// After terminate every operation fails and the sockets are closed.
#[tokio::test]
async fn test_operations_fail_after_terminate() {
    let (discovery, _history) = match start(settings(DesiredGroups::only(["A"]))) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("SKIP: cannot start discovery: {e}");
            return;
        }
    };
    let port = discovery.response_port();

    discovery.terminate().await;
    // Idempotent.
    discovery.terminate().await;

    assert!(discovery.is_terminated());
    assert!(discovery.response_port().is_none());
    assert!(matches!(discovery.registrars(), Err(DiscoveryError::Terminated)));
    assert!(matches!(discovery.groups(), Err(DiscoveryError::Terminated)));
    assert!(matches!(discovery.add_groups(["B"]), Err(DiscoveryError::Terminated)));
    assert!(matches!(
        discovery.set_groups(DesiredGroups::All),
        Err(DiscoveryError::Terminated)
    ));
    assert!(matches!(
        discovery.add_listener(Arc::new(EventHistory::default())),
        Err(DiscoveryError::Terminated)
    ));

    if let Some(port) = port {
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
