use crate::*;

/// A registry answering a request by dialing the response port is added to
/// the discovered set; groups the engine does not want are rejected.
#[tokio::test]
async fn test_registry_dialing_response_port_is_discovered() {
    let (discovery, history) = match start(settings(DesiredGroups::only(["A"]))) {
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

    let wanted = SimRegistry::spawn(&["A"]).await.unwrap();
    let unwanted = SimRegistry::spawn(&["Z"]).await.unwrap();

    let result = async {
        wanted.respond_to(port).await?;
        unwanted.respond_to(port).await?;

        wait_until(Duration::from_secs(5), || {
            discovery.status().pending == 0 && count_kind(&history, "discovered") == 1
        })
        .await?;

        let ids: Vec<ServiceId> = discovery.registrars()?.iter().map(|r| r.service_id).collect();
        assert_eq!(ids, vec![wanted.service_id]);
        Ok::<_, anyhow::Error>(())
    }
    .await;

    discovery.terminate().await;
    wanted.stop().await;
    unwanted.stop().await;
    result.unwrap();
}

/// Once the last request round is done the response port is closed.
#[tokio::test]
async fn test_response_port_closes_after_requests_finish() {
    let mut s = settings(DesiredGroups::only(["A"]));
    s.request_max = 1;
    s.request_interval = Duration::from_millis(10);
    s.final_request_interval = Duration::from_millis(50);
    let (discovery, _history) = match start(s) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("SKIP: cannot start discovery: {e}");
            return;
        }
    };

    let closed = wait_until(Duration::from_secs(5), || {
        discovery.response_port().is_none()
    })
    .await;
    assert_eq!(discovery.status().active_requestors, 0);
    discovery.terminate().await;
    closed.unwrap();
}
