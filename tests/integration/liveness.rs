use crate::*;

/// A registry that stops announcing and stops answering is discarded by the
/// liveness timer; one that keeps answering stays.
#[tokio::test]
async fn test_silent_unreachable_registry_is_discarded() {
    let mut s = settings(DesiredGroups::only(["A"]));
    s.announcement_interval = Duration::from_millis(100);
    s.announcement_tolerance = 2;
    let (discovery, history) = match start(s) {
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

    let leaving = SimRegistry::spawn(&["A"]).await.unwrap();
    let staying = SimRegistry::spawn(&["A"]).await.unwrap();
    let staying_id = staying.service_id;

    let result = async {
        leaving.respond_to(port).await?;
        staying.respond_to(port).await?;
        wait_until(Duration::from_secs(5), || {
            discovery.registrars().map(|r| r.len()).unwrap_or(0) == 2
        })
        .await?;

        leaving.stop().await;

        wait_until(Duration::from_secs(5), || {
            count_kind(&history, "discarded") == 1
        })
        .await?;

        // Several more timer periods: the reachable registry is refreshed,
        // not discarded.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let ids: Vec<ServiceId> = discovery.registrars()?.iter().map(|r| r.service_id).collect();
        assert_eq!(ids, vec![staying_id]);
        assert_eq!(count_kind(&history, "discarded"), 1);
        Ok::<_, anyhow::Error>(())
    }
    .await;

    discovery.terminate().await;
    staying.stop().await;
    result.unwrap();
}
