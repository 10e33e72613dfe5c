#[cfg(test)]
mod tests {
    use crate::failure::{DetectorConfig, FailureDetector};
    use crate::net::{protocol, PeerClient, Response};
    use crate::ring::NodeRef;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn detector() -> FailureDetector {
        FailureDetector::new(DetectorConfig::default(), PeerClient::default())
    }

    /// An endpoint with nothing listening on it; probes fail immediately
    /// with connection refused.
    async fn dead_peer() -> NodeRef {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        NodeRef::new("127.0.0.1", port)
    }

    /// A live peer that answers every request with SUCCESS.
    async fn live_peer() -> NodeRef {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    while let Ok(Some(_)) = protocol::read_request(&mut stream).await {
                        let _ = protocol::write_response(&mut stream, &Response::ok()).await;
                    }
                });
            }
        });
        NodeRef::new("127.0.0.1", addr.port())
    }

    #[tokio::test]
    async fn test_unknown_peer_is_healthy() {
        let detector = detector();
        assert!(!detector.is_failed("127.0.0.1:9999"));
        assert!(!detector.is_suspected("127.0.0.1:9999"));
        assert!(detector.failed_peers().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_escalation_suspected_then_failed() {
        let detector = detector();
        let peer = dead_peer().await;
        let endpoint = peer.endpoint();

        assert!(!detector.probe(&peer).await);
        assert!(detector.is_suspected(&endpoint), "1 failure >= 3/2 rounded down");
        assert!(!detector.is_failed(&endpoint));

        assert!(!detector.probe(&peer).await);
        assert!(!detector.is_failed(&endpoint));

        assert!(!detector.probe(&peer).await);
        assert!(detector.is_failed(&endpoint));
        assert_eq!(detector.failed_peers(), vec![endpoint]);
    }

    #[tokio::test]
    async fn test_successful_probe_resets_everything() {
        let detector = detector();
        let peer = live_peer().await;
        let endpoint = peer.endpoint();

        detector.mark_failed(&endpoint);
        assert!(detector.is_failed(&endpoint));

        assert!(detector.probe(&peer).await);
        assert!(!detector.is_failed(&endpoint));
        assert!(!detector.is_suspected(&endpoint));
        assert_eq!(detector.status(&endpoint).unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_mark_overrides() {
        let detector = detector();

        detector.mark_failed("127.0.0.1:9999");
        assert!(detector.is_failed("127.0.0.1:9999"));
        assert!(detector.is_suspected("127.0.0.1:9999"));

        detector.mark_responsive("127.0.0.1:9999");
        assert!(!detector.is_failed("127.0.0.1:9999"));
        assert_eq!(
            detector.status("127.0.0.1:9999").unwrap().consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn test_failed_entry_survives_until_cleanup_age() {
        let config = DetectorConfig {
            max_entry_age: Duration::from_millis(50),
            ..DetectorConfig::default()
        };
        let detector = FailureDetector::new(config, PeerClient::default());

        detector.mark_failed("127.0.0.1:9999");
        detector.cleanup();
        assert_eq!(detector.tracked_peers(), 1, "young entries are kept");

        tokio::time::sleep(Duration::from_millis(80)).await;
        detector.cleanup();
        assert_eq!(detector.tracked_peers(), 0, "aged entries are dropped");
    }
}
