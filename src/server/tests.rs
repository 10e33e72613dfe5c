#[cfg(test)]
mod tests {
    use crate::net::{protocol, OpCode, Request, Response, Status};
    use crate::node::{NodeConfig, OverlayNode};
    use crate::ring::{in_arc, Id, NodeRef};
    use crate::server::KvServer;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn start_server(port: u16, config: NodeConfig) -> (Arc<OverlayNode>, Arc<KvServer>) {
        let node = OverlayNode::new("127.0.0.1", port, config);
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let server = KvServer::new(node.clone(), 8);
        let serving = server.clone();
        tokio::spawn(async move {
            serving.serve(listener).await.unwrap();
        });
        (node, server)
    }

    async fn raw_call(endpoint: &str, request: Request) -> Response {
        let mut stream = TcpStream::connect(endpoint).await.unwrap();
        protocol::write_request(&mut stream, &request).await.unwrap();
        protocol::read_response(&mut stream).await.unwrap()
    }

    async fn wire_put(endpoint: &str, key: &str, value: &[u8]) -> Response {
        raw_call(
            endpoint,
            Request::new(OpCode::Put, key.as_bytes().to_vec(), value.to_vec()),
        )
        .await
    }

    async fn wire_get(endpoint: &str, key: &str) -> Response {
        raw_call(
            endpoint,
            Request::new(OpCode::Get, key.as_bytes().to_vec(), Vec::new()),
        )
        .await
    }

    async fn wire_delete(endpoint: &str, key: &str) -> Response {
        raw_call(
            endpoint,
            Request::new(OpCode::Delete, key.as_bytes().to_vec(), Vec::new()),
        )
        .await
    }

    fn fast_config() -> NodeConfig {
        NodeConfig {
            stabilize_interval: Duration::from_millis(100),
            fix_fingers_interval: Duration::from_millis(50),
            failure_check_interval: Duration::from_millis(500),
            ..NodeConfig::default()
        }
    }

    // ============================================================
    // WIRE SCENARIOS
    // ============================================================

    #[tokio::test]
    async fn test_single_node_round_trip() {
        let (node, _server) = start_server(19000, NodeConfig::default()).await;
        node.create();
        let endpoint = "127.0.0.1:19000";

        let put = wire_put(endpoint, "k1", b"v1").await;
        assert_eq!(put.status, Status::Success);

        let get = wire_get(endpoint, "k1").await;
        assert_eq!(get.status, Status::Success);
        assert_eq!(get.value, b"v1");

        let delete = wire_delete(endpoint, "k1").await;
        assert_eq!(delete.status, Status::Success);

        let gone = wire_get(endpoint, "k1").await;
        assert_eq!(gone.status, Status::KeyNotFound);
    }

    #[tokio::test]
    async fn test_non_owned_key_is_redirected() {
        let (node, _server) = start_server(19001, NodeConfig::default()).await;
        node.create();

        // Wire a second (offline) node into the routing state as both
        // predecessor and successor, shrinking our arc to (peer, self].
        let peer = NodeRef::new("127.0.0.1", 19002);
        node.routing().set_successor(peer.clone());
        node.notify(peer.clone());

        // Any key that hashes outside our arc now belongs to the peer.
        let local_id = node.local().id;
        let key = (0..)
            .map(|i| format!("x{}", i))
            .find(|key| {
                let kid = Id::digest(key.as_bytes());
                !in_arc(&kid, &peer.id, &local_id, true)
            })
            .unwrap();

        let response = wire_get("127.0.0.1:19001", &key).await;
        assert_eq!(response.status, Status::Redirect);
        assert_eq!(response.value, b"127.0.0.1:19002");
    }

    #[tokio::test]
    async fn test_large_value_round_trip() {
        let (node, _server) = start_server(19003, NodeConfig::default()).await;
        node.create();
        let endpoint = "127.0.0.1:19003";

        let blob = vec![0xCD; 2048];
        let put = wire_put(endpoint, "large", &blob).await;
        assert_eq!(put.status, Status::Success);

        let get = wire_get(endpoint, "large").await;
        assert_eq!(get.status, Status::Success);
        assert_eq!(get.value.len(), 2048);
        assert!(get.value.iter().all(|byte| *byte == 0xCD));
    }

    #[tokio::test]
    async fn test_concurrent_clients_on_disjoint_keys() {
        let (node, _server) = start_server(19004, NodeConfig::default()).await;
        node.create();

        let mut clients = Vec::new();
        for client_id in 0..3 {
            clients.push(tokio::spawn(async move {
                let endpoint = "127.0.0.1:19004";
                for j in 0..20 {
                    let key = format!("t{}_k{}", client_id, j);
                    let value = format!("value_{}_{}", client_id, j);

                    let put = wire_put(endpoint, &key, value.as_bytes()).await;
                    assert_eq!(put.status, Status::Success);

                    let get = wire_get(endpoint, &key).await;
                    assert_eq!(get.status, Status::Success);
                    assert_eq!(get.value, value.as_bytes());

                    let delete = wire_delete(endpoint, &key).await;
                    assert_eq!(delete.status, Status::Success);
                }
            }));
        }
        for client in clients {
            client.await.unwrap();
        }

        assert_eq!(node.store().size(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_replica_fails_the_write_and_rolls_back() {
        let (node, _server) = start_server(19005, NodeConfig::default()).await;
        node.create();
        // Bogus replica target, per the classic unroutable test port.
        node.routing()
            .set_successor(NodeRef::new("127.0.0.1", 9999));

        let endpoint = "127.0.0.1:19005";
        let put = wire_put(endpoint, "a", b"b").await;
        assert_eq!(put.status, Status::Error);

        let get = wire_get(endpoint, "a").await;
        assert_eq!(get.status, Status::KeyNotFound, "rollback observed");
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_and_close() {
        let (node, _server) = start_server(19006, NodeConfig::default()).await;
        node.create();

        let mut stream = TcpStream::connect("127.0.0.1:19006").await.unwrap();
        stream
            .write_all(&[0xFF, 0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0])
            .await
            .unwrap();

        let response = protocol::read_response(&mut stream).await.unwrap();
        assert_eq!(response.status, Status::Error);

        // The server hangs up after a protocol violation.
        let followup = protocol::read_response(&mut stream).await;
        assert!(followup.is_err());
    }

    #[tokio::test]
    async fn test_data_requests_before_linking_redirect_to_seed() {
        let (node, _server) = start_server(19007, NodeConfig::default()).await;

        // Seed nobody answers on: the node can never finish linking.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let seed_port = listener.local_addr().unwrap().port();
        drop(listener);
        let seed = NodeRef::new("127.0.0.1", seed_port);

        node.join(seed.clone()).await.unwrap();
        assert!(!node.is_linked());

        let response = wire_get("127.0.0.1:19007", "anything").await;
        assert_eq!(response.status, Status::Redirect);
        assert_eq!(response.value, seed.endpoint().as_bytes());
    }

    // ============================================================
    // OVERLAY RPCS OVER THE WIRE
    // ============================================================

    #[tokio::test]
    async fn test_overlay_rpc_surface() {
        let (node, _server) = start_server(19008, NodeConfig::default()).await;
        node.create();
        let endpoint = "127.0.0.1:19008";

        let ping = raw_call(endpoint, Request::control(OpCode::Ping, Vec::new())).await;
        assert_eq!(ping.status, Status::Success);

        let info = raw_call(endpoint, Request::control(OpCode::NodeInfo, Vec::new())).await;
        assert_eq!(info.value, endpoint.as_bytes());

        // Lone node: no predecessor, successor is itself.
        let pred = raw_call(endpoint, Request::control(OpCode::GetPredecessor, Vec::new())).await;
        assert_eq!(pred.status, Status::KeyNotFound);

        let succ = raw_call(endpoint, Request::control(OpCode::GetSuccessor, Vec::new())).await;
        assert_eq!(succ.value, endpoint.as_bytes());

        // Every lookup resolves to the lone node.
        let target = Id::digest(b"whatever");
        let found = raw_call(
            endpoint,
            Request::new(OpCode::FindSuccessor, target.as_bytes().to_vec(), Vec::new()),
        )
        .await;
        assert_eq!(found.status, Status::Success);
        assert_eq!(found.value, endpoint.as_bytes());

        // A 20-byte key is mandatory for lookups.
        let bad = raw_call(
            endpoint,
            Request::new(OpCode::FindSuccessor, vec![1, 2, 3], Vec::new()),
        )
        .await;
        assert_eq!(bad.status, Status::Error);

        // Replica traffic bypasses the ownership check entirely.
        let replicate = raw_call(
            endpoint,
            Request::new(OpCode::Replicate, b"rk".to_vec(), b"rv".to_vec()),
        )
        .await;
        assert_eq!(replicate.status, Status::Success);
        assert_eq!(node.store().get("rk"), Some(b"rv".to_vec()));
    }

    #[tokio::test]
    async fn test_successor_list_rpc_lists_endpoints() {
        let (node, _server) = start_server(19009, NodeConfig::default()).await;
        node.create();

        let response = raw_call(
            "127.0.0.1:19009",
            Request::control(OpCode::Stabilize, Vec::new()),
        )
        .await;
        assert_eq!(response.status, Status::Success);

        let text = String::from_utf8(response.value).unwrap();
        let entries: Vec<&str> = text.split(',').collect();
        assert_eq!(entries.len(), 8);
        assert!(entries.iter().all(|entry| *entry == "127.0.0.1:19009"));
    }

    #[tokio::test]
    async fn test_malformed_overlay_payloads_are_rejected() {
        let (node, _server) = start_server(19012, NodeConfig::default()).await;
        node.create();
        let endpoint = "127.0.0.1:19012";

        // Notify and join need a parseable host:port in the value field.
        let notify = raw_call(
            endpoint,
            Request::control(OpCode::Notify, b"not-an-endpoint".to_vec()),
        )
        .await;
        assert_eq!(notify.status, Status::Error);
        assert_eq!(node.predecessor(), None);

        let join = raw_call(
            endpoint,
            Request::control(OpCode::Join, b"also:bad:port".to_vec()),
        )
        .await;
        assert_eq!(join.status, Status::Error);
    }

    #[tokio::test]
    async fn test_notify_over_the_wire_installs_predecessor() {
        let (node, _server) = start_server(19013, NodeConfig::default()).await;
        node.create();

        let response = raw_call(
            "127.0.0.1:19013",
            Request::control(OpCode::Notify, b"127.0.0.1:19014".to_vec()),
        )
        .await;
        assert_eq!(response.status, Status::Success);
        assert_eq!(
            node.predecessor(),
            Some(NodeRef::new("127.0.0.1", 19014))
        );
    }

    #[tokio::test]
    async fn test_replica_delete_over_the_wire() {
        let (node, _server) = start_server(19015, NodeConfig::default()).await;
        node.create();
        node.store().put("held", b"copy".to_vec());
        let endpoint = "127.0.0.1:19015";

        let removed = raw_call(
            endpoint,
            Request::new(OpCode::ReplicateDelete, b"held".to_vec(), Vec::new()),
        )
        .await;
        assert_eq!(removed.status, Status::Success);

        let absent = raw_call(
            endpoint,
            Request::new(OpCode::ReplicateDelete, b"held".to_vec(), Vec::new()),
        )
        .await;
        assert_eq!(absent.status, Status::KeyNotFound);
    }

    #[tokio::test]
    async fn test_requests_on_one_connection_are_served_in_order() {
        let (node, _server) = start_server(19016, NodeConfig::default()).await;
        node.create();

        let mut stream = TcpStream::connect("127.0.0.1:19016").await.unwrap();
        for i in 0..10 {
            let key = format!("seq{}", i);
            let request = Request::new(
                OpCode::Put,
                key.into_bytes(),
                format!("v{}", i).into_bytes(),
            );
            protocol::write_request(&mut stream, &request).await.unwrap();
            let response = protocol::read_response(&mut stream).await.unwrap();
            assert_eq!(response.status, Status::Success);
        }
        assert_eq!(node.store().size(), 10);
    }

    // ============================================================
    // TWO-NODE RING
    // ============================================================

    #[tokio::test]
    async fn test_two_nodes_converge_and_serve() {
        let (node_a, _server_a) = start_server(19010, fast_config()).await;
        node_a.create();
        node_a.start_maintenance();

        let (node_b, _server_b) = start_server(19011, fast_config()).await;
        node_b
            .join(NodeRef::new("127.0.0.1", 19010))
            .await
            .unwrap();
        node_b.start_maintenance();

        // Wait for stabilize/notify to link the ring in both directions.
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let linked = node_a.successor() == *node_b.local()
                && node_b.successor() == *node_a.local()
                && node_a.predecessor() == Some(node_b.local().clone())
                && node_b.predecessor() == Some(node_a.local().clone())
                && node_b.is_linked();
            if linked {
                break;
            }
            assert!(Instant::now() < deadline, "ring never converged");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Pick a key owned by B and address the wrong node first.
        let key = (0..)
            .map(|i| format!("ring_{}", i))
            .find(|key| {
                let kid = Id::digest(key.as_bytes());
                !node_a.owns(&kid)
            })
            .unwrap();

        let misdirected = wire_put("127.0.0.1:19010", &key, b"payload").await;
        assert_eq!(misdirected.status, Status::Redirect);
        assert_eq!(misdirected.value, b"127.0.0.1:19011");

        let put = wire_put("127.0.0.1:19011", &key, b"payload").await;
        assert_eq!(put.status, Status::Success);

        let get = wire_get("127.0.0.1:19011", &key).await;
        assert_eq!(get.status, Status::Success);
        assert_eq!(get.value, b"payload");

        // Synchronous replication already placed a copy on the other node.
        assert_eq!(node_a.store().get(&key), Some(b"payload".to_vec()));

        node_a.stop_maintenance().await;
        node_b.stop_maintenance().await;
    }

    #[tokio::test]
    async fn test_three_node_ring_partitions_ownership_and_replicates() {
        let (node_a, _server_a) = start_server(19020, fast_config()).await;
        node_a.create();
        node_a.start_maintenance();

        let (node_b, _server_b) = start_server(19021, fast_config()).await;
        node_b
            .join(NodeRef::new("127.0.0.1", 19020))
            .await
            .unwrap();
        node_b.start_maintenance();

        let (node_c, _server_c) = start_server(19022, fast_config()).await;
        node_c
            .join(NodeRef::new("127.0.0.1", 19020))
            .await
            .unwrap();
        node_c.start_maintenance();

        let nodes = [&node_a, &node_b, &node_c];

        // Ring order by identifier; each node's successor must be the next
        // identifier clockwise and its predecessor the previous one.
        let mut ring: Vec<NodeRef> = nodes.iter().map(|n| n.local().clone()).collect();
        ring.sort_by(|a, b| a.id.cmp(&b.id));

        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            let converged = nodes.iter().all(|node| {
                let pos = ring.iter().position(|r| r == node.local()).unwrap();
                let next = &ring[(pos + 1) % ring.len()];
                let prev = &ring[(pos + 2) % ring.len()];

                // Both other nodes must already sit in the successor list,
                // otherwise a write would fan out to fewer than R-1 copies.
                let list = node.successor_list();
                let mut others: Vec<&NodeRef> = Vec::new();
                for succ in &list {
                    if succ != node.local() && !others.contains(&succ) {
                        others.push(succ);
                    }
                }

                node.successor() == *next
                    && node.predecessor().as_ref() == Some(prev)
                    && others.len() >= 2
                    && node.is_linked()
            });
            if converged {
                break;
            }
            assert!(Instant::now() < deadline, "three-node ring never converged");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Exactly one node owns any given key.
        for probe in ["alpha", "beta", "gamma", "delta"] {
            let kid = Id::digest(probe.as_bytes());
            let owners = nodes.iter().filter(|node| node.owns(&kid)).count();
            assert_eq!(owners, 1, "key '{}' must have exactly one owner", probe);
        }

        // Write through the owner; with R = 3 both other nodes must end up
        // holding a copy.
        let key = "durable";
        let kid = Id::digest(key.as_bytes());
        let owner = nodes.iter().find(|node| node.owns(&kid)).unwrap();

        let put = wire_put(&owner.local().endpoint(), key, b"everywhere").await;
        assert_eq!(put.status, Status::Success);

        for node in &nodes {
            assert_eq!(
                node.store().get(key),
                Some(b"everywhere".to_vec()),
                "{} is missing its copy",
                node.local()
            );
        }

        // And a read through any entry point resolves, directly or by
        // following one redirect.
        for entry in ["127.0.0.1:19020", "127.0.0.1:19021", "127.0.0.1:19022"] {
            let response = wire_get(entry, key).await;
            match response.status {
                Status::Success => assert_eq!(response.value, b"everywhere"),
                Status::Redirect => {
                    let target = String::from_utf8(response.value).unwrap();
                    let followed = wire_get(&target, key).await;
                    assert_eq!(followed.status, Status::Success);
                    assert_eq!(followed.value, b"everywhere");
                }
                status => panic!("unexpected status {:?} from {}", status, entry),
            }
        }

        for node in nodes {
            node.stop_maintenance().await;
        }
    }
}
