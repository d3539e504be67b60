//! Coordination Module Tests
//!
//! ## Test Scopes
//! - **Paths**: joining, parent lookup and validation.
//! - **Memory Ensemble**: create/delete atomicity, sequential naming, ACLs,
//!   versions, and one-shot child watches across sessions.
//! - **Sessions**: expiry and close release watches and fail later calls.
//! - **HTTP Transport**: the same operations through `CoordinationServer`
//!   and `HttpCoordinator` on a loopback port.

#[cfg(test)]
mod tests {
    use crate::config::CoordinationConfig;
    use crate::coordination::client::HttpCoordinator;
    use crate::coordination::coordinator::{delete_tree, ensure_path};
    use crate::coordination::handlers::{CoordinationServer, router};
    use crate::coordination::memory::MemoryEnsemble;
    use crate::coordination::protocol::{
        CoordReply, ENDPOINT_CREATE, ENDPOINT_EXISTS, ENDPOINT_SESSION_HEARTBEAT,
        ENDPOINT_SESSION_OPEN, ENDPOINT_WATCH_CHILDREN, PathRequest, WatchChildrenResponse,
    };
    use crate::coordination::types::{WatchEvent, WatchEventKind, join_path, parent_path, validate_path};
    use crate::coordination::watch::{WatchLatch, WatchOutcome};
    use crate::coordination::{Acl, CoordError, Coordinator, CreateMode, Stat};
    use crate::queue::SequencedQueue;
    use axum::routing::post;
    use axum::{Extension, Json, Router};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // ============================================================
    // PATH HELPER TESTS
    // ============================================================

    #[test]
    fn test_join_and_parent_path() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a/b", "c"), "/a/b/c");

        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/a/b/c"), Some("/a/b"));
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/").is_ok());
        assert!(validate_path("/a/b").is_ok());

        assert!(validate_path("a/b").is_err());
        assert!(validate_path("/a/").is_err());
        assert!(validate_path("/a//b").is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(CoordError::SessionExpired.is_transient());
        assert!(CoordError::ConnectionLoss("reset".to_string()).is_transient());
        assert!(!CoordError::SessionClosed.is_transient());
        assert!(!CoordError::NoNode("/x".to_string()).is_transient());
    }

    // ============================================================
    // WATCH LATCH TESTS
    // ============================================================

    #[tokio::test]
    async fn test_latch_fires_once() {
        let (trigger, mut latch) = WatchLatch::pair();
        let event = WatchEvent {
            path: "/q".to_string(),
            kind: WatchEventKind::ChildrenChanged,
        };

        assert!(trigger.fire(event.clone()));

        assert_eq!(latch.wait_until(None).await, WatchOutcome::Fired(event));
        // Consumed latches never block again
        assert_eq!(latch.wait_until(None).await, WatchOutcome::Abandoned);
    }

    #[tokio::test]
    async fn test_latch_times_out_and_can_resume() {
        let (trigger, mut latch) = WatchLatch::pair();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(50);

        assert_eq!(latch.wait_until(Some(deadline)).await, WatchOutcome::TimedOut);
        assert!(latch.try_fired().is_none());

        trigger.fire(WatchEvent {
            path: "/q".to_string(),
            kind: WatchEventKind::NodeDeleted,
        });
        assert!(matches!(latch.wait().await, WatchOutcome::Fired(_)));
    }

    #[tokio::test]
    async fn test_latch_abandoned_when_trigger_dropped() {
        let (trigger, latch) = WatchLatch::pair();
        drop(trigger);

        assert_eq!(latch.wait().await, WatchOutcome::Abandoned);
    }

    #[test]
    fn test_trigger_notices_dropped_latch() {
        let (trigger, latch) = WatchLatch::pair();
        drop(latch);

        assert!(trigger.is_abandoned());
    }

    // ============================================================
    // MEMORY ENSEMBLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_create_get_set_delete() {
        // ARRANGE
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();

        // ACT: create and read back
        let path = client
            .create("/a", b"one".to_vec(), Acl::Open, CreateMode::Persistent)
            .await
            .unwrap();
        let (data, stat) = client.get_data(&path).await.unwrap();

        // ASSERT
        assert_eq!(path, "/a");
        assert_eq!(data, b"one".to_vec());
        assert_eq!(stat.version, 0);

        // ACT: conditional update
        let stat = client.set_data("/a", b"two".to_vec(), Some(0)).await.unwrap();
        assert_eq!(stat.version, 1);

        let stale = client.set_data("/a", b"three".to_vec(), Some(0)).await;
        assert!(matches!(stale, Err(CoordError::BadVersion { expected: 0, actual: 1, .. })));

        // ACT: delete
        client.delete("/a", Some(1)).await.unwrap();
        assert!(client.exists("/a").await.unwrap().is_none());
        assert_eq!(client.delete("/a", None).await, Err(CoordError::NoNode("/a".to_string())));
    }

    #[tokio::test]
    async fn test_create_errors() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();
        client
            .create("/a", vec![], Acl::Open, CreateMode::Persistent)
            .await
            .unwrap();

        let duplicate = client.create("/a", vec![], Acl::Open, CreateMode::Persistent).await;
        let orphan = client.create("/x/y", vec![], Acl::Open, CreateMode::Persistent).await;
        let invalid = client.create("a", vec![], Acl::Open, CreateMode::Persistent).await;

        assert_eq!(duplicate, Err(CoordError::NodeExists("/a".to_string())));
        assert_eq!(orphan, Err(CoordError::NoNode("/x".to_string())));
        assert_eq!(invalid, Err(CoordError::InvalidPath("a".to_string())));
    }

    #[tokio::test]
    async fn test_delete_refuses_non_empty_and_root() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();
        client.create("/a", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();
        client.create("/a/b", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();

        assert_eq!(client.delete("/a", None).await, Err(CoordError::NotEmpty("/a".to_string())));
        assert!(matches!(client.delete("/", None).await, Err(CoordError::NoAuth(_))));
    }

    #[tokio::test]
    async fn test_read_only_acl_blocks_writes() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();
        client
            .create("/locked", b"x".to_vec(), Acl::ReadOnly, CreateMode::Persistent)
            .await
            .unwrap();

        let child = client.create("/locked/c", vec![], Acl::Open, CreateMode::Persistent).await;
        let update = client.set_data("/locked", vec![], None).await;
        let delete = client.delete("/locked", None).await;

        assert!(matches!(child, Err(CoordError::NoAuth(_))));
        assert!(matches!(update, Err(CoordError::NoAuth(_))));
        assert!(matches!(delete, Err(CoordError::NoAuth(_))));
        assert_eq!(client.get_data("/locked").await.unwrap().0, b"x".to_vec());
    }

    #[tokio::test]
    async fn test_sequential_names_are_totally_ordered_across_sessions() {
        // ARRANGE: two sessions appending to one parent
        let ensemble = MemoryEnsemble::new();
        let first = ensemble.connect();
        let second = ensemble.connect();
        first.create("/q", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();

        // ACT
        let a = first.create("/q/n-", vec![], Acl::Open, CreateMode::PersistentSequential).await.unwrap();
        let b = second.create("/q/n-", vec![], Acl::Open, CreateMode::PersistentSequential).await.unwrap();
        let c = first.create("/q/m-", vec![], Acl::Open, CreateMode::PersistentSequential).await.unwrap();

        // ASSERT: one counter per parent, ten zero-padded digits
        assert_eq!(a, "/q/n-0000000000");
        assert_eq!(b, "/q/n-0000000001");
        assert_eq!(c, "/q/m-0000000002");

        // Deleting does not reuse sequence numbers
        first.delete(&c, None).await.unwrap();
        let d = second.create("/q/m-", vec![], Acl::Open, CreateMode::PersistentSequential).await.unwrap();
        assert_eq!(d, "/q/m-0000000003");
    }

    #[tokio::test]
    async fn test_get_children_lists_direct_children_only() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();
        for path in ["/a", "/a/x", "/a/y", "/a/x/deep", "/ab"] {
            client.create(path, vec![], Acl::Open, CreateMode::Persistent).await.unwrap();
        }

        let mut children = client.get_children("/a").await.unwrap();
        children.sort();

        assert_eq!(children, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(client.exists("/a").await.unwrap().unwrap().num_children, 2);
        assert!(client.get_children("/missing").await.unwrap_err().is_no_node());
    }

    #[tokio::test]
    async fn test_child_watch_fires_on_other_session_create() {
        // ARRANGE: one session watches, another mutates
        let ensemble = MemoryEnsemble::new();
        let watcher = ensemble.connect();
        let writer = ensemble.connect();
        watcher.create("/q", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();

        let (children, latch) = watcher.watch_children("/q").await.unwrap();
        assert!(children.is_empty());
        assert_eq!(ensemble.watch_count(), 1);

        // ACT
        writer.create("/q/item", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();

        // ASSERT: fired once, then disarmed
        let outcome = tokio::time::timeout(Duration::from_secs(1), latch.wait()).await.unwrap();
        assert_eq!(
            outcome,
            WatchOutcome::Fired(WatchEvent {
                path: "/q".to_string(),
                kind: WatchEventKind::ChildrenChanged,
            })
        );
        assert_eq!(ensemble.watch_count(), 0);
    }

    #[tokio::test]
    async fn test_child_watch_fires_on_delete() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();
        client.create("/q", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();
        client.create("/q/item", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();

        let (_, mut latch) = client.watch_children("/q").await.unwrap();
        client.delete("/q/item", None).await.unwrap();

        assert!(latch.try_fired().is_some());
    }

    #[tokio::test]
    async fn test_data_change_does_not_fire_child_watch() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();
        client.create("/q", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();

        let (_, mut latch) = client.watch_children("/q").await.unwrap();
        client.set_data("/q", b"v".to_vec(), None).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_millis(50);
        assert_eq!(latch.wait_until(Some(deadline)).await, WatchOutcome::TimedOut);
    }

    // ============================================================
    // SESSION LIFECYCLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_expired_session_fails_and_releases_watches() {
        // ARRANGE
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();
        let other = ensemble.connect();
        client.create("/q", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();
        let (_, latch) = client.watch_children("/q").await.unwrap();

        // ACT
        ensemble.expire_session(client.session_id());

        // ASSERT: watch released with SessionClosed, calls fail transiently
        match latch.wait().await {
            WatchOutcome::Fired(event) => assert_eq!(event.kind, WatchEventKind::SessionClosed),
            other => panic!("unexpected outcome {:?}", other),
        }
        let err = client.get_children("/q").await.unwrap_err();
        assert_eq!(err, CoordError::SessionExpired);
        assert!(err.is_transient());

        // Other sessions are unaffected
        assert!(other.get_children("/q").await.is_ok());

        // ACT: revive
        ensemble.revive_session(client.session_id());
        assert!(client.get_children("/q").await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_session_stays_closed() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();

        client.close().await.unwrap();

        assert_eq!(client.exists("/").await, Err(CoordError::SessionClosed));
        // Nodes created by a closed session are persistent
        assert_eq!(ensemble.node_count(), 1);
    }

    // ============================================================
    // TREE HELPER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_ensure_path_is_idempotent() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();

        ensure_path(client.as_ref(), "/a/b/c", Acl::Open).await.unwrap();
        ensure_path(client.as_ref(), "/a/b/c", Acl::Open).await.unwrap();
        ensure_path(client.as_ref(), "/", Acl::Open).await.unwrap();

        assert!(client.exists("/a/b/c").await.unwrap().is_some());
        assert_eq!(ensemble.node_count(), 4);
    }

    #[tokio::test]
    async fn test_delete_tree_removes_subtree() {
        let ensemble = MemoryEnsemble::new();
        let client = ensemble.connect();
        for path in ["/a", "/a/b", "/a/b/c", "/a/d", "/keep"] {
            client.create(path, vec![], Acl::Open, CreateMode::Persistent).await.unwrap();
        }

        delete_tree(client.as_ref(), "/a").await.unwrap();
        delete_tree(client.as_ref(), "/a").await.unwrap();

        assert!(client.exists("/a").await.unwrap().is_none());
        assert!(client.exists("/keep").await.unwrap().is_some());
        assert_eq!(ensemble.node_count(), 2);
    }

    // ============================================================
    // HTTP TRANSPORT TESTS
    // ============================================================

    async fn spawn_server(config: &CoordinationConfig) -> (Arc<CoordinationServer>, String) {
        let ensemble = MemoryEnsemble::new();
        let server = CoordinationServer::new(ensemble, config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let app = router(server.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (server, addr)
    }

    fn test_config() -> CoordinationConfig {
        CoordinationConfig {
            watch_poll_ms: 200,
            request_timeout_ms: 1000,
            retries: 2,
            retry_backoff_ms: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_http_round_trip() {
        // ARRANGE
        let mut config = test_config();
        let (server, addr) = spawn_server(&config).await;
        config.hosts = vec![addr];
        let client = HttpCoordinator::connect(config).await.unwrap();
        assert_eq!(server.session_count(), 1);

        // ACT
        client.create("/q", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();
        let created = client
            .create("/q/n-", 7i64.to_be_bytes().to_vec(), Acl::Open, CreateMode::PersistentSequential)
            .await
            .unwrap();
        let (data, _) = client.get_data(&created).await.unwrap();

        // ASSERT
        assert_eq!(created, "/q/n-0000000000");
        assert_eq!(data, 7i64.to_be_bytes().to_vec());
        assert_eq!(client.get_children("/q").await.unwrap(), vec!["n-0000000000".to_string()]);

        // Service errors travel intact
        let duplicate = client.create("/q", vec![], Acl::Open, CreateMode::Persistent).await;
        assert_eq!(duplicate, Err(CoordError::NodeExists("/q".to_string())));

        client.close().await.unwrap();
        assert_eq!(server.session_count(), 0);
        assert_eq!(client.exists("/q").await, Err(CoordError::SessionClosed));
    }

    #[tokio::test]
    async fn test_http_watch_survives_long_poll_window() {
        // ARRANGE: a watch armed through HTTP, long-poll window of 200ms
        let mut config = test_config();
        let (server, addr) = spawn_server(&config).await;
        config.hosts = vec![addr];
        let client = HttpCoordinator::connect(config).await.unwrap();
        client.create("/q", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();

        let (_, latch) = client.watch_children("/q").await.unwrap();

        // ACT: mutate after more than one window has passed
        tokio::time::sleep(Duration::from_millis(500)).await;
        let writer = server.ensemble().connect();
        writer.create("/q/item", vec![], Acl::Open, CreateMode::Persistent).await.unwrap();

        // ASSERT
        let outcome = tokio::time::timeout(Duration::from_secs(3), latch.wait()).await.unwrap();
        match outcome {
            WatchOutcome::Fired(event) => assert_eq!(event.kind, WatchEventKind::ChildrenChanged),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_client_reopens_expired_session() {
        let mut config = test_config();
        let (server, addr) = spawn_server(&config).await;
        config.hosts = vec![addr];
        let client = HttpCoordinator::connect(config).await.unwrap();
        let original = client.session_id();

        // ACT: the service expires the session behind the client's back
        server.ensemble().expire_session(original);
        let first = client.exists("/").await;

        // ASSERT: the fault surfaces once, then a fresh session takes over
        assert_eq!(first, Err(CoordError::SessionExpired));
        assert_ne!(client.session_id(), original);
        assert!(client.exists("/").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_http_connect_without_hosts_fails() {
        let config = CoordinationConfig {
            hosts: vec![],
            ..Default::default()
        };

        let result = HttpCoordinator::connect(config).await;

        assert!(matches!(result, Err(CoordError::ConnectionLoss(_))));
    }

    #[tokio::test]
    async fn test_http_connect_to_unreachable_host_fails() {
        let config = CoordinationConfig {
            hosts: vec!["127.0.0.1:1".to_string()],
            retries: 1,
            request_timeout_ms: 200,
            ..Default::default()
        };

        let result = HttpCoordinator::connect(config).await;

        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_reaper_expires_idle_sessions() {
        let config = CoordinationConfig {
            session_timeout_ms: 50,
            ..test_config()
        };
        let (server, addr) = spawn_server(&config).await;

        // Open a session directly, then go silent
        let response = reqwest::Client::new()
            .post(format!("http://{}{}", addr, ENDPOINT_SESSION_OPEN))
            .json(&serde_json::json!({}))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(server.session_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        server.reap_idle_sessions();

        assert_eq!(server.session_count(), 0);
    }

    // ============================================================
    // WATCH TABLE HYGIENE
    // ============================================================

    #[tokio::test]
    async fn test_timed_out_takes_leave_no_watches_behind() {
        // ARRANGE: a queue over HTTP with a short long-poll window
        let mut config = CoordinationConfig {
            watch_poll_ms: 100,
            ..test_config()
        };
        let (server, addr) = spawn_server(&config).await;
        config.hosts = vec![addr];
        let client: Arc<dyn Coordinator> = HttpCoordinator::connect(config).await.unwrap();
        let queue = SequencedQueue::create(client, "/jobs", Acl::Open).await.unwrap();

        // ACT: every take gives up before anything arrives
        for _ in 0..20 {
            let taken = queue.take(Some(Duration::from_millis(30))).await.unwrap();
            assert!(taken.is_none());
        }
        tokio::time::sleep(Duration::from_millis(800)).await;

        // ASSERT: neither the server nor the ensemble still holds the watches
        assert_eq!(server.watch_count(), 0);
        assert_eq!(server.ensemble().watch_count(), 0);
    }

    #[tokio::test]
    async fn test_unpolled_watches_are_swept() {
        // ARRANGE: arm a watch with plain HTTP and never wait on it
        let config = CoordinationConfig {
            watch_poll_ms: 50,
            ..test_config()
        };
        let (server, addr) = spawn_server(&config).await;
        let http = reqwest::Client::new();

        let opened: CoordReply<u64> = http
            .post(format!("http://{}{}", addr, ENDPOINT_SESSION_OPEN))
            .json(&serde_json::json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let session = opened.result.unwrap();

        let armed: CoordReply<WatchChildrenResponse> = http
            .post(format!("http://{}{}", addr, ENDPOINT_WATCH_CHILDREN))
            .json(&PathRequest {
                session,
                path: "/".to_string(),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(armed.result.is_ok());
        assert_eq!(server.watch_count(), 1);
        assert_eq!(server.ensemble().watch_count(), 1);

        // ACT
        server.reap_stale_watches();
        assert_eq!(server.watch_count(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        server.reap_stale_watches();

        // ASSERT
        assert_eq!(server.watch_count(), 0);
        assert_eq!(server.ensemble().watch_count(), 0);
    }

    // ============================================================
    // RETRY POLICY
    // ============================================================

    async fn open_session() -> Json<CoordReply<u64>> {
        Json(CoordReply { result: Ok(1) })
    }

    async fn heartbeat() -> Json<CoordReply<()>> {
        Json(CoordReply { result: Ok(()) })
    }

    async fn slow_create(Extension(hits): Extension<Arc<AtomicUsize>>) -> Json<CoordReply<String>> {
        hits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        Json(CoordReply {
            result: Ok("/q/n-0000000000".to_string()),
        })
    }

    async fn slow_exists(Extension(hits): Extension<Arc<AtomicUsize>>) -> Json<CoordReply<Option<Stat>>> {
        hits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        Json(CoordReply { result: Ok(None) })
    }

    #[tokio::test]
    async fn test_slow_create_is_not_replayed() {
        // ARRANGE: a server that applies writes but answers after the client gave up
        let create_hits = Arc::new(AtomicUsize::new(0));
        let exists_hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(ENDPOINT_SESSION_OPEN, post(open_session))
            .route(ENDPOINT_SESSION_HEARTBEAT, post(heartbeat))
            .route(
                ENDPOINT_CREATE,
                post(slow_create).layer(Extension(create_hits.clone())),
            )
            .route(
                ENDPOINT_EXISTS,
                post(slow_exists).layer(Extension(exists_hits.clone())),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = CoordinationConfig {
            hosts: vec![addr],
            request_timeout_ms: 100,
            retries: 3,
            retry_backoff_ms: 10,
            ..Default::default()
        };
        let client = HttpCoordinator::connect(config).await.unwrap();

        // ACT
        let created = client
            .create("/q/n-", vec![], Acl::Open, CreateMode::PersistentSequential)
            .await;
        let found = client.exists("/q").await;

        // ASSERT: the write went out once, the read was retried
        assert!(matches!(created, Err(CoordError::ConnectionLoss(_))));
        assert_eq!(create_hits.load(Ordering::SeqCst), 1);
        assert!(matches!(found, Err(CoordError::ConnectionLoss(_))));
        assert_eq!(exists_hits.load(Ordering::SeqCst), 3);
    }
}
