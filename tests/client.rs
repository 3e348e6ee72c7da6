use std::time::Duration;

use meridian::{
    cluster::ClusterError,
    errors::{CommandError, Error},
    policy::{BasePolicy, ClientPolicy},
    Bins, Client, Key, ResultCode,
};

mod common;

#[tokio::test]
async fn connect_and_discover() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    assert!(client.is_connected());
    assert_eq!(client.node_names(), vec!["mock-node-1".to_owned()]);

    let node = client.get_node("mock-node-1").expect("node is known");
    assert!(node.is_active());
    assert!(node.supports_float());

    client.close().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn cluster_name_mismatch_rejects_seed() {
    common::init_logger();
    let server = common::MockServer::start().await;

    let policy = ClientPolicy {
        cluster_name: Some("not-the-real-cluster".to_owned()),
        connect_timeout: Duration::from_secs(2),
        ..ClientPolicy::default()
    };
    let err = Client::new(&policy, server.address().as_str())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cluster(ClusterError::Connection)));
}

#[tokio::test]
async fn unreachable_seed_fails_fast() {
    common::init_logger();

    // Grab a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    drop(listener);

    let policy = ClientPolicy {
        connect_timeout: Duration::from_secs(2),
        ..ClientPolicy::default()
    };

    let started = std::time::Instant::now();
    let err = Client::new(&policy, address.as_str()).await.unwrap_err();
    assert!(matches!(err, Error::Cluster(ClusterError::Connection)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn disconnected_start_reports_server_not_available() {
    common::init_logger();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    drop(listener);

    let policy = ClientPolicy {
        fail_if_not_connected: false,
        connect_timeout: Duration::from_secs(1),
        ..ClientPolicy::default()
    };
    let client = Client::new(&policy, address.as_str()).await.unwrap();
    assert!(!client.is_connected());

    let read_policy = BasePolicy {
        max_retries: 0,
        sleep_between_retries: Duration::from_millis(1),
        ..BasePolicy::default()
    };
    let err = client
        .get(&read_policy, &Key::new("test", "s", 1), Bins::All)
        .await
        .unwrap_err();

    match err {
        CommandError::MaxRetriesExceeded { last, .. } => {
            assert_eq!(last.result_code(), ResultCode::ServerNotAvailable);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    client.close().await;
}
