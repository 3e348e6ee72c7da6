use std::collections::HashSet;

use meridian::{
    as_bin,
    cluster::partition::partition_id,
    policy::{ScanPolicy, WritePolicy},
    Bins, Key, PartitionFilter, PartitionState, Value,
};

mod common;

async fn seed_records(client: &meridian::Client, set_name: &str, count: usize) -> Vec<Key> {
    let mut keys = vec![];
    for i in 0..count {
        let key = Key::new("test", set_name.to_owned(), i as i64);
        client
            .put(&WritePolicy::default(), &key, &[as_bin!("i", i as i64)])
            .await
            .unwrap();
        keys.push(key);
    }
    keys
}

#[tokio::test]
async fn scan_yields_every_record_exactly_once() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let keys = seed_records(&client, "full", 30).await;
    let expected: HashSet<[u8; 20]> = keys.iter().map(Key::digest).collect();

    let filter = PartitionFilter::all();
    let mut records = client
        .scan_partitions(&ScanPolicy::default(), "test", "full", Bins::All, &filter)
        .await
        .unwrap();

    let mut seen = HashSet::new();
    while let Some(result) = records.next().await {
        let record = result.unwrap();
        let digest = record.key.as_ref().unwrap().digest();
        assert!(seen.insert(digest), "no partition may be double-counted");
    }

    assert_eq!(seen, expected);
    assert!(filter.is_done());
    assert!(filter
        .statuses()
        .iter()
        .all(|status| status.state == PartitionState::Done));

    client.close().await;
}

#[tokio::test]
async fn scan_respects_max_records() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    seed_records(&client, "capped", 30).await;

    let policy = ScanPolicy {
        max_records: 10,
        ..ScanPolicy::default()
    };
    let mut records = client
        .scan(&policy, "test", "capped", Bins::All)
        .await
        .unwrap();

    let mut count = 0;
    while let Some(result) = records.next().await {
        result.unwrap();
        count += 1;
    }
    assert_eq!(count, 10);

    client.close().await;
}

#[tokio::test]
async fn scan_single_partition() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let keys = seed_records(&client, "single", 20).await;
    let target = keys[0].digest();
    let partition = partition_id(&target, common::N_PARTITIONS);
    let expected: HashSet<[u8; 20]> = keys
        .iter()
        .map(Key::digest)
        .filter(|digest| partition_id(digest, common::N_PARTITIONS) == partition)
        .collect();

    let filter = PartitionFilter::partition(partition);
    let mut records = client
        .scan_partitions(&ScanPolicy::default(), "test", "single", Bins::All, &filter)
        .await
        .unwrap();

    let mut seen = HashSet::new();
    while let Some(result) = records.next().await {
        seen.insert(result.unwrap().key.unwrap().digest());
    }
    assert_eq!(seen, expected);

    client.close().await;
}

#[tokio::test]
async fn scan_returns_selected_bins() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "sel", 1);
    client
        .put(
            &WritePolicy::default(),
            &key,
            &[as_bin!("wanted", 1), as_bin!("other", 2)],
        )
        .await
        .unwrap();

    let mut records = client
        .scan(&ScanPolicy::default(), "test", "sel", ["wanted"])
        .await
        .unwrap();

    let record = records.next().await.unwrap().unwrap();
    assert_eq!(record.bins.get("wanted"), Some(&Value::Int(1)));
    assert!(!record.bins.contains_key("other"));
    assert!(records.next().await.is_none());

    client.close().await;
}

#[tokio::test]
async fn closing_the_recordset_stops_the_stream() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    seed_records(&client, "dropped", 25).await;

    let mut records = client
        .scan(&ScanPolicy::default(), "test", "dropped", Bins::All)
        .await
        .unwrap();

    let first = records.next().await;
    assert!(first.is_some());
    records.close();

    // The workers notice the closed queue; draining terminates.
    while records.next().await.is_some() {}

    client.close().await;
}

#[tokio::test]
async fn filterless_query_walks_the_set() {
    use meridian::{policy::QueryPolicy, Statement};

    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let keys = seed_records(&client, "queried", 12).await;

    let statement = Statement::new("test", "queried", Bins::All);
    let mut records = client
        .query(&QueryPolicy::default(), statement)
        .await
        .unwrap();

    let mut count = 0;
    while let Some(result) = records.next().await {
        result.unwrap();
        count += 1;
    }
    assert_eq!(count, keys.len());

    client.close().await;
}

#[tokio::test]
async fn truncate_empties_the_set() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    seed_records(&client, "doomed", 10).await;
    assert!(!server.set_is_empty("test", "doomed"));

    client.truncate("test", "doomed", 0).await.unwrap();
    assert!(server.set_is_empty("test", "doomed"));

    let mut records = client
        .scan(&ScanPolicy::default(), "test", "doomed", Bins::All)
        .await
        .unwrap();
    assert!(records.next().await.is_none());

    client.close().await;
}
