use std::time::Duration;

use meridian::{
    as_bin,
    operations::OwnedOperation,
    policy::{BasePolicy, BatchPolicy, WritePolicy},
    BatchOp, BatchRecord, Bins, Key, ResultCode, Value,
};

mod common;

fn fast_batch_policy() -> BatchPolicy {
    BatchPolicy {
        base_policy: BasePolicy {
            max_retries: 1,
            sleep_between_retries: Duration::from_millis(1),
            ..BasePolicy::default()
        },
        ..BatchPolicy::default()
    }
}

#[tokio::test]
async fn results_are_positional() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let keys: Vec<Key> = (0..5).map(|i| Key::new("test", "s", i)).collect();
    for key in keys.iter().step_by(2) {
        client
            .put(&WritePolicy::default(), key, &[as_bin!("i", 7)])
            .await
            .unwrap();
    }

    let records = keys
        .iter()
        .map(|key| BatchRecord::read(key.clone(), Bins::All))
        .collect();
    let results = client.batch(&fast_batch_policy(), records).await.unwrap();

    assert!(results.success);
    assert_eq!(results.records.len(), keys.len());
    for (i, entry) in results.records.iter().enumerate() {
        assert_eq!(entry.key, keys[i], "order must be preserved");
        if i % 2 == 0 {
            assert_eq!(entry.result, ResultCode::Ok);
            let record = entry.record.as_ref().expect("existing key has a record");
            assert_eq!(record.bins.get("i"), Some(&Value::Int(7)));
        } else {
            assert_eq!(entry.result, ResultCode::KeyNotFound);
            assert!(entry.record.is_none());
        }
    }

    client.close().await;
}

#[tokio::test]
async fn unavailable_entry_keeps_its_code() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let keys: Vec<Key> = (0..3).map(|i| Key::new("test", "s", i)).collect();
    for key in &keys {
        client
            .put(&WritePolicy::default(), key, &[as_bin!("i", 1)])
            .await
            .unwrap();
    }
    // The middle key's partition stays unavailable across retries.
    server.fail_digest(keys[1].digest(), 11);

    let records = keys
        .iter()
        .map(|key| BatchRecord::read(key.clone(), Bins::All))
        .collect();
    let results = client.batch(&fast_batch_policy(), records).await.unwrap();

    assert!(!results.success);
    assert_eq!(results.records[0].result, ResultCode::Ok);
    assert_eq!(results.records[1].result, ResultCode::PartitionUnavailable);
    assert!(results.records[1].record.is_none());
    assert_eq!(results.records[2].result, ResultCode::Ok);

    client.close().await;
}

#[tokio::test]
async fn mixed_read_write_delete() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let read_key = Key::new("test", "s", "batch-read");
    let write_key = Key::new("test", "s", "batch-write");
    let delete_key = Key::new("test", "s", "batch-delete");
    client
        .put(&WritePolicy::default(), &read_key, &[as_bin!("v", 1)])
        .await
        .unwrap();
    client
        .put(&WritePolicy::default(), &delete_key, &[as_bin!("v", 2)])
        .await
        .unwrap();

    let records = vec![
        BatchRecord::read(read_key.clone(), Bins::All),
        BatchRecord::new(
            write_key.clone(),
            BatchOp::Write(vec![OwnedOperation::put("v", 9)]),
        ),
        BatchRecord::delete(delete_key.clone()),
    ];
    let results = client.batch(&fast_batch_policy(), records).await.unwrap();
    assert!(results.success);
    assert!(results.records.iter().all(|entry| entry.result == ResultCode::Ok));

    // The write landed and the delete took effect.
    let record = client
        .get(&BasePolicy::default(), &write_key, Bins::All)
        .await
        .unwrap();
    assert_eq!(record.bins.get("v"), Some(&Value::Int(9)));
    assert!(!client
        .exists(&BasePolicy::default(), &delete_key)
        .await
        .unwrap());

    client.close().await;
}

#[tokio::test]
async fn empty_batch_succeeds() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let results = client.batch(&fast_batch_policy(), vec![]).await.unwrap();
    assert!(results.success);
    assert!(results.records.is_empty());

    client.close().await;
}
