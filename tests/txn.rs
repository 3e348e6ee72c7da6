use std::sync::Arc;

use meridian::{
    as_bin,
    errors::{CommandError, CommitError},
    policy::{BasePolicy, WritePolicy},
    Bins, Client, CommitStatus, Key, ResultCode, Txn, Value,
};

mod common;

fn txn_read_policy(txn: &Arc<Txn>) -> BasePolicy {
    BasePolicy {
        txn: Some(Arc::clone(txn)),
        ..BasePolicy::default()
    }
}

fn txn_write_policy(txn: &Arc<Txn>) -> WritePolicy {
    WritePolicy {
        base_policy: BasePolicy {
            txn: Some(Arc::clone(txn)),
            ..BasePolicy::default()
        },
        ..WritePolicy::default()
    }
}

async fn put_plain(client: &Client, key: &Key, value: i64) {
    client
        .put(&WritePolicy::default(), key, &[as_bin!("v", value)])
        .await
        .unwrap();
}

#[tokio::test]
async fn commit_after_reads_and_writes() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let k1 = Key::new("test", "s", "txn-r1");
    let k3 = Key::new("test", "s", "txn-r3");
    let k2 = Key::new("test", "s", "txn-w");
    put_plain(&client, &k1, 1).await;
    put_plain(&client, &k3, 3).await;

    let txn = Arc::new(Txn::new());
    client
        .get(&txn_read_policy(&txn), &k1, Bins::All)
        .await
        .unwrap();
    client
        .put(&txn_write_policy(&txn), &k2, &[as_bin!("v", 2)])
        .await
        .unwrap();
    client
        .get(&txn_read_policy(&txn), &k3, Bins::All)
        .await
        .unwrap();

    // The first transactional write created the monitor record.
    assert!(!server.set_is_empty("test", "~txn-monitor"));

    let status = client.commit(&txn).await.unwrap();
    assert_eq!(status, CommitStatus::Ok);

    // The monitor was removed and the write is visible.
    assert!(server.set_is_empty("test", "~txn-monitor"));
    let record = client
        .get(&BasePolicy::default(), &k2, Bins::All)
        .await
        .unwrap();
    assert_eq!(record.bins.get("v"), Some(&Value::Int(2)));

    // Committing again reports the earlier outcome.
    let status = client.commit(&txn).await.unwrap();
    assert_eq!(status, CommitStatus::AlreadyCommitted);

    client.close().await;
}

#[tokio::test]
async fn concurrent_writer_fails_verification() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let k1 = Key::new("test", "s", "contended");
    let k2 = Key::new("test", "s", "provisional");
    put_plain(&client, &k1, 1).await;

    let txn = Arc::new(Txn::new());
    client
        .get(&txn_read_policy(&txn), &k1, Bins::All)
        .await
        .unwrap();
    client
        .put(&txn_write_policy(&txn), &k2, &[as_bin!("v", 2)])
        .await
        .unwrap();

    // Someone else bumps the read record before the commit.
    server.bump_version("test", k1.digest());

    let status = client.commit(&txn).await.unwrap();
    assert_eq!(status, CommitStatus::VerifyFailed);
    assert!(server.set_is_empty("test", "~txn-monitor"));

    client.close().await;
}

#[tokio::test]
async fn empty_transaction_commits_without_contacting_the_server() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let txn = Arc::new(Txn::new());
    let status = client.commit(&txn).await.unwrap();
    assert_eq!(status, CommitStatus::Ok);

    client.close().await;
}

#[tokio::test]
async fn abort_rolls_back_and_blocks_commit() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "aborted");
    let txn = Arc::new(Txn::new());
    client
        .put(&txn_write_policy(&txn), &key, &[as_bin!("v", 2)])
        .await
        .unwrap();

    let status = client.abort(&txn).await.unwrap();
    assert_eq!(status, meridian::AbortStatus::Ok);
    assert!(server.set_is_empty("test", "~txn-monitor"));

    let err = client.commit(&txn).await.unwrap_err();
    assert!(matches!(err, CommitError::AlreadyAborted));

    client.close().await;
}

#[tokio::test]
async fn transactions_are_pinned_to_one_namespace() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let txn = Arc::new(Txn::new());
    client
        .put(
            &txn_write_policy(&txn),
            &Key::new("test", "s", 1),
            &[as_bin!("v", 1)],
        )
        .await
        .unwrap();

    let err = client
        .put(
            &txn_write_policy(&txn),
            &Key::new("other", "s", 2),
            &[as_bin!("v", 2)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Server {
            code: ResultCode::ParameterError,
            ..
        }
    ));
    assert_eq!(txn.namespace().as_deref(), Some("test"));

    client.close().await;
}
