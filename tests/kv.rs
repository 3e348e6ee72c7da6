use std::time::Duration;

use meridian::{
    as_bin, as_list, as_map,
    errors::CommandError,
    operations::scalar,
    policy::{BasePolicy, RecordExistsAction, WritePolicy},
    Bin, Bins, Key, ResultCode, Value,
};

mod common;

#[tokio::test]
async fn put_get_round_trip() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "k1");
    client
        .put(&WritePolicy::default(), &key, &[as_bin!("a", 1)])
        .await
        .unwrap();

    let record = client
        .get(&BasePolicy::default(), &key, Bins::All)
        .await
        .unwrap();
    assert_eq!(record.generation, 1);
    assert_eq!(record.bins.len(), 1);
    assert_eq!(record.bins.get("a"), Some(&Value::Int(1)));

    client.close().await;
}

#[tokio::test]
async fn all_value_types_survive() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "typed");
    let bins = [
        as_bin!("int", 42),
        as_bin!("neg", -42),
        as_bin!("str", "hello"),
        as_bin!("float", 1.25f64),
        as_bin!("flag", true),
        as_bin!("blob", vec![1u8, 2, 3]),
        as_bin!("list", as_list!(1, "two", 3.0)),
        as_bin!("map", as_map!("a" => 1, "b" => "x")),
    ];
    client.put(&WritePolicy::default(), &key, &bins).await.unwrap();

    let record = client
        .get(&BasePolicy::default(), &key, Bins::All)
        .await
        .unwrap();
    assert_eq!(record.bins.get("int"), Some(&Value::Int(42)));
    assert_eq!(record.bins.get("neg"), Some(&Value::Int(-42)));
    assert_eq!(record.bins.get("str"), Some(&Value::from("hello")));
    assert_eq!(record.bins.get("float"), Some(&Value::from(1.25f64)));
    assert_eq!(record.bins.get("flag"), Some(&Value::Bool(true)));
    assert_eq!(record.bins.get("blob"), Some(&Value::Blob(vec![1, 2, 3])));
    assert_eq!(record.bins.get("list"), Some(&as_list!(1, "two", 3.0)));
    assert_eq!(record.bins.get("map"), Some(&as_map!("a" => 1, "b" => "x")));

    client.close().await;
}

#[tokio::test]
async fn selected_bins_and_header_only() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "subset");
    let bins = [as_bin!("a", 1), as_bin!("b", 2), as_bin!("c", 3)];
    client.put(&WritePolicy::default(), &key, &bins).await.unwrap();

    let record = client
        .get(&BasePolicy::default(), &key, ["a", "c"])
        .await
        .unwrap();
    assert_eq!(record.bins.len(), 2);
    assert_eq!(record.bins.get("b"), None);

    let record = client
        .get(&BasePolicy::default(), &key, Bins::None)
        .await
        .unwrap();
    assert!(record.bins.is_empty());
    assert_eq!(record.generation, 1);

    client.close().await;
}

#[tokio::test]
async fn missing_key_reports_not_found() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "nope");
    let err = client
        .get(&BasePolicy::default(), &key, Bins::All)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Server {
            code: ResultCode::KeyNotFound,
            ..
        }
    ));

    client.close().await;
}

#[tokio::test]
async fn delete_then_exists() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "gone");
    client
        .put(&WritePolicy::default(), &key, &[as_bin!("a", 1)])
        .await
        .unwrap();
    assert!(client.exists(&BasePolicy::default(), &key).await.unwrap());

    let existed = client.delete(&WritePolicy::default(), &key).await.unwrap();
    assert!(existed);
    assert!(!client.exists(&BasePolicy::default(), &key).await.unwrap());

    let existed = client.delete(&WritePolicy::default(), &key).await.unwrap();
    assert!(!existed);

    client.close().await;
}

#[tokio::test]
async fn arithmetic_and_string_ops() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "mods");
    let policy = WritePolicy::default();
    client.put(&policy, &key, &[as_bin!("n", 10)]).await.unwrap();
    client.add(&policy, &key, &[as_bin!("n", 5)]).await.unwrap();

    client.put(&policy, &key, &[as_bin!("s", "mid")]).await.unwrap();
    client
        .append(&policy, &key, &[as_bin!("s", "-end")])
        .await
        .unwrap();
    client
        .prepend(&policy, &key, &[as_bin!("s", "start-")])
        .await
        .unwrap();

    let record = client
        .get(&BasePolicy::default(), &key, Bins::All)
        .await
        .unwrap();
    assert_eq!(record.bins.get("n"), Some(&Value::Int(15)));
    assert_eq!(record.bins.get("s"), Some(&Value::from("start-mid-end")));

    client.close().await;
}

#[tokio::test]
async fn touch_refreshes_and_fails_on_missing() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "touched");
    client
        .put(&WritePolicy::default(), &key, &[as_bin!("a", 1)])
        .await
        .unwrap();
    client.touch(&WritePolicy::default(), &key).await.unwrap();

    let record = client
        .get(&BasePolicy::default(), &key, Bins::None)
        .await
        .unwrap();
    assert_eq!(record.generation, 2);

    let missing = Key::new("test", "s", "never-written");
    let err = client
        .touch(&WritePolicy::default(), &missing)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Server {
            code: ResultCode::KeyNotFound,
            ..
        }
    ));

    client.close().await;
}

#[tokio::test]
async fn operate_applies_in_order() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "counter");
    client
        .put(&WritePolicy::default(), &key, &[as_bin!("value", 41)])
        .await
        .unwrap();

    let bin = Bin::new("value", 1);
    let ops = [scalar::add(&bin), scalar::get_bin("value")];
    let record = client
        .operate(&WritePolicy::default(), &key, &ops)
        .await
        .unwrap();
    assert_eq!(record.bins.get("value"), Some(&Value::Int(42)));

    client.close().await;
}

#[tokio::test]
async fn generation_mismatch_is_rejected() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "versioned");
    client
        .put(&WritePolicy::default(), &key, &[as_bin!("a", 1)])
        .await
        .unwrap();

    // Expecting the current generation succeeds and bumps it.
    let policy = WritePolicy::new(1, Default::default());
    client.put(&policy, &key, &[as_bin!("a", 2)]).await.unwrap();

    // Re-using the stale generation now fails.
    let err = client
        .put(&policy, &key, &[as_bin!("a", 3)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Server {
            code: ResultCode::GenerationError,
            ..
        }
    ));

    client.close().await;
}

#[tokio::test]
async fn create_only_rejects_existing() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "unique");
    client
        .put(&WritePolicy::default(), &key, &[as_bin!("a", 1)])
        .await
        .unwrap();

    let policy = WritePolicy {
        record_exists_action: RecordExistsAction::CreateOnly,
        ..WritePolicy::default()
    };
    let err = client
        .put(&policy, &key, &[as_bin!("a", 2)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Server {
            code: ResultCode::KeyExists,
            ..
        }
    ));

    client.close().await;
}

#[tokio::test]
async fn retryable_code_is_retried() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "flaky");
    client
        .put(&WritePolicy::default(), &key, &[as_bin!("a", 1)])
        .await
        .unwrap();

    // One transient overload, then the read goes through.
    server.fail_next(18, 1); // device overload
    let policy = BasePolicy {
        sleep_between_retries: Duration::from_millis(1),
        ..BasePolicy::default()
    };
    let record = client.get(&policy, &key, Bins::All).await.unwrap();
    assert_eq!(record.bins.get("a"), Some(&Value::Int(1)));

    client.close().await;
}

#[tokio::test]
async fn zero_retries_exhaust_on_first_retryable_code() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "flaky");
    server.fail_next(18, 1); // device overload

    let policy = BasePolicy {
        max_retries: 0,
        sleep_between_retries: Duration::from_millis(1),
        ..BasePolicy::default()
    };
    let err = client.get(&policy, &key, Bins::All).await.unwrap_err();
    match err {
        CommandError::MaxRetriesExceeded { attempts, last } => {
            assert_eq!(attempts, 1);
            assert_eq!(last.result_code(), ResultCode::DeviceOverload);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    client.close().await;
}

#[tokio::test]
async fn nil_write_removes_bin() {
    common::init_logger();
    let server = common::MockServer::start().await;
    let client = server.client().await;

    let key = Key::new("test", "s", "shrinking");
    client
        .put(
            &WritePolicy::default(),
            &key,
            &[as_bin!("keep", 1), as_bin!("drop", 2)],
        )
        .await
        .unwrap();
    client
        .put(&WritePolicy::default(), &key, &[as_bin!("drop", None)])
        .await
        .unwrap();

    let record = client
        .get(&BasePolicy::default(), &key, Bins::All)
        .await
        .unwrap();
    assert_eq!(record.bins.len(), 1);
    assert!(record.bins.contains_key("keep"));

    client.close().await;
}
