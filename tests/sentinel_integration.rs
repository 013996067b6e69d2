//! Integration tests against a live sentinel deployment.
//!
//! These tests require a master named `mymaster` on 127.0.0.1:6379 with
//! replicas on 6380 and 6381, monitored by a sentinel on 127.0.0.1:26379.
//! All tests are marked with #[ignore] by default.
//!
//! Run tests:
//! ```bash
//! cargo test --test sentinel_integration -- --ignored
//! ```

use std::time::Duration;

use bytes::Bytes;
use muxis_sentinel::{
    ConnectionHandle, ErrorKind, RedisServer, SentinelClient, SentinelCommands, SentinelConfig,
};

const MASTER_NAME: &str = "mymaster";
const CLIENT_NAME: &str = "muxis-it";

fn create_test_client() -> SentinelClient {
    let config = SentinelConfig::builder()
        .master(MASTER_NAME)
        .sentinels("127.0.0.1:26379")
        .client_name(CLIENT_NAME)
        .build()
        .expect("invalid config");
    SentinelClient::new(config)
}

async fn master_connection() -> ConnectionHandle {
    create_test_client()
        .master_connection()
        .await
        .expect("failed to connect to master")
}

#[tokio::test]
#[ignore]
async fn test_masters() {
    let mut connection = create_test_client()
        .get_sentinel_connection()
        .await
        .expect("failed to connect to sentinel");

    let masters = connection.masters().await.expect("SENTINEL MASTERS failed");
    assert_eq!(masters.len(), 1);
    assert_eq!(masters[0].name(), Some(MASTER_NAME));
}

#[tokio::test]
#[ignore]
async fn test_slaves() {
    let mut connection = create_test_client()
        .get_sentinel_connection()
        .await
        .expect("failed to connect to sentinel");

    let masters = connection.masters().await.expect("SENTINEL MASTERS failed");
    let replicas = connection
        .slaves(&masters[0])
        .await
        .expect("SENTINEL REPLICAS failed");
    assert!(replicas.contains(&RedisServer::new("127.0.0.1", 6380)));
    assert!(replicas.contains(&RedisServer::new("127.0.0.1", 6381)));
}

#[tokio::test]
#[ignore]
async fn test_client_contract() {
    let mut client = create_test_client();
    let masters = client.masters().await.expect("masters failed");
    assert_eq!(masters.len(), 1);

    let replicas = client.slaves(&masters[0]).await.expect("slaves failed");
    assert_eq!(replicas.len(), 2);
}

#[tokio::test]
#[ignore]
async fn test_sentinel_connection_has_client_name() {
    let mut connection = create_test_client()
        .get_sentinel_connection()
        .await
        .expect("failed to connect to sentinel");

    let name = connection.client_getname().await.expect("CLIENT GETNAME failed");
    assert_eq!(name.as_deref(), Some(CLIENT_NAME));
}

#[tokio::test]
#[ignore]
async fn test_resolve_master() {
    let client = create_test_client();
    let master = client
        .resolver()
        .resolve_master(MASTER_NAME, Duration::from_secs(5))
        .await
        .expect("resolution failed");
    assert_eq!(master.name(), Some(MASTER_NAME));
    assert!(master.is_master());
}

#[tokio::test]
#[ignore]
async fn test_probe_client_name() {
    let client = create_test_client();
    let master = client.master().await.expect("resolution failed");
    let mut handle = client
        .factory()
        .connect(&master, "probe-1", Duration::from_secs(2))
        .await
        .expect("connect failed");

    let name = handle.client_getname().await.expect("CLIENT GETNAME failed");
    assert_eq!(name.as_deref(), Some("probe-1"));
}

#[tokio::test]
#[ignore]
async fn test_eval_return_single_error() {
    let mut master = master_connection().await;
    let err = master
        .eval("return redis.call('expire','foo')", &[], &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Scripting);
}

#[tokio::test]
#[ignore]
async fn test_eval_array_script_error() {
    let mut master = master_connection().await;
    let err = master
        .eval("return {1,2", &["foo"], &["bar"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Scripting);
}

#[tokio::test]
#[ignore]
async fn test_evalsha_not_a_script() {
    let mut master = master_connection().await;
    let err = master
        .evalsha("somefakesha", &["key1", "key2"], &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Scripting);
}

#[tokio::test]
#[ignore]
async fn test_evalsha_array_error() {
    let mut master = master_connection().await;
    let err = master
        .evalsha("notasha", &["key1"], &["arg1"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Scripting);
}

#[tokio::test]
#[ignore]
async fn test_restore_bad_data() {
    let mut master = master_connection().await;
    let err = master
        .restore(
            "integration:restore:bad",
            Duration::ZERO,
            Bytes::from_static(b"foo"),
            false,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataAccess);
}

#[tokio::test]
#[ignore]
async fn test_restore_existing_key() {
    let mut master = master_connection().await;
    let key = "integration:restore:existing";
    master.set(key, "bar").await.expect("SET failed");
    let payload = master
        .dump(key)
        .await
        .expect("DUMP failed")
        .expect("key vanished");

    let err = master
        .restore(key, Duration::ZERO, payload, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataAccess);
}

#[tokio::test]
#[ignore]
async fn test_exec_without_multi() {
    let mut master = master_connection().await;
    let err = master.exec().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[tokio::test]
#[ignore]
async fn test_error_in_tx() {
    let mut master = master_connection().await;
    let key = "integration:tx:error";
    master.del(key).await.expect("DEL failed");

    master.multi().await.expect("MULTI failed");
    master.set(key, "bar").await.expect("SET not queued");
    master
        .execute(muxis_sentinel::Cmd::new("LPOP").arg(key))
        .await
        .expect("LPOP not queued");
    let err = master.exec().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transaction);
}

#[tokio::test]
#[ignore]
async fn test_replica_connections() {
    let handles = create_test_client()
        .replica_connections()
        .await
        .expect("failed to connect to replicas");
    assert_eq!(handles.len(), 2);
}
