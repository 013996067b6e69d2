//! A dedicated connection to one sentinel.

use std::future::Future;

use tracing::{debug, info};

use crate::core::command;
use crate::error::{Error, Result};
use crate::normalize::normalize_command;
use crate::proto::error::RawError;

use super::handle::ConnectionHandle;
use super::resolver::{is_unknown_master, query_masters, query_replicas};
use super::server::RedisServer;

/// Sentinel queries shared by every sentinel-facing type.
///
/// Implemented by [`SentinelConnection`] and by
/// [`SentinelClient`](crate::SentinelClient), so the same checks can be run
/// against either.
pub trait SentinelCommands {
    /// Lists the monitored masters.
    fn masters(&mut self) -> impl Future<Output = Result<Vec<RedisServer>>> + Send;

    /// Lists the replicas of `master`. No order is guaranteed.
    fn slaves(
        &mut self,
        master: &RedisServer,
    ) -> impl Future<Output = Result<Vec<RedisServer>>> + Send;
}

/// A session with a single sentinel.
///
/// Obtained from
/// [`SentinelClient::get_sentinel_connection`](crate::SentinelClient::get_sentinel_connection).
/// Queries are answered by that sentinel alone; there is no failover to
/// other endpoints once the connection is open.
#[derive(Debug)]
pub struct SentinelConnection {
    handle: ConnectionHandle,
}

impl SentinelConnection {
    pub(crate) fn new(handle: ConnectionHandle) -> Self {
        Self { handle }
    }

    /// The sentinel this connection talks to.
    pub fn server(&self) -> &RedisServer {
        self.handle.server()
    }

    /// Lists the masters this sentinel monitors, in the order it reports
    /// them.
    ///
    /// # Errors
    ///
    /// Fails as a whole if any entry cannot be parsed.
    pub async fn masters(&mut self) -> Result<Vec<RedisServer>> {
        query_masters(&mut self.handle).await
    }

    /// Lists the replicas of `master` as this sentinel reports them,
    /// leaving out any the sentinel still lists under another master
    /// address.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `master` has no name or the sentinel does
    /// not monitor it.
    pub async fn slaves(&mut self, master: &RedisServer) -> Result<Vec<RedisServer>> {
        let name = master_name(master)?;
        query_replicas(&mut self.handle, name, master)
            .await?
            .ok_or_else(|| Error::configuration(format!("unknown master '{}'", name)))
    }

    /// Forces a failover of `master` without asking the other sentinels.
    pub async fn failover(&mut self, master: &RedisServer) -> Result<()> {
        let name = master_name(master)?;
        info!(master = name, sentinel = %self.server(), "requesting failover");
        self.call(command::sentinel_failover(name.to_string())).await
    }

    /// Starts monitoring `server` as a master.
    ///
    /// `server` must carry a name and a quorum.
    pub async fn monitor(&mut self, server: &RedisServer) -> Result<()> {
        let name = master_name(server)?;
        let quorum = server
            .quorum()
            .ok_or_else(|| Error::configuration(format!("master '{}' has no quorum", name)))?;
        debug!(master = name, address = %server.address(), quorum, "monitoring master");
        self.call(command::sentinel_monitor(
            name.to_string(),
            server.host().to_string(),
            server.port(),
            quorum,
        ))
        .await
    }

    /// Stops monitoring `master`.
    pub async fn remove(&mut self, master: &RedisServer) -> Result<()> {
        let name = master_name(master)?;
        self.call(command::sentinel_remove(name.to_string())).await
    }

    /// The client name the sentinel associates with this connection.
    pub async fn client_getname(&mut self) -> Result<Option<String>> {
        self.handle.client_getname().await
    }

    /// Returns true until the connection is closed or breaks.
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Closes the connection.
    pub fn close(self) {
        self.handle.close();
    }

    async fn call(&mut self, cmd: command::Cmd) -> Result<()> {
        let reply = self.handle.request(cmd).await;
        match reply.and_then(command::expect_ok) {
            Ok(()) => Ok(()),
            Err(RawError::Server { message }) if is_unknown_master(&message) => {
                Err(Error::configuration(message))
            }
            Err(e) => Err(normalize_command("SENTINEL", e)),
        }
    }
}

fn master_name(master: &RedisServer) -> Result<&str> {
    master
        .name()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| Error::configuration(format!("master {} has no name", master)))
}

impl SentinelCommands for SentinelConnection {
    async fn masters(&mut self) -> Result<Vec<RedisServer>> {
        SentinelConnection::masters(self).await
    }

    async fn slaves(&mut self, master: &RedisServer) -> Result<Vec<RedisServer>> {
        SentinelConnection::slaves(self, master).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{assert_sentinel_contract, ExpectedTopology, FakeMaster, FakeSentinel};
    use crate::{SentinelClient, SentinelConfig};

    async fn connect(sentinel: &FakeSentinel) -> SentinelConnection {
        let config = SentinelConfig::builder()
            .master("mymaster")
            .sentinels(sentinel.endpoint())
            .client_name("facade-test")
            .build()
            .unwrap();
        SentinelClient::new(config)
            .get_sentinel_connection()
            .await
            .unwrap()
    }

    fn topology() -> FakeMaster {
        FakeMaster::new("mymaster", "127.0.0.1", 6379)
            .replica("127.0.0.1", 6380)
            .replica("127.0.0.1", 6381)
    }

    #[tokio::test]
    async fn test_connection_contract() {
        let sentinel = FakeSentinel::start().await;
        sentinel.add_master(topology());

        let mut connection = connect(&sentinel).await;
        assert_sentinel_contract(&mut connection, &ExpectedTopology::new("mymaster", 6380..=6381))
            .await;
    }

    #[tokio::test]
    async fn test_slaves_match_resolver_for_stale_replica() {
        let sentinel = FakeSentinel::start().await;
        sentinel.add_master(topology().stale_replica("127.0.0.1", 6382, "127.0.0.1", 6390));
        let master = RedisServer::master("mymaster", "127.0.0.1", 6379);

        let mut connection = connect(&sentinel).await;
        let from_facade = connection.slaves(&master).await.unwrap();
        assert_eq!(from_facade.len(), 2);
        assert!(!from_facade.contains(&RedisServer::new("127.0.0.1", 6382)));

        let mut client = SentinelClient::new(
            SentinelConfig::builder()
                .master("mymaster")
                .sentinels(sentinel.endpoint())
                .build()
                .unwrap(),
        );
        let from_client = SentinelCommands::slaves(&mut client, &master).await.unwrap();
        assert_eq!(from_client.len(), from_facade.len());
        for replica in &from_facade {
            assert!(from_client.contains(replica));
        }
    }

    #[tokio::test]
    async fn test_client_name_is_applied() {
        let sentinel = FakeSentinel::start().await;
        let mut connection = connect(&sentinel).await;
        assert!(connection.is_open());
        assert_eq!(
            connection.client_getname().await.unwrap().as_deref(),
            Some("facade-test")
        );
        connection.close();
    }

    #[tokio::test]
    async fn test_slaves_of_unknown_master() {
        let sentinel = FakeSentinel::start().await;
        let mut connection = connect(&sentinel).await;

        let err = connection
            .slaves(&RedisServer::master("nosuch", "127.0.0.1", 6379))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = connection
            .slaves(&RedisServer::new("127.0.0.1", 6379))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_monitor_and_remove() {
        let sentinel = FakeSentinel::start().await;
        let mut connection = connect(&sentinel).await;

        let err = connection
            .monitor(&RedisServer::master("cache", "127.0.0.1", 7000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        connection
            .monitor(&RedisServer::master("cache", "127.0.0.1", 7000).with_quorum(2))
            .await
            .unwrap();
        let masters = connection.masters().await.unwrap();
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].quorum(), Some(2));

        connection
            .remove(&RedisServer::master("cache", "127.0.0.1", 7000))
            .await
            .unwrap();
        assert!(connection.masters().await.unwrap().is_empty());

        let err = connection
            .remove(&RedisServer::master("cache", "127.0.0.1", 7000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_failover_promotes_replica() {
        let sentinel = FakeSentinel::start().await;
        sentinel.add_master(topology());
        let mut connection = connect(&sentinel).await;
        let master = RedisServer::master("mymaster", "127.0.0.1", 6379);

        connection.failover(&master).await.unwrap();

        let masters = connection.masters().await.unwrap();
        assert_eq!(masters[0].port(), 6380);
        let slaves = connection
            .slaves(&RedisServer::master("mymaster", "127.0.0.1", 6380))
            .await
            .unwrap();
        assert!(slaves.contains(&RedisServer::new("127.0.0.1", 6379)));
    }

    #[tokio::test]
    async fn test_failover_without_replicas_fails() {
        let sentinel = FakeSentinel::start().await;
        sentinel.add_master(FakeMaster::new("mymaster", "127.0.0.1", 6379));
        let mut connection = connect(&sentinel).await;

        let err = connection
            .failover(&RedisServer::master("mymaster", "127.0.0.1", 6379))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataAccess);
        assert!(connection.is_open());
    }
}
