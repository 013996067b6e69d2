//! The top-level sentinel client.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use crate::error::Result;

use super::config::SentinelConfig;
use super::connection::{SentinelCommands, SentinelConnection};
use super::factory::ConnectionFactory;
use super::handle::ConnectionHandle;
use super::resolver::TopologyResolver;
use super::server::RedisServer;

/// Entry point: resolves topology and hands out connections to the nodes
/// behind a logical master name.
///
/// Cloning is cheap; clones share the connection pool.
///
/// # Examples
///
/// ```no_run
/// use muxis_sentinel::{SentinelClient, SentinelConfig};
///
/// # async fn example() -> muxis_sentinel::Result<()> {
/// let config = SentinelConfig::builder()
///     .master("mymaster")
///     .sentinels("127.0.0.1:26379,127.0.0.1:26380")
///     .build()?;
/// let client = SentinelClient::new(config);
///
/// let mut master = client.master_connection().await?;
/// master.set("greeting", "hello").await?;
///
/// for mut replica in client.replica_connections().await? {
///     replica.ping().await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SentinelClient {
    config: Arc<SentinelConfig>,
    factory: ConnectionFactory,
    resolver: TopologyResolver,
}

impl SentinelClient {
    /// Creates a client. Nothing is contacted until the first call.
    pub fn new(config: SentinelConfig) -> Self {
        let config = Arc::new(config);
        let factory = ConnectionFactory::new(&config);
        let resolver = TopologyResolver::new(Arc::clone(&config), factory.clone());
        Self {
            config,
            factory,
            resolver,
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// The topology resolver used by this client.
    pub fn resolver(&self) -> &TopologyResolver {
        &self.resolver
    }

    /// The connection factory used by this client.
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Opens a [`SentinelConnection`] to the first reachable sentinel.
    pub async fn get_sentinel_connection(&self) -> Result<SentinelConnection> {
        let handle = self
            .resolver
            .connect_sentinel(self.config.resolve_timeout())
            .await?;
        Ok(SentinelConnection::new(handle))
    }

    /// Resolves the current master of the default logical master name.
    pub async fn master(&self) -> Result<RedisServer> {
        self.resolver
            .resolve_master(
                self.config.default_master().as_str(),
                self.config.resolve_timeout(),
            )
            .await
    }

    /// Connects to the current master of the default logical master name.
    pub async fn master_connection(&self) -> Result<ConnectionHandle> {
        let name = self.config.default_master().as_str().to_string();
        self.master_connection_for(&name).await
    }

    /// Connects to the current master of `name`.
    ///
    /// Pooled connections to any earlier master of `name` are dropped first,
    /// so a demoted node is never handed out as master.
    pub async fn master_connection_for(&self, name: &str) -> Result<ConnectionHandle> {
        let master = self
            .resolver
            .resolve_master(name, self.config.resolve_timeout())
            .await?;
        self.factory.invalidate_master(name, &master);
        self.factory
            .connect(&master, self.config.client_name(), self.config.connect_timeout())
            .await
    }

    /// Resolves the replicas of the default master.
    pub async fn replicas(&self) -> Result<Vec<RedisServer>> {
        let master = self.master().await?;
        self.resolver
            .resolve_replicas(&master, self.config.resolve_timeout())
            .await
    }

    /// Connects to every available replica of the default master.
    ///
    /// Replicas flagged down or disconnected by the sentinel are skipped.
    /// Connections are opened concurrently; the first failure fails the
    /// call and releases the connections already opened.
    pub async fn replica_connections(&self) -> Result<Vec<ConnectionHandle>> {
        let replicas: Vec<RedisServer> = self
            .replicas()
            .await?
            .into_iter()
            .filter(RedisServer::is_available)
            .collect();
        debug!(count = replicas.len(), "connecting to replicas");

        try_join_all(replicas.iter().map(|replica| {
            self.factory.connect(
                replica,
                self.config.client_name(),
                self.config.connect_timeout(),
            )
        }))
        .await
    }
}

impl SentinelCommands for SentinelClient {
    /// Asks the sentinels in turn, like [`TopologyResolver::masters`].
    async fn masters(&mut self) -> Result<Vec<RedisServer>> {
        self.resolver.masters(self.config.resolve_timeout()).await
    }

    /// Asks the sentinels in turn, like
    /// [`TopologyResolver::resolve_replicas`].
    async fn slaves(&mut self, master: &RedisServer) -> Result<Vec<RedisServer>> {
        self.resolver
            .resolve_replicas(master, self.config.resolve_timeout())
            .await
    }
}
