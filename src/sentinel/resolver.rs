//! Topology resolution through the configured sentinels.
//!
//! Every entry point walks the sentinel endpoints in configured order and
//! stops at the first one that gives a usable answer. The walk as a whole is
//! bounded by the caller's timeout. An endpoint that fails is not asked
//! again, except that a pooled connection the sentinel had already closed is
//! replaced by a fresh one once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::core::command;
use crate::error::{Error, ErrorKind, Result};
use crate::normalize::normalize_command;
use crate::proto::error::RawError;
use crate::proto::frame::Frame;

use super::config::SentinelConfig;
use super::factory::ConnectionFactory;
use super::handle::ConnectionHandle;
use super::server::{parse_port, RedisServer, Role};

/// Discovers masters and replicas by asking sentinels.
#[derive(Debug, Clone)]
pub struct TopologyResolver {
    config: Arc<SentinelConfig>,
    factory: ConnectionFactory,
}

impl TopologyResolver {
    /// Creates a resolver that reaches sentinels through `factory`.
    pub fn new(config: Arc<SentinelConfig>, factory: ConnectionFactory) -> Self {
        Self { config, factory }
    }

    /// The configuration this resolver consults.
    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// Finds the current master of the logical master `name`.
    ///
    /// The returned server has role [`Role::Master`] and carries `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `name` is empty or not configured, or if
    ///   every sentinel that answered does not know it
    /// - [`Error::Connectivity`] if no sentinel could be reached or the
    ///   timeout expired
    #[instrument(skip(self))]
    pub async fn resolve_master(&self, name: &str, timeout: Duration) -> Result<RedisServer> {
        self.check_master_name(name)?;

        let master = self
            .ask_sentinels(name, timeout, |mut sentinel| async move {
                query_master_address(&mut sentinel, name).await
            })
            .await?;
        debug!(master = %master, "resolved master");
        Ok(master)
    }

    /// Lists the replicas of `master`.
    ///
    /// Replicas the sentinel reports as following another address than
    /// `master`'s are left out. No order is guaranteed.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `master` has no name, the name is not
    ///   configured, or no sentinel that answered knows it
    /// - [`Error::Connectivity`] if no sentinel could be reached or the
    ///   timeout expired
    #[instrument(skip(self, master), fields(master = %master))]
    pub async fn resolve_replicas(
        &self,
        master: &RedisServer,
        timeout: Duration,
    ) -> Result<Vec<RedisServer>> {
        let name = master
            .name()
            .ok_or_else(|| Error::configuration(format!("master {} has no name", master)))?;
        self.check_master_name(name)?;

        let replicas = self
            .ask_sentinels(name, timeout, |mut sentinel| async move {
                query_replicas(&mut sentinel, name, master).await
            })
            .await?;
        debug!(count = replicas.len(), "resolved replicas");
        Ok(replicas)
    }

    /// Lists every master the first reachable sentinel monitors, in the
    /// order it reports them.
    #[instrument(skip(self))]
    pub async fn masters(&self, timeout: Duration) -> Result<Vec<RedisServer>> {
        self.ask_sentinels("(all)", timeout, |mut sentinel| async move {
            query_masters(&mut sentinel).await.map(Some)
        })
        .await
    }

    /// Opens a connection to the first reachable sentinel.
    #[instrument(skip(self))]
    pub async fn connect_sentinel(&self, timeout: Duration) -> Result<ConnectionHandle> {
        self.ask_sentinels("(any)", timeout, |sentinel| async move { Ok(Some(sentinel)) })
            .await
    }

    fn check_master_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::configuration("master name must not be empty"));
        }
        if !self.config.is_configured(name) {
            return Err(Error::configuration(format!(
                "master '{}' is not configured",
                name
            )));
        }
        Ok(())
    }

    /// Runs `query` against each sentinel in turn until one returns
    /// `Some`.
    ///
    /// `Ok(None)` means the sentinel answered but does not know `master`.
    async fn ask_sentinels<T, F, Fut>(
        &self,
        master: &str,
        timeout: Duration,
        mut query: F,
    ) -> Result<T>
    where
        F: FnMut(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let deadline = Instant::now() + timeout;
        let mut unknown = 0usize;
        let mut last_error = None;

        for endpoint in self.config.sentinels().iter() {
            let sentinel = endpoint.to_server();
            let remaining = deadline.saturating_duration_since(Instant::now());
            debug!(sentinel = %endpoint, ?remaining, "asking sentinel");

            let client_name = self.config.client_name();
            let attempt = async {
                let handle = self
                    .factory
                    .connect(&sentinel, client_name, remaining)
                    .await?;
                if !handle.is_reused() {
                    return query(handle).await;
                }
                match query(handle).await {
                    Err(e) if is_broken_connection(&e) => {
                        debug!(sentinel = %endpoint, error = %e, "pooled sentinel connection was closed, reconnecting");
                        let handle = self
                            .factory
                            .connect_fresh(&sentinel, client_name, remaining)
                            .await?;
                        query(handle).await
                    }
                    other => other,
                }
            };

            match tokio::time::timeout_at(deadline, attempt).await {
                Ok(Ok(Some(answer))) => return Ok(answer),
                Ok(Ok(None)) => {
                    debug!(sentinel = %endpoint, master, "sentinel does not know master");
                    unknown += 1;
                }
                Ok(Err(e)) => {
                    warn!(sentinel = %endpoint, error = %e, "sentinel failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(sentinel = %endpoint, ?timeout, "sentinel resolution timed out");
                    return Err(Error::Connectivity {
                        source: RawError::Timeout {
                            operation: "sentinel resolution",
                            after: timeout,
                        },
                    });
                }
            }
        }

        if unknown > 0 {
            return Err(Error::configuration(format!(
                "no sentinel knows master '{}'",
                master
            )));
        }
        Err(last_error.unwrap_or(Error::Connectivity {
            source: RawError::ConnectionClosed,
        }))
    }
}

/// Asks one sentinel for the address of `name`'s master.
pub(crate) async fn query_master_address(
    sentinel: &mut ConnectionHandle,
    name: &str,
) -> Result<Option<RedisServer>> {
    let reply = sentinel
        .request(command::sentinel_master_addr(name.to_string()))
        .await
        .map_err(|e| normalize_command("SENTINEL", e))?;

    let parsed = match &reply {
        Frame::Null | Frame::BulkString(None) => return Ok(None),
        Frame::Array(items) if items.len() == 2 => match (items[0].as_text(), items[1].as_text()) {
            (Some(host), Some(port)) => parse_port(&port).map(|port| (host, port)),
            _ => Err(RawError::protocol("master address is not text")),
        },
        other => Err(RawError::protocol(format!(
            "expected [ip, port], got {:?}",
            other
        ))),
    };
    let (host, port) = parsed.map_err(|e| normalize_command("SENTINEL", e))?;
    Ok(Some(RedisServer::master(name, host, port)))
}

/// Lists the masters one sentinel monitors.
pub(crate) async fn query_masters(sentinel: &mut ConnectionHandle) -> Result<Vec<RedisServer>> {
    sentinel
        .request(command::sentinel_masters())
        .await
        .and_then(|reply| RedisServer::list_from_frame(&reply, Role::Master))
        .map_err(|e| normalize_command("SENTINEL", e))
}

/// Lists the replicas of `name` as one sentinel reports them, `None` if it
/// does not know `name`.
///
/// Only replicas following `master` are kept; entries the sentinel still
/// lists under another master address are dropped. Sentinels that predate
/// `SENTINEL REPLICAS` are asked with `SENTINEL SLAVES`.
pub(crate) async fn query_replicas(
    sentinel: &mut ConnectionHandle,
    name: &str,
    master: &RedisServer,
) -> Result<Option<Vec<RedisServer>>> {
    let reply = match sentinel
        .request(command::sentinel_replicas(name.to_string()))
        .await
    {
        Err(RawError::Server { message }) if is_unknown_subcommand(&message) => {
            debug!(sentinel = %sentinel.server(), "falling back to SENTINEL SLAVES");
            sentinel
                .request(command::sentinel_slaves(name.to_string()))
                .await
        }
        other => other,
    };

    match reply {
        Ok(frame) => {
            let mut replicas = RedisServer::list_from_frame(&frame, Role::Replica)
                .map_err(|e| normalize_command("SENTINEL", e))?;
            replicas.retain(|replica| follows(replica, master));
            Ok(Some(replicas))
        }
        Err(RawError::Server { message }) if is_unknown_master(&message) => Ok(None),
        Err(e) => Err(normalize_command("SENTINEL", e)),
    }
}

/// Replicas without master metadata are assumed to follow `master`.
fn follows(replica: &RedisServer, master: &RedisServer) -> bool {
    match replica.master_address() {
        Some((host, port)) => host == master.host() && port == master.port(),
        None => true,
    }
}

/// A failure that says the socket was dead rather than the sentinel
/// unhealthy.
fn is_broken_connection(error: &Error) -> bool {
    matches!(
        error.cause(),
        Some(RawError::ConnectionClosed | RawError::Io { .. })
    ) && error.kind() == ErrorKind::Connectivity
}

fn is_unknown_subcommand(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("unknown subcommand") || lower.contains("unknown sentinel subcommand")
}

pub(crate) fn is_unknown_master(message: &str) -> bool {
    message.to_ascii_lowercase().contains("no such master")
}
