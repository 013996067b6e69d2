//! Connection factory: opens, authenticates and names node connections.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::command::{self, Cmd};
use crate::core::connection::Connection;
use crate::error::{Error, Result};
use crate::normalize::{normalize, normalize_command};
use crate::proto::error::{RawError, RawResult};
use crate::proto::frame::Frame;

use super::config::SentinelConfig;
use super::handle::{ConnectionHandle, TcpConnection};
use super::pool::{ConnectionPool, PoolKey};
use super::server::{RedisServer, Role};

/// Opens connections to resolved nodes and pools them when released.
///
/// Cloning a factory is cheap; clones share one pool.
#[derive(Clone)]
pub struct ConnectionFactory {
    pool: Arc<ConnectionPool<TcpConnection>>,
    username: Option<String>,
    password: Option<String>,
    sentinel_password: Option<String>,
    database: Option<u8>,
    command_timeout: Duration,
}

impl ConnectionFactory {
    /// Creates a factory using the credentials and limits of `config`.
    pub fn new(config: &SentinelConfig) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(config.max_idle_per_node())),
            username: config.username().map(str::to_string),
            password: config.password().map(str::to_string),
            sentinel_password: config.sentinel_password().map(str::to_string),
            database: config.database(),
            command_timeout: config.command_timeout(),
        }
    }

    /// Returns a handle to `server` named `client_name`.
    ///
    /// An idle pooled connection is reused when one exists, renamed if it
    /// carries another name. Otherwise a new connection is opened and
    /// goes through `AUTH` (when credentials are configured), `SELECT` (data
    /// nodes only) and `CLIENT SETNAME`.
    ///
    /// # Arguments
    ///
    /// * `server` - The node to connect to
    /// * `client_name` - Name the server will report for this session
    /// * `timeout` - Bound on the whole call, handshake included
    ///
    /// # Errors
    ///
    /// [`Error::Connectivity`] if the node cannot be reached in time,
    /// [`Error::Configuration`] if the client name is unusable or the node
    /// rejects the credentials.
    pub async fn connect(
        &self,
        server: &RedisServer,
        client_name: &str,
        timeout: Duration,
    ) -> Result<ConnectionHandle> {
        self.connect_with(server, client_name, timeout, true).await
    }

    /// Like [`connect`](Self::connect), but always opens a new socket.
    pub(crate) async fn connect_fresh(
        &self,
        server: &RedisServer,
        client_name: &str,
        timeout: Duration,
    ) -> Result<ConnectionHandle> {
        self.connect_with(server, client_name, timeout, false).await
    }

    async fn connect_with(
        &self,
        server: &RedisServer,
        client_name: &str,
        timeout: Duration,
        use_pool: bool,
    ) -> Result<ConnectionHandle> {
        validate_client_name(client_name)?;

        let work = self.connect_inner(server, client_name, timeout, use_pool);
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                debug!(server = %server, ?timeout, "connect timed out");
                Err(Error::Connectivity {
                    source: RawError::Timeout {
                        operation: "connect",
                        after: timeout,
                    },
                })
            }
        }
    }

    async fn connect_inner(
        &self,
        server: &RedisServer,
        client_name: &str,
        timeout: Duration,
        use_pool: bool,
    ) -> Result<ConnectionHandle> {
        if use_pool {
            if let Some(handle) = self.checkout(server, client_name).await {
                return Ok(handle);
            }
        }

        let mut connection = Connection::connect(&server.address(), timeout)
            .await
            .map_err(normalize)?;
        self.handshake(&mut connection, server, client_name).await?;
        debug!(server = %server, client_name, "connection ready");

        Ok(ConnectionHandle::new(
            connection,
            server.clone(),
            client_name.to_string(),
            Arc::clone(&self.pool),
            self.command_timeout,
        ))
    }

    /// Takes a live idle connection to `server`, discarding any the peer
    /// has closed in the meantime.
    async fn checkout(&self, server: &RedisServer, client_name: &str) -> Option<ConnectionHandle> {
        let key = PoolKey::for_server(server);
        let idle = loop {
            let idle = self.pool.checkout(&key)?;
            if !idle.connection.is_stale() {
                break idle;
            }
            debug!(server = %server, "discarding closed pooled connection");
        };
        let mut handle = ConnectionHandle::new(
            idle.connection,
            server.clone(),
            idle.client_name,
            Arc::clone(&self.pool),
            self.command_timeout,
        )
        .reused();
        if handle.client_name() == client_name {
            debug!(server = %server, "reusing pooled connection");
            return Some(handle);
        }
        match handle.client_setname(client_name).await {
            Ok(()) => {
                debug!(server = %server, client_name, "reusing renamed pooled connection");
                Some(handle)
            }
            Err(e) => {
                debug!(server = %server, error = %e, "discarding pooled connection");
                handle.close();
                None
            }
        }
    }

    async fn handshake(
        &self,
        connection: &mut TcpConnection,
        server: &RedisServer,
        client_name: &str,
    ) -> Result<()> {
        let is_sentinel = server.role() == Some(Role::Sentinel);
        let password = if is_sentinel {
            self.sentinel_password.as_deref()
        } else {
            self.password.as_deref()
        };

        if let Some(password) = password {
            let auth = match (&self.username, is_sentinel) {
                (Some(username), false) => {
                    command::auth_with_username(username.clone(), password.to_string())
                }
                _ => command::auth(password.to_string()),
            };
            self.call(connection, auth).await?;
        }

        if let (Some(db), false) = (self.database, is_sentinel) {
            self.call(connection, command::select(db)).await?;
        }

        self.call(connection, command::client_setname(client_name.to_string()))
            .await
    }

    async fn call(&self, connection: &mut TcpConnection, cmd: Cmd) -> Result<()> {
        let name = cmd.name();
        let result: RawResult<()> = match connection
            .request(&cmd.into_frame(), self.command_timeout)
            .await
        {
            Ok(Frame::Error(e)) => Err(RawError::Server {
                message: String::from_utf8_lossy(&e).into_owned(),
            }),
            Ok(frame) => command::expect_ok(frame),
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            warn!(command = %name, error = %e, "handshake failed");
            normalize_command(&name, e)
        })
    }

    /// Drops idle connections pooled as master of `name` at any address
    /// other than `current`'s.
    ///
    /// Returns how many connections were dropped.
    pub fn invalidate_master(&self, name: &str, current: &RedisServer) -> usize {
        let dropped = self.pool.invalidate_master(name, &current.address());
        if dropped > 0 {
            warn!(master = name, current = %current, dropped, "dropped connections to former master");
        }
        dropped
    }

    /// Drops every idle connection to `server`.
    pub fn invalidate(&self, server: &RedisServer) -> usize {
        self.pool.invalidate_address(&server.address())
    }

    /// Number of idle pooled connections.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("database", &self.database)
            .field("command_timeout", &self.command_timeout)
            .field("idle_connections", &self.pool.idle_count())
            .finish_non_exhaustive()
    }
}

fn validate_client_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::configuration("client name must not be empty"));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::configuration(format!(
            "client name {:?} must not contain spaces",
            name
        )));
    }
    Ok(())
}
