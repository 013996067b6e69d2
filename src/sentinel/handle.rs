//! Exclusively owned connection handles.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::debug;

use crate::core::command::{self, Cmd};
use crate::core::connection::Connection;
use crate::error::{Error, Result};
use crate::normalize::{check_exec_reply, check_script_reply, normalize_command};
use crate::proto::error::{RawError, RawResult};
use crate::proto::frame::Frame;

use super::pool::{ConnectionPool, IdleConnection, PoolKey};
use super::server::RedisServer;

pub(crate) type TcpConnection = Connection<TcpStream>;

/// A live session to one node, owned by exactly one holder.
///
/// The handle carries the client name assigned when it was handed out.
/// Dropping it releases the session: it goes back to the pool when it is
/// still trustworthy, and is closed otherwise (after a connectivity failure,
/// inside an unfinished `MULTI`, or after [`close`](Self::close)).
///
/// While a transaction is open, helpers that decode a value (`get`, `del`,
/// `exists`, `dump`, the script calls) fail with
/// [`Error::Transaction`] without sending anything; status commands such as
/// [`set`](Self::set) are queued normally.
pub struct ConnectionHandle {
    connection: Option<TcpConnection>,
    server: RedisServer,
    client_name: String,
    key: PoolKey,
    pool: Arc<ConnectionPool<TcpConnection>>,
    command_timeout: Duration,
    reusable: bool,
    in_multi: bool,
    reused: bool,
}

impl ConnectionHandle {
    pub(crate) fn new(
        connection: TcpConnection,
        server: RedisServer,
        client_name: String,
        pool: Arc<ConnectionPool<TcpConnection>>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            connection: Some(connection),
            key: PoolKey::for_server(&server),
            server,
            client_name,
            pool,
            command_timeout,
            reusable: true,
            in_multi: false,
            reused: false,
        }
    }

    /// Marks a handle built around a connection taken from the pool.
    pub(crate) fn reused(mut self) -> Self {
        self.reused = true;
        self
    }

    /// Returns true if the connection came from the pool rather than a
    /// fresh connect.
    pub(crate) fn is_reused(&self) -> bool {
        self.reused
    }

    /// The node this handle is connected to.
    pub fn server(&self) -> &RedisServer {
        &self.server
    }

    /// The client name assigned when the handle was handed out.
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Returns true until the handle is closed or its session breaks.
    pub fn is_open(&self) -> bool {
        self.connection.is_some() && self.reusable
    }

    /// Returns true between [`multi`](Self::multi) and
    /// [`exec`](Self::exec)/[`discard`](Self::discard).
    pub fn in_transaction(&self) -> bool {
        self.in_multi
    }

    /// Sends `cmd` and returns the raw reply, turning error frames into
    /// [`RawError::Server`].
    ///
    /// A failure that leaves the session in an unknown state marks the
    /// handle as not reusable. So does dropping the returned future before
    /// the reply arrives.
    pub(crate) async fn request(&mut self, cmd: Cmd) -> RawResult<Frame> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(RawError::ConnectionClosed);
        };
        if !self.reusable {
            return Err(RawError::ConnectionClosed);
        }

        self.reusable = false;
        let reply = connection
            .request(&cmd.into_frame(), self.command_timeout)
            .await;
        match reply {
            Ok(Frame::Error(e)) => {
                self.reusable = true;
                Err(RawError::Server {
                    message: String::from_utf8_lossy(&e).into_owned(),
                })
            }
            Ok(frame) => {
                self.reusable = true;
                Ok(frame)
            }
            Err(e) => {
                self.reusable = !e.is_fatal_to_connection();
                Err(e)
            }
        }
    }

    /// Executes an arbitrary command, normalizing any failure.
    pub async fn execute(&mut self, cmd: Cmd) -> Result<Frame> {
        let name = cmd.name();
        self.request(cmd)
            .await
            .map_err(|e| normalize_command(&name, e))
    }

    async fn execute_with<T>(
        &mut self,
        cmd: Cmd,
        convert: impl FnOnce(Frame) -> RawResult<T>,
    ) -> Result<T> {
        let name = cmd.name();
        let raw = match self.request(cmd).await {
            Ok(frame) => convert(frame),
            Err(e) => Err(e),
        };
        raw.map_err(|e| normalize_command(&name, e))
    }

    /// Fails readers whose reply would be `QUEUED` while a transaction is
    /// open. Queue such commands with [`execute`](Self::execute) instead.
    fn reject_in_multi(&self, command: &str) -> Result<()> {
        if !self.in_multi {
            return Ok(());
        }
        Err(Error::Transaction {
            source: RawError::InvalidArgument {
                message: format!(
                    "{} cannot be used inside MULTI; queue it with execute",
                    command
                ),
            },
        })
    }

    /// Sends `PING`.
    pub async fn ping(&mut self) -> Result<()> {
        self.execute_with(command::ping(), command::expect_ok).await
    }

    /// Returns the name the server associates with this session.
    ///
    /// This is the identity introspection used by monitoring tools; after
    /// the factory hands out a handle it returns exactly
    /// [`client_name`](Self::client_name).
    pub async fn client_getname(&mut self) -> Result<Option<String>> {
        self.reject_in_multi("CLIENT GETNAME")?;
        self.execute_with(command::client_getname(), command::frame_to_string)
            .await
    }

    /// Renames this session.
    pub async fn client_setname(&mut self, name: &str) -> Result<()> {
        self.reject_in_multi("CLIENT SETNAME")?;
        self.execute_with(command::client_setname(name.to_string()), command::expect_ok)
            .await?;
        self.client_name = name.to_string();
        Ok(())
    }

    /// Gets the value of `key`.
    pub async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        self.reject_in_multi("GET")?;
        self.execute_with(command::get(key.to_string()), command::frame_to_bytes)
            .await
    }

    /// Sets `key` to `value`.
    pub async fn set(&mut self, key: &str, value: impl Into<Bytes>) -> Result<()> {
        self.execute_with(command::set(key.to_string(), value), command::expect_ok)
            .await
    }

    /// Deletes `key`, returning true if it existed.
    pub async fn del(&mut self, key: &str) -> Result<bool> {
        self.reject_in_multi("DEL")?;
        let n = self
            .execute_with(command::del(key.to_string()), command::frame_to_int)
            .await?;
        Ok(n > 0)
    }

    /// Returns true if `key` exists.
    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        self.reject_in_multi("EXISTS")?;
        let n = self
            .execute_with(command::exists(key.to_string()), command::frame_to_int)
            .await?;
        Ok(n > 0)
    }

    /// Runs a Lua script with `EVAL`.
    ///
    /// Compile errors, runtime errors and result arrays holding an error
    /// element all fail with [`crate::Error::Scripting`].
    pub async fn eval(&mut self, script: &str, keys: &[&str], args: &[&str]) -> Result<Frame> {
        self.reject_in_multi("EVAL")?;
        let frame = self
            .execute(command::eval(script.to_string(), keys, args))
            .await?;
        check_script_reply(frame)
    }

    /// Runs a cached script with `EVALSHA`.
    ///
    /// An unknown hash fails with [`crate::Error::Scripting`].
    pub async fn evalsha(&mut self, sha: &str, keys: &[&str], args: &[&str]) -> Result<Frame> {
        self.reject_in_multi("EVALSHA")?;
        let frame = self
            .execute(command::evalsha(sha.to_string(), keys, args))
            .await?;
        check_script_reply(frame)
    }

    /// Loads a script into the script cache, returning its SHA1.
    pub async fn script_load(&mut self, script: &str) -> Result<String> {
        self.reject_in_multi("SCRIPT LOAD")?;
        self.execute_with(command::script_load(script.to_string()), |frame| {
            command::frame_to_string(frame)?
                .ok_or_else(|| RawError::protocol("SCRIPT LOAD returned null"))
        })
        .await
    }

    /// Serializes the value at `key`, `None` if it does not exist.
    pub async fn dump(&mut self, key: &str) -> Result<Option<Bytes>> {
        self.reject_in_multi("DUMP")?;
        self.execute_with(command::dump(key.to_string()), command::frame_to_bytes)
            .await
    }

    /// Restores a value produced by [`dump`](Self::dump).
    ///
    /// Restoring into an existing key without `replace`, or restoring a
    /// corrupt payload, fails with [`crate::Error::DataAccess`].
    pub async fn restore(
        &mut self,
        key: &str,
        ttl: Duration,
        payload: Bytes,
        replace: bool,
    ) -> Result<()> {
        self.execute_with(
            command::restore(key.to_string(), ttl, payload, replace),
            command::expect_ok,
        )
        .await
    }

    /// Starts a transaction. Later commands are queued until
    /// [`exec`](Self::exec).
    pub async fn multi(&mut self) -> Result<()> {
        self.execute_with(command::multi(), command::expect_ok).await?;
        self.in_multi = true;
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// Returns `None` if a watched key changed. `EXEC` without `MULTI`, a
    /// transaction discarded because of a queuing error, and a transaction
    /// in which any command failed all yield [`crate::Error::Transaction`].
    pub async fn exec(&mut self) -> Result<Option<Vec<Frame>>> {
        let result = self.execute(command::exec()).await;
        self.in_multi = false;
        check_exec_reply(result?)
    }

    /// Aborts the transaction.
    pub async fn discard(&mut self) -> Result<()> {
        let result = self
            .execute_with(command::discard(), command::expect_ok)
            .await;
        self.in_multi = false;
        result
    }

    /// Closes the session instead of returning it to the pool.
    pub fn close(mut self) {
        self.reusable = false;
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if !self.reusable || self.in_multi {
            debug!(server = %self.server, "closing connection");
            return;
        }
        let idle = IdleConnection {
            connection,
            client_name: std::mem::take(&mut self.client_name),
        };
        if !self.pool.checkin(self.key.clone(), idle) {
            debug!(server = %self.server, "pool full, closing connection");
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("server", &self.server)
            .field("client_name", &self.client_name)
            .field("reusable", &self.reusable)
            .field("in_multi", &self.in_multi)
            .finish()
    }
}
