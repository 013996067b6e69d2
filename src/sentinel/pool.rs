//! Idle connection pool.
//!
//! Connections are pooled per node address and role. The pool is the only
//! shared mutable structure in the crate; its lock is held just long enough
//! to push or pop, never across an await, so it can also be used from
//! `Drop`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::server::{RedisServer, Role};

/// Pool bucket a connection belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    address: String,
    role: Option<Role>,
    master_name: Option<String>,
}

impl PoolKey {
    /// The bucket for connections to `server`.
    pub(crate) fn for_server(server: &RedisServer) -> Self {
        Self {
            address: server.address(),
            role: server.role(),
            master_name: if server.is_master() {
                server.name().map(str::to_string)
            } else {
                None
            },
        }
    }
}

/// An idle connection and the client name it currently carries.
#[derive(Debug)]
pub(crate) struct IdleConnection<C> {
    pub(crate) connection: C,
    pub(crate) client_name: String,
}

/// Pool of idle connections, bounded per node.
#[derive(Debug)]
pub(crate) struct ConnectionPool<C> {
    max_idle_per_node: usize,
    idle: Mutex<HashMap<PoolKey, Vec<IdleConnection<C>>>>,
}

impl<C> ConnectionPool<C> {
    pub(crate) fn new(max_idle_per_node: usize) -> Self {
        Self {
            max_idle_per_node,
            idle: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PoolKey, Vec<IdleConnection<C>>>> {
        // A panic while holding the lock cannot leave a half-updated Vec.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the most recently returned idle connection for `key`.
    pub(crate) fn checkout(&self, key: &PoolKey) -> Option<IdleConnection<C>> {
        let mut idle = self.lock();
        let bucket = idle.get_mut(key)?;
        let conn = bucket.pop();
        if bucket.is_empty() {
            idle.remove(key);
        }
        conn
    }

    /// Returns a connection to the pool.
    ///
    /// Returns false, dropping the connection, if the bucket is full.
    pub(crate) fn checkin(&self, key: PoolKey, conn: IdleConnection<C>) -> bool {
        let mut idle = self.lock();
        let held = idle.get(&key).map_or(0, Vec::len);
        if held >= self.max_idle_per_node {
            return false;
        }
        idle.entry(key).or_default().push(conn);
        true
    }


    /// Drops idle connections pooled as master of `name` anywhere but at
    /// `current_address`.
    ///
    /// Returns how many connections were dropped.
    pub(crate) fn invalidate_master(&self, name: &str, current_address: &str) -> usize {
        let mut idle = self.lock();
        let stale: Vec<PoolKey> = idle
            .keys()
            .filter(|k| {
                k.role == Some(Role::Master)
                    && k.master_name.as_deref() == Some(name)
                    && k.address != current_address
            })
            .cloned()
            .collect();

        let mut dropped = 0;
        for key in stale {
            if let Some(bucket) = idle.remove(&key) {
                debug!(address = %key.address, master = name, count = bucket.len(), "dropping stale master connections");
                dropped += bucket.len();
            }
        }
        dropped
    }

    /// Drops every idle connection to `address`, whatever its role.
    pub(crate) fn invalidate_address(&self, address: &str) -> usize {
        let mut idle = self.lock();
        let mut dropped = 0;
        idle.retain(|key, bucket| {
            if key.address == address {
                dropped += bucket.len();
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Total number of idle connections.
    pub(crate) fn idle_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }
}
