//! The [`RedisServer`] value type and parsing of sentinel node listings.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::proto::error::{RawError, RawResult};
use crate::proto::frame::Frame;

/// The role a node plays in a sentinel-managed deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The elected master of a logical master name.
    Master,
    /// A replica of some master.
    Replica,
    /// A sentinel process.
    Sentinel,
}

impl Role {
    /// Infers the role from a sentinel `flags` field
    /// (e.g. `"master"`, `"slave,s_down"`).
    fn from_flags(flags: &[String]) -> Option<Self> {
        flags.iter().find_map(|flag| match flag.as_str() {
            "master" => Some(Role::Master),
            "slave" | "replica" => Some(Role::Replica),
            "sentinel" => Some(Role::Sentinel),
            _ => None,
        })
    }
}

/// Identifies one node: host, port, and what the sentinel reported about it.
///
/// Two servers are equal when host and port match; for masters the logical
/// name must match as well. A server built with [`RedisServer::new`] therefore
/// equals the replica a sentinel reports at the same address.
#[derive(Debug, Clone)]
pub struct RedisServer {
    host: String,
    port: u16,
    role: Option<Role>,
    name: Option<String>,
    run_id: Option<String>,
    flags: Vec<String>,
    num_replicas: Option<u32>,
    quorum: Option<u32>,
    master_host: Option<String>,
    master_port: Option<u16>,
}

impl RedisServer {
    /// Creates a server with no role or name.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            role: None,
            name: None,
            run_id: None,
            flags: Vec::new(),
            num_replicas: None,
            quorum: None,
            master_host: None,
            master_port: None,
        }
    }

    /// Creates the master of the logical master `name`.
    pub fn master(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port)
            .with_role(Role::Master)
            .with_name(name)
    }

    /// Creates a replica.
    pub fn replica(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port).with_role(Role::Replica)
    }

    /// Creates a sentinel.
    pub fn sentinel(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port).with_role(Role::Sentinel)
    }

    /// Returns a copy with the given role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Returns a copy with the given name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns a copy with the given quorum, used by `SENTINEL MONITOR`.
    pub fn with_quorum(mut self, quorum: u32) -> Self {
        self.quorum = Some(quorum);
        self
    }

    /// Host name or IP.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, suitable for connecting. IPv6 hosts are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The role, when known.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The logical master name for masters; sentinels name replicas by
    /// their address.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Run id reported by the sentinel.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Flags reported by the sentinel (`master`, `slave`, `s_down`...).
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Number of replicas a master reports.
    pub fn num_replicas(&self) -> Option<u32> {
        self.num_replicas
    }

    /// Quorum configured for a master.
    pub fn quorum(&self) -> Option<u32> {
        self.quorum
    }

    /// Address of the master this replica follows, as the sentinel sees it.
    pub fn master_address(&self) -> Option<(&str, u16)> {
        match (&self.master_host, self.master_port) {
            (Some(host), Some(port)) => Some((host.as_str(), port)),
            _ => None,
        }
    }

    /// Returns true for a master.
    pub fn is_master(&self) -> bool {
        self.role == Some(Role::Master)
    }

    /// Returns true for a replica.
    pub fn is_replica(&self) -> bool {
        self.role == Some(Role::Replica)
    }

    /// Returns false if the sentinel flags the node as down or disconnected.
    pub fn is_available(&self) -> bool {
        !self
            .flags
            .iter()
            .any(|f| matches!(f.as_str(), "s_down" | "o_down" | "disconnected"))
    }

    /// Parses one entry of a `SENTINEL MASTERS` / `SENTINEL REPLICAS` reply.
    ///
    /// Entries are flat arrays of alternating field names and values. The
    /// role is read from the `flags` field, falling back to `default_role`.
    ///
    /// # Errors
    ///
    /// Returns [`RawError::Protocol`] if the entry is not a field/value array
    /// or lacks a usable `ip` or `port`.
    pub fn from_frame(frame: &Frame, default_role: Role) -> RawResult<Self> {
        let Frame::Array(items) = frame else {
            return Err(RawError::protocol(format!(
                "expected a field/value array, got {:?}",
                frame
            )));
        };
        if items.len() % 2 != 0 {
            return Err(RawError::protocol(
                "field/value array has an odd number of elements",
            ));
        }

        let mut host = None;
        let mut port = None;
        let mut name = None;
        let mut server = Self::new(String::new(), 0);

        for pair in items.chunks_exact(2) {
            let (Some(field), Some(value)) = (pair[0].as_text(), pair[1].as_text()) else {
                continue;
            };
            match field.as_str() {
                "ip" => host = Some(value),
                "port" => port = Some(parse_port(&value)?),
                "name" => name = Some(value),
                "runid" if !value.is_empty() => server.run_id = Some(value),
                "flags" => {
                    server.flags = value
                        .split(',')
                        .filter(|f| !f.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "num-slaves" => server.num_replicas = value.parse().ok(),
                "quorum" => server.quorum = value.parse().ok(),
                "master-host" => server.master_host = Some(value),
                "master-port" => server.master_port = value.parse().ok(),
                _ => {}
            }
        }

        server.host = host.ok_or_else(|| RawError::protocol("node entry has no ip"))?;
        server.port = port.ok_or_else(|| RawError::protocol("node entry has no port"))?;
        server.name = name;
        server.role = Some(Role::from_flags(&server.flags).unwrap_or(default_role));
        Ok(server)
    }

    /// Parses a whole node listing.
    ///
    /// Fails as a unit: one malformed entry rejects the listing, so callers
    /// never see a partial result.
    pub fn list_from_frame(frame: &Frame, default_role: Role) -> RawResult<Vec<Self>> {
        match frame {
            Frame::Array(entries) => entries
                .iter()
                .map(|entry| Self::from_frame(entry, default_role))
                .collect(),
            Frame::Null => Ok(Vec::new()),
            other => Err(RawError::protocol(format!(
                "expected an array of nodes, got {:?}",
                other
            ))),
        }
    }

    fn identity(&self) -> (&str, u16, Option<&str>) {
        let name = if self.is_master() {
            self.name.as_deref()
        } else {
            None
        };
        (&self.host, self.port, name)
    }
}

pub(crate) fn parse_port(value: &str) -> RawResult<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| RawError::protocol(format!("invalid port: {}", value)))
}

impl PartialEq for RedisServer {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for RedisServer {}

impl Hash for RedisServer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for RedisServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.is_master()) {
            (Some(name), true) => write!(f, "{}@{}:{}", name, self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn entry(fields: &[(&str, &str)]) -> Frame {
        Frame::Array(
            fields
                .iter()
                .flat_map(|(k, v)| [Frame::bulk(k.to_string()), Frame::bulk(v.to_string())])
                .collect(),
        )
    }

    #[test]
    fn test_parse_master_entry() {
        let frame = entry(&[
            ("name", "mymaster"),
            ("ip", "127.0.0.1"),
            ("port", "6379"),
            ("runid", "6f4c8e9a"),
            ("flags", "master"),
            ("num-slaves", "2"),
            ("quorum", "2"),
        ]);
        let server = RedisServer::from_frame(&frame, Role::Master).unwrap();
        assert_eq!(server.name(), Some("mymaster"));
        assert_eq!(server.address(), "127.0.0.1:6379");
        assert_eq!(server.role(), Some(Role::Master));
        assert_eq!(server.num_replicas(), Some(2));
        assert_eq!(server.quorum(), Some(2));
        assert_eq!(server.run_id(), Some("6f4c8e9a"));
        assert!(server.is_available());
    }

    #[test]
    fn test_parse_replica_entry() {
        let frame = entry(&[
            ("name", "127.0.0.1:6380"),
            ("ip", "127.0.0.1"),
            ("port", "6380"),
            ("flags", "slave,s_down"),
            ("master-host", "127.0.0.1"),
            ("master-port", "6379"),
        ]);
        let server = RedisServer::from_frame(&frame, Role::Replica).unwrap();
        assert!(server.is_replica());
        assert!(!server.is_available());
        assert_eq!(server.master_address(), Some(("127.0.0.1", 6379)));
    }

    #[test]
    fn test_parse_entry_missing_port() {
        let frame = entry(&[("name", "mymaster"), ("ip", "127.0.0.1")]);
        assert!(RedisServer::from_frame(&frame, Role::Master).is_err());
    }

    #[test]
    fn test_list_fails_as_a_unit() {
        let frame = Frame::Array(vec![
            entry(&[("ip", "127.0.0.1"), ("port", "6380")]),
            entry(&[("ip", "127.0.0.1"), ("port", "not-a-port")]),
        ]);
        assert!(RedisServer::list_from_frame(&frame, Role::Replica).is_err());
    }

    #[test]
    fn test_empty_listing() {
        let servers = RedisServer::list_from_frame(&Frame::Array(vec![]), Role::Replica).unwrap();
        assert!(servers.is_empty());
    }

    #[test]
    fn test_replica_equals_plain_address() {
        let frame = entry(&[
            ("name", "127.0.0.1:6380"),
            ("ip", "127.0.0.1"),
            ("port", "6380"),
            ("flags", "slave"),
        ]);
        let parsed = RedisServer::from_frame(&frame, Role::Replica).unwrap();
        assert_eq!(parsed, RedisServer::new("127.0.0.1", 6380));

        let set: HashSet<_> = [parsed].into_iter().collect();
        assert!(set.contains(&RedisServer::new("127.0.0.1", 6380)));
    }

    #[test]
    fn test_master_equality_includes_name() {
        let a = RedisServer::master("cache", "10.0.0.1", 6379);
        let b = RedisServer::master("sessions", "10.0.0.1", 6379);
        assert_ne!(a, b);
        assert_eq!(a, RedisServer::master("cache", "10.0.0.1", 6379));
        assert_eq!(a.to_string(), "cache@10.0.0.1:6379");
    }

    #[test]
    fn test_ipv6_address_is_bracketed() {
        assert_eq!(RedisServer::replica("::1", 6380).address(), "[::1]:6380");
    }
}
