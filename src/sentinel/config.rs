//! Sentinel client configuration.
//!
//! Everything the resolver and the connection factory need is carried in a
//! [`SentinelConfig`] passed at construction; there is no global state.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sentinel::server::RedisServer;

/// Default port of a sentinel process.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Client name applied to every connection unless configured otherwise.
pub const DEFAULT_CLIENT_NAME: &str = "muxis-sentinel";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_IDLE_PER_NODE: usize = 8;

/// Operator-assigned name of a master/replica group.
///
/// Stable across failovers even as the physical master changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalMasterName(String);

impl LogicalMasterName {
    /// Validates and wraps a master name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an empty or blank name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::configuration("master name must not be empty"));
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalMasterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one sentinel process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SentinelEndpoint {
    host: String,
    port: u16,
}

impl SentinelEndpoint {
    /// Creates an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, or `redis://host:port`.
    ///
    /// The port defaults to [`DEFAULT_SENTINEL_PORT`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the address cannot be parsed.
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{}", address)
        };

        let parsed = url::Url::parse(&with_scheme)
            .map_err(|e| Error::configuration(format!("invalid sentinel address {:?}: {}", address, e)))?;

        if parsed.scheme() != "redis" {
            return Err(Error::configuration(format!(
                "invalid scheme in sentinel address {:?}, expected redis://",
                address
            )));
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::configuration(format!("missing host in sentinel address {:?}", address)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        Ok(Self::new(host, parsed.port().unwrap_or(DEFAULT_SENTINEL_PORT)))
    }

    /// Host name or IP.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The endpoint as a [`RedisServer`] with the sentinel role.
    pub fn to_server(&self) -> RedisServer {
        RedisServer::sentinel(self.host.clone(), self.port)
    }
}

impl fmt::Display for SentinelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Ordered, non-empty list of sentinel endpoints.
///
/// Resolution consults them in this order until one answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelEndpointSet(Vec<SentinelEndpoint>);

impl SentinelEndpointSet {
    /// Builds a set from already parsed endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `endpoints` is empty.
    pub fn new(endpoints: Vec<SentinelEndpoint>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::configuration("at least one sentinel endpoint is required"));
        }
        Ok(Self(endpoints))
    }

    /// Parses a comma-separated list such as `"10.0.0.1:26379,10.0.0.2"`.
    pub fn parse(addresses: &str) -> Result<Self> {
        let endpoints = addresses
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(SentinelEndpoint::parse)
            .collect::<Result<Vec<_>>>()?;
        Self::new(endpoints)
    }

    /// Iterates over the endpoints in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &SentinelEndpoint> {
        self.0.iter()
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Configuration shared by the resolver, the connection factory and the
/// facade.
#[derive(Clone)]
pub struct SentinelConfig {
    masters: Vec<LogicalMasterName>,
    sentinels: SentinelEndpointSet,
    client_name: String,
    username: Option<String>,
    password: Option<String>,
    sentinel_password: Option<String>,
    database: Option<u8>,
    connect_timeout: Duration,
    command_timeout: Duration,
    resolve_timeout: Duration,
    max_idle_per_node: usize,
}

impl SentinelConfig {
    /// Creates a [`SentinelConfigBuilder`].
    pub fn builder() -> SentinelConfigBuilder {
        SentinelConfigBuilder::new()
    }

    /// The master name used when none is given explicitly.
    pub fn default_master(&self) -> &LogicalMasterName {
        // The builder refuses to produce a config without masters.
        &self.masters[0]
    }

    /// All configured logical master names.
    pub fn masters(&self) -> &[LogicalMasterName] {
        &self.masters
    }

    /// Returns true if `name` is one of the configured master names.
    pub fn is_configured(&self, name: &str) -> bool {
        self.masters.iter().any(|m| m.as_str() == name)
    }

    /// The sentinel endpoints.
    pub fn sentinels(&self) -> &SentinelEndpointSet {
        &self.sentinels
    }

    /// Client name applied with `CLIENT SETNAME`.
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// ACL username for data nodes.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password for data nodes.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Password for sentinels, when they use different credentials.
    pub fn sentinel_password(&self) -> Option<&str> {
        self.sentinel_password.as_deref()
    }

    /// Database selected on data node connections.
    pub fn database(&self) -> Option<u8> {
        self.database
    }

    /// Budget for establishing one connection, handshake included.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Budget for one request/reply exchange.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Budget for a whole topology resolution across all sentinels.
    pub fn resolve_timeout(&self) -> Duration {
        self.resolve_timeout
    }

    /// Maximum idle connections pooled per node.
    pub fn max_idle_per_node(&self) -> usize {
        self.max_idle_per_node
    }
}

impl fmt::Debug for SentinelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelConfig")
            .field("masters", &self.masters)
            .field("sentinels", &self.sentinels)
            .field("client_name", &self.client_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field(
                "sentinel_password",
                &self.sentinel_password.as_ref().map(|_| "***"),
            )
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("resolve_timeout", &self.resolve_timeout)
            .field("max_idle_per_node", &self.max_idle_per_node)
            .finish()
    }
}

/// Builder for [`SentinelConfig`].
///
/// # Example
///
/// ```
/// use muxis_sentinel::SentinelConfig;
/// use std::time::Duration;
///
/// let config = SentinelConfig::builder()
///     .master("mymaster")
///     .sentinels("127.0.0.1:26379,127.0.0.1:26380")
///     .client_name("billing-worker")
///     .connect_timeout(Duration::from_millis(500))
///     .build()
///     .unwrap();
/// assert_eq!(config.sentinels().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SentinelConfigBuilder {
    masters: Vec<String>,
    sentinels: Vec<String>,
    client_name: Option<String>,
    username: Option<String>,
    password: Option<String>,
    sentinel_password: Option<String>,
    database: Option<u8>,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    resolve_timeout: Option<Duration>,
    max_idle_per_node: Option<usize>,
}

impl SentinelConfigBuilder {
    /// Creates a new builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a logical master name. The first one added is the default.
    #[inline]
    pub fn master(mut self, name: impl Into<String>) -> Self {
        self.masters.push(name.into());
        self
    }

    /// Adds one sentinel address, or a comma-separated list of them.
    #[inline]
    pub fn sentinels(mut self, addresses: impl Into<String>) -> Self {
        self.sentinels.push(addresses.into());
        self
    }

    /// Sets the client name applied to every connection.
    #[inline]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets the ACL username for data nodes.
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password for data nodes.
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets a separate password for sentinels.
    #[inline]
    pub fn sentinel_password(mut self, password: impl Into<String>) -> Self {
        self.sentinel_password = Some(password.into());
        self
    }

    /// Sets the database selected on data node connections.
    #[inline]
    pub fn database(mut self, database: u8) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the connect timeout (default 2s).
    #[inline]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the per-command timeout (default 2s).
    #[inline]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Sets the budget of a whole topology resolution (default 5s).
    #[inline]
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = Some(timeout);
        self
    }

    /// Sets how many idle connections are kept per node (default 8).
    #[inline]
    pub fn max_idle_per_node(mut self, max: usize) -> Self {
        self.max_idle_per_node = Some(max);
        self
    }

    /// Validates the settings and builds the [`SentinelConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no master name or no sentinel is
    /// given, a master name is blank, an address cannot be parsed, or a
    /// timeout is zero.
    pub fn build(self) -> Result<SentinelConfig> {
        if self.masters.is_empty() {
            return Err(Error::configuration("at least one master name is required"));
        }
        let masters = self
            .masters
            .into_iter()
            .map(LogicalMasterName::new)
            .collect::<Result<Vec<_>>>()?;

        let sentinels = SentinelEndpointSet::parse(&self.sentinels.join(","))?;

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let command_timeout = self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        let resolve_timeout = self.resolve_timeout.unwrap_or(DEFAULT_RESOLVE_TIMEOUT);
        if [connect_timeout, command_timeout, resolve_timeout]
            .iter()
            .any(Duration::is_zero)
        {
            return Err(Error::configuration("timeouts must be greater than zero"));
        }

        Ok(SentinelConfig {
            masters,
            sentinels,
            client_name: self
                .client_name
                .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
            username: self.username,
            password: self.password,
            sentinel_password: self.sentinel_password,
            database: self.database,
            connect_timeout,
            command_timeout,
            resolve_timeout,
            max_idle_per_node: self.max_idle_per_node.unwrap_or(DEFAULT_MAX_IDLE_PER_NODE),
        })
    }
}
