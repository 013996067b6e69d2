//! A fake sentinel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::proto::frame::Frame;
use crate::sentinel::RedisServer;

use super::{upper, wrong_arity, Listener, Responder};

const NO_SUCH_MASTER: &str = "ERR No such master with that name";

/// A master as a [`FakeSentinel`] reports it, with its replicas.
#[derive(Debug, Clone)]
pub struct FakeMaster {
    name: String,
    host: String,
    port: u16,
    quorum: u32,
    replicas: Vec<FakeReplica>,
}

#[derive(Debug, Clone)]
struct FakeReplica {
    host: String,
    port: u16,
    down: bool,
    follows: Option<(String, u16)>,
}

impl FakeMaster {
    /// A master with quorum 2 and no replicas.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            quorum: 2,
            replicas: Vec::new(),
        }
    }

    /// Sets the reported quorum.
    pub fn quorum(mut self, quorum: u32) -> Self {
        self.quorum = quorum;
        self
    }

    /// Adds a healthy replica of this master.
    pub fn replica(mut self, host: impl Into<String>, port: u16) -> Self {
        self.replicas.push(FakeReplica {
            host: host.into(),
            port,
            down: false,
            follows: None,
        });
        self
    }

    /// Adds a replica flagged `s_down`.
    pub fn down_replica(mut self, host: impl Into<String>, port: u16) -> Self {
        self.replicas.push(FakeReplica {
            host: host.into(),
            port,
            down: true,
            follows: None,
        });
        self
    }

    /// Adds a replica listed under this master that reports following
    /// another address.
    pub fn stale_replica(
        mut self,
        host: impl Into<String>,
        port: u16,
        master_host: impl Into<String>,
        master_port: u16,
    ) -> Self {
        self.replicas.push(FakeReplica {
            host: host.into(),
            port,
            down: false,
            follows: Some((master_host.into(), master_port)),
        });
        self
    }

    fn entry(&self) -> Frame {
        fields(&[
            ("name", self.name.clone()),
            ("ip", self.host.clone()),
            ("port", self.port.to_string()),
            ("runid", run_id(self.port)),
            ("flags", "master".to_string()),
            ("num-slaves", self.replicas.len().to_string()),
            ("quorum", self.quorum.to_string()),
        ])
    }

    fn replica_entries(&self) -> Frame {
        Frame::Array(
            self.replicas
                .iter()
                .map(|replica| {
                    let (master_host, master_port) = replica
                        .follows
                        .clone()
                        .unwrap_or_else(|| (self.host.clone(), self.port));
                    let flags = if replica.down { "slave,s_down" } else { "slave" };
                    fields(&[
                        ("name", format!("{}:{}", replica.host, replica.port)),
                        ("ip", replica.host.clone()),
                        ("port", replica.port.to_string()),
                        ("runid", run_id(replica.port)),
                        ("flags", flags.to_string()),
                        ("master-host", master_host),
                        ("master-port", master_port.to_string()),
                    ])
                })
                .collect(),
        )
    }

    /// Promotes the first healthy replica; the old master becomes a replica.
    fn promote(&mut self) -> bool {
        let Some(index) = self
            .replicas
            .iter()
            .position(|r| !r.down && r.follows.is_none())
        else {
            return false;
        };
        let promoted = self.replicas.remove(index);
        let demoted = FakeReplica {
            host: std::mem::replace(&mut self.host, promoted.host),
            port: std::mem::replace(&mut self.port, promoted.port),
            down: false,
            follows: None,
        };
        self.replicas.insert(0, demoted);
        true
    }
}

fn fields(pairs: &[(&str, String)]) -> Frame {
    Frame::Array(
        pairs
            .iter()
            .flat_map(|(k, v)| [Frame::bulk(k.to_string()), Frame::bulk(v.clone())])
            .collect(),
    )
}

fn run_id(port: u16) -> String {
    format!("{:040x}", u64::from(port))
}

#[derive(Debug, Default)]
struct SentinelState {
    masters: Vec<FakeMaster>,
    legacy: bool,
}

#[derive(Debug, Default)]
struct SentinelResponder {
    state: Mutex<SentinelState>,
}

impl SentinelResponder {
    fn lock(&self) -> MutexGuard<'_, SentinelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Responder for SentinelResponder {
    fn knows(&self, command: &str) -> bool {
        command == "SENTINEL"
    }

    fn respond(&self, args: &[Bytes]) -> Frame {
        let Some(sub) = args.get(1).map(|s| upper(s)) else {
            return wrong_arity("sentinel");
        };
        let params: Vec<String> = args[2..]
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        let mut state = self.lock();
        let find = |state: &SentinelState, name: &str| {
            state.masters.iter().position(|m| m.name == name)
        };

        match (sub.as_str(), params.as_slice()) {
            ("GET-MASTER-ADDR-BY-NAME", [name]) => match find(&state, name) {
                Some(i) => {
                    let master = &state.masters[i];
                    Frame::Array(vec![
                        Frame::bulk(master.host.clone()),
                        Frame::bulk(master.port.to_string()),
                    ])
                }
                None => Frame::Null,
            },
            ("MASTERS", []) => Frame::Array(state.masters.iter().map(FakeMaster::entry).collect()),
            ("MASTER", [name]) => match find(&state, name) {
                Some(i) => state.masters[i].entry(),
                None => Frame::error(NO_SUCH_MASTER),
            },
            ("REPLICAS", [_]) if state.legacy => {
                Frame::error("ERR Unknown sentinel subcommand 'replicas'")
            }
            ("REPLICAS" | "SLAVES", [name]) => match find(&state, name) {
                Some(i) => state.masters[i].replica_entries(),
                None => Frame::error(NO_SUCH_MASTER),
            },
            ("FAILOVER", [name]) => match find(&state, name) {
                Some(i) => {
                    if state.masters[i].promote() {
                        Frame::simple("OK")
                    } else {
                        Frame::error("NOGOODSLAVE No suitable replica to promote")
                    }
                }
                None => Frame::error(NO_SUCH_MASTER),
            },
            ("MONITOR", [name, host, port, quorum]) => {
                if find(&state, name).is_some() {
                    return Frame::error("ERR Duplicated master name");
                }
                let (Ok(port), Ok(quorum)) = (port.parse::<u16>(), quorum.parse::<u32>()) else {
                    return Frame::error("ERR Invalid port or quorum");
                };
                state
                    .masters
                    .push(FakeMaster::new(name.clone(), host.clone(), port).quorum(quorum));
                Frame::simple("OK")
            }
            ("REMOVE", [name]) => match find(&state, name) {
                Some(i) => {
                    state.masters.remove(i);
                    Frame::simple("OK")
                }
                None => Frame::error(NO_SUCH_MASTER),
            },
            _ => Frame::error(format!(
                "ERR Unknown sentinel subcommand '{}'",
                sub.to_ascii_lowercase()
            )),
        }
    }
}

/// An in-process sentinel serving a mutable topology.
#[derive(Debug)]
pub struct FakeSentinel {
    listener: Listener,
    responder: Arc<SentinelResponder>,
}

impl FakeSentinel {
    /// Starts a sentinel that monitors nothing yet.
    pub async fn start() -> Self {
        let responder = Arc::new(SentinelResponder::default());
        let listener = Listener::serve(Arc::clone(&responder)).await;
        Self {
            listener,
            responder,
        }
    }

    /// Starts a sentinel that accepts connections and never replies.
    pub async fn unresponsive() -> Self {
        Self {
            listener: Listener::silent().await,
            responder: Arc::new(SentinelResponder::default()),
        }
    }

    /// Starts monitoring `master`.
    pub fn add_master(&self, master: FakeMaster) {
        self.responder.lock().masters.push(master);
    }

    /// Makes the sentinel reject `SENTINEL REPLICAS`, like releases that
    /// only know `SENTINEL SLAVES`.
    pub fn set_legacy(&self, legacy: bool) {
        self.responder.lock().legacy = legacy;
    }

    /// Moves master `name` to `host:port`, as after a failover.
    pub fn failover_to(&self, name: &str, host: impl Into<String>, port: u16) {
        let mut state = self.responder.lock();
        if let Some(master) = state.masters.iter_mut().find(|m| m.name == name) {
            master.host = host.into();
            master.port = port;
        }
    }

    /// Makes the sentinel close each connection right after answering a
    /// `SENTINEL` command, so pooled connections to it go stale.
    pub fn hang_up_after_queries(&self, hang_up: bool) {
        self.listener.set_hang_up_after_query(hang_up);
    }

    /// The port the sentinel listens on.
    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    /// `127.0.0.1:<port>`, suitable for
    /// [`SentinelConfigBuilder::sentinels`](crate::SentinelConfigBuilder::sentinels).
    pub fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    /// This sentinel as a [`RedisServer`].
    pub fn server(&self) -> RedisServer {
        RedisServer::sentinel("127.0.0.1", self.port())
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.listener.connections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(responder: &SentinelResponder, parts: &[&str]) -> Frame {
        let args: Vec<Bytes> = parts.iter().map(|p| Bytes::from(p.to_string())).collect();
        responder.respond(&args)
    }

    #[test]
    fn test_promote_swaps_master_and_first_replica() {
        let mut master = FakeMaster::new("mymaster", "127.0.0.1", 6379)
            .down_replica("127.0.0.1", 6380)
            .replica("127.0.0.1", 6381);
        assert!(master.promote());
        assert_eq!(master.port, 6381);
        assert_eq!(master.replicas[0].port, 6379);
        assert_eq!(master.replicas.len(), 2);
    }

    #[test]
    fn test_unknown_master_replies() {
        let responder = SentinelResponder::default();
        assert_eq!(
            call(&responder, &["SENTINEL", "get-master-addr-by-name", "nosuch"]),
            Frame::Null
        );
        assert!(call(&responder, &["SENTINEL", "replicas", "nosuch"]).is_error());
        assert!(call(&responder, &["SENTINEL", "bogus"]).is_error());
    }
}
