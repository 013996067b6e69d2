//! In-process fake sentinels and data nodes for tests.
//!
//! Both fakes speak RESP over a local `TcpListener`, so everything above the
//! socket runs exactly as it would against real servers. Available to this
//! crate's own tests and, with the `test-utils` feature, to downstream
//! integration tests.

mod node;
mod script;
mod sentinel;

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use crate::sentinel::{RedisServer, SentinelCommands};

pub use node::FakeNode;
pub use sentinel::{FakeMaster, FakeSentinel};

/// Returns a local port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind probe listener");
    let port = listener
        .local_addr()
        .expect("probe listener has no address")
        .port();
    drop(listener);
    port
}

/// The topology a [`SentinelCommands`] implementation is expected to report.
#[derive(Debug, Clone)]
pub struct ExpectedTopology {
    master: String,
    replicas: Vec<RedisServer>,
}

impl ExpectedTopology {
    /// One master named `master` with replicas on `127.0.0.1` at each of
    /// `replica_ports`.
    pub fn new(master: impl Into<String>, replica_ports: RangeInclusive<u16>) -> Self {
        Self {
            master: master.into(),
            replicas: replica_ports
                .map(|port| RedisServer::new("127.0.0.1", port))
                .collect(),
        }
    }
}

/// Checks that `subject` reports exactly the `expected` topology.
///
/// # Panics
///
/// Panics on any mismatch or failed query.
pub async fn assert_sentinel_contract<S: SentinelCommands>(
    subject: &mut S,
    expected: &ExpectedTopology,
) {
    let masters = subject.masters().await.expect("masters() failed");
    assert_eq!(masters.len(), 1, "expected one master, got {:?}", masters);
    let master = &masters[0];
    assert_eq!(master.name(), Some(expected.master.as_str()));
    assert!(master.is_master());

    let replicas = subject.slaves(master).await.expect("slaves() failed");
    assert_eq!(
        replicas.len(),
        expected.replicas.len(),
        "unexpected replicas {:?}",
        replicas
    );
    for replica in &expected.replicas {
        assert!(
            replicas.contains(replica),
            "missing replica {} in {:?}",
            replica,
            replicas
        );
    }
}

/// What a fake answers for the commands it implements itself.
trait Responder: Send + Sync + 'static {
    fn knows(&self, command: &str) -> bool;
    fn respond(&self, args: &[Bytes]) -> Frame;
}

/// Per-connection server state.
#[derive(Debug, Default)]
struct Session {
    client_name: Option<String>,
    queued: Option<Vec<Vec<Bytes>>>,
    aborted: bool,
}

/// Misbehaviours a fake can be switched into while running.
#[derive(Debug, Default)]
struct SessionPolicy {
    /// Read requests but never answer them.
    stalled: AtomicBool,
    /// Close the connection after answering a fake-specific command, as a
    /// server enforcing a short client `timeout` would.
    hang_up_after_query: AtomicBool,
}

/// A bound listener whose accept loop dies with it.
#[derive(Debug)]
struct Listener {
    address: SocketAddr,
    connections: Arc<AtomicUsize>,
    policy: Arc<SessionPolicy>,
    task: JoinHandle<()>,
}

impl Listener {
    async fn bind() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake server");
        let address = listener.local_addr().expect("fake server has no address");
        (listener, address)
    }

    async fn serve<R: Responder>(responder: Arc<R>) -> Self {
        let (listener, address) = Self::bind().await;
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);
        let policy = Arc::new(SessionPolicy::default());
        let shared = Arc::clone(&policy);

        let task = tokio::spawn(async move {
            let mut sessions = JoinSet::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                sessions.spawn(run_session(
                    socket,
                    Arc::clone(&responder),
                    Arc::clone(&shared),
                ));
                while sessions.try_join_next().is_some() {}
            }
        });

        Self {
            address,
            connections,
            policy,
            task,
        }
    }

    /// Accepts connections and never answers.
    async fn silent() -> Self {
        let (listener, address) = Self::bind().await;
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        Self {
            address,
            connections,
            policy: Arc::new(SessionPolicy::default()),
            task,
        }
    }

    fn set_stalled(&self, stalled: bool) {
        self.policy.stalled.store(stalled, Ordering::SeqCst);
    }

    fn set_hang_up_after_query(&self, hang_up: bool) {
        self.policy
            .hang_up_after_query
            .store(hang_up, Ordering::SeqCst);
    }

    fn port(&self) -> u16 {
        self.address.port()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_session<R: Responder>(
    mut socket: TcpStream,
    responder: Arc<R>,
    policy: Arc<SessionPolicy>,
) {
    let mut decoder = Decoder::new();
    let mut encoder = Encoder::new();
    let mut session = Session::default();
    let mut buf = [0u8; 4096];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.append(&buf[..n]);

        while let Ok(Some(frame)) = decoder.decode() {
            if policy.stalled.load(Ordering::SeqCst) {
                continue;
            }
            let mut hang_up = false;
            let reply = match command_args(frame) {
                Some(args) => {
                    hang_up = policy.hang_up_after_query.load(Ordering::SeqCst)
                        && responder.knows(&upper(&args[0]));
                    dispatch(&*responder, &mut session, &args)
                }
                None => Frame::error("ERR Protocol error: expected an array of bulk strings"),
            };
            encoder.encode(&reply);
            let data = encoder.take();
            if socket.write_all(&data).await.is_err() || hang_up {
                return;
            }
        }
    }
}

fn command_args(frame: Frame) -> Option<Vec<Bytes>> {
    let Frame::Array(items) = frame else {
        return None;
    };
    let args: Option<Vec<Bytes>> = items
        .into_iter()
        .map(|item| match item {
            Frame::BulkString(Some(b)) => Some(b),
            _ => None,
        })
        .collect();
    args.filter(|args| !args.is_empty())
}

fn upper(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).to_ascii_uppercase()
}

fn unknown_command(name: &str) -> Frame {
    Frame::error(format!(
        "ERR unknown command '{}', with args beginning with: ",
        name.to_ascii_lowercase()
    ))
}

fn wrong_arity(name: &str) -> Frame {
    Frame::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

const CONNECTION_COMMANDS: &[&str] = &["PING", "AUTH", "SELECT", "CLIENT"];

fn dispatch<R: Responder + ?Sized>(responder: &R, session: &mut Session, args: &[Bytes]) -> Frame {
    let name = upper(&args[0]);
    let known = CONNECTION_COMMANDS.contains(&name.as_str()) || responder.knows(&name);

    if let Some(queued) = session.queued.as_mut() {
        if !matches!(name.as_str(), "MULTI" | "EXEC" | "DISCARD" | "WATCH") {
            if !known {
                session.aborted = true;
                return unknown_command(&name);
            }
            queued.push(args.to_vec());
            return Frame::simple("QUEUED");
        }
    }

    match name.as_str() {
        "PING" => Frame::simple("PONG"),
        "AUTH" | "SELECT" if args.len() >= 2 => Frame::simple("OK"),
        "CLIENT" => client_command(session, args),
        "MULTI" => {
            if session.queued.is_some() {
                return Frame::error("ERR MULTI calls can not be nested");
            }
            session.queued = Some(Vec::new());
            session.aborted = false;
            Frame::simple("OK")
        }
        "EXEC" => {
            let Some(commands) = session.queued.take() else {
                return Frame::error("ERR EXEC without MULTI");
            };
            if std::mem::take(&mut session.aborted) {
                return Frame::error(
                    "EXECABORT Transaction discarded because of previous errors.",
                );
            }
            Frame::Array(
                commands
                    .iter()
                    .map(|command| dispatch(responder, session, command))
                    .collect(),
            )
        }
        "DISCARD" => match session.queued.take() {
            None => Frame::error("ERR DISCARD without MULTI"),
            Some(_) => {
                session.aborted = false;
                Frame::simple("OK")
            }
        },
        "WATCH" if session.queued.is_some() => {
            Frame::error("ERR WATCH inside MULTI is not allowed")
        }
        "WATCH" => Frame::simple("OK"),
        _ if responder.knows(&name) => responder.respond(args),
        _ if known => wrong_arity(&name),
        _ => unknown_command(&name),
    }
}

fn client_command(session: &mut Session, args: &[Bytes]) -> Frame {
    let sub = args.get(1).map(|s| upper(s)).unwrap_or_default();
    match (sub.as_str(), args.len()) {
        ("SETNAME", 3) => {
            let name = String::from_utf8_lossy(&args[2]).into_owned();
            if name.contains(' ') {
                return Frame::error(
                    "ERR Client names cannot contain spaces, newlines or special characters.",
                );
            }
            session.client_name = Some(name).filter(|n| !n.is_empty());
            Frame::simple("OK")
        }
        ("GETNAME", 2) => match &session.client_name {
            Some(name) => Frame::bulk(name.clone()),
            None => Frame::BulkString(None),
        },
        _ => Frame::error(format!(
            "ERR unknown subcommand '{}'. Try CLIENT HELP.",
            sub.to_ascii_lowercase()
        )),
    }
}
