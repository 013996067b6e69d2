//! A fake data node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::proto::frame::Frame;
use crate::sentinel::RedisServer;

use super::script;
use super::{upper, wrong_arity, Listener, Responder};

const DUMP_PREFIX: &[u8] = b"MUXISDUMP:";

const COMMANDS: &[&str] = &[
    "GET", "SET", "DEL", "EXISTS", "INCR", "LPOP", "EXPIRE", "EVAL", "EVALSHA", "SCRIPT", "DUMP",
    "RESTORE",
];

/// Keyspace and script cache of a [`FakeNode`].
#[derive(Debug, Default)]
pub(super) struct NodeState {
    data: HashMap<Bytes, Bytes>,
    scripts: HashMap<String, String>,
}

/// Runs one data command against `state`.
///
/// Values are plain strings; list commands see every existing key as the
/// wrong type.
pub(super) fn execute(state: &mut NodeState, args: &[Bytes]) -> Frame {
    let name = upper(&args[0]);
    let params = &args[1..];

    match (name.as_str(), params) {
        ("GET", [key]) => match state.data.get(key) {
            Some(value) => Frame::bulk(value.clone()),
            None => Frame::BulkString(None),
        },
        ("SET", [key, value]) => {
            state.data.insert(key.clone(), value.clone());
            Frame::simple("OK")
        }
        ("DEL", keys) if !keys.is_empty() => {
            let removed = keys
                .iter()
                .filter(|key| state.data.remove(*key).is_some())
                .count();
            Frame::Integer(removed as i64)
        }
        ("EXISTS", keys) if !keys.is_empty() => {
            let found = keys.iter().filter(|key| state.data.contains_key(*key)).count();
            Frame::Integer(found as i64)
        }
        ("INCR", [key]) => {
            let current = match state.data.get(key).map(|value| parse_int(value)) {
                Some(Some(n)) => n,
                Some(None) => return Frame::error("ERR value is not an integer or out of range"),
                None => 0,
            };
            let next = current + 1;
            state.data.insert(key.clone(), Bytes::from(next.to_string()));
            Frame::Integer(next)
        }
        ("LPOP", [key]) => {
            if state.data.contains_key(key) {
                Frame::error("WRONGTYPE Operation against a key holding the wrong kind of value")
            } else {
                Frame::BulkString(None)
            }
        }
        ("EXPIRE", [key, seconds]) => {
            if parse_int(seconds).is_none() {
                return Frame::error("ERR value is not an integer or out of range");
            }
            Frame::Integer(i64::from(state.data.contains_key(key)))
        }
        ("EVAL", [source, numkeys, rest @ ..]) => {
            let source = String::from_utf8_lossy(source).into_owned();
            state.scripts.insert(script::script_hash(&source), source.clone());
            run_script(state, &source, numkeys, rest)
        }
        ("EVALSHA", [sha, numkeys, rest @ ..]) => {
            let sha = String::from_utf8_lossy(sha).to_ascii_lowercase();
            match state.scripts.get(&sha).cloned() {
                Some(source) => run_script(state, &source, numkeys, rest),
                None => Frame::error("NOSCRIPT No matching script. Please use EVAL."),
            }
        }
        ("SCRIPT", [sub, source]) if upper(sub) == "LOAD" => {
            let source = String::from_utf8_lossy(source).into_owned();
            let sha = script::script_hash(&source);
            state.scripts.insert(sha.clone(), source);
            Frame::bulk(sha)
        }
        ("DUMP", [key]) => match state.data.get(key) {
            Some(value) => Frame::bulk([DUMP_PREFIX, value.as_ref()].concat()),
            None => Frame::BulkString(None),
        },
        ("RESTORE", [key, ttl, payload, options @ ..]) => {
            let replace = options.iter().any(|o| upper(o) == "REPLACE");
            match parse_int(ttl) {
                Some(ttl) if ttl >= 0 => {}
                _ => return Frame::error("ERR Invalid TTL value, must be >= 0"),
            }
            if !replace && state.data.contains_key(key) {
                return Frame::error("BUSYKEY Target key name already exists.");
            }
            let Some(value) = payload.strip_prefix(DUMP_PREFIX) else {
                return Frame::error("ERR DUMP payload version or checksum are wrong");
            };
            state.data.insert(key.clone(), Bytes::copy_from_slice(value));
            Frame::simple("OK")
        }
        _ => wrong_arity(&name),
    }
}

fn parse_int(value: &[u8]) -> Option<i64> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

fn run_script(state: &mut NodeState, source: &str, numkeys: &Bytes, rest: &[Bytes]) -> Frame {
    let numkeys = match parse_int(numkeys).and_then(|n| usize::try_from(n).ok()) {
        Some(n) if n <= rest.len() => n,
        Some(_) => return Frame::error("ERR Number of keys can't be greater than number of args"),
        None => return Frame::error("ERR value is not an integer or out of range"),
    };
    let (keys, argv) = rest.split_at(numkeys);
    script::eval(state, source, keys, argv)
}

#[derive(Debug, Default)]
struct NodeResponder {
    state: Mutex<NodeState>,
}

impl NodeResponder {
    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Responder for NodeResponder {
    fn knows(&self, command: &str) -> bool {
        COMMANDS.contains(&command)
    }

    fn respond(&self, args: &[Bytes]) -> Frame {
        execute(&mut self.lock(), args)
    }
}

/// An in-process data node with a string keyspace, a toy script engine and
/// transactions.
#[derive(Debug)]
pub struct FakeNode {
    listener: Listener,
    responder: Arc<NodeResponder>,
}

impl FakeNode {
    /// Starts an empty node.
    pub async fn start() -> Self {
        let responder = Arc::new(NodeResponder::default());
        let listener = Listener::serve(Arc::clone(&responder)).await;
        Self {
            listener,
            responder,
        }
    }

    /// The port the node listens on.
    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    /// `127.0.0.1:<port>`.
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }

    /// This node as a [`RedisServer`] without a role.
    pub fn server(&self) -> RedisServer {
        RedisServer::new("127.0.0.1", self.port())
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.listener.connections()
    }

    /// Stops answering requests on every connection, open or future, while
    /// keeping the sockets open.
    pub fn stall(&self) {
        self.listener.set_stalled(true);
    }

    /// Reads a key directly, bypassing the network.
    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.responder.lock().data.get(key.as_bytes()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(state: &mut NodeState, parts: &[&str]) -> Frame {
        let args: Vec<Bytes> = parts.iter().map(|p| Bytes::from(p.to_string())).collect();
        execute(state, &args)
    }

    #[test]
    fn test_dump_restore() {
        let mut state = NodeState::default();
        run(&mut state, &["SET", "foo", "bar"]);
        let Frame::BulkString(Some(payload)) = run(&mut state, &["DUMP", "foo"]) else {
            panic!("DUMP returned no payload");
        };
        let payload = String::from_utf8(payload.to_vec()).unwrap();

        assert_eq!(
            run(&mut state, &["RESTORE", "foo", "0", &payload]),
            Frame::error("BUSYKEY Target key name already exists.")
        );
        assert_eq!(
            run(&mut state, &["RESTORE", "foo", "0", &payload, "REPLACE"]),
            Frame::simple("OK")
        );
        assert!(run(&mut state, &["RESTORE", "other", "0", "garbage"]).is_error());
    }

    #[test]
    fn test_lpop_on_string_is_wrongtype() {
        let mut state = NodeState::default();
        run(&mut state, &["SET", "foo", "bar"]);
        let reply = run(&mut state, &["LPOP", "foo"]);
        assert!(reply.as_text().unwrap().starts_with("WRONGTYPE"));
    }

    #[test]
    fn test_evalsha_unknown() {
        let mut state = NodeState::default();
        let reply = run(&mut state, &["EVALSHA", "somefakesha", "2", "key1", "key2"]);
        assert!(reply.as_text().unwrap().starts_with("NOSCRIPT"));
    }

    #[test]
    fn test_script_load_then_evalsha() {
        let mut state = NodeState::default();
        let Frame::BulkString(Some(sha)) = run(&mut state, &["SCRIPT", "LOAD", "return 7"]) else {
            panic!("SCRIPT LOAD returned no hash");
        };
        assert_eq!(sha.len(), 40);
        let sha = String::from_utf8(sha.to_vec()).unwrap();
        assert_eq!(run(&mut state, &["EVALSHA", &sha, "0"]), Frame::Integer(7));
    }
}
