use std::time::Duration;

use bytes::Bytes;

use crate::proto::error::{RawError, RawResult};
use crate::proto::frame::Frame;

/// A command ready to be sent to a sentinel or data node.
///
/// # Example
///
/// ```ignore
/// let cmd = Cmd::new("SENTINEL").arg("MASTERS");
/// let frame = cmd.into_frame();
/// ```
#[derive(Debug, Clone)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every item of `args`.
    #[inline]
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns the command name, used to classify failures.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Converts the command to a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b)))
                .collect(),
        )
    }
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a DEL command.
#[inline]
pub fn del(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("DEL").arg(key)
}

/// Creates an EXISTS command.
#[inline]
pub fn exists(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("EXISTS").arg(key)
}

/// Creates an AUTH command with password only.
#[inline]
pub fn auth(password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(password)
}

/// Creates an AUTH command with username and password (ACL style).
#[inline]
pub fn auth_with_username(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(username).arg(password)
}

/// Creates a SELECT command.
#[inline]
pub fn select(db: u8) -> Cmd {
    Cmd::new("SELECT").arg(db.to_string())
}

/// Creates a CLIENT SETNAME command.
#[inline]
pub fn client_setname(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("CLIENT").arg("SETNAME").arg(name)
}

/// Creates a CLIENT GETNAME command.
#[inline]
pub fn client_getname() -> Cmd {
    Cmd::new("CLIENT").arg("GETNAME")
}

/// Creates an EVAL command.
pub fn eval(script: impl Into<Bytes>, keys: &[&str], args: &[&str]) -> Cmd {
    Cmd::new("EVAL")
        .arg(script)
        .arg(keys.len().to_string())
        .args(keys.iter().map(|k| k.to_string()))
        .args(args.iter().map(|a| a.to_string()))
}

/// Creates an EVALSHA command.
pub fn evalsha(sha: impl Into<Bytes>, keys: &[&str], args: &[&str]) -> Cmd {
    Cmd::new("EVALSHA")
        .arg(sha)
        .arg(keys.len().to_string())
        .args(keys.iter().map(|k| k.to_string()))
        .args(args.iter().map(|a| a.to_string()))
}

/// Creates a SCRIPT LOAD command.
#[inline]
pub fn script_load(script: impl Into<Bytes>) -> Cmd {
    Cmd::new("SCRIPT").arg("LOAD").arg(script)
}

/// Creates a DUMP command.
#[inline]
pub fn dump(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("DUMP").arg(key)
}

/// Creates a RESTORE command.
///
/// A zero `ttl` restores the key without expiry.
pub fn restore(key: impl Into<Bytes>, ttl: Duration, payload: Bytes, replace: bool) -> Cmd {
    let cmd = Cmd::new("RESTORE")
        .arg(key)
        .arg(ttl.as_millis().to_string())
        .arg(payload);
    if replace {
        cmd.arg("REPLACE")
    } else {
        cmd
    }
}

/// Creates a MULTI command.
#[inline]
pub fn multi() -> Cmd {
    Cmd::new("MULTI")
}

/// Creates an EXEC command.
#[inline]
pub fn exec() -> Cmd {
    Cmd::new("EXEC")
}

/// Creates a DISCARD command.
#[inline]
pub fn discard() -> Cmd {
    Cmd::new("DISCARD")
}

/// Creates a SENTINEL GET-MASTER-ADDR-BY-NAME command.
#[inline]
pub fn sentinel_master_addr(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("SENTINEL").arg("GET-MASTER-ADDR-BY-NAME").arg(name)
}

/// Creates a SENTINEL MASTERS command.
#[inline]
pub fn sentinel_masters() -> Cmd {
    Cmd::new("SENTINEL").arg("MASTERS")
}

/// Creates a SENTINEL REPLICAS command.
#[inline]
pub fn sentinel_replicas(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("SENTINEL").arg("REPLICAS").arg(name)
}

/// Creates a SENTINEL SLAVES command, the pre-5.0 spelling of REPLICAS.
#[inline]
pub fn sentinel_slaves(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("SENTINEL").arg("SLAVES").arg(name)
}

/// Creates a SENTINEL FAILOVER command.
#[inline]
pub fn sentinel_failover(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("SENTINEL").arg("FAILOVER").arg(name)
}

/// Creates a SENTINEL MONITOR command.
pub fn sentinel_monitor(name: impl Into<Bytes>, host: impl Into<Bytes>, port: u16, quorum: u32) -> Cmd {
    Cmd::new("SENTINEL")
        .arg("MONITOR")
        .arg(name)
        .arg(host)
        .arg(port.to_string())
        .arg(quorum.to_string())
}

/// Creates a SENTINEL REMOVE command.
#[inline]
pub fn sentinel_remove(name: impl Into<Bytes>) -> Cmd {
    Cmd::new("SENTINEL").arg("REMOVE").arg(name)
}

/// Checks that a status reply is `OK` (or any simple string).
pub fn expect_ok(frame: Frame) -> RawResult<()> {
    match frame {
        Frame::SimpleString(_) => Ok(()),
        other => Err(RawError::protocol(format!(
            "expected status reply, got {:?}",
            other
        ))),
    }
}

/// Converts a bulk string reply, mapping null to `None`.
pub fn frame_to_bytes(frame: Frame) -> RawResult<Option<Bytes>> {
    match frame {
        Frame::BulkString(data) => Ok(data),
        Frame::SimpleString(s) => Ok(Some(Bytes::from(s))),
        Frame::Null => Ok(None),
        other => Err(RawError::protocol(format!(
            "expected bulk string reply, got {:?}",
            other
        ))),
    }
}

/// Converts a string reply to UTF-8 text, mapping null to `None`.
pub fn frame_to_string(frame: Frame) -> RawResult<Option<String>> {
    Ok(frame_to_bytes(frame)?.map(|b| String::from_utf8_lossy(&b).into_owned()))
}

/// Converts an integer reply.
pub fn frame_to_int(frame: Frame) -> RawResult<i64> {
    match frame {
        Frame::Integer(n) => Ok(n),
        other => Err(RawError::protocol(format!(
            "expected integer reply, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_name_is_uppercased() {
        assert_eq!(Cmd::new("evalsha").name(), "EVALSHA");
        assert_eq!(sentinel_masters().name(), "SENTINEL");
    }

    #[test]
    fn test_sentinel_master_addr_cmd() {
        assert_eq!(
            sentinel_master_addr("mymaster").into_frame(),
            Frame::Array(vec![
                Frame::bulk("SENTINEL"),
                Frame::bulk("GET-MASTER-ADDR-BY-NAME"),
                Frame::bulk("mymaster"),
            ])
        );
    }

    #[test]
    fn test_sentinel_monitor_cmd() {
        assert_eq!(
            sentinel_monitor("cache", "10.0.0.5", 6379, 2).into_frame(),
            Frame::Array(vec![
                Frame::bulk("SENTINEL"),
                Frame::bulk("MONITOR"),
                Frame::bulk("cache"),
                Frame::bulk("10.0.0.5"),
                Frame::bulk("6379"),
                Frame::bulk("2"),
            ])
        );
    }

    #[test]
    fn test_eval_cmd_counts_keys() {
        assert_eq!(
            eval("return 1", &["key1", "key2"], &["arg"]).into_frame(),
            Frame::Array(vec![
                Frame::bulk("EVAL"),
                Frame::bulk("return 1"),
                Frame::bulk("2"),
                Frame::bulk("key1"),
                Frame::bulk("key2"),
                Frame::bulk("arg"),
            ])
        );
    }

    #[test]
    fn test_restore_cmd_with_replace() {
        let cmd = restore("key", Duration::from_secs(2), Bytes::from("payload"), true);
        assert_eq!(
            cmd.into_frame(),
            Frame::Array(vec![
                Frame::bulk("RESTORE"),
                Frame::bulk("key"),
                Frame::bulk("2000"),
                Frame::bulk("payload"),
                Frame::bulk("REPLACE"),
            ])
        );
    }

    #[test]
    fn test_frame_conversions() {
        assert!(expect_ok(Frame::simple("OK")).is_ok());
        assert!(expect_ok(Frame::Integer(1)).is_err());
        assert_eq!(
            frame_to_string(Frame::bulk("probe-1")).unwrap(),
            Some("probe-1".to_string())
        );
        assert_eq!(frame_to_string(Frame::BulkString(None)).unwrap(), None);
        assert_eq!(frame_to_int(Frame::Integer(3)).unwrap(), 3);
        assert!(frame_to_int(Frame::bulk("3")).is_err());
    }
}
