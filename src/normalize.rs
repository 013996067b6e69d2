//! Translation of wire-level failures into the normalized taxonomy.
//!
//! Redis reports most failures as `-ERR <text>`, so the error code alone is
//! not enough to tell a scripting failure from a misused transaction. The
//! normalizer looks at the code first, then at well-known message texts,
//! and finally at the command that was sent.

use crate::error::Error;
use crate::proto::error::RawError;
use crate::proto::frame::Frame;

/// Broad family of a command, used to classify generic `ERR` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandFamily {
    Scripting,
    Transaction,
    Restore,
    Other,
}

impl CommandFamily {
    fn of(command: &str) -> Self {
        match command.to_ascii_uppercase().as_str() {
            "EVAL" | "EVALSHA" | "EVAL_RO" | "EVALSHA_RO" | "SCRIPT" | "FCALL" | "FCALL_RO"
            | "FUNCTION" => Self::Scripting,
            "MULTI" | "EXEC" | "DISCARD" | "WATCH" | "UNWATCH" => Self::Transaction,
            "RESTORE" | "DUMP" => Self::Restore,
            _ => Self::Other,
        }
    }
}

/// Normalizes a failure that is not tied to a particular command.
///
/// Total over every [`RawError`]: causes it does not recognise become
/// [`Error::Connectivity`].
pub fn normalize(cause: RawError) -> Error {
    classify(CommandFamily::Other, cause)
}

/// Normalizes a failure raised while executing `command`.
///
/// # Arguments
///
/// * `command` - The command name as sent (e.g. `"EVALSHA"`)
/// * `cause` - The wire-level failure
pub fn normalize_command(command: &str, cause: RawError) -> Error {
    classify(CommandFamily::of(command), cause)
}

fn classify(family: CommandFamily, cause: RawError) -> Error {
    match cause {
        RawError::Server { ref message } => match classify_reply(family, message) {
            Kind::Connectivity => Error::Connectivity { source: cause },
            Kind::DataAccess => Error::DataAccess { source: cause },
            Kind::Scripting => Error::Scripting { source: cause },
            Kind::Transaction => Error::Transaction { source: cause },
            Kind::Configuration => Error::Configuration {
                message: message.clone(),
            },
        },
        RawError::InvalidArgument { message } => Error::Configuration { message },
        other => Error::Connectivity { source: other },
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Kind {
    Connectivity,
    DataAccess,
    Scripting,
    Transaction,
    Configuration,
}

fn classify_reply(family: CommandFamily, message: &str) -> Kind {
    let message = message.trim();
    let code = message.split_whitespace().next().unwrap_or_default();

    match code {
        "NOSCRIPT" | "BUSY" | "NOTBUSY" | "UNKILLABLE" => return Kind::Scripting,
        "BUSYKEY" | "WRONGTYPE" => return Kind::DataAccess,
        "EXECABORT" => return Kind::Transaction,
        "NOAUTH" | "WRONGPASS" | "NOPERM" => return Kind::Configuration,
        "LOADING" | "MASTERDOWN" | "READONLY" | "TRYAGAIN" | "CLUSTERDOWN" | "MOVED" | "ASK"
        | "NOREPLICAS" => return Kind::Connectivity,
        _ => {}
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("without multi")
        || lower.contains("calls can not be nested")
        || lower.contains("inside multi")
    {
        return Kind::Transaction;
    }
    if lower.contains("dump payload") {
        return Kind::DataAccess;
    }
    if lower.contains("script") {
        return Kind::Scripting;
    }

    match family {
        CommandFamily::Scripting => Kind::Scripting,
        CommandFamily::Transaction => Kind::Transaction,
        CommandFamily::Restore | CommandFamily::Other => Kind::DataAccess,
    }
}

/// Checks a script result for an embedded error element.
///
/// `EVAL` may succeed at the protocol level and still hand back an error,
/// either as the whole reply or as one element of an array reply.
pub(crate) fn check_script_reply(frame: Frame) -> crate::Result<Frame> {
    match frame.first_error() {
        Some(message) => Err(Error::Scripting {
            source: RawError::Server { message },
        }),
        None => Ok(frame),
    }
}

/// Checks an `EXEC` reply.
///
/// Returns `Ok(None)` when the transaction was aborted by `WATCH`, and a
/// [`Error::Transaction`] when any queued command failed.
pub(crate) fn check_exec_reply(frame: Frame) -> crate::Result<Option<Vec<Frame>>> {
    match frame {
        Frame::Null | Frame::BulkString(None) => Ok(None),
        Frame::Array(items) => {
            let failed = items.iter().find_map(|item| match item {
                Frame::Error(e) => Some(String::from_utf8_lossy(e).into_owned()),
                _ => None,
            });
            match failed {
                Some(message) => Err(Error::Transaction {
                    source: RawError::Server { message },
                }),
                None => Ok(Some(items)),
            }
        }
        Frame::Error(e) => Err(Error::Transaction {
            source: RawError::Server {
                message: String::from_utf8_lossy(&e).into_owned(),
            },
        }),
        other => Err(Error::Connectivity {
            source: RawError::protocol(format!("unexpected EXEC reply: {:?}", other)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io;
    use std::time::Duration;

    fn server(message: &str) -> RawError {
        RawError::Server {
            message: message.to_string(),
        }
    }

    #[test]
    fn test_classification_table() {
        let cases: &[(&str, &str, ErrorKind)] = &[
            ("EVAL", "ERR Error compiling script (new function): user_script:1: '=' expected near 'foo'", ErrorKind::Scripting),
            ("EVAL", "ERR Wrong number of args calling Redis command from script script: 0a1b, on @user_script:1.", ErrorKind::Scripting),
            ("EVAL", "ERR user_script:1: Unknown Redis command called from script", ErrorKind::Scripting),
            ("EVALSHA", "NOSCRIPT No matching script. Please use EVAL.", ErrorKind::Scripting),
            ("EVAL", "ERR unexpected failure", ErrorKind::Scripting),
            ("RESTORE", "ERR DUMP payload version or checksum are wrong", ErrorKind::DataAccess),
            ("RESTORE", "BUSYKEY Target key name already exists.", ErrorKind::DataAccess),
            ("RESTORE", "ERR Invalid TTL value, must be >= 0", ErrorKind::DataAccess),
            ("EXEC", "ERR EXEC without MULTI", ErrorKind::Transaction),
            ("DISCARD", "ERR DISCARD without MULTI", ErrorKind::Transaction),
            ("MULTI", "ERR MULTI calls can not be nested", ErrorKind::Transaction),
            ("WATCH", "ERR WATCH inside MULTI is not allowed", ErrorKind::Transaction),
            ("EXEC", "EXECABORT Transaction discarded because of previous errors.", ErrorKind::Transaction),
            ("GET", "WRONGTYPE Operation against a key holding the wrong kind of value", ErrorKind::DataAccess),
            ("SET", "READONLY You can't write against a read only replica.", ErrorKind::Connectivity),
            ("GET", "LOADING Redis is loading the dataset in memory", ErrorKind::Connectivity),
            ("AUTH", "WRONGPASS invalid username-password pair", ErrorKind::Configuration),
            ("GET", "ERR syntax error", ErrorKind::DataAccess),
        ];

        for (command, message, expected) in cases {
            let error = normalize_command(command, server(message));
            assert_eq!(
                error.kind(),
                *expected,
                "{} replying {:?} should normalize to {:?}",
                command,
                message,
                expected
            );
        }
    }

    #[test]
    fn test_cause_is_preserved() {
        let error = normalize_command("EXEC", server("ERR EXEC without MULTI"));
        match error {
            Error::Transaction {
                source: RawError::Server { message },
            } => assert_eq!(message, "ERR EXEC without MULTI"),
            other => panic!("expected Transaction error, got {:?}", other),
        }
    }

    #[test]
    fn test_transport_failures_are_connectivity() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(normalize(io_err.into()).kind(), ErrorKind::Connectivity);
        assert_eq!(
            normalize(RawError::Timeout {
                operation: "connect",
                after: Duration::from_millis(10),
            })
            .kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            normalize(RawError::ConnectionClosed).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            normalize(RawError::protocol("garbage")).kind(),
            ErrorKind::Connectivity
        );
    }

    #[test]
    fn test_invalid_argument_is_configuration() {
        let error = normalize(RawError::InvalidArgument {
            message: "invalid address format".to_string(),
        });
        assert_eq!(error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_script_reply_with_error_element() {
        let reply = Frame::Array(vec![
            Frame::Integer(1),
            Frame::Integer(2),
            Frame::error("ERR Wrong number of args calling Redis command from script"),
        ]);
        let error = check_script_reply(reply).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Scripting);

        let ok = check_script_reply(Frame::Integer(1)).unwrap();
        assert_eq!(ok, Frame::Integer(1));
    }

    #[test]
    fn test_exec_reply_with_failed_command() {
        let reply = Frame::Array(vec![
            Frame::simple("OK"),
            Frame::error("WRONGTYPE Operation against a key holding the wrong kind of value"),
        ]);
        let error = check_exec_reply(reply).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transaction);
    }

    #[test]
    fn test_exec_reply_aborted_by_watch() {
        assert!(check_exec_reply(Frame::Null).unwrap().is_none());
        let items = check_exec_reply(Frame::Array(vec![Frame::simple("OK")]))
            .unwrap()
            .unwrap();
        assert_eq!(items, vec![Frame::simple("OK")]);
    }
}
