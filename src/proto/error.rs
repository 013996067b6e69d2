use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for wire-level operations.
pub type RawResult<T> = std::result::Result<T, RawError>;

/// Failures raised by the wire layer before they are normalized.
///
/// These never leave the crate's public operations directly; they travel as
/// the `source` of a normalized [`crate::Error`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RawError {
    /// An IO error occurred.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A network operation did not finish within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being attempted (e.g. "connect", "command").
        operation: &'static str,
        /// The budget that expired.
        after: Duration,
    },

    /// The peer sent something that is not valid RESP, or not the shape the
    /// command expects.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server replied with an error frame.
    #[error("server error: {message}")]
    Server {
        /// Error message from server, including its code (e.g. `NOSCRIPT ...`).
        message: String,
    },

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// An argument was rejected before anything was sent.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// Decoding failed.
    #[error("decode error: {source}")]
    Decode {
        /// Underlying decode error.
        #[from]
        source: DecodeError,
    },
}

impl RawError {
    /// Creates a [`RawError::Protocol`] from any message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the error code of a server reply (`ERR`, `NOSCRIPT`, `BUSYKEY`...).
    ///
    /// `None` for anything that is not [`RawError::Server`].
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Self::Server { message } => message.split_whitespace().next(),
            _ => None,
        }
    }

    /// Returns true if the connection that produced this error can no longer
    /// be trusted and must not be reused.
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(self, Self::Server { .. } | Self::InvalidArgument { .. })
    }
}

/// Error returned when the input is not valid RESP.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
}

impl DecodeError {
    /// Creates a new decode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_timeout() {
        let error = RawError::Timeout {
            operation: "connect",
            after: Duration::from_millis(250),
        };
        assert_eq!(error.to_string(), "connect timed out after 250ms");
    }

    #[test]
    fn test_error_display_server() {
        let error = RawError::Server {
            message: "ERR wrong type".to_string(),
        };
        assert_eq!(error.to_string(), "server error: ERR wrong type");
    }

    #[test]
    fn test_server_code() {
        let error = RawError::Server {
            message: "NOSCRIPT No matching script. Please use EVAL.".to_string(),
        };
        assert_eq!(error.server_code(), Some("NOSCRIPT"));
        assert_eq!(RawError::ConnectionClosed.server_code(), None);
    }

    #[test]
    fn test_fatal_to_connection() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(RawError::from(io_err).is_fatal_to_connection());
        assert!(RawError::ConnectionClosed.is_fatal_to_connection());
        assert!(RawError::protocol("bad frame").is_fatal_to_connection());
        assert!(!RawError::Server {
            message: "ERR".to_string()
        }
        .is_fatal_to_connection());
    }

    #[test]
    fn test_error_from_decode() {
        let error: RawError = DecodeError::new("unknown frame type: ?").into();
        assert!(matches!(error, RawError::Decode { .. }));
        assert_eq!(error.to_string(), "decode error: unknown frame type: ?");
    }
}
