//! Normalized error taxonomy.
//!
//! Every public operation fails with exactly one [`Error`] variant. Callers
//! branch on [`Error::kind`]; the wire-level cause stays reachable through
//! [`std::error::Error::source`] for diagnostics.

use thiserror::Error;

use crate::proto::error::RawError;

/// Result type alias for muxis-sentinel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A failure, normalized independently of the wire client that produced it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A node or sentinel could not be reached, timed out, dropped the
    /// connection or spoke invalid protocol. Also used for unrecognised
    /// causes.
    #[error("connectivity error: {source}")]
    Connectivity {
        /// The low-level cause.
        source: RawError,
    },

    /// The server rejected a data operation (bad payload, existing key,
    /// wrong type...).
    #[error("data access error: {source}")]
    DataAccess {
        /// The low-level cause.
        source: RawError,
    },

    /// A script failed to compile, failed at runtime, returned an error
    /// element, or is unknown to the server.
    #[error("scripting error: {source}")]
    Scripting {
        /// The low-level cause.
        source: RawError,
    },

    /// A transaction was misused (`EXEC` without `MULTI`) or carried a
    /// failed command.
    #[error("transaction error: {source}")]
    Transaction {
        /// The low-level cause.
        source: RawError,
    },

    /// The request can never succeed with the current configuration, e.g.
    /// an unknown logical master name.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },
}

/// The kind of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Connectivity`].
    Connectivity,
    /// See [`Error::DataAccess`].
    DataAccess,
    /// See [`Error::Scripting`].
    Scripting,
    /// See [`Error::Transaction`].
    Transaction,
    /// See [`Error::Configuration`].
    Configuration,
}

impl Error {
    /// Creates a [`Error::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity { .. } => ErrorKind::Connectivity,
            Self::DataAccess { .. } => ErrorKind::DataAccess,
            Self::Scripting { .. } => ErrorKind::Scripting,
            Self::Transaction { .. } => ErrorKind::Transaction,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Returns the wire-level cause, if any.
    pub fn cause(&self) -> Option<&RawError> {
        match self {
            Self::Connectivity { source }
            | Self::DataAccess { source }
            | Self::Scripting { source }
            | Self::Transaction { source } => Some(source),
            Self::Configuration { .. } => None,
        }
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Only connectivity failures qualify; retry policy itself belongs to the
    /// caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}
