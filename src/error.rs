//! Error types for the library.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// This enum contains all error messages this library can return. Most API functions will
/// generally return a [`Result<T, ChorusError>`].
///
/// The taxonomy matters more than the payloads: every variant maps to a recovery policy,
/// and none of them may terminate the host process.
///
/// [`Result<T, ChorusError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChorusError {
    /// A malformed wire frame or payload was encountered. The offending frame is discarded
    /// and the stream continues; the connection is never torn down for a decode error.
    Protocol {
        /// Further describes what was malformed.
        context: String,
    },
    /// The peer is gone or an established connection failed mid-operation. The endpoint is
    /// torn down and reconnected; already-appended ledger entries are never lost.
    Connection {
        /// A description of the underlying I/O failure.
        context: String,
    },
    /// A well-formed but unexpected command or message kind arrived for the current mode.
    /// Logged and ignored; the host loop keeps running.
    Application {
        /// What arrived and why it was unexpected.
        context: String,
    },
    /// A recorded ledger line could not be read back. The line is skipped and loudly
    /// logged; availability is prioritized over strict consistency here.
    InvariantViolation {
        /// A description of the corrupt or unreadable entry.
        context: String,
    },
}

impl ChorusError {
    /// Creates a [`ChorusError::Protocol`] with the given context.
    pub fn protocol(context: impl Into<String>) -> Self {
        Self::Protocol {
            context: context.into(),
        }
    }

    /// Creates a [`ChorusError::Connection`] with the given context.
    pub fn connection(context: impl Into<String>) -> Self {
        Self::Connection {
            context: context.into(),
        }
    }

    /// Creates a [`ChorusError::Application`] with the given context.
    pub fn application(context: impl Into<String>) -> Self {
        Self::Application {
            context: context.into(),
        }
    }

    /// Creates a [`ChorusError::InvariantViolation`] with the given context.
    pub fn invariant(context: impl Into<String>) -> Self {
        Self::InvariantViolation {
            context: context.into(),
        }
    }
}

impl Display for ChorusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChorusError::Protocol { context } => {
                write!(f, "Protocol error: {}", context)
            }
            ChorusError::Connection { context } => {
                write!(f, "Connection error: {}", context)
            }
            ChorusError::Application { context } => {
                write!(f, "Application error: {}", context)
            }
            ChorusError::InvariantViolation { context } => {
                write!(f, "Invariant violation: {}", context)
            }
        }
    }
}

impl Error for ChorusError {}

impl From<std::io::Error> for ChorusError {
    fn from(err: std::io::Error) -> Self {
        ChorusError::Connection {
            context: err.to_string(),
        }
    }
}
