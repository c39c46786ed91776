//! Our error types for SCPI sessions.

use fugit::MillisDurationU32;
use thiserror::Error;

use crate::{config::ConfigError, response::ReturnKind};

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Custom error type for SCPI instrument communications.
///
/// Generic over the error type of the underlying transport so that no information from the
/// serial driver is lost.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Transport unavailable: {0}")]
    Connection(String),
    #[error("Transport reached end of stream during `{command}`")]
    Disconnected { command: String },
    #[error("Serial communication error during `{command}`: {error:?}")]
    Io { command: String, error: I },
    #[error("Short write during `{command}`: {written} of {expected} bytes")]
    ShortWrite {
        command: String,
        written: usize,
        expected: usize,
    },
    #[error("No response to `{command}` after {} ms", .elapsed.to_millis())]
    Timeout {
        command: String,
        elapsed: MillisDurationU32,
    },
    #[error("Malformed response to `{command}`: {fault}")]
    Protocol { command: String, fault: ProtocolFault },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{quantity} of {value} is outside {min}..={max}")]
    OutOfRange {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ErrorKind {
    Connection,
    Io,
    Timeout,
    Protocol,
    Parse,
    Range,
    Config,
}

impl ErrorKind {
    /// Terminal errors leave the transport in an unknown state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ErrorKind::Connection | ErrorKind::Io)
    }
}

impl<I: embedded_io::Error> Error<I> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) | Error::Disconnected { .. } => ErrorKind::Connection,
            Error::Io { .. } | Error::ShortWrite { .. } => ErrorKind::Io,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::Parse(_) => ErrorKind::Parse,
            Error::OutOfRange { .. } => ErrorKind::Range,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// The caller may retry the same operation after a recoverable error.
    pub fn is_recoverable(&self) -> bool {
        !self.kind().is_terminal()
    }
}

/// What was wrong with the bytes on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFault {
    #[error("byte 0x{byte:02X} at offset {offset} is not ASCII")]
    NonAscii { byte: u8, offset: usize },
    #[error("line exceeds the {capacity} byte receive buffer")]
    Overflow { capacity: usize },
    #[error("command contains a line terminator or non-ASCII text")]
    InvalidCommand,
}

/// A well formed response which does not hold the expected kind of value.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Expected {expected} in response to `{command}`, got {payload:?}")]
pub struct ParseError {
    pub command: String,
    pub payload: String,
    pub expected: ReturnKind,
}

/// Owned summary of the most recent failure on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

impl<I: embedded_io::Error> From<&Error<I>> for LastError {
    fn from(err: &Error<I>) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_serial::MockSerialError;

    #[test]
    fn terminal_kinds() {
        assert!(ErrorKind::Connection.is_terminal());
        assert!(ErrorKind::Io.is_terminal());
        assert!(!ErrorKind::Timeout.is_terminal());
        assert!(!ErrorKind::Protocol.is_terminal());
        assert!(!ErrorKind::Parse.is_terminal());
    }

    #[test]
    fn timeout_message_carries_context() {
        let err: Error<MockSerialError> = Error::Timeout {
            command: "VOUT?".into(),
            elapsed: MillisDurationU32::millis(250),
        };
        let message = err.to_string();
        assert!(message.contains("VOUT?"));
        assert!(message.contains("250"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn last_error_snapshot() {
        let err: Error<MockSerialError> = Error::Io {
            command: "*RST".into(),
            error: MockSerialError::SimulatedError,
        };
        let last = LastError::from(&err);
        assert_eq!(last.kind, ErrorKind::Io);
        assert!(last.message.contains("*RST"));
    }
}
