//! Error types for framewire.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Main error type for all framewire operations.
///
/// Errors are `Clone` so the connection can keep the most recent fault in its
/// error slot and hand copies to every caller that asks for it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Protocol error (malformed frame, oversized content, invalid packet).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection is closed and every decoded packet has been drained.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Buffered frames could not be written to the stream.
    #[error("Flush failed: {0}")]
    Flush(Arc<io::Error>),

    /// The outgoing queue is full.
    #[error("Backpressure: outgoing queue is full")]
    Backpressure,

    /// Handler not found for the given operation.
    #[error("Handler not found for operation: {0}")]
    HandlerNotFound(u16),

    /// MsgPack serialization/deserialization error.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid configuration document.
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Kind of the underlying I/O error, if this is `Io` or `Flush`.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(e) | Error::Flush(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Check if this is the orderly end-of-stream sentinel.
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias using framewire's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_kind() {
        let err = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::UnexpectedEof));
        assert_eq!(Error::ConnectionClosed.io_kind(), None);
    }

    #[test]
    fn test_clone_shares_io_error() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        let copy = err.clone();
        assert_eq!(copy.io_kind(), Some(io::ErrorKind::BrokenPipe));
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_is_closed() {
        assert!(Error::ConnectionClosed.is_closed());
        assert!(!Error::Backpressure.is_closed());
    }
}
