//! Communication error types

use std::io;
use thiserror::Error;

/// Failures reported by device links and output sinks
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommError {
    /// The link or sink has not been started/opened
    #[error("{link} is not connected")]
    NotConnected { link: String },
    /// The peer did not take the data in time
    #[error("communication timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u32 },
    /// Transport-level failure (port, socket)
    #[error("I/O error during {operation}: {details}")]
    Io { operation: String, details: String },
}

/// Result type for communication operations
pub type CommResult<T> = Result<T, CommError>;

impl CommError {
    /// Wrap an I/O error raised while performing `operation`
    pub fn io(operation: impl Into<String>, err: &io::Error) -> Self {
        CommError::Io {
            operation: operation.into(),
            details: err.to_string(),
        }
    }

    /// Like [`CommError::io`], but a timed out operation becomes
    /// [`CommError::Timeout`]
    pub fn io_with_timeout(operation: impl Into<String>, err: &io::Error, timeout_ms: u32) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => CommError::Timeout { timeout_ms },
            _ => CommError::io(operation, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let missing = CommError::NotConnected {
            link: "udp 127.0.0.1:28128".to_string(),
        };
        assert_eq!(missing.to_string(), "udp 127.0.0.1:28128 is not connected");
        assert_eq!(
            CommError::Timeout { timeout_ms: 100 }.to_string(),
            "communication timeout after 100ms"
        );
    }

    #[test]
    fn test_io_display() {
        let err = CommError::io("send", &io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_string(), "I/O error during send: boom");
    }

    #[test]
    fn test_timed_out_write() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "port stalled");
        assert_eq!(
            CommError::io_with_timeout("write", &timed_out, 100),
            CommError::Timeout { timeout_ms: 100 }
        );

        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(
            CommError::io_with_timeout("write", &broken, 100),
            CommError::Io { .. }
        ));
    }
}
