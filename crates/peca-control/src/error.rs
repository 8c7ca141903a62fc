//! Error types for the engine control plane.
//!
//! Every public operation that talks to the engine reports one of four kinds:
//! `TransportIo`, `ProtocolDecode`, `RpcProtocol`, or (for `connect()` only)
//! `EngineNotInstalled`. Low-level I/O and codec errors are folded into these
//! before they leave the crate.

use std::time::Duration;
use thiserror::Error;

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The peer actively refused the connection.
    Refused,
    /// A connect, read, or outer call deadline expired.
    TimedOut,
    /// The remote side closed the link or the engine process died.
    RemoteClosed,
    /// No link is bound to the engine.
    NotConnected,
    /// Any other I/O failure.
    Other,
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportFailure::Refused => "refused",
            TransportFailure::TimedOut => "timed out",
            TransportFailure::RemoteClosed => "remote closed",
            TransportFailure::NotConnected => "not connected",
            TransportFailure::Other => "io",
        };
        f.write_str(s)
    }
}

/// Main error type for the control library.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Engine is not installed: {location}")]
    EngineNotInstalled { location: String },

    #[error("Transport error ({kind}): {message}")]
    TransportIo {
        kind: TransportFailure,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Protocol decode error: {message}")]
    ProtocolDecode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("{message} ({code}, id={id})")]
    RpcProtocol { code: i32, id: i64, message: String },

    #[error("Invalid endpoint {host}:{port}")]
    InvalidEndpoint { host: String, port: u16 },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for control-plane operations.
pub type Result<T> = std::result::Result<T, ControlError>;

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::ConnectionRefused => TransportFailure::Refused,
            ErrorKind::TimedOut => TransportFailure::TimedOut,
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => TransportFailure::RemoteClosed,
            ErrorKind::NotConnected => TransportFailure::NotConnected,
            _ => TransportFailure::Other,
        };
        ControlError::TransportIo {
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        ControlError::ProtocolDecode {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ControlError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportFailure::TimedOut
        } else if err.is_connect() {
            TransportFailure::Refused
        } else {
            TransportFailure::Other
        };
        ControlError::TransportIo {
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl ControlError {
    /// A transport error without an underlying cause.
    pub fn transport(kind: TransportFailure, message: impl Into<String>) -> Self {
        ControlError::TransportIo {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn not_connected() -> Self {
        Self::transport(TransportFailure::NotConnected, "engine not connected")
    }

    pub fn remote_closed() -> Self {
        Self::transport(TransportFailure::RemoteClosed, "engine link closed")
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::transport(
            TransportFailure::TimedOut,
            format!("no reply after {:?}", after),
        )
    }

    /// A decode error without a serde cause.
    pub fn decode(message: impl Into<String>) -> Self {
        ControlError::ProtocolDecode {
            message: message.into(),
            source: None,
        }
    }

    /// The transport failure kind, if this is a transport error.
    pub fn transport_failure(&self) -> Option<TransportFailure> {
        match self {
            ControlError::TransportIo { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Check if retrying the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.transport_failure(),
            Some(TransportFailure::TimedOut | TransportFailure::Refused)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_display() {
        let err = ControlError::RpcProtocol {
            code: -1,
            id: 0,
            message: "io-exception".into(),
        };
        assert_eq!(err.to_string(), "io-exception (-1, id=0)");
    }

    #[test]
    fn test_io_error_kinds_collapse_to_transport() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(
            ControlError::from(refused).transport_failure(),
            Some(TransportFailure::Refused)
        );

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(
            ControlError::from(eof).transport_failure(),
            Some(TransportFailure::RemoteClosed)
        );

        let other = std::io::Error::new(std::io::ErrorKind::Other, "weird");
        assert_eq!(
            ControlError::from(other).transport_failure(),
            Some(TransportFailure::Other)
        );
    }

    #[test]
    fn test_json_error_is_decode() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(
            ControlError::from(err),
            ControlError::ProtocolDecode { .. }
        ));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ControlError::timed_out(Duration::from_secs(1)).is_retryable());
        assert!(!ControlError::remote_closed().is_retryable());
        assert!(!ControlError::decode("bad").is_retryable());
    }
}
