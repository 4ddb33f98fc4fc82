//! Transport Error Types
//!
//! Error handling for the device link: descriptor validation, transport
//! I/O failures, deadlines, and misuse of the connection state machine.

use crate::status::Status;
use std::net::SocketAddr;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection management errors
    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed transport descriptor, rejected before it reaches the state machine
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Operation deadline expired
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Operation is not permitted in the current status
    #[error("Invalid state: {operation} not permitted while {status}")]
    InvalidState {
        operation: &'static str,
        status: Status,
    },

    /// Another operation holds the link
    #[error("Link busy: {operation} rejected, another operation is in flight")]
    Busy { operation: &'static str },

    /// `connect` called before a successful `configure`
    #[error("Link not configured: {operation} requires a valid transport descriptor")]
    NotConfigured { operation: &'static str },

    /// Transport accepted fewer bytes than requested
    #[error("Partial write: {written} of {expected} bytes sent")]
    PartialWrite { written: usize, expected: usize },

    /// Receive completed without a single byte
    #[error("No data received within {timeout_ms}ms")]
    NoData { timeout_ms: u64 },

    /// UDP endpoint could not be re-bound after a receive cycle
    #[error("Failed to re-bind local port {port}")]
    Rebind {
        port: u16,
        source: std::io::Error,
    },

    /// Serial port errors
    #[error("Serial error: {message}")]
    Serial {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn invalid_state(operation: &'static str, status: Status) -> Self {
        Self::InvalidState { operation, status }
    }

    pub fn busy(operation: &'static str) -> Self {
        Self::Busy { operation }
    }

    /// Create a serial error with source
    pub fn serial_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serial {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Misuse of the state machine; the link status was not touched
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidState { .. }
                | TransportError::Busy { .. }
                | TransportError::NotConfigured { .. }
        )
    }

    /// Get error category for logs and alerts
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Connection { .. } => "connection",
            TransportError::Configuration { .. } => "configuration",
            TransportError::Timeout { .. } => "timeout",
            TransportError::InvalidState { .. } => "invalid_state",
            TransportError::Busy { .. } => "busy",
            TransportError::NotConfigured { .. } => "not_configured",
            TransportError::PartialWrite { .. } => "partial_write",
            TransportError::NoData { .. } => "no_data",
            TransportError::Rebind { .. } => "rebind",
            TransportError::Serial { .. } => "serial",
            TransportError::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
