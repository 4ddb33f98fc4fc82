//! Acquisition Error Types

use lumos_codec::{Command, ProtocolError};
use lumos_network::{Status, TransportError};
use thiserror::Error;

/// Why a read cycle produced no scan
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// The link was not idle when the cycle started
    #[error("Link not ready for acquisition (status: {status})")]
    NotReady { status: Status },

    #[error("Bulk request failed: {0}")]
    Send(#[source] TransportError),

    #[error("Inbox check failed: {0}")]
    Inbox(#[source] TransportError),

    #[error("Bulk reply not received: {0}")]
    Receive(#[source] TransportError),

    #[error("Bulk reply malformed: {0}")]
    Decode(#[from] ProtocolError),

    /// Decoded frame was not a bulk reply
    #[error("Expected a SetBulk reply, got {command}")]
    UnexpectedReply { command: Command },
}

/// Result type alias for acquisition operations
pub type Result<T> = std::result::Result<T, AcquisitionError>;

impl AcquisitionError {
    /// Underlying link error, if the failure came from the transport
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            AcquisitionError::Send(e)
            | AcquisitionError::Inbox(e)
            | AcquisitionError::Receive(e) => Some(e),
            _ => None,
        }
    }

    /// The device did not answer in time
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.transport(),
            Some(TransportError::Timeout { .. } | TransportError::NoData { .. })
        )
    }

    /// Get error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            AcquisitionError::NotReady { .. } => "not_ready",
            AcquisitionError::Send(_) => "send",
            AcquisitionError::Inbox(_) => "inbox",
            AcquisitionError::Receive(_) => "receive",
            AcquisitionError::Decode(_) => "decode",
            AcquisitionError::UnexpectedReply { .. } => "unexpected_reply",
        }
    }
}
