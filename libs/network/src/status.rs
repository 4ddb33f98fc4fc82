//! Link Status
//!
//! Every connection is in exactly one [`Status`]. Codes below
//! [`ERROR_THRESHOLD`] are normal lifecycle states, codes above it are
//! failures that the connection settles out of on its own.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status codes at or above this value are errors
pub const ERROR_THRESHOLD: u16 = 1000;

/// Connection lifecycle status with stable numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum Status {
    Closed = 0,
    Connecting = 1,
    Connected = 2,
    Ready = 3,
    Inboxing = 4,
    Sending = 5,
    Sent = 6,
    Recving = 7,
    Recved = 8,
    Closing = 9,
    ConnLost = 1001,
    ConnFailed = 1002,
    DisconnFailed = 1003,
    SendFailed = 1004,
    RecvFailed = 1005,
}

impl Status {
    pub const ALL: [Status; 15] = [
        Status::Closed,
        Status::Connecting,
        Status::Connected,
        Status::Ready,
        Status::Inboxing,
        Status::Sending,
        Status::Sent,
        Status::Recving,
        Status::Recved,
        Status::Closing,
        Status::ConnLost,
        Status::ConnFailed,
        Status::DisconnFailed,
        Status::SendFailed,
        Status::RecvFailed,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    pub fn is_ok(self) -> bool {
        self.code() < ERROR_THRESHOLD
    }

    pub fn is_error(self) -> bool {
        !self.is_ok()
    }

    /// At home: the link is closed
    pub fn is_home(self) -> bool {
        self == Status::Closed
    }

    /// Idle: ready to accept a data operation
    pub fn is_idle(self) -> bool {
        self == Status::Ready
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Status::Sending | Status::Recving)
    }

    pub fn is_doing(self) -> bool {
        self.is_busy() || matches!(self, Status::Connecting | Status::Closing)
    }

    /// Completion pulse of an operation, followed by `Ready`
    pub fn is_done(self) -> bool {
        matches!(self, Status::Connected | Status::Sent | Status::Recved)
    }

    pub fn name(self) -> &'static str {
        match self {
            Status::Closed => "closed",
            Status::Connecting => "connecting",
            Status::Connected => "connected",
            Status::Ready => "ready",
            Status::Inboxing => "inboxing",
            Status::Sending => "sending",
            Status::Sent => "sent",
            Status::Recving => "recving",
            Status::Recved => "recved",
            Status::Closing => "closing",
            Status::ConnLost => "conn_lost",
            Status::ConnFailed => "conn_failed",
            Status::DisconnFailed => "disconn_failed",
            Status::SendFailed => "send_failed",
            Status::RecvFailed => "recv_failed",
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Closed
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
