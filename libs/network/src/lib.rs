//! Device Link Infrastructure
//!
//! Transport-agnostic connection handling for the LiDAR device:
//! - [`transports`]: one adapter per medium (TCP, UDP, serial) behind the
//!   [`Transport`] trait
//! - [`Connection`]: the status state machine with deadlines, single
//!   operation locking and a liveness watchdog
//! - [`LinkEvent`]: status, progress and alert stream for observers

pub mod connection;
pub mod error;
pub mod event;
pub mod status;
pub mod time;
pub mod transports;

// Re-export commonly used types
pub use connection::Connection;
pub use error::{Result, TransportError};
pub use event::{LinkEvent, NoProgress, ProgressKind, ProgressSink};
pub use status::{Status, ERROR_THRESHOLD};
pub use time::safe_system_timestamp_ns;
pub use transports::{
    available_serial_ports, LinkTarget, Medium, Transport, TransportDescriptor, TransportFactory,
    TransportOptions,
};

// Constants for configuration
pub const DEFAULT_READ_GAP_MS: u64 = 50;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
