//! Link Events
//!
//! Observers follow a connection through a broadcast stream of
//! [`LinkEvent`]s. Status events are published in transition order, so a
//! completion status always precedes the `Ready` that follows it.

use crate::status::Status;
use serde::Serialize;

/// Which primitive reported progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Inbox,
    Sending,
    Recving,
}

/// Event published by a [`Connection`](crate::Connection)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Status {
        link: String,
        status: Status,
        timestamp_ns: u64,
    },
    Progress {
        link: String,
        kind: ProgressKind,
        bytes: usize,
    },
    /// Transport-level error report; `code` is the failure status code
    Alert {
        link: String,
        code: u16,
        message: String,
    },
}

impl LinkEvent {
    pub fn link(&self) -> &str {
        match self {
            LinkEvent::Status { link, .. }
            | LinkEvent::Progress { link, .. }
            | LinkEvent::Alert { link, .. } => link,
        }
    }

    /// Status carried by a status event
    pub fn status(&self) -> Option<Status> {
        match self {
            LinkEvent::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Receives progress reports from a transport primitive while it runs
pub trait ProgressSink: Send + Sync {
    fn progress(&self, kind: ProgressKind, bytes: usize);
}

/// Sink that discards every report
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&self, _kind: ProgressKind, _bytes: usize) {}
}
