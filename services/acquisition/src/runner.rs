//! Run Driver
//!
//! Repeats acquisition cycles on the caller's behalf: once, or back to back
//! at a fixed pace until told to stop. Degraded cycles are logged and the
//! run continues; a link that ends up closed ends the run.

use crate::cycle::Acquisition;
use crate::samples::PointSink;
use lumos_network::{Connection, LinkEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// How many cycles to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Single,
    /// Start each cycle `interval` after the previous one started, or right
    /// away when the previous one took longer
    Continuous { interval: Duration },
}

/// Tally of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub succeeded: u64,
    pub degraded: u64,
}

/// Drive cycles per `mode` until done, stopped, or the link closes
///
/// `max_cycles` caps a continuous run; `stop` ends it when it turns `true`.
pub async fn run(
    acquisition: &Acquisition,
    mode: RunMode,
    sink: &mut dyn PointSink,
    mut stop: watch::Receiver<bool>,
    max_cycles: Option<u64>,
) -> RunSummary {
    let mut summary = RunSummary::default();
    let connection = Arc::clone(acquisition.connection());

    loop {
        if *stop.borrow() {
            info!("Acquisition stopped");
            break;
        }
        if connection.is_closed() {
            warn!(link = connection.link(), "Link closed, acquisition ends");
            break;
        }

        let started = Instant::now();
        summary.cycles += 1;
        match acquisition.run_cycle(sink).await {
            Ok(report) => {
                summary.succeeded += 1;
                trace!(records = report.records, "Scan delivered");
            }
            Err(_) => summary.degraded += 1,
        }

        let interval = match mode {
            RunMode::Single => break,
            RunMode::Continuous { interval } => interval,
        };
        if max_cycles.is_some_and(|max| summary.cycles >= max) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(started + interval) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    // no sender left to signal a stop
                    tokio::time::sleep_until(started + interval).await;
                }
            }
        }
    }

    debug!(?summary, "Acquisition run finished");
    summary
}

/// Log every link event until the connection is dropped
pub fn spawn_event_logger(connection: &Connection) -> JoinHandle<()> {
    let mut events = connection.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Status { link, status, .. }) => {
                    if status.is_error() {
                        warn!(%link, %status, "Link status");
                    } else {
                        debug!(%link, %status, "Link status");
                    }
                }
                Ok(LinkEvent::Alert { link, code, message }) => {
                    warn!(%link, code, "Link alert: {}", message);
                }
                Ok(LinkEvent::Progress { link, kind, bytes }) => {
                    trace!(%link, ?kind, bytes, "Link progress");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
