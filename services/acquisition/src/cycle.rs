//! # Bulk Acquisition Cycle
//!
//! One bounded poll of the device for a scan:
//!
//! 0. drain bytes left over from an earlier cycle
//! 1. send a `GetBulk` request
//! 2. wait for the link to return to `Ready`
//! 3. poll the inbox until the reply is signalled or the attempts run out
//! 4. pick the receive timeout (long when signalled, short otherwise)
//! 5. receive up to the size of a full reply
//! 6. decode the `SetBulk` reply and hand the samples to the sink
//!
//! Any failure marks the sink degraded and is returned as an
//! [`AcquisitionError`]; the cycle itself never retries.

use crate::error::{AcquisitionError, Result};
use crate::samples::{decode_samples, PointSink};
use bytes::{Bytes, BytesMut};
use lumos_codec::{bulk_reply_len, pack, unpack, Command, Frame, ProtocolResult};
use lumos_config::AcquisitionSettings;
use lumos_network::Connection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Timing and request parameters of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSettings {
    pub data_type: u16,
    pub start_address: u16,
    pub word_count: u16,
    pub channels: usize,
    pub send_timeout: Duration,
    pub inbox_attempts: u32,
    pub inbox_wait: Duration,
    pub recv_timeout_signaled: Duration,
    pub recv_timeout_fallback: Duration,
    /// Upper bound on stale-byte drains before the request
    pub drain_stale: u32,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self::from(&AcquisitionSettings::default())
    }
}

impl From<&AcquisitionSettings> for CycleSettings {
    fn from(settings: &AcquisitionSettings) -> Self {
        Self {
            data_type: settings.data_type,
            start_address: settings.start_address,
            word_count: settings.word_count,
            channels: settings.channels,
            send_timeout: Duration::from_millis(settings.send_timeout_ms),
            inbox_attempts: settings.inbox_attempts,
            inbox_wait: Duration::from_millis(settings.inbox_wait_ms),
            recv_timeout_signaled: Duration::from_millis(settings.recv_timeout_signaled_ms),
            recv_timeout_fallback: Duration::from_millis(settings.recv_timeout_fallback_ms),
            drain_stale: settings.drain_stale,
        }
    }
}

/// What a successful cycle produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub bytes_received: usize,
    /// Words in the reply after short-read clamping
    pub word_count: u16,
    pub records: usize,
    pub result: Option<[u8; lumos_codec::RESULT_BLOCK_LEN]>,
    /// The reply was signalled by the inbox before the receive
    pub signaled: bool,
    pub stale_bytes_drained: usize,
    pub elapsed: Duration,
}

/// Bulk scan acquisition over one connection
pub struct Acquisition {
    connection: Arc<Connection>,
    settings: CycleSettings,
    request: Bytes,
}

impl Acquisition {
    pub fn new(connection: Arc<Connection>, settings: CycleSettings) -> ProtocolResult<Self> {
        let request = pack(&Frame::get_bulk(
            settings.data_type,
            settings.start_address,
            settings.word_count,
        ))?;
        Ok(Self {
            connection,
            settings,
            request,
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Bytes a complete reply occupies, without the result block
    pub fn expected_reply_len(&self) -> usize {
        bulk_reply_len(self.settings.word_count)
    }

    /// Run one cycle; failures degrade `sink` and are returned
    pub async fn run_cycle(&self, sink: &mut dyn PointSink) -> Result<CycleReport> {
        let started = Instant::now();
        match self.cycle(sink, started).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(
                    link = self.connection.link(),
                    category = e.category(),
                    "Acquisition cycle degraded: {}",
                    e
                );
                sink.degraded();
                Err(e)
            }
        }
    }

    async fn cycle(&self, sink: &mut dyn PointSink, started: Instant) -> Result<CycleReport> {
        let status = self.connection.status();
        if !status.is_idle() {
            return Err(AcquisitionError::NotReady { status });
        }

        let stale_bytes_drained = self.drain_stale().await;

        self.connection
            .send(self.request.clone(), self.settings.send_timeout)
            .await
            .map_err(AcquisitionError::Send)?;

        // send returns once Ready is published; this only guards a watchdog race
        self.connection
            .wait_for_ready(self.settings.send_timeout)
            .await
            .map_err(AcquisitionError::Send)?;

        let signaled = self.poll_inbox().await?;
        let timeout = if signaled {
            self.settings.recv_timeout_signaled
        } else {
            self.settings.recv_timeout_fallback
        };

        let expected = self.expected_reply_len();
        let reply = self
            .connection
            .recv(BytesMut::with_capacity(expected), timeout, expected)
            .await
            .map_err(AcquisitionError::Receive)?;

        let frame = unpack(&reply)?;
        if frame.command != Command::SetBulk {
            return Err(AcquisitionError::UnexpectedReply {
                command: frame.command,
            });
        }

        let records = decode_samples(&frame.payload, self.settings.channels, sink);
        let report = CycleReport {
            bytes_received: reply.len(),
            word_count: frame.word_count,
            records,
            result: frame.result,
            signaled,
            stale_bytes_drained,
            elapsed: started.elapsed(),
        };
        debug!(
            link = self.connection.link(),
            bytes = report.bytes_received,
            words = report.word_count,
            records,
            signaled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Acquisition cycle complete"
        );
        Ok(report)
    }

    /// Discard bytes a previous cycle left unread
    async fn drain_stale(&self) -> usize {
        let mut drained = 0;
        for _ in 0..self.settings.drain_stale {
            match self.connection.inbox(Duration::ZERO).await {
                Ok(0) | Err(_) => break,
                Ok(waiting) => debug!(waiting, "Draining stale bytes"),
            }
            match self.connection.recv(BytesMut::new(), Duration::ZERO, 0).await {
                Ok(stale) => drained += stale.len(),
                Err(e) => {
                    debug!("Stale drain stopped: {}", e);
                    break;
                }
            }
        }
        if drained > 0 {
            warn!(
                link = self.connection.link(),
                bytes = drained,
                "Discarded stale bytes before request"
            );
        }
        drained
    }

    /// Wait for the reply to be signalled; false when every attempt came up empty
    async fn poll_inbox(&self) -> Result<bool> {
        for attempt in 0..self.settings.inbox_attempts {
            let waiting = self
                .connection
                .inbox(self.settings.inbox_wait)
                .await
                .map_err(AcquisitionError::Inbox)?;
            if waiting > 0 {
                debug!(attempt, waiting, "Reply signalled");
                return Ok(true);
            }
            tokio::task::yield_now().await;
        }
        Ok(false)
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("connection", &self.connection)
            .field("settings", &self.settings)
            .finish()
    }
}
