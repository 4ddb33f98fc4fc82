//! Connection State Machine
//!
//! A [`Connection`] owns one transport adapter and drives it through the
//! link lifecycle:
//!
//! ```text
//! Closed → Connecting → Connected → Ready ⇄ {Inboxing, Sending → Sent, Recving → Recved}
//!   ↑                                 │
//!   └──────────── Closing ←───────────┘
//! ```
//!
//! - One operation at a time: a second caller is rejected with
//!   [`TransportError::Busy`], never queued, and a call from the wrong
//!   status fails with [`TransportError::InvalidState`] without touching
//!   the status.
//! - Every operation runs under a re-armable deadline. Transport progress
//!   pushes the deadline out again; on expiry the in-flight primitive is
//!   dropped and the matching `*Failed` status is published.
//! - After any failure status the link settles straight away: a live link
//!   returns to `Ready`, a dead one goes through `ConnLost` to `Closed`.
//! - Status events are published while the state lock is held, so
//!   subscribers see transitions in the order they happened.

use crate::event::{LinkEvent, ProgressKind, ProgressSink};
use crate::status::Status;
use crate::time::{millis, safe_system_timestamp_ns};
use crate::transports::{Transport, TransportDescriptor, TransportFactory, TransportOptions};
use crate::{Result, TransportError, DEFAULT_EVENT_CAPACITY};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Longest an operation waits for a watchdog probe to release the link
const PROBE_WAIT: Duration = Duration::from_millis(20);

/// Mutable link bookkeeping, guarded by a short non-async lock
#[derive(Debug, Default)]
struct LinkState {
    status: Status,
    configured: bool,
    connected: bool,
    close_requested: bool,
    /// Set only while the watchdog holds the operation lock
    probing: bool,
    bytes_sent: usize,
    bytes_recv: usize,
    bytes_inbox: usize,
    /// Armed operation deadline and the timeout that re-arms it
    deadline: Option<Instant>,
    rearm: Option<Duration>,
    watchdog_interval: Option<Duration>,
}

struct Shared {
    link: String,
    state: Mutex<LinkState>,
    /// Advisory operation lock; holders may drive the transport
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    events: broadcast::Sender<LinkEvent>,
}

impl Shared {
    fn status(&self) -> Status {
        self.state.lock().status
    }

    /// Publish a status change; repeated statuses are not re-published
    fn set_status(&self, status: Status) {
        let mut state = self.state.lock();
        self.transition(&mut state, status);
    }

    fn transition(&self, state: &mut LinkState, status: Status) {
        if state.status == status {
            return;
        }
        debug!(link = %self.link, from = %state.status, to = %status, "Link status");
        state.status = status;
        let _ = self.events.send(LinkEvent::Status {
            link: self.link.clone(),
            status,
            timestamp_ns: safe_system_timestamp_ns(),
        });
    }

    fn progress(&self, kind: ProgressKind, bytes: usize) {
        let _ = self.events.send(LinkEvent::Progress {
            link: self.link.clone(),
            kind,
            bytes,
        });
    }

    fn alert(&self, code: u16, message: String) {
        warn!(link = %self.link, code, "{}", message);
        let _ = self.events.send(LinkEvent::Alert {
            link: self.link.clone(),
            code,
            message,
        });
    }

    fn arm(&self, timeout: Duration) {
        let mut state = self.state.lock();
        state.deadline = Some(Instant::now() + timeout);
        state.rearm = Some(timeout);
    }

    fn disarm(&self) {
        let mut state = self.state.lock();
        state.deadline = None;
        state.rearm = None;
    }

    fn deadline(&self) -> Option<Instant> {
        self.state.lock().deadline
    }

    /// Reconcile the status with what the transport reports
    fn settle(&self, alive: bool) {
        let mut state = self.state.lock();
        if state.close_requested {
            state.connected = false;
            self.transition(&mut state, Status::Closed);
        } else if alive && !state.connected {
            state.connected = true;
            self.transition(&mut state, Status::Connected);
            self.transition(&mut state, Status::Ready);
        } else if alive {
            self.transition(&mut state, Status::Ready);
        } else if state.connected {
            state.connected = false;
            self.transition(&mut state, Status::ConnLost);
            self.transition(&mut state, Status::Closed);
        } else {
            self.transition(&mut state, Status::Closed);
        }
    }

    /// One watchdog pass: probe liveness while the link sits idle
    fn watchdog_tick(&self) {
        if !self.status().is_idle() {
            return;
        }
        let Ok(transport) = self.transport.try_lock() else {
            return;
        };
        self.state.lock().probing = true;

        let alive = transport.is_alive();
        if !alive {
            info!(link = %self.link, medium = %transport.medium(), "Watchdog found link down");
        }
        // settle before releasing the lock so no operation starts in between
        if self.status().is_idle() {
            self.settle(alive);
        }

        self.state.lock().probing = false;
        drop(transport);
    }
}

/// Progress relay handed to transport primitives; every report re-arms
/// the operation deadline
struct DeadlineRelay<'a> {
    shared: &'a Shared,
}

impl ProgressSink for DeadlineRelay<'_> {
    fn progress(&self, kind: ProgressKind, bytes: usize) {
        {
            let mut state = self.shared.state.lock();
            if let Some(timeout) = state.rearm {
                state.deadline = Some(Instant::now() + timeout);
            }
        }
        self.shared.progress(kind, bytes);
    }
}

type TransportGuard<'a> = MutexGuard<'a, Box<dyn Transport>>;

/// Single device link with status tracking, deadlines and a liveness watchdog
pub struct Connection {
    shared: Arc<Shared>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Wrap an adapter; `link` names the connection in events and logs
    pub fn new(link: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let configured = transport.is_configured();
        let state = LinkState {
            configured,
            ..LinkState::default()
        };
        Self {
            shared: Arc::new(Shared {
                link: link.into(),
                state: Mutex::new(state),
                transport: tokio::sync::Mutex::new(transport),
                events,
            }),
            watchdog: Mutex::new(None),
        }
    }

    /// Build the adapter for `descriptor` and wrap it
    pub fn open(
        link: impl Into<String>,
        descriptor: &TransportDescriptor,
        options: TransportOptions,
    ) -> Result<Self> {
        let transport = TransportFactory::create(descriptor, options)?;
        Ok(Self::new(link, transport))
    }

    pub fn link(&self) -> &str {
        &self.shared.link
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    pub fn is_configured(&self) -> bool {
        self.shared.state.lock().configured
    }

    pub fn is_closed(&self) -> bool {
        self.status().is_home()
    }

    pub fn is_idle(&self) -> bool {
        self.status().is_idle()
    }

    pub fn is_busy(&self) -> bool {
        self.status().is_busy()
    }

    pub fn is_doing(&self) -> bool {
        self.status().is_doing()
    }

    pub fn on_error(&self) -> bool {
        self.status().is_error()
    }

    /// Bytes accepted by the last successful send
    pub fn bytes_sent(&self) -> usize {
        self.shared.state.lock().bytes_sent
    }

    /// Bytes collected by the last successful receive
    pub fn bytes_received(&self) -> usize {
        self.shared.state.lock().bytes_recv
    }

    /// Bytes reported by the last inbox check
    pub fn bytes_inbox(&self) -> usize {
        self.shared.state.lock().bytes_inbox
    }

    pub fn watchdog_interval(&self) -> Option<Duration> {
        self.shared.state.lock().watchdog_interval
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Take the operation lock if the link is in a status `allowed` accepts
    async fn begin(
        &self,
        operation: &'static str,
        allowed: impl Fn(Status) -> bool,
    ) -> Result<TransportGuard<'_>> {
        let guard = match self.shared.transport.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // a watchdog probe holds the lock only for a non-blocking check
                let probing = self.shared.state.lock().probing;
                if !probing {
                    return Err(TransportError::busy(operation));
                }
                tokio::time::timeout(PROBE_WAIT, self.shared.transport.lock())
                    .await
                    .map_err(|_| TransportError::busy(operation))?
            }
        };

        let status = self.status();
        if !allowed(status) {
            return Err(TransportError::invalid_state(operation, status));
        }
        Ok(guard)
    }

    /// Run a transport primitive under the operation deadline
    ///
    /// A zero timeout runs the primitive without a deadline.
    async fn with_deadline<T, F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        primitive: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if timeout.is_zero() {
            return primitive.await;
        }

        self.shared.arm(timeout);
        tokio::pin!(primitive);
        let result = loop {
            let deadline = self.shared.deadline().unwrap_or_else(Instant::now);
            tokio::select! {
                result = &mut primitive => break result,
                _ = tokio::time::sleep_until(deadline) => {
                    // Progress may have pushed the deadline out while we slept
                    match self.shared.deadline() {
                        Some(current) if current > Instant::now() => continue,
                        _ => break Err(TransportError::timeout(operation, millis(timeout))),
                    }
                }
            }
        };
        self.shared.disarm();
        result
    }

    /// Publish a failure status, raise an alert if asked, then settle
    fn fail(
        &self,
        transport: &TransportGuard<'_>,
        status: Status,
        error: &TransportError,
        alert: bool,
    ) {
        self.shared.set_status(status);
        if alert {
            self.shared.alert(status.code(), error.to_string());
        } else {
            debug!(link = %self.shared.link, %status, "{}", error);
        }
        self.shared.settle(transport.is_alive());
    }

    /// Validate and store the link target; only while closed
    pub async fn configure(&self, descriptor: &TransportDescriptor) -> Result<()> {
        let mut transport = self.begin("configure", Status::is_home).await?;
        let result = transport.configure(descriptor);
        self.shared.state.lock().configured = result.is_ok() || transport.is_configured();
        if result.is_ok() {
            info!(link = %self.shared.link, target = %descriptor, "Link configured");
        }
        result
    }

    /// Open the link: `Closed → Connecting → Connected → Ready`
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        let mut transport = self.begin("connect", Status::is_home).await?;
        if !self.is_configured() {
            return Err(TransportError::NotConfigured {
                operation: "connect",
            });
        }

        self.shared.state.lock().close_requested = false;
        self.shared.set_status(Status::Connecting);

        let result = self
            .with_deadline("connect", timeout, transport.connect(timeout))
            .await
            .and_then(|()| {
                if transport.is_alive() {
                    Ok(())
                } else {
                    Err(TransportError::connection("Link not alive after connect", None))
                }
            });

        match result {
            Ok(()) => {
                {
                    let mut state = self.shared.state.lock();
                    state.connected = true;
                    self.shared.transition(&mut state, Status::Connected);
                }
                tokio::task::yield_now().await;
                self.shared.set_status(Status::Ready);
                info!(link = %self.shared.link, medium = %transport.medium(), "Link ready");
                Ok(())
            }
            Err(e) => {
                self.fail(&transport, Status::ConnFailed, &e, true);
                Err(e)
            }
        }
    }

    /// Release the link; closing a closed link succeeds without events
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        if self.status().is_home() {
            return Ok(());
        }
        let mut transport = self.begin("close", |status| !status.is_home()).await?;

        self.shared.state.lock().close_requested = true;
        self.shared.set_status(Status::Closing);

        match self
            .with_deadline("close", timeout, transport.close(timeout))
            .await
        {
            Ok(()) => {
                let mut state = self.shared.state.lock();
                state.connected = false;
                self.shared.transition(&mut state, Status::Closed);
                info!(link = %self.shared.link, "Link closed");
                Ok(())
            }
            Err(e) => {
                self.fail(&transport, Status::DisconnFailed, &e, true);
                Err(e)
            }
        }
    }

    /// Write one request: `Ready → Sending → Sent → Ready`
    pub async fn send(&self, data: Bytes, timeout: Duration) -> Result<usize> {
        let mut transport = self.begin("send", Status::is_idle).await?;
        self.shared.set_status(Status::Sending);

        let relay = DeadlineRelay {
            shared: &self.shared,
        };
        let result = self
            .with_deadline("send", timeout, transport.send(&data, timeout, &relay))
            .await
            .and_then(|written| {
                if written == data.len() {
                    Ok(written)
                } else {
                    Err(TransportError::PartialWrite {
                        written,
                        expected: data.len(),
                    })
                }
            });

        match result {
            Ok(written) => {
                {
                    let mut state = self.shared.state.lock();
                    state.bytes_sent = written;
                    self.shared.transition(&mut state, Status::Sent);
                }
                tokio::task::yield_now().await;
                self.shared.set_status(Status::Ready);
                Ok(written)
            }
            Err(e) => {
                self.fail(&transport, Status::SendFailed, &e, true);
                Err(e)
            }
        }
    }

    /// Bytes waiting on the link; the status always returns to `Ready`
    pub async fn inbox(&self, timeout: Duration) -> Result<usize> {
        let mut transport = self.begin("inbox", Status::is_idle).await?;
        self.shared.set_status(Status::Inboxing);

        let result = match self
            .with_deadline("inbox", timeout, transport.inbox(timeout))
            .await
        {
            Err(TransportError::Timeout { .. }) => Ok(0),
            other => other,
        };

        let available = *result.as_ref().unwrap_or(&0);
        {
            let mut state = self.shared.state.lock();
            state.bytes_inbox = available;
            self.shared.transition(&mut state, Status::Ready);
        }
        self.shared.progress(ProgressKind::Inbox, available);
        result
    }

    /// Receive into `buffer` until `expected` bytes are held or the link
    /// goes quiet: `Ready → Recving → Recved → Ready`
    ///
    /// `expected == 0` takes what arrives within the read gap. Receiving
    /// nothing at all is a failure.
    pub async fn recv(
        &self,
        mut buffer: BytesMut,
        timeout: Duration,
        expected: usize,
    ) -> Result<BytesMut> {
        let mut transport = self.begin("recv", Status::is_idle).await?;
        self.shared.set_status(Status::Recving);

        let relay = DeadlineRelay {
            shared: &self.shared,
        };
        let result = self
            .with_deadline(
                "recv",
                timeout,
                transport.recv(&mut buffer, timeout, expected, &relay),
            )
            .await
            .and_then(|received| {
                if received > 0 {
                    Ok(received)
                } else {
                    Err(TransportError::NoData {
                        timeout_ms: millis(timeout),
                    })
                }
            });

        match result {
            Ok(received) => {
                {
                    let mut state = self.shared.state.lock();
                    state.bytes_recv = received;
                    self.shared.transition(&mut state, Status::Recved);
                }
                tokio::task::yield_now().await;
                self.shared.set_status(Status::Ready);
                Ok(buffer)
            }
            Err(e) => {
                // receive errors are expected while polling a device; no alert
                self.fail(&transport, Status::RecvFailed, &e, false);
                Err(e)
            }
        }
    }

    /// Probe liveness now, as the watchdog would; returns the connected flag
    pub async fn check_link(&self) -> Result<bool> {
        let transport = self
            .begin("check_link", |status| status.is_idle() || status.is_home())
            .await?;
        let alive = transport.is_alive();
        drop(transport);

        if self.status().is_idle() || alive {
            self.shared.settle(alive);
        }
        Ok(self.is_connected())
    }

    /// Wait until the link is `Ready`, or report the status it got stuck in
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<()> {
        let mut events = self.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status();
            if status.is_idle() {
                return Ok(());
            }
            if status.is_home() || status.is_error() {
                return Err(TransportError::invalid_state("wait_for_ready", status));
            }
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(TransportError::invalid_state("wait_for_ready", self.status()))
                }
                Err(_) => {
                    return Err(TransportError::timeout("wait_for_ready", millis(timeout)))
                }
            }
        }
    }

    /// Start, restart or stop (`None`) the periodic liveness watchdog
    ///
    /// Must be called from within a Tokio runtime.
    pub fn set_watchdog(&self, interval: Option<Duration>) -> Result<()> {
        let interval = interval.filter(|every| !every.is_zero());
        let mut slot = self.watchdog.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        self.shared.state.lock().watchdog_interval = interval;

        let Some(every) = interval else {
            return Ok(());
        };
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            TransportError::configuration(
                format!("Watchdog needs a Tokio runtime: {}", e),
                Some("watchdog"),
            )
        })?;

        let shared = Arc::clone(&self.shared);
        *slot = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.watchdog_tick();
            }
        }));
        debug!(link = %self.shared.link, interval_ms = millis(every), "Watchdog armed");
        Ok(())
    }

    /// Stop the watchdog and close the link
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if let Some(handle) = self.watchdog.lock().take() {
            handle.abort();
        }
        self.shared.state.lock().watchdog_interval = None;
        self.close(timeout).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.watchdog.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("link", &self.shared.link)
            .field("status", &self.status())
            .finish()
    }
}
