//! Connection state machine tests
//!
//! A scripted transport drives the status machine through its success and
//! failure paths; the watchdog test uses a real loopback TCP peer.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lumos_network::{
    Connection, LinkEvent, Medium, ProgressKind, ProgressSink, Status, Transport,
    TransportDescriptor, TransportError, TransportOptions,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// What the next `recv` call does
#[derive(Debug, Clone)]
enum RecvStep {
    Data(Vec<u8>),
    /// Deliver chunks with a pause before each one
    Trickle { chunks: Vec<Vec<u8>>, gap: Duration },
    /// Never complete
    Hang,
    Nothing,
}

/// Test-side handle onto a scripted transport
#[derive(Clone, Default)]
struct Script {
    alive: Arc<AtomicBool>,
    recv: Arc<Mutex<VecDeque<RecvStep>>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    inbox_hangs: Arc<AtomicBool>,
    fail_connect: Arc<AtomicBool>,
}

impl Script {
    fn push_recv(&self, step: RecvStep) {
        self.recv.lock().push_back(step);
    }
}

struct ScriptedTransport {
    script: Script,
    configured: bool,
}

impl ScriptedTransport {
    fn new(script: &Script, configured: bool) -> Box<dyn Transport> {
        Box::new(Self {
            script: script.clone(),
            configured,
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn medium(&self) -> Medium {
        Medium::Tcp
    }

    fn configure(&mut self, descriptor: &TransportDescriptor) -> lumos_network::Result<()> {
        descriptor.validate()?;
        self.configured = true;
        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn connect(&mut self, _timeout: Duration) -> lumos_network::Result<()> {
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::connection("refused", None));
        }
        self.script.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self, _timeout: Duration) -> lumos_network::Result<()> {
        self.script.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(
        &mut self,
        data: &[u8],
        _timeout: Duration,
        progress: &dyn ProgressSink,
    ) -> lumos_network::Result<usize> {
        self.script.sent.lock().push(data.to_vec());
        progress.progress(ProgressKind::Sending, data.len());
        Ok(data.len())
    }

    async fn inbox(&mut self, _timeout: Duration) -> lumos_network::Result<usize> {
        if self.script.inbox_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self
            .script
            .recv
            .lock()
            .front()
            .map(|step| match step {
                RecvStep::Data(bytes) => bytes.len(),
                _ => 0,
            })
            .unwrap_or(0))
    }

    async fn recv(
        &mut self,
        buffer: &mut BytesMut,
        _timeout: Duration,
        _expected: usize,
        progress: &dyn ProgressSink,
    ) -> lumos_network::Result<usize> {
        let step = self.script.recv.lock().pop_front().unwrap_or(RecvStep::Nothing);
        let start = buffer.len();
        match step {
            RecvStep::Data(bytes) => {
                buffer.extend_from_slice(&bytes);
                progress.progress(ProgressKind::Recving, bytes.len());
            }
            RecvStep::Trickle { chunks, gap } => {
                for chunk in chunks {
                    tokio::time::sleep(gap).await;
                    buffer.extend_from_slice(&chunk);
                    progress.progress(ProgressKind::Recving, buffer.len() - start);
                }
            }
            RecvStep::Hang => std::future::pending::<()>().await,
            RecvStep::Nothing => {}
        }
        Ok(buffer.len() - start)
    }

    fn is_alive(&self) -> bool {
        self.script.alive.load(Ordering::SeqCst)
    }
}

fn drain_statuses(events: &mut broadcast::Receiver<LinkEvent>) -> Vec<Status> {
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Some(status) = event.status() {
            statuses.push(status);
        }
    }
    statuses
}

async fn ready_connection(script: &Script) -> Connection {
    let connection = Connection::new("test", ScriptedTransport::new(script, true));
    connection.connect(Duration::from_millis(200)).await.unwrap();
    assert_eq!(connection.status(), Status::Ready);
    connection
}

const WAIT: Duration = Duration::from_millis(500);

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_connect_publishes_path_to_ready() {
        let script = Script::default();
        let connection = Connection::new("test", ScriptedTransport::new(&script, true));
        let mut events = connection.subscribe();

        connection.connect(WAIT).await.unwrap();

        assert_eq!(
            drain_statuses(&mut events),
            vec![Status::Connecting, Status::Connected, Status::Ready]
        );
        assert!(connection.is_connected());
        assert!(connection.is_idle());
    }

    #[tokio::test]
    async fn test_connect_requires_configuration() {
        let script = Script::default();
        let connection = Connection::new("test", ScriptedTransport::new(&script, false));
        let mut events = connection.subscribe();

        let err = connection.connect(WAIT).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured { .. }));
        assert_eq!(connection.status(), Status::Closed);
        assert!(drain_statuses(&mut events).is_empty());

        connection
            .configure(&TransportDescriptor::tcp("127.0.0.1", 2111))
            .await
            .unwrap();
        assert!(connection.is_configured());
        connection.connect(WAIT).await.unwrap();
        assert_eq!(connection.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_bad_descriptor_leaves_link_unconfigured() {
        let script = Script::default();
        let connection = Connection::new("test", ScriptedTransport::new(&script, false));
        let err = connection
            .configure(&TransportDescriptor::tcp("127.0.0.1", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Configuration { .. }));
        assert!(!connection.is_configured());
    }

    #[tokio::test]
    async fn test_configure_only_while_closed() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        let err = connection
            .configure(&TransportDescriptor::tcp("127.0.0.1", 2111))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::InvalidState {
                status: Status::Ready,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_connect_settles_to_closed() {
        let script = Script::default();
        script.fail_connect.store(true, Ordering::SeqCst);
        let connection = Connection::new("test", ScriptedTransport::new(&script, true));
        let mut events = connection.subscribe();

        assert!(connection.connect(WAIT).await.is_err());

        let mut alerts = 0;
        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                LinkEvent::Status { status, .. } => statuses.push(status),
                LinkEvent::Alert { code, .. } => {
                    assert_eq!(code, Status::ConnFailed.code());
                    alerts += 1;
                }
                LinkEvent::Progress { .. } => {}
            }
        }
        assert_eq!(
            statuses,
            vec![Status::Connecting, Status::ConnFailed, Status::Closed]
        );
        assert_eq!(alerts, 1);
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        let mut events = connection.subscribe();

        connection.close(WAIT).await.unwrap();
        assert_eq!(
            drain_statuses(&mut events),
            vec![Status::Closing, Status::Closed]
        );

        connection.close(WAIT).await.unwrap();
        assert!(drain_statuses(&mut events).is_empty());
        assert!(connection.is_closed());
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_after_close() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        connection.close(WAIT).await.unwrap();
        connection.connect(WAIT).await.unwrap();
        assert_eq!(connection.status(), Status::Ready);
    }
}

mod operations {
    use super::*;

    #[tokio::test]
    async fn test_operations_rejected_while_closed() {
        let script = Script::default();
        let connection = Connection::new("test", ScriptedTransport::new(&script, true));
        let mut events = connection.subscribe();

        let send = connection
            .send(Bytes::from_static(b"x"), WAIT)
            .await
            .unwrap_err();
        let recv = connection
            .recv(BytesMut::new(), WAIT, 0)
            .await
            .unwrap_err();
        let inbox = connection.inbox(WAIT).await.unwrap_err();

        for err in [send, recv, inbox] {
            assert!(err.is_rejection());
            assert!(matches!(
                err,
                TransportError::InvalidState {
                    status: Status::Closed,
                    ..
                }
            ));
        }
        assert_eq!(connection.status(), Status::Closed);
        assert!(drain_statuses(&mut events).is_empty());
        assert!(script.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_publishes_sent_before_ready() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        let mut events = connection.subscribe();

        let written = connection
            .send(Bytes::from_static(&[0xA1, 0x53, 0x0D]), WAIT)
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(connection.bytes_sent(), 3);
        assert_eq!(script.sent.lock().as_slice(), &[vec![0xA1, 0x53, 0x0D]]);

        assert_eq!(
            drain_statuses(&mut events),
            vec![Status::Sending, Status::Sent, Status::Ready]
        );
    }

    #[tokio::test]
    async fn test_recv_returns_buffer() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        script.push_recv(RecvStep::Data(vec![1, 2, 3]));
        let mut events = connection.subscribe();

        let buffer = connection.recv(BytesMut::new(), WAIT, 3).await.unwrap();
        assert_eq!(&buffer[..], &[1, 2, 3]);
        assert_eq!(connection.bytes_received(), 3);
        assert_eq!(
            drain_statuses(&mut events),
            vec![Status::Recving, Status::Recved, Status::Ready]
        );
    }

    #[tokio::test]
    async fn test_recv_times_out_when_primitive_never_returns() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        script.push_recv(RecvStep::Hang);
        let mut events = connection.subscribe();

        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        let err = connection
            .recv(BytesMut::new(), timeout, 10)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(200));
        assert_eq!(
            drain_statuses(&mut events),
            vec![Status::Recving, Status::RecvFailed, Status::Ready]
        );
    }

    #[tokio::test]
    async fn test_progress_rearms_deadline() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        // four chunks 60ms apart: 240ms total against a 100ms deadline
        script.push_recv(RecvStep::Trickle {
            chunks: vec![vec![1; 4], vec![2; 4], vec![3; 4], vec![4; 4]],
            gap: Duration::from_millis(60),
        });

        let buffer = connection
            .recv(BytesMut::new(), Duration::from_millis(100), 16)
            .await
            .unwrap();
        assert_eq!(buffer.len(), 16);
        assert_eq!(connection.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_empty_receive_is_a_failure() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        script.push_recv(RecvStep::Nothing);

        let err = connection
            .recv(BytesMut::new(), WAIT, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoData { .. }));
        assert_eq!(connection.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_failure_on_dead_link_closes_it() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        script.push_recv(RecvStep::Nothing);
        script.alive.store(false, Ordering::SeqCst);
        let mut events = connection.subscribe();

        assert!(connection.recv(BytesMut::new(), WAIT, 0).await.is_err());
        assert_eq!(
            drain_statuses(&mut events),
            vec![
                Status::Recving,
                Status::RecvFailed,
                Status::ConnLost,
                Status::Closed
            ]
        );
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_inbox_timeout_reports_zero() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        script.inbox_hangs.store(true, Ordering::SeqCst);
        let mut events = connection.subscribe();

        let waiting = connection.inbox(Duration::from_millis(50)).await.unwrap();
        assert_eq!(waiting, 0);
        assert_eq!(
            drain_statuses(&mut events),
            vec![Status::Inboxing, Status::Ready]
        );
    }

    #[tokio::test]
    async fn test_inbox_reports_waiting_bytes() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        script.push_recv(RecvStep::Data(vec![0; 42]));

        assert_eq!(connection.inbox(WAIT).await.unwrap(), 42);
        assert_eq!(connection.bytes_inbox(), 42);
        assert_eq!(connection.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_operation_rejected_as_busy() {
        let script = Script::default();
        let connection = Arc::new(ready_connection(&script).await);
        script.push_recv(RecvStep::Hang);

        let receiver = Arc::clone(&connection);
        let pending = tokio::spawn(async move {
            receiver
                .recv(BytesMut::new(), Duration::from_millis(300), 1)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connection.status(), Status::Recving);

        let err = connection
            .send(Bytes::from_static(b"x"), WAIT)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Busy { operation: "send" }));
        assert_eq!(connection.status(), Status::Recving);
        assert!(script.sent.lock().is_empty());

        assert!(pending.await.unwrap().is_err());
        assert_eq!(connection.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_recv_holds_on_through_device_pause() {
        use tokio::io::AsyncWriteExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = Connection::open(
            "device",
            &TransportDescriptor::tcp("127.0.0.1", port),
            TransportOptions::default(),
        )
        .unwrap();
        let (connected, accepted) = tokio::join!(connection.connect(WAIT), listener.accept());
        connected.unwrap();
        let (mut peer, _) = accepted.unwrap();

        tokio::spawn(async move {
            peer.write_all(&[0x11; 100]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(120)).await;
            peer.write_all(&[0x22; 100]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let buffer = connection
            .recv(BytesMut::new(), Duration::from_millis(300), 200)
            .await
            .unwrap();
        assert_eq!(buffer.len(), 200);
        assert_eq!(connection.bytes_received(), 200);
        assert_eq!(connection.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_wait_for_ready() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        connection.wait_for_ready(WAIT).await.unwrap();

        connection.close(WAIT).await.unwrap();
        let err = connection.wait_for_ready(WAIT).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::InvalidState {
                status: Status::Closed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_check_link_notices_dead_transport() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        assert!(connection.check_link().await.unwrap());

        script.alive.store(false, Ordering::SeqCst);
        assert!(!connection.check_link().await.unwrap());
        assert_eq!(connection.status(), Status::Closed);
    }
}

mod watchdog {
    use super::*;

    async fn wait_for_status(
        events: &mut broadcast::Receiver<LinkEvent>,
        wanted: Status,
        within: Duration,
    ) -> Vec<Status> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + within;
        while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
            if let Some(status) = event.status() {
                seen.push(status);
                if status == wanted {
                    break;
                }
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_watchdog_detects_dead_scripted_link() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        let mut events = connection.subscribe();
        connection
            .set_watchdog(Some(Duration::from_millis(20)))
            .unwrap();
        assert_eq!(
            connection.watchdog_interval(),
            Some(Duration::from_millis(20))
        );

        script.alive.store(false, Ordering::SeqCst);
        let seen = wait_for_status(&mut events, Status::Closed, WAIT).await;
        assert_eq!(seen, vec![Status::ConnLost, Status::Closed]);
    }

    #[tokio::test]
    async fn test_watchdog_detects_tcp_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connection = Connection::open(
            "device",
            &TransportDescriptor::tcp("127.0.0.1", port),
            TransportOptions::default(),
        )
        .unwrap();

        let (connected, accepted) = tokio::join!(connection.connect(WAIT), listener.accept());
        connected.unwrap();
        let (peer, _) = accepted.unwrap();

        let mut events = connection.subscribe();
        connection
            .set_watchdog(Some(Duration::from_millis(25)))
            .unwrap();
        drop(peer);

        let seen = wait_for_status(&mut events, Status::Closed, Duration::from_secs(2)).await;
        assert_eq!(seen, vec![Status::ConnLost, Status::Closed]);
        assert!(!connection.is_connected());

        connection.shutdown(WAIT).await.unwrap();
        assert_eq!(connection.watchdog_interval(), None);
    }

    #[tokio::test]
    async fn test_watchdog_disabled_by_zero_interval() {
        let script = Script::default();
        let connection = ready_connection(&script).await;
        connection.set_watchdog(Some(Duration::ZERO)).unwrap();
        assert_eq!(connection.watchdog_interval(), None);

        script.alive.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connection.status(), Status::Ready);
    }
}
