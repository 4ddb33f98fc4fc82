//! Acquisition cycle tests against the virtual device and a loopback TCP peer

use bytes::Bytes;
use lumos_acquisition::{
    run, Acquisition, AcquisitionError, CycleSettings, PointSink, RunMode, ScanBuffer,
    ScanProfile, VirtualDevice,
};
use lumos_codec::{pack, unpack, Command, Frame};
use lumos_network::{Connection, Status, TransportDescriptor, TransportOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_millis(500);

fn small_settings() -> CycleSettings {
    CycleSettings {
        word_count: 2,
        channels: 1,
        inbox_attempts: 5,
        ..CycleSettings::default()
    }
}

async fn virtual_connection(profile: ScanProfile) -> Arc<Connection> {
    let connection = Connection::new("virtual", Box::new(VirtualDevice::new(profile)));
    connection.connect(WAIT).await.unwrap();
    Arc::new(connection)
}

/// Loopback device: optionally writes `junk` on accept, reads one request,
/// answers with `reply` if given, then holds the stream open
async fn tcp_device(
    junk: Option<Vec<u8>>,
    reply: Option<Bytes>,
) -> (Arc<Connection>, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let device = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        if let Some(junk) = junk {
            stream.write_all(&junk).await.unwrap();
        }
        let mut request = vec![0u8; 13];
        stream.read_exact(&mut request).await.unwrap();
        if let Some(reply) = reply {
            stream.write_all(&reply).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        request
    });

    let connection = Connection::open(
        "tcp-device",
        &TransportDescriptor::tcp("127.0.0.1", port),
        TransportOptions::default(),
    )
    .unwrap();
    connection.connect(WAIT).await.unwrap();
    (Arc::new(connection), device)
}

fn bulk_reply(payload: &[u8], with_result: bool) -> Bytes {
    let result = with_result.then_some([0x5A; 20]);
    pack(&Frame::set_bulk(0, payload.to_vec(), result).unwrap()).unwrap()
}

mod virtual_device {
    use super::*;

    #[tokio::test]
    async fn test_cycle_delivers_generated_scan() {
        let connection = virtual_connection(ScanProfile::new(1, 3.0, 1.0)).await;
        let acquisition = Acquisition::new(connection.clone(), CycleSettings::default()).unwrap();

        let mut scan = ScanBuffer::new();
        let report = acquisition.run_cycle(&mut scan).await.unwrap();

        assert_eq!(report.records, 4);
        assert_eq!(report.word_count, 8);
        assert!(report.signaled);
        assert!(report.result.is_some());
        assert_eq!(report.stale_bytes_drained, 0);

        let distances: Vec<u16> = scan.points().iter().map(|p| p.distance).collect();
        assert_eq!(distances, vec![30_000, 30_100, 30_200, 30_300]);
        let angles: Vec<u16> = scan.points().iter().map(|p| p.angle).collect();
        assert_eq!(angles, vec![0, 100, 200, 300]);
        assert_eq!(connection.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_multi_channel_profile() {
        let connection = virtual_connection(ScanProfile::new(4, 1.0, 1.0)).await;
        let settings = CycleSettings {
            channels: 4,
            ..CycleSettings::default()
        };
        let acquisition = Acquisition::new(connection, settings).unwrap();

        let mut scan = ScanBuffer::new();
        let report = acquisition.run_cycle(&mut scan).await.unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(scan.points().len(), 8);
        assert_eq!(scan.channel(3).count(), 2);
    }

    #[tokio::test]
    async fn test_no_result_block_without_sentinel() {
        let connection = virtual_connection(ScanProfile::new(1, 1.0, 1.0)).await;
        let settings = CycleSettings {
            data_type: 0,
            ..CycleSettings::default()
        };
        let acquisition = Acquisition::new(connection, settings).unwrap();

        let report = acquisition.run_cycle(&mut ScanBuffer::new()).await.unwrap();
        assert!(report.result.is_none());
    }

    #[tokio::test]
    async fn test_continuous_run_until_cycle_cap() {
        let connection = virtual_connection(ScanProfile::new(1, 2.0, 1.0)).await;
        let acquisition = Acquisition::new(connection, CycleSettings::default()).unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let mut scan = ScanBuffer::new();
        let summary = run(
            &acquisition,
            RunMode::Continuous {
                interval: Duration::from_millis(5),
            },
            &mut scan,
            stop_rx,
            Some(4),
        )
        .await;

        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.degraded, 0);
        assert_eq!(scan.scans(), 4);
        // shapes rotate 0, 1, 2, 3: the last scan is all misses
        assert_eq!(scan.distance_range(), None);
    }

    #[tokio::test]
    async fn test_stop_signal_ends_run() {
        let connection = virtual_connection(ScanProfile::default()).await;
        let acquisition = Acquisition::new(connection, CycleSettings::default()).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stop_tx.send(true).unwrap();
        });

        let mut scan = ScanBuffer::new();
        let summary = tokio::time::timeout(
            Duration::from_secs(2),
            run(
                &acquisition,
                RunMode::Continuous {
                    interval: Duration::from_millis(20),
                },
                &mut scan,
                stop_rx,
                None,
            ),
        )
        .await
        .unwrap();
        stopper.await.unwrap();

        assert!(summary.cycles >= 1);
        assert_eq!(summary.cycles, summary.succeeded);
    }

    #[tokio::test]
    async fn test_single_run_once() {
        let connection = virtual_connection(ScanProfile::default()).await;
        let acquisition = Acquisition::new(connection, CycleSettings::default()).unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let mut scan = ScanBuffer::new();
        let summary = run(&acquisition, RunMode::Single, &mut scan, stop_rx, None).await;
        assert_eq!(summary.cycles, 1);
        assert_eq!(scan.points().len(), 1091);
    }

    #[tokio::test]
    async fn test_run_ends_when_link_closed() {
        let connection = virtual_connection(ScanProfile::default()).await;
        let acquisition = Acquisition::new(connection.clone(), CycleSettings::default()).unwrap();
        connection.close(WAIT).await.unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let summary = run(
            &acquisition,
            RunMode::Continuous {
                interval: Duration::from_millis(5),
            },
            &mut ScanBuffer::new(),
            stop_rx,
            None,
        )
        .await;
        assert_eq!(summary.cycles, 0);
    }
}

mod tcp_device {
    use super::*;

    #[tokio::test]
    async fn test_cycle_over_loopback() {
        let reply = bulk_reply(&[0x12, 0x34, 0x56, 0x78], true);
        let (connection, device) = tcp_device(None, Some(reply)).await;
        let acquisition = Acquisition::new(connection.clone(), small_settings()).unwrap();

        let mut scan = ScanBuffer::new();
        let report = acquisition.run_cycle(&mut scan).await.unwrap();

        assert_eq!(report.word_count, 2);
        assert_eq!(report.result, Some([0x5A; 20]));
        assert_eq!(report.records, 1);
        assert_eq!(scan.points()[0].angle, 0x1234);
        assert_eq!(scan.points()[0].distance, 0x5678);
        assert_eq!(connection.status(), Status::Ready);

        let request = unpack(&device.await.unwrap()).unwrap();
        assert_eq!(request, Frame::get_bulk(4, 0, 2));
    }

    #[tokio::test]
    async fn test_silent_device_degrades_cycle() {
        let (connection, _device) = tcp_device(None, None).await;
        let settings = CycleSettings {
            inbox_attempts: 2,
            inbox_wait: Duration::from_millis(10),
            recv_timeout_fallback: Duration::from_millis(50),
            ..small_settings()
        };
        let acquisition = Acquisition::new(connection.clone(), settings).unwrap();

        let mut scan = ScanBuffer::new();
        let err = acquisition.run_cycle(&mut scan).await.unwrap_err();

        assert!(err.is_timeout(), "unexpected error: {}", err);
        assert_eq!(scan.degraded_cycles(), 1);
        assert!(scan.points().is_empty());
        // the link survives a silent device
        assert_eq!(connection.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_wrong_reply_rejected() {
        let reply = pack(&Frame::get_bulk(0, 0, 2)).unwrap();
        let (connection, _device) = tcp_device(None, Some(reply)).await;
        let acquisition = Acquisition::new(connection, small_settings()).unwrap();

        let mut scan = ScanBuffer::new();
        let err = acquisition.run_cycle(&mut scan).await.unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::UnexpectedReply {
                command: Command::GetBulk
            }
        ));
        assert!(scan.is_stale());
    }

    #[tokio::test]
    async fn test_stale_bytes_drained_before_request() {
        let reply = bulk_reply(&[0x00, 0x10, 0x00, 0x20], false);
        let (connection, _device) = tcp_device(Some(vec![0xEE; 5]), Some(reply)).await;
        let acquisition = Acquisition::new(connection, small_settings()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut scan = ScanBuffer::new();
        let report = acquisition.run_cycle(&mut scan).await.unwrap();
        assert_eq!(report.stale_bytes_drained, 5);
        assert_eq!(scan.points()[0].distance, 0x20);
    }

    #[tokio::test]
    async fn test_cycle_refused_when_link_closed() {
        let (connection, _device) = tcp_device(None, None).await;
        connection.close(WAIT).await.unwrap();
        let acquisition = Acquisition::new(connection, small_settings()).unwrap();

        let mut scan = ScanBuffer::new();
        let err = acquisition.run_cycle(&mut scan).await.unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::NotReady {
                status: Status::Closed
            }
        ));
        assert_eq!(scan.degraded_cycles(), 1);
    }
}

/// Sink that only counts callbacks
#[derive(Default)]
struct Counting {
    clears: usize,
    points: usize,
    degraded: usize,
}

impl PointSink for Counting {
    fn clear(&mut self) {
        self.clears += 1;
    }

    fn point(&mut self, _angle: u16, _distance: u16, _channel: usize) {
        self.points += 1;
    }

    fn degraded(&mut self) {
        self.degraded += 1;
    }
}

#[tokio::test]
async fn test_custom_sink_sees_clear_before_points() {
    let connection = virtual_connection(ScanProfile::new(2, 1.0, 1.0)).await;
    let settings = CycleSettings {
        channels: 2,
        ..CycleSettings::default()
    };
    let acquisition = Acquisition::new(connection, settings).unwrap();

    let mut sink = Counting::default();
    acquisition.run_cycle(&mut sink).await.unwrap();
    assert_eq!(sink.clears, 1);
    assert_eq!(sink.points, 4);
    assert_eq!(sink.degraded, 0);
}
