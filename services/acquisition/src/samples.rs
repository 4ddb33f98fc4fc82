//! Scan Sample Decoding
//!
//! A bulk payload is a run of fixed-size records, all fields big-endian:
//!
//! ```text
//! angle(u16, 0.01°) distance_0(u16) .. distance_{channels-1}(u16)
//! ```
//!
//! Incomplete trailing records are ignored.

use serde::Serialize;

/// Consumer of decoded scans
pub trait PointSink: Send {
    /// A new scan begins
    fn clear(&mut self);

    /// One distance reading; `angle` is in hundredths of a degree
    fn point(&mut self, angle: u16, distance: u16, channel: usize);

    /// The cycle produced no scan
    fn degraded(&mut self);
}

/// Bytes per record for `channels` distance channels
pub fn record_len(channels: usize) -> usize {
    2 + channels * 2
}

/// Clear `sink` and feed it every complete record in `payload`
///
/// Returns the number of records decoded.
pub fn decode_samples(payload: &[u8], channels: usize, sink: &mut dyn PointSink) -> usize {
    sink.clear();
    if channels == 0 {
        return 0;
    }

    let mut records = 0;
    for record in payload.chunks_exact(record_len(channels)) {
        let angle = u16::from_be_bytes([record[0], record[1]]);
        for (channel, distance) in record[2..].chunks_exact(2).enumerate() {
            sink.point(angle, u16::from_be_bytes([distance[0], distance[1]]), channel);
        }
        records += 1;
    }
    records
}

/// One decoded reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanPoint {
    pub angle: u16,
    pub distance: u16,
    pub channel: usize,
}

impl ScanPoint {
    pub fn angle_degrees(&self) -> f32 {
        f32::from(self.angle) / 100.0
    }
}

/// Sink that keeps the latest scan in memory
#[derive(Debug, Default, Clone)]
pub struct ScanBuffer {
    points: Vec<ScanPoint>,
    scans: u64,
    degraded: u64,
    /// The latest cycle failed; `points` still holds the previous scan
    stale: bool,
}

impl ScanBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[ScanPoint] {
        &self.points
    }

    /// Readings of one channel from the latest scan
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = &ScanPoint> + '_ {
        self.points.iter().filter(move |p| p.channel == channel)
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }

    pub fn degraded_cycles(&self) -> u64 {
        self.degraded
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Smallest and largest non-zero distance of the latest scan
    pub fn distance_range(&self) -> Option<(u16, u16)> {
        let mut hits = self.points.iter().map(|p| p.distance).filter(|d| *d > 0);
        let first = hits.next()?;
        Some(hits.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }
}

impl PointSink for ScanBuffer {
    fn clear(&mut self) {
        self.points.clear();
        self.scans += 1;
        self.stale = false;
    }

    fn point(&mut self, angle: u16, distance: u16, channel: usize) {
        self.points.push(ScanPoint {
            angle,
            distance,
            channel,
        });
    }

    fn degraded(&mut self) {
        self.degraded += 1;
        self.stale = true;
    }
}
