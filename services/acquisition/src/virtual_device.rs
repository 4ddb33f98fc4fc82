//! Virtual Device
//!
//! In-process stand-in for a sensor: answers `GetBulk` requests with
//! `SetBulk` replies carrying generated scans, so the acquisition path can
//! run without hardware. Successive scans rotate through four shapes:
//!
//! | shape | distance of measure `i` |
//! |---|---|
//! | 0 | `30000 + (i % 50) * 100` |
//! | 1 | `25000` |
//! | 2 | `i * 50` |
//! | 3 | `0` |
//!
//! Each further channel reads 2% farther than the one before it.

use async_trait::async_trait;
use bytes::BytesMut;
use lumos_codec::{pack, unpack, Command, Frame, RESULT_BLOCK_LEN, RESULT_PRESENT_DATA_TYPE};
use lumos_network::{
    Medium, ProgressKind, ProgressSink, Transport, TransportDescriptor, TransportError,
};
use std::time::Duration;
use tracing::{debug, info};

/// Number of synthetic shapes the generator cycles through
pub const SHAPE_COUNT: u8 = 4;

/// Hardware profile the generator imitates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanProfile {
    pub channels: usize,
    /// Angular step in degrees
    pub resolution: f32,
    pub measures_per_scan: usize,
}

impl ScanProfile {
    /// Profile covering `fov` degrees at `resolution`
    pub fn new(channels: usize, fov: f32, resolution: f32) -> Self {
        Self {
            channels,
            resolution,
            measures_per_scan: (fov / resolution) as usize + 1,
        }
    }

    /// Payload words one scan occupies
    pub fn words_per_scan(&self) -> usize {
        self.measures_per_scan * (1 + self.channels)
    }
}

impl Default for ScanProfile {
    /// Single channel, full circle at 0.33°
    fn default() -> Self {
        Self::new(1, 360.0, 0.33)
    }
}

/// Deterministic scan generator
#[derive(Debug, Clone)]
pub struct ScanGenerator {
    profile: ScanProfile,
    shape: u8,
    sequence: u32,
}

impl ScanGenerator {
    pub fn new(profile: ScanProfile) -> Self {
        Self {
            profile,
            shape: 0,
            sequence: 0,
        }
    }

    pub fn profile(&self) -> &ScanProfile {
        &self.profile
    }

    /// Shape the next scan will use
    pub fn shape(&self) -> u8 {
        self.shape
    }

    /// Scans generated so far
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Produce the next scan payload and advance to the next shape
    pub fn next_payload(&mut self) -> Vec<u8> {
        let profile = self.profile;
        let step = (profile.resolution * 100.0) as u16;
        let mut payload = Vec::with_capacity(profile.words_per_scan() * 2);
        let mut angle: u16 = 0;

        for i in 0..profile.measures_per_scan {
            let mut distance = shape_distance(self.shape, i);
            payload.extend_from_slice(&angle.to_be_bytes());
            for _ in 0..profile.channels {
                payload.extend_from_slice(&distance.to_be_bytes());
                distance = distance.saturating_add((f64::from(distance) * 0.02) as u16);
            }
            angle = angle.wrapping_add(step);
        }

        self.shape = (self.shape + 1) % SHAPE_COUNT;
        self.sequence = self.sequence.wrapping_add(1);
        payload
    }

    /// Result block for the scan just generated: sequence, shape, zero fill
    pub fn result_block(&self) -> [u8; RESULT_BLOCK_LEN] {
        let mut block = [0u8; RESULT_BLOCK_LEN];
        block[..4].copy_from_slice(&self.sequence.to_be_bytes());
        block[4] = (self.shape + SHAPE_COUNT - 1) % SHAPE_COUNT;
        block
    }
}

fn shape_distance(shape: u8, measure: usize) -> u16 {
    let distance = match shape {
        0 => 30_000 + (measure % 50) * 100,
        1 => 25_000,
        2 => measure * 50,
        _ => 0,
    };
    u16::try_from(distance).unwrap_or(u16::MAX)
}

/// Transport that answers bulk requests from a [`ScanGenerator`]
///
/// Reports [`Medium::Udp`], the link the virtual mode stands in for.
#[derive(Debug)]
pub struct VirtualDevice {
    generator: ScanGenerator,
    connected: bool,
    pending: BytesMut,
}

impl VirtualDevice {
    pub fn new(profile: ScanProfile) -> Self {
        Self {
            generator: ScanGenerator::new(profile),
            connected: false,
            pending: BytesMut::new(),
        }
    }

    pub fn generator(&self) -> &ScanGenerator {
        &self.generator
    }

    fn ensure_connected(&self, operation: &str) -> lumos_network::Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::connection(
                format!("Virtual device not connected for {}", operation),
                None,
            ))
        }
    }

    fn answer(&mut self, request: &Frame) -> lumos_network::Result<()> {
        let payload = self.generator.next_payload();
        let result = (request.data_type == RESULT_PRESENT_DATA_TYPE)
            .then(|| self.generator.result_block());
        let reply = Frame::set_bulk(request.start_address, payload, result)
            .and_then(|frame| pack(&frame))
            .map_err(|e| TransportError::network(format!("Virtual reply not encodable: {}", e)))?;

        debug!(
            bytes = reply.len(),
            shape = self.generator.shape(),
            "Virtual device queued bulk reply"
        );
        self.pending.extend_from_slice(&reply);
        Ok(())
    }
}

#[async_trait]
impl Transport for VirtualDevice {
    fn medium(&self) -> Medium {
        Medium::Udp
    }

    fn configure(&mut self, _descriptor: &TransportDescriptor) -> lumos_network::Result<()> {
        Ok(())
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn connect(&mut self, _timeout: Duration) -> lumos_network::Result<()> {
        if !self.connected {
            info!(
                channels = self.generator.profile().channels,
                measures = self.generator.profile().measures_per_scan,
                "Virtual device connected"
            );
        }
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self, _timeout: Duration) -> lumos_network::Result<()> {
        self.connected = false;
        self.pending.clear();
        Ok(())
    }

    async fn send(
        &mut self,
        data: &[u8],
        _timeout: Duration,
        progress: &dyn ProgressSink,
    ) -> lumos_network::Result<usize> {
        self.ensure_connected("send")?;
        progress.progress(ProgressKind::Sending, data.len());

        match unpack(data) {
            Ok(frame) if frame.command == Command::GetBulk => self.answer(&frame)?,
            Ok(frame) => debug!(command = %frame.command, "Virtual device ignored request"),
            Err(e) => debug!("Virtual device ignored malformed request: {}", e),
        }
        Ok(data.len())
    }

    async fn inbox(&mut self, _timeout: Duration) -> lumos_network::Result<usize> {
        self.ensure_connected("inbox")?;
        Ok(self.pending.len())
    }

    async fn recv(
        &mut self,
        buffer: &mut BytesMut,
        _timeout: Duration,
        _expected: usize,
        progress: &dyn ProgressSink,
    ) -> lumos_network::Result<usize> {
        self.ensure_connected("recv")?;
        let received = self.pending.len();
        if received > 0 {
            buffer.extend_from_slice(&self.pending.split());
            progress.progress(ProgressKind::Recving, received);
        }
        Ok(received)
    }

    fn is_alive(&self) -> bool {
        self.connected
    }
}
