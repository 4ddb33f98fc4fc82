//! Serial Transport Implementation
//!
//! RS-232/USB serial link to the device, 8N1 framing. The port stays open
//! between cycles; "connected" means the device node was opened.

use super::{
    read_stream, write_stream, LinkTarget, Medium, Transport, TransportDescriptor,
    TransportOptions,
};
use crate::event::ProgressSink;
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::time::Instant;
use tokio_serial::{DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info};

/// Poll period while waiting for bytes to arrive in the driver queue
const INBOX_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Open timeout handed to the driver when the caller gives none
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial transport for a device on a local port
pub struct SerialTransport {
    options: TransportOptions,
    path: Option<String>,
    baud_rate: u32,
    port: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            path: None,
            baud_rate: 0,
            port: None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn port_mut(&mut self, operation: &str) -> Result<&mut SerialStream> {
        let path = self.path.clone().unwrap_or_default();
        self.port.as_mut().ok_or_else(|| TransportError::Serial {
            message: format!("Serial port {} not open for {}", path, operation),
            source: None,
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn medium(&self) -> Medium {
        Medium::Serial
    }

    fn configure(&mut self, descriptor: &TransportDescriptor) -> Result<()> {
        if descriptor.medium != Medium::Serial {
            return Err(TransportError::configuration(
                format!("Serial transport cannot use a {} descriptor", descriptor.medium),
                Some("medium"),
            ));
        }
        if self.port.is_some() {
            return Err(TransportError::configuration(
                "Cannot reconfigure an open serial port",
                Some("address"),
            ));
        }
        match descriptor.validate()? {
            LinkTarget::Serial { path, baud_rate } => {
                debug!(%path, baud_rate, "Serial transport configured");
                self.path = Some(path);
                self.baud_rate = baud_rate;
                Ok(())
            }
            LinkTarget::Socket(_) => Err(TransportError::configuration(
                "Serial transport needs a device path",
                Some("address"),
            )),
        }
    }

    fn is_configured(&self) -> bool {
        self.path.is_some()
    }

    async fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let path = self.path.clone().ok_or_else(|| {
            TransportError::configuration("No serial device configured", Some("address"))
        })?;

        let open_timeout = if timeout.is_zero() {
            DEFAULT_OPEN_TIMEOUT
        } else {
            timeout
        };
        let port = tokio_serial::new(path.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .timeout(open_timeout)
            .open_native_async()
            .map_err(|e| {
                TransportError::serial_with_source(
                    format!("Failed to open serial port {}", path),
                    e,
                )
            })?;

        info!(%path, baud_rate = self.baud_rate, "Serial port opened");
        self.port = Some(port);
        Ok(())
    }

    async fn close(&mut self, _timeout: Duration) -> Result<()> {
        if self.port.take().is_some() {
            info!(path = ?self.path, "Serial port closed");
        }
        Ok(())
    }

    async fn send(
        &mut self,
        data: &[u8],
        timeout: Duration,
        progress: &dyn ProgressSink,
    ) -> Result<usize> {
        let port = self.port_mut("send")?;
        let outcome = write_stream(port, data, timeout, progress)
            .await
            .map_err(|e| TransportError::io("Failed to write to serial port", e))?;

        debug!(
            bytes = outcome.bytes,
            frame = %hex::encode(data),
            "Sent over serial"
        );
        Ok(outcome.bytes)
    }

    async fn inbox(&mut self, timeout: Duration) -> Result<usize> {
        let port = self.port_mut("inbox")?;
        let deadline = Instant::now() + timeout;
        loop {
            let queued = port.bytes_to_read().map_err(|e| {
                TransportError::serial_with_source("Failed to query serial input queue", e)
            })?;
            if queued > 0 || Instant::now() >= deadline {
                return Ok(queued as usize);
            }
            tokio::time::sleep(INBOX_POLL_INTERVAL).await;
        }
    }

    async fn recv(
        &mut self,
        buffer: &mut BytesMut,
        timeout: Duration,
        expected: usize,
        progress: &dyn ProgressSink,
    ) -> Result<usize> {
        let read_gap = self.options.read_gap;
        let port = self.port_mut("recv")?;
        let outcome = read_stream(port, buffer, timeout, expected, read_gap, progress)
            .await
            .map_err(|e| TransportError::io("Serial receive failed", e))?;

        debug!(bytes = outcome.bytes, expected, "Received over serial");
        Ok(outcome.bytes)
    }

    fn is_alive(&self) -> bool {
        self.port.is_some()
    }
}

/// Names of the serial ports present on this machine
pub fn available_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(|e| {
        TransportError::serial_with_source("Failed to enumerate serial ports", e)
    })?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}
