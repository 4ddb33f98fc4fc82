//! Transport Adapters
//!
//! One [`Transport`] implementation per physical medium (TCP, UDP, serial).
//! Adapters only perform the primitive operations; status bookkeeping,
//! deadlines and liveness policy live in [`Connection`](crate::Connection).

use crate::event::{ProgressKind, ProgressSink};
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

pub mod serial;
pub mod tcp;
pub mod udp;


pub use serial::{available_serial_ports, SerialTransport};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// Primitive operations every medium provides
#[async_trait]
pub trait Transport: Send + Sync {
    fn medium(&self) -> Medium;

    /// Validate and store the link target
    fn configure(&mut self, descriptor: &TransportDescriptor) -> Result<()>;

    fn is_configured(&self) -> bool;

    /// Open the link; a no-op when it is already live
    async fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Release the link; a no-op when it is already released
    async fn close(&mut self, timeout: Duration) -> Result<()>;

    /// Write `data`, returning the number of bytes the medium accepted
    async fn send(
        &mut self,
        data: &[u8],
        timeout: Duration,
        progress: &dyn ProgressSink,
    ) -> Result<usize>;

    /// Bytes waiting to be read, waiting up to `timeout` for the first ones
    async fn inbox(&mut self, timeout: Duration) -> Result<usize>;

    /// Append received bytes to `buffer`
    ///
    /// Waits up to `timeout` for the first bytes. With a nonzero `expected`
    /// it keeps reading until `buffer` holds `expected` bytes or no byte
    /// arrives for `timeout`; with `expected == 0` it takes whatever follows
    /// within the adapter's read gap. Returns the number of bytes appended.
    async fn recv(
        &mut self,
        buffer: &mut BytesMut,
        timeout: Duration,
        expected: usize,
        progress: &dyn ProgressSink,
    ) -> Result<usize>;

    /// Non-blocking liveness probe
    fn is_alive(&self) -> bool;
}

/// Physical medium of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Tcp,
    Udp,
    Serial,
}

impl Medium {
    pub fn name(self) -> &'static str {
        match self {
            Medium::Tcp => "tcp",
            Medium::Udp => "udp",
            Medium::Serial => "serial",
        }
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Medium {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Medium::Tcp),
            "udp" => Ok(Medium::Udp),
            "serial" | "com" => Ok(Medium::Serial),
            other => Err(TransportError::configuration(
                format!("Unknown medium '{}', expected tcp, udp or serial", other),
                Some("medium"),
            )),
        }
    }
}

/// Where a link points: host and port for sockets, device path and baud
/// rate for serial ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub medium: Medium,
    pub address: String,
    pub number: u32,
}

/// Validated form of a [`TransportDescriptor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Socket(SocketAddr),
    Serial { path: String, baud_rate: u32 },
}

impl TransportDescriptor {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            medium: Medium::Tcp,
            address: host.into(),
            number: u32::from(port),
        }
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self {
            medium: Medium::Udp,
            address: host.into(),
            number: u32::from(port),
        }
    }

    pub fn serial(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            medium: Medium::Serial,
            address: path.into(),
            number: baud_rate,
        }
    }

    /// Check the descriptor and resolve it into a [`LinkTarget`]
    pub fn validate(&self) -> Result<LinkTarget> {
        match self.medium {
            Medium::Tcp | Medium::Udp => {
                let port = u16::try_from(self.number)
                    .ok()
                    .filter(|port| *port != 0)
                    .ok_or_else(|| {
                        TransportError::configuration(
                            format!("Port {} outside 1..=65535", self.number),
                            Some("number"),
                        )
                    })?;
                let ip = parse_host(&self.address)?;
                Ok(LinkTarget::Socket(SocketAddr::new(ip, port)))
            }
            Medium::Serial => {
                let path = self.address.trim();
                if path.is_empty() {
                    return Err(TransportError::configuration(
                        "Serial device path is empty",
                        Some("address"),
                    ));
                }
                if self.number == 0 {
                    return Err(TransportError::configuration(
                        "Serial baud rate must be positive",
                        Some("number"),
                    ));
                }
                Ok(LinkTarget::Serial {
                    path: path.to_string(),
                    baud_rate: self.number,
                })
            }
        }
    }
}

impl fmt::Display for TransportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.medium {
            Medium::Serial => write!(f, "serial:{}@{}", self.address, self.number),
            medium => write!(f, "{}://{}:{}", medium, self.address, self.number),
        }
    }
}

/// Empty host and `localhost` mean the loopback address
fn parse_host(address: &str) -> Result<IpAddr> {
    let host = address.trim();
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    host.parse::<IpAddr>().map_err(|e| {
        TransportError::configuration(
            format!("Invalid host address '{}': {}", host, e),
            Some("address"),
        )
    })
}

/// Adapter tuning shared by every medium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Quiet period that ends an untargeted (`expected == 0`) receive
    pub read_gap: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            read_gap: Duration::from_millis(crate::DEFAULT_READ_GAP_MS),
        }
    }
}

/// Transport factory for creating configured adapters
pub struct TransportFactory;

impl TransportFactory {
    /// Create the adapter for `descriptor.medium` and configure it
    pub fn create(
        descriptor: &TransportDescriptor,
        options: TransportOptions,
    ) -> Result<Box<dyn Transport>> {
        let mut transport: Box<dyn Transport> = match descriptor.medium {
            Medium::Tcp => Box::new(TcpTransport::new(options)),
            Medium::Udp => Box::new(UdpTransport::new(options)),
            Medium::Serial => Box::new(SerialTransport::new(options)),
        };
        transport.configure(descriptor)?;
        Ok(transport)
    }
}

/// Bytes reserved in the receive buffer before each read
pub(crate) const READ_CHUNK: usize = 4096;

/// Await `fut` for at most `wait`; a zero wait polls it once
pub(crate) async fn within<F: Future>(wait: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(wait, fut).await.ok()
}

/// Await `fut` until `deadline`, or without bound when there is none
pub(crate) async fn until<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Deadline for `timeout`; a zero timeout means no deadline
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    (!timeout.is_zero()).then(|| Instant::now() + timeout)
}

/// Wait allowed for the next chunk once the first bytes are in
///
/// A receive with a target keeps `timeout` as its inactivity bound until the
/// target is met; a drain (`expected == 0`) only gathers what follows within
/// `read_gap`.
pub(crate) fn chunk_wait(expected: usize, timeout: Duration, read_gap: Duration) -> Duration {
    if expected == 0 {
        read_gap
    } else {
        timeout
    }
}

/// Outcome of a stream read or write loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamOutcome {
    pub bytes: usize,
    /// The peer closed its side of the stream
    pub eof: bool,
}

/// Receive loop shared by the stream media (TCP, serial)
pub(crate) async fn read_stream<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut BytesMut,
    timeout: Duration,
    expected: usize,
    read_gap: Duration,
    progress: &dyn ProgressSink,
) -> io::Result<StreamOutcome> {
    let start = buffer.len();
    let mut wait = timeout;
    let mut eof = false;

    loop {
        buffer.reserve(READ_CHUNK);
        match within(wait, reader.read_buf(&mut *buffer)).await {
            None => break,
            Some(Ok(0)) => {
                eof = true;
                break;
            }
            Some(Ok(_)) => {
                progress.progress(ProgressKind::Recving, buffer.len() - start);
                if expected > 0 && buffer.len() >= expected {
                    break;
                }
                wait = chunk_wait(expected, timeout, read_gap);
            }
            Some(Err(e)) => return Err(e),
        }
    }

    Ok(StreamOutcome {
        bytes: buffer.len() - start,
        eof,
    })
}

/// Write loop shared by the stream media; stops early at the deadline
pub(crate) async fn write_stream<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    timeout: Duration,
    progress: &dyn ProgressSink,
) -> io::Result<StreamOutcome> {
    let deadline = deadline_after(timeout);
    let mut written = 0;
    let mut eof = false;

    while written < data.len() {
        match until(deadline, writer.write(&data[written..])).await {
            None => break,
            Some(Ok(0)) => {
                eof = true;
                break;
            }
            Some(Ok(n)) => {
                written += n;
                progress.progress(ProgressKind::Sending, written);
            }
            Some(Err(e)) => return Err(e),
        }
    }

    if written == data.len() {
        if let Some(flushed) = until(deadline, writer.flush()).await {
            flushed?;
        }
    }

    Ok(StreamOutcome {
        bytes: written,
        eof,
    })
}
