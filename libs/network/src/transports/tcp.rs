//! TCP Transport Implementation
//!
//! Client-side stream link to the device. Inbox checks peek the socket
//! without consuming; liveness combines a pending-error check with a
//! non-blocking peek so a peer that closed its side is noticed while the
//! link sits idle.

use super::{
    deadline_after, read_stream, until, within, write_stream, LinkTarget, Medium, Transport,
    TransportDescriptor, TransportOptions,
};
use crate::event::ProgressSink;
use crate::time::millis;
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Scratch space for inbox peeks
const PEEK_BUFFER_SIZE: usize = 64 * 1024;

/// TCP transport for a single device connection
pub struct TcpTransport {
    options: TransportOptions,
    remote: Option<SocketAddr>,
    stream: Option<TcpStream>,
    /// Peer sent FIN; the stream stays open until `close`
    peer_closed: bool,
    peek_buffer: Vec<u8>,
}

impl TcpTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            remote: None,
            stream: None,
            peer_closed: false,
            peek_buffer: vec![0u8; PEEK_BUFFER_SIZE],
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn stream_mut(&mut self, operation: &str) -> Result<&mut TcpStream> {
        let remote = self.remote;
        self.stream.as_mut().ok_or_else(|| {
            TransportError::connection(format!("TCP link not open for {}", operation), remote)
        })
    }

    /// Peek one byte without waiting; `Some(0)` means the peer closed
    fn probe_peer(stream: &TcpStream) -> Option<usize> {
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match stream.poll_peek(&mut cx, &mut buf) {
            Poll::Ready(Ok(n)) => Some(n),
            Poll::Ready(Err(_)) => Some(0),
            Poll::Pending => None,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn medium(&self) -> Medium {
        Medium::Tcp
    }

    fn configure(&mut self, descriptor: &TransportDescriptor) -> Result<()> {
        if descriptor.medium != Medium::Tcp {
            return Err(TransportError::configuration(
                format!("TCP transport cannot use a {} descriptor", descriptor.medium),
                Some("medium"),
            ));
        }
        if self.stream.is_some() {
            return Err(TransportError::configuration(
                "Cannot reconfigure an open TCP link",
                Some("address"),
            ));
        }
        match descriptor.validate()? {
            LinkTarget::Socket(addr) => {
                self.remote = Some(addr);
                debug!(remote = %addr, "TCP transport configured");
                Ok(())
            }
            LinkTarget::Serial { .. } => Err(TransportError::configuration(
                "TCP transport needs a socket address",
                Some("address"),
            )),
        }
    }

    fn is_configured(&self) -> bool {
        self.remote.is_some()
    }

    async fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.is_alive() {
            return Ok(());
        }
        let remote = self.remote.ok_or_else(|| {
            TransportError::configuration("No remote address configured", Some("address"))
        })?;

        info!("Connecting to TCP device at {}", remote);

        let stream = until(deadline_after(timeout), TcpStream::connect(remote))
            .await
            .ok_or_else(|| TransportError::timeout("TCP connect", millis(timeout)))?
            .map_err(|e| {
                TransportError::connection_with_source(
                    "Failed to connect to TCP device",
                    Some(remote),
                    e,
                )
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        self.stream = Some(stream);
        self.peer_closed = false;
        info!("Connected to TCP device at {}", remote);
        Ok(())
    }

    async fn close(&mut self, timeout: Duration) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        self.peer_closed = false;

        match until(deadline_after(timeout), stream.shutdown()).await {
            Some(Ok(())) => {}
            // The peer may already be gone; the socket is released either way
            Some(Err(e)) => debug!("TCP shutdown reported: {}", e),
            None => return Err(TransportError::timeout("TCP close", millis(timeout))),
        }
        info!(remote = ?self.remote, "TCP link closed");
        Ok(())
    }

    async fn send(
        &mut self,
        data: &[u8],
        timeout: Duration,
        progress: &dyn ProgressSink,
    ) -> Result<usize> {
        let stream = self.stream_mut("send")?;
        let outcome = write_stream(stream, data, timeout, progress)
            .await
            .map_err(|e| TransportError::network_with_source("Failed to write to TCP device", e))?;
        if outcome.eof {
            self.peer_closed = true;
        }

        debug!(
            bytes = outcome.bytes,
            frame = %hex::encode(data),
            "Sent over TCP"
        );
        Ok(outcome.bytes)
    }

    async fn inbox(&mut self, timeout: Duration) -> Result<usize> {
        let remote = self.remote;
        let Self {
            stream,
            peek_buffer,
            peer_closed,
            ..
        } = self;
        let stream = stream.as_mut().ok_or_else(|| {
            TransportError::connection("TCP link not open for inbox", remote)
        })?;

        match within(timeout, stream.peek(peek_buffer)).await {
            None => Ok(0),
            Some(Ok(0)) => {
                *peer_closed = true;
                Ok(0)
            }
            Some(Ok(n)) => Ok(n),
            Some(Err(e)) => Err(TransportError::io("TCP inbox check failed", e)),
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
        let stream = self.stream_mut("recv")?;
        let outcome = read_stream(stream, buffer, timeout, expected, read_gap, progress)
            .await
            .map_err(|e| TransportError::io("TCP receive failed", e))?;
        if outcome.eof {
            self.peer_closed = true;
            debug!("TCP peer closed the stream");
        }

        debug!(bytes = outcome.bytes, expected, "Received over TCP");
        Ok(outcome.bytes)
    }

    fn is_alive(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        if self.peer_closed || !matches!(stream.take_error(), Ok(None)) {
            return false;
        }
        Self::probe_peer(stream) != Some(0)
    }
}
