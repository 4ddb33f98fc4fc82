//! UDP Transport Implementation
//!
//! Datagram link to the device. Binding the local endpoint is what
//! "connected" means for UDP. After every receive cycle the socket is
//! dropped and re-bound to the same local port, which discards anything
//! the device sent after the reply was collected; a cycle whose re-bind
//! fails is reported as failed even when bytes were read.

use super::{
    chunk_wait, deadline_after, until, within, LinkTarget, Medium, Transport, TransportDescriptor,
    TransportOptions,
};
use crate::event::{ProgressKind, ProgressSink};
use crate::time::millis;
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::BytesMut;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Largest UDP payload over IPv4
const MAX_DATAGRAM_SIZE: usize = 65_507;

/// UDP transport for datagram communication with one device
pub struct UdpTransport {
    options: TransportOptions,
    remote: Option<SocketAddr>,
    socket: Option<UdpSocket>,
    /// Local port recorded at the first bind and reused by every re-bind
    pub(crate) local_port: u16,
    datagram: Vec<u8>,
}

impl UdpTransport {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            remote: None,
            socket: None,
            local_port: 0,
            datagram: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn bind_ip(&self) -> IpAddr {
        match self.remote {
            Some(SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    fn not_open(&self, operation: &str) -> TransportError {
        TransportError::connection(format!("UDP link not bound for {}", operation), self.remote)
    }

    async fn rebind(&mut self) -> Result<()> {
        self.socket = None;
        let local = SocketAddr::new(self.bind_ip(), self.local_port);
        match UdpSocket::bind(local).await {
            Ok(socket) => {
                self.socket = Some(socket);
                Ok(())
            }
            Err(e) => {
                warn!(port = self.local_port, "UDP re-bind failed: {}", e);
                Err(TransportError::Rebind {
                    port: self.local_port,
                    source: e,
                })
            }
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn medium(&self) -> Medium {
        Medium::Udp
    }

    fn configure(&mut self, descriptor: &TransportDescriptor) -> Result<()> {
        if descriptor.medium != Medium::Udp {
            return Err(TransportError::configuration(
                format!("UDP transport cannot use a {} descriptor", descriptor.medium),
                Some("medium"),
            ));
        }
        if self.socket.is_some() {
            return Err(TransportError::configuration(
                "Cannot reconfigure a bound UDP link",
                Some("address"),
            ));
        }
        match descriptor.validate()? {
            LinkTarget::Socket(addr) => {
                self.remote = Some(addr);
                debug!(remote = %addr, "UDP transport configured");
                Ok(())
            }
            LinkTarget::Serial { .. } => Err(TransportError::configuration(
                "UDP transport needs a socket address",
                Some("address"),
            )),
        }
    }

    fn is_configured(&self) -> bool {
        self.remote.is_some()
    }

    async fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        let remote = self.remote.ok_or_else(|| {
            TransportError::configuration("No remote address configured", Some("address"))
        })?;

        let local = SocketAddr::new(self.bind_ip(), self.local_port);
        let socket = until(deadline_after(timeout), UdpSocket::bind(local))
            .await
            .ok_or_else(|| TransportError::timeout("UDP bind", millis(timeout)))?
            .map_err(|e| {
                TransportError::network_with_source(
                    format!("Failed to bind UDP socket on {}", local),
                    e,
                )
            })?;

        if self.local_port == 0 {
            self.local_port = socket
                .local_addr()
                .map_err(|e| TransportError::io("Failed to read UDP local address", e))?
                .port();
        }

        info!(
            remote = %remote,
            local_port = self.local_port,
            "UDP link bound"
        );
        self.socket = Some(socket);
        Ok(())
    }

    async fn close(&mut self, _timeout: Duration) -> Result<()> {
        if self.socket.take().is_some() {
            info!(remote = ?self.remote, "UDP link closed");
        }
        Ok(())
    }

    async fn send(
        &mut self,
        data: &[u8],
        timeout: Duration,
        progress: &dyn ProgressSink,
    ) -> Result<usize> {
        let remote = self.remote.ok_or_else(|| self.not_open("send"))?;
        let socket = self.socket.as_ref().ok_or_else(|| self.not_open("send"))?;

        let sent = match until(deadline_after(timeout), socket.send_to(data, remote)).await {
            Some(result) => result.map_err(|e| {
                TransportError::network_with_source(format!("Failed to send to {}", remote), e)
            })?,
            None => 0,
        };
        progress.progress(ProgressKind::Sending, sent);

        debug!(
            remote = %remote,
            bytes = sent,
            frame = %hex::encode(data),
            "Sent UDP datagram"
        );
        Ok(sent)
    }

    async fn inbox(&mut self, timeout: Duration) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or_else(|| self.not_open("inbox"))?;
        match within(timeout, socket.peek_from(&mut self.datagram)).await {
            None => Ok(0),
            Some(Ok((n, _from))) => Ok(n),
            Some(Err(e)) => Err(TransportError::io("UDP inbox check failed", e)),
        }
    }

    async fn recv(
        &mut self,
        buffer: &mut BytesMut,
        timeout: Duration,
        expected: usize,
        progress: &dyn ProgressSink,
    ) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or_else(|| self.not_open("recv"))?;
        let start = buffer.len();
        let mut wait = timeout;
        let mut failure = None;

        loop {
            match within(wait, socket.recv_from(&mut self.datagram)).await {
                None => break,
                Some(Ok((n, from))) => {
                    buffer.extend_from_slice(&self.datagram[..n]);
                    progress.progress(ProgressKind::Recving, buffer.len() - start);
                    debug!(%from, bytes = n, "Received UDP datagram");
                    if expected > 0 && buffer.len() >= expected {
                        break;
                    }
                    wait = chunk_wait(expected, timeout, self.options.read_gap);
                }
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let received = buffer.len() - start;
        self.rebind().await?;

        if let Some(e) = failure {
            return Err(TransportError::io("UDP receive failed", e));
        }
        Ok(received)
    }

    fn is_alive(&self) -> bool {
        self.socket.is_some()
    }
}
