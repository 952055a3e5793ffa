//! Graphite plaintext sink: one `<path> <value> <unix-seconds>\n` line per
//! metric over UDP or TCP.

use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, error, info, warn, Instrument, Span};

use super::{Backend, ReconnectPolicy};
use crate::collectors::Metric;
use crate::error::DeliveryError;

const DIAL_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
}

/// An established line-oriented connection.
#[async_trait]
pub trait LineConn: Send {
    async fn write_line(&mut self, line: &[u8]) -> io::Result<()>;
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Opens connections to the sink address.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<Box<dyn LineConn>>;
}

pub struct NetDialer {
    transport: Transport,
    timeout: Duration,
}

impl NetDialer {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            timeout: DIAL_TIMEOUT,
        }
    }

    async fn dial_udp(addr: &str) -> io::Result<Box<dyn LineConn>> {
        let target = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {addr}")))?;
        let local = if target.is_ipv4() {
            SocketAddr::from(([0u8; 4], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        Ok(Box::new(UdpConn(socket)))
    }

    async fn dial_tcp(addr: &str) -> io::Result<Box<dyn LineConn>> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Box::new(TcpConn(stream)))
    }
}

#[async_trait]
impl Dialer for NetDialer {
    async fn dial(&self, addr: &str) -> io::Result<Box<dyn LineConn>> {
        let dial = async {
            match self.transport {
                Transport::Udp => Self::dial_udp(addr).await,
                Transport::Tcp => Self::dial_tcp(addr).await,
            }
        };
        tokio::time::timeout(self.timeout, dial)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("dial {addr} timed out")))?
    }
}

struct UdpConn(UdpSocket);

#[async_trait]
impl LineConn for UdpConn {
    async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.0.send(line).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct TcpConn(TcpStream);

#[async_trait]
impl LineConn for TcpConn {
    async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.0.write_all(line).await?;
        self.0.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.0.shutdown().await
    }
}

/// Renders one metric in plaintext protocol form, tag values prefixed.
pub fn format_line(metric: &Metric) -> String {
    format!(
        "{} {} {}\n",
        metric.dotted_name(),
        metric.value,
        metric.timestamp.timestamp()
    )
}

pub struct GraphiteBackend<D = NetDialer> {
    addr: String,
    dialer: D,
    policy: ReconnectPolicy,
    conn: Option<Box<dyn LineConn>>,
    closed: bool,
    span: Span,
}

impl<D: Dialer> GraphiteBackend<D> {
    /// Connects to `addr` immediately; failure here is a startup error.
    pub async fn connect(addr: &str, dialer: D, policy: ReconnectPolicy) -> Result<Self, DeliveryError> {
        let conn = dialer.dial(addr).await?;
        let span = tracing::info_span!("backend", kind = "graphite", addr = %addr);
        span.in_scope(|| info!("connected"));
        Ok(Self {
            addr: addr.to_string(),
            dialer,
            policy,
            conn: Some(conn),
            closed: false,
            span,
        })
    }

    async fn write_batch(&mut self, metrics: &[Metric]) -> Result<(), (usize, io::Error)> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| (0, io::Error::from(io::ErrorKind::NotConnected)))?;
        for (index, metric) in metrics.iter().enumerate() {
            conn.write_line(format_line(metric).as_bytes())
                .await
                .map_err(|e| (index, e))?;
        }
        Ok(())
    }

    async fn drop_connection(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.shutdown().await {
                debug!(error = %e, "shutdown of broken connection failed");
            }
        }
    }

    /// Dials up to `attempts` times, honouring the policy's delays.
    async fn redial(&mut self, attempts: u32) -> bool {
        for attempt in 0..attempts {
            let delay = self.policy.delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.dialer.dial(&self.addr).await {
                Ok(conn) => {
                    info!(attempt, "reconnected");
                    self.conn = Some(conn);
                    return true;
                }
                Err(e) => warn!(attempt, error = %e, "reconnect failed"),
            }
        }
        false
    }
}

#[async_trait]
impl<D: Dialer> Backend for GraphiteBackend<D> {
    async fn send(&mut self, metrics: &[Metric]) {
        if metrics.is_empty() {
            return;
        }
        let span = self.span.clone();
        async {
            if self.closed {
                error!(dropped = metrics.len(), error = %DeliveryError::Closed, "Graphite.send() failed");
                return;
            }
            if self.conn.is_none() && !self.redial(1).await {
                error!(dropped = metrics.len(), "Graphite.send() failed: no connection");
                return;
            }

            match self.write_batch(metrics).await {
                Ok(()) => debug!(count = metrics.len(), "Graphite.send() succeed"),
                Err((index, e)) => {
                    error!(
                        metric = %metrics[index].dotted_name(),
                        dropped = metrics.len() - index,
                        error = %DeliveryError::Io(e),
                        "Graphite.send() failed"
                    );
                    self.drop_connection().await;
                    let attempts = self.policy.attempts();
                    if attempts > 0 && !self.redial(attempts).await {
                        error!(attempts, "giving up on reconnect until next send");
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn close(&mut self) -> Result<(), DeliveryError> {
        self.closed = true;
        match self.conn.take() {
            Some(mut conn) => Ok(conn.shutdown().await?),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "graphite"
    }
}
