//! Delivery backends for collected metrics.
//!
//! A backend owns its network resource for the life of the process. `send`
//! never fails from the caller's point of view: errors are logged and the
//! batch is dropped. Backends do no internal locking, so callers serialize
//! access to a shared instance.

pub mod graphite;
pub mod open_falcon;

use async_trait::async_trait;
use std::time::Duration;

use crate::collectors::Metric;
use crate::config::BackendSettings;
use crate::error::DeliveryError;

pub use graphite::{GraphiteBackend, NetDialer, Transport};
pub use open_falcon::OpenFalconBackend;

#[async_trait]
pub trait Backend: Send {
    /// Delivers `metrics` in order, best effort.
    async fn send(&mut self, metrics: &[Metric]);

    /// Releases the network resource. Safe to call more than once.
    async fn close(&mut self) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}

/// What a connection-oriented backend does after a failed write.
///
/// The failed sample is never retried; the policy only decides how hard to
/// try to have a working connection for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Leave the connection closed until the next `send`.
    Never,
    /// One immediate reconnect to the same address, then drop.
    #[default]
    ReconnectOnce,
    /// Up to `attempts` reconnects, doubling `backoff` between them.
    Bounded { attempts: u32, backoff: Duration },
}

impl ReconnectPolicy {
    /// Maps the configured attempt count onto a policy.
    pub fn from_attempts(attempts: u32) -> Self {
        match attempts {
            0 => Self::Never,
            1 => Self::ReconnectOnce,
            n => Self::Bounded {
                attempts: n,
                backoff: Duration::from_millis(500),
            },
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Never => 0,
            Self::ReconnectOnce => 1,
            Self::Bounded { attempts, .. } => *attempts,
        }
    }

    /// Delay before reconnect number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Bounded { backoff, .. } if attempt > 0 => {
                backoff.saturating_mul(1u32 << (attempt - 1).min(16))
            }
            _ => Duration::ZERO,
        }
    }
}

/// The configured backend. One variant per supported `backend_type`.
pub enum AnyBackend {
    Graphite(GraphiteBackend),
    OpenFalcon(OpenFalconBackend),
}

impl AnyBackend {
    pub async fn connect(settings: &BackendSettings) -> Result<Self, DeliveryError> {
        match settings {
            BackendSettings::Graphite {
                addr,
                transport,
                reconnect,
            } => {
                let backend =
                    GraphiteBackend::connect(addr, NetDialer::new(*transport), *reconnect).await?;
                Ok(Self::Graphite(backend))
            }
            BackendSettings::OpenFalcon { addr, endpoint } => {
                Ok(Self::OpenFalcon(OpenFalconBackend::new(addr, endpoint)?))
            }
        }
    }
}

#[async_trait]
impl Backend for AnyBackend {
    async fn send(&mut self, metrics: &[Metric]) {
        match self {
            Self::Graphite(b) => b.send(metrics).await,
            Self::OpenFalcon(b) => b.send(metrics).await,
        }
    }

    async fn close(&mut self) -> Result<(), DeliveryError> {
        match self {
            Self::Graphite(b) => b.close().await,
            Self::OpenFalcon(b) => b.close().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Graphite(b) => b.name(),
            Self::OpenFalcon(b) => b.name(),
        }
    }
}
