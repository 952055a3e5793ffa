//! Service health checks. Each checker yields one 1.0/0.0 gauge per cycle.

pub mod consul;
pub mod http;

use std::num::NonZeroU32;
use std::time::Duration;

use crate::collectors::{Metric, MetricPath};
use crate::config::HealthCheckConfig;
use crate::error::CheckerConstructionError;

pub use consul::{ConsulClient, ConsulLeaderChecker};
pub use http::{JsonFieldChecker, UrlChecker};

pub const DEPLOYD_METRIC: &str = "lain.deployd.health";
pub const DEPLOYD_URL: &str = "http://deployd.lain:9003/api/status";
pub const CONSOLE_METRIC: &str = "lain.console.health";
pub const CONSOLE_URL: &str = "http://console.lain/";
pub const SWARM_METRIC: &str = "lain.swarm.health";
pub const SWARM_URL: &str = "http://swarm.lain:2376/_ping";
pub const ETCD_METRIC: &str = "lain.etcd.health";
pub const ETCD_URL: &str = "http://etcd.lain:4001/health";
pub const CONSUL_METRIC: &str = "lain.consul.health";
pub const CONSUL_ADDR: &str = "consul.lain:8500";

/// Labels attached to every health metric.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub cluster: String,
    pub step: NonZeroU32,
    pub timeout: Duration,
}

impl CheckContext {
    fn packet(&self, path: &MetricPath, alive: bool) -> Metric {
        let value = if alive { 1.0 } else { 0.0 };
        Metric::new(path.clone(), value, self.step).with_tag("cluster", self.cluster.clone())
    }
}

/// The closed set of checker kinds.
pub enum HealthChecker {
    Url(UrlChecker),
    JsonField(JsonFieldChecker),
    ConsulLeader(ConsulLeaderChecker),
}

impl HealthChecker {
    pub fn from_config(
        config: &HealthCheckConfig,
        ctx: &CheckContext,
    ) -> Result<Self, CheckerConstructionError> {
        Ok(match config {
            HealthCheckConfig::Url { metric, url } => {
                Self::Url(UrlChecker::new(metric.clone(), url, ctx.clone())?)
            }
            HealthCheckConfig::JsonField { metric, url, field } => Self::JsonField(
                JsonFieldChecker::new(metric.clone(), url, field, ctx.clone())?,
            ),
            HealthCheckConfig::ConsulLeader { metric, addr } => Self::ConsulLeader(
                ConsulLeaderChecker::new(metric.clone(), ConsulClient::new(addr, ctx.timeout)?, ctx.clone()),
            ),
        })
    }

    pub async fn check(&self) -> Metric {
        match self {
            Self::Url(c) => c.check().await,
            Self::JsonField(c) => c.check().await,
            Self::ConsulLeader(c) => c.check().await,
        }
    }

    pub fn metric(&self) -> &MetricPath {
        match self {
            Self::Url(c) => c.metric(),
            Self::JsonField(c) => c.metric(),
            Self::ConsulLeader(c) => c.metric(),
        }
    }
}

/// Builds every configured checker, in configuration order.
pub fn build_checkers(
    configs: &[HealthCheckConfig],
    ctx: &CheckContext,
) -> Result<Vec<HealthChecker>, CheckerConstructionError> {
    configs
        .iter()
        .map(|config| HealthChecker::from_config(config, ctx))
        .collect()
}

/// The historical target set: deployd, console and swarm liveness, etcd
/// health field and consul leader.
pub fn default_checks() -> Vec<HealthCheckConfig> {
    let path = MetricPath::from_static;
    vec![
        HealthCheckConfig::Url {
            metric: path(DEPLOYD_METRIC),
            url: DEPLOYD_URL.to_string(),
        },
        HealthCheckConfig::Url {
            metric: path(CONSOLE_METRIC),
            url: CONSOLE_URL.to_string(),
        },
        HealthCheckConfig::Url {
            metric: path(SWARM_METRIC),
            url: SWARM_URL.to_string(),
        },
        HealthCheckConfig::JsonField {
            metric: path(ETCD_METRIC),
            url: ETCD_URL.to_string(),
            field: http::HEALTH_FIELD.to_string(),
        },
        HealthCheckConfig::ConsulLeader {
            metric: path(CONSUL_METRIC),
            addr: CONSUL_ADDR.to_string(),
        },
    ]
}
