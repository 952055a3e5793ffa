use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use crate::backends::open_falcon::DEFAULT_ENDPOINT;
use crate::backends::{ReconnectPolicy, Transport};
use crate::collectors::cluster_status::DEFAULT_SWARM_INFO_URL;
use crate::collectors::MetricPath;
use crate::error::ConfigError;
use crate::health::{default_checks, http::HEALTH_FIELD};

/// One entry of `health_checks`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthCheckConfig {
    Url {
        metric: MetricPath,
        url: String,
    },
    JsonField {
        metric: MetricPath,
        url: String,
        #[serde(default = "default_health_field")]
        field: String,
    },
    ConsulLeader {
        metric: MetricPath,
        addr: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendSettings {
    Graphite {
        addr: String,
        transport: Transport,
        reconnect: ReconnectPolicy,
    },
    OpenFalcon {
        addr: String,
        endpoint: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    backend_type: String,
    #[serde(default)]
    graphite_addr: Option<String>,
    #[serde(default)]
    graphite_transport: Transport,
    #[serde(default = "default_reconnect_attempts")]
    graphite_reconnect_attempts: u32,
    #[serde(default)]
    open_falcon_addr: Option<String>,
    #[serde(default = "default_endpoint")]
    open_falcon_endpoint: String,
    #[serde(default = "default_cluster_name")]
    cluster_name: String,
    #[serde(default = "default_collect_interval")]
    collect_interval_secs: u32,
    #[serde(default = "default_health_check_interval")]
    health_check_interval_secs: u32,
    #[serde(default = "default_check_timeout")]
    check_timeout_secs: u64,
    #[serde(default = "default_swarm_info_url")]
    swarm_info_url: String,
    #[serde(default)]
    health_checks: Option<Vec<HealthCheckConfig>>,
}

fn default_health_field() -> String {
    HEALTH_FIELD.to_string()
}

fn default_reconnect_attempts() -> u32 {
    1
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_cluster_name() -> String {
    "lain".to_string()
}

fn default_collect_interval() -> u32 {
    3 * 60
}

fn default_health_check_interval() -> u32 {
    60
}

fn default_check_timeout() -> u64 {
    5
}

fn default_swarm_info_url() -> String {
    DEFAULT_SWARM_INFO_URL.to_string()
}

/// Resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub backend: BackendSettings,
    pub cluster_name: String,
    /// Seconds between resource collections.
    pub collect_interval: NonZeroU32,
    /// Seconds between health-check rounds.
    pub health_check_interval: NonZeroU32,
    pub check_timeout: Duration,
    pub swarm_info_url: String,
    pub health_checks: Vec<HealthCheckConfig>,
}

fn non_empty(addr: Option<String>) -> Option<String> {
    addr.filter(|a| !a.trim().is_empty())
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content)?;

        let backend = match raw.backend_type.as_str() {
            "graphite" => BackendSettings::Graphite {
                addr: non_empty(raw.graphite_addr).ok_or(ConfigError::MissingAddress("graphite"))?,
                transport: raw.graphite_transport,
                reconnect: ReconnectPolicy::from_attempts(raw.graphite_reconnect_attempts),
            },
            "open-falcon" => BackendSettings::OpenFalcon {
                addr: non_empty(raw.open_falcon_addr)
                    .ok_or(ConfigError::MissingAddress("open-falcon"))?,
                endpoint: raw.open_falcon_endpoint,
            },
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let collect_interval = NonZeroU32::new(raw.collect_interval_secs)
            .ok_or(ConfigError::InvalidInterval("collect_interval_secs"))?;
        let health_check_interval = NonZeroU32::new(raw.health_check_interval_secs)
            .ok_or(ConfigError::InvalidInterval("health_check_interval_secs"))?;
        if raw.check_timeout_secs == 0 {
            return Err(ConfigError::InvalidInterval("check_timeout_secs"));
        }

        Ok(Self {
            backend,
            cluster_name: raw.cluster_name,
            collect_interval,
            health_check_interval,
            check_timeout: Duration::from_secs(raw.check_timeout_secs),
            swarm_info_url: raw.swarm_info_url,
            health_checks: raw.health_checks.unwrap_or_else(default_checks),
        })
    }

    pub fn collect_period(&self) -> Duration {
        Duration::from_secs(self.collect_interval.get().into())
    }

    pub fn health_check_period(&self) -> Duration {
        Duration::from_secs(self.health_check_interval.get().into())
    }
}
