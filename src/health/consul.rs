use reqwest::Url;
use std::time::Duration;
use tracing::warn;

use super::CheckContext;
use crate::collectors::{Metric, MetricPath};
use crate::error::{CheckerConstructionError, CollectError};

/// Minimal Consul HTTP API client for the status endpoints.
#[derive(Clone)]
pub struct ConsulClient {
    leader_url: Url,
    client: reqwest::Client,
}

impl ConsulClient {
    /// `addr` is `host:port`, or a full base URL.
    pub fn new(addr: &str, timeout: Duration) -> Result<Self, CheckerConstructionError> {
        let base = if addr.contains("://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        let leader_url = Url::parse(&format!("{base}/v1/status/leader")).map_err(|e| {
            CheckerConstructionError::InvalidTarget {
                target: addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { leader_url, client })
    }

    /// The raft leader address, or an empty string while there is none.
    pub async fn leader(&self) -> Result<String, CollectError> {
        let resp = self.client.get(self.leader_url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(CollectError::Status(resp.status()));
        }
        Ok(resp.json::<String>().await?)
    }
}

/// Healthy iff the cluster reports a non-empty leader.
pub struct ConsulLeaderChecker {
    metric: MetricPath,
    client: ConsulClient,
    ctx: CheckContext,
}

impl ConsulLeaderChecker {
    pub fn new(metric: MetricPath, client: ConsulClient, ctx: CheckContext) -> Self {
        Self {
            metric,
            client,
            ctx,
        }
    }

    pub fn metric(&self) -> &MetricPath {
        &self.metric
    }

    pub async fn check(&self) -> Metric {
        let alive = match self.client.leader().await {
            Ok(leader) if !leader.is_empty() => true,
            Ok(_) => {
                warn!(metric = %self.metric, "consul has no leader");
                false
            }
            Err(e) => {
                warn!(metric = %self.metric, error = %e, "consul leader query failed");
                false
            }
        };
        self.ctx.packet(&self.metric, alive)
    }
}
