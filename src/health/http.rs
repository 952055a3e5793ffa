use std::collections::HashMap;

use reqwest::{StatusCode, Url};
use tracing::{debug, warn};

use super::CheckContext;
use crate::collectors::{Metric, MetricPath};
use crate::error::CheckerConstructionError;

pub const HEALTH_FIELD: &str = "health";

fn parse_target(url: &str) -> Result<Url, CheckerConstructionError> {
    let parsed = Url::parse(url).map_err(|e| CheckerConstructionError::InvalidTarget {
        target: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(CheckerConstructionError::InvalidTarget {
            target: url.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn client(ctx: &CheckContext) -> Result<reqwest::Client, CheckerConstructionError> {
    Ok(reqwest::Client::builder().timeout(ctx.timeout).build()?)
}

/// Healthy iff a GET answers exactly 200. The body is ignored.
pub struct UrlChecker {
    metric: MetricPath,
    url: Url,
    client: reqwest::Client,
    ctx: CheckContext,
}

impl UrlChecker {
    pub fn new(metric: MetricPath, url: &str, ctx: CheckContext) -> Result<Self, CheckerConstructionError> {
        Ok(Self {
            metric,
            url: parse_target(url)?,
            client: client(&ctx)?,
            ctx,
        })
    }

    pub fn metric(&self) -> &MetricPath {
        &self.metric
    }

    pub async fn check(&self) -> Metric {
        let alive = match self.client.get(self.url.clone()).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => true,
            Ok(resp) => {
                warn!(metric = %self.metric, url = %self.url, status = %resp.status(), "unhealthy status");
                false
            }
            Err(e) => {
                warn!(metric = %self.metric, url = %self.url, error = %e, "health request failed");
                false
            }
        };
        self.ctx.packet(&self.metric, alive)
    }
}

/// Healthy iff a GET answers 200 with a flat JSON object of strings whose
/// `field` is present and not `"false"`.
pub struct JsonFieldChecker {
    metric: MetricPath,
    url: Url,
    field: String,
    client: reqwest::Client,
    ctx: CheckContext,
}

impl JsonFieldChecker {
    pub fn new(
        metric: MetricPath,
        url: &str,
        field: &str,
        ctx: CheckContext,
    ) -> Result<Self, CheckerConstructionError> {
        Ok(Self {
            metric,
            url: parse_target(url)?,
            field: field.to_string(),
            client: client(&ctx)?,
            ctx,
        })
    }

    pub fn metric(&self) -> &MetricPath {
        &self.metric
    }

    async fn probe(&self) -> bool {
        let resp = match self.client.get(self.url.clone()).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => resp,
            Ok(resp) => {
                warn!(metric = %self.metric, url = %self.url, status = %resp.status(), "unhealthy status");
                return false;
            }
            Err(e) => {
                warn!(metric = %self.metric, url = %self.url, error = %e, "health request failed");
                return false;
            }
        };

        let data: HashMap<String, String> = match resp.json().await {
            Ok(data) => data,
            Err(e) => {
                warn!(metric = %self.metric, error = %e, "failed to decode health body");
                return false;
            }
        };
        match data.get(&self.field) {
            Some(value) => value != "false",
            None => {
                debug!(metric = %self.metric, field = %self.field, "health field missing");
                false
            }
        }
    }

    pub async fn check(&self) -> Metric {
        let alive = self.probe().await;
        self.ctx.packet(&self.metric, alive)
    }
}
