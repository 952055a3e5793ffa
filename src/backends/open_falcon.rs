use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, Instrument, Span};

use super::Backend;
use crate::collectors::Metric;
use crate::error::DeliveryError;

/// Host group reported as `endpoint` when the config does not name one.
pub const DEFAULT_ENDPOINT: &str = "lain";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FalconPacket<'a> {
    metric: &'a str,
    endpoint: &'a str,
    tags: String,
    value: f64,
    timestamp: i64,
    counter_type: &'static str,
    step: u32,
}

/// Open-Falcon transfer push: the whole batch as one JSON array POSTed to
/// `http://<addr>/v1/push`.
pub struct OpenFalconBackend {
    push_url: String,
    endpoint: String,
    client: Option<reqwest::Client>,
    span: Span,
}

impl OpenFalconBackend {
    pub fn new(addr: &str, endpoint: &str) -> Result<Self, DeliveryError> {
        let push_url = if addr.contains("://") {
            format!("{}/v1/push", addr.trim_end_matches('/'))
        } else {
            format!("http://{addr}/v1/push")
        };
        // a fresh connection per push
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()?;
        let span = tracing::info_span!("backend", kind = "open-falcon", url = %push_url);
        Ok(Self {
            push_url,
            endpoint: endpoint.to_string(),
            client: Some(client),
            span,
        })
    }

    pub fn push_url(&self) -> &str {
        &self.push_url
    }

    fn encode(&self, metrics: &[Metric]) -> Result<Vec<u8>, DeliveryError> {
        let packets: Vec<FalconPacket<'_>> = metrics
            .iter()
            .map(|m| FalconPacket {
                metric: m.path.as_str(),
                endpoint: &self.endpoint,
                tags: m.joined_tags(),
                value: m.value,
                timestamp: m.timestamp.timestamp(),
                counter_type: "GAUGE",
                step: m.step.get(),
            })
            .collect();
        Ok(serde_json::to_vec(&packets)?)
    }

    async fn push(&self, metrics: &[Metric]) -> Result<(), DeliveryError> {
        let client = self.client.as_ref().ok_or(DeliveryError::Closed)?;
        let body = self.encode(metrics)?;
        let resp = client
            .post(&self.push_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(DeliveryError::Status(resp.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for OpenFalconBackend {
    async fn send(&mut self, metrics: &[Metric]) {
        if metrics.is_empty() {
            return;
        }
        async {
            match self.push(metrics).await {
                Ok(()) => debug!(count = metrics.len(), "OpenFalconBackend.send() succeed"),
                Err(e) => error!(dropped = metrics.len(), error = %e, "OpenFalconBackend.send() failed"),
            }
        }
        .instrument(self.span.clone())
        .await
    }

    async fn close(&mut self) -> Result<(), DeliveryError> {
        self.client.take();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "open-falcon"
    }
}
