//! Reserved-memory collection from the swarm manager's `/info` endpoint.
//!
//! The manager renders its per-node state as a flat list of `[label, value]`
//! rows meant for a terminal, not a schema. After the `Nodes` row (whose value
//! is the node count) every node occupies a block of nine rows:
//!
//! ```text
//! +0  " node-a"             "10.0.0.1:2375"
//! +1  "  └ ID"              ...
//! +2  "  └ Status"          "Healthy"
//! +3  "  └ Containers"      ...
//! +4  "  └ Reserved CPUs"   "0 / 8"
//! +5  "  └ Reserved Memory" "512 MiB / 2 GiB"
//! +6  "  └ Labels"          ...
//! +7  "  └ UpdatedAt"       ...
//! +8  "  └ ServerVersion"   ...
//! ```
//!
//! Only rows `+0` (name, from the label) and `+5` (memory) are read. The last
//! block may be shorter than the stride as long as row `+5` is present.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, Instrument, Span};

use super::types::{Collector, Metric, MetricPath};
use super::units::parse_byte_size;
use crate::error::{CollectError, ParseError};

/// Label of the row carrying the node count.
pub const NODES_LABEL: &str = "Nodes";
/// Rows per node block.
pub const NODE_BLOCK_STRIDE: usize = 9;
/// Offset of the `reserved / total` memory row inside a node block.
pub const MEMORY_ROW_OFFSET: usize = 5;

pub const DOCKER_RESERVED_MEMORY_METRIC: &str = "lain.cluster.node.docker_reserved_memory";
pub const DEFAULT_SWARM_INFO_URL: &str = "http://swarm.lain:2376/info";

pub type StatusRow = (String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNodeInfo {
    pub name: String,
    pub reserved_memory_bytes: i64,
    pub total_memory_bytes: i64,
}

#[derive(Debug, Deserialize)]
pub struct SwarmInfoResponse {
    #[serde(rename = "SystemStatus", default)]
    pub system_status: Vec<StatusRow>,
}

/// Extracts one [`ClusterNodeInfo`] per node block following the `Nodes` row.
pub fn parse_cluster_status(rows: &[StatusRow]) -> Result<Vec<ClusterNodeInfo>, ParseError> {
    let nodes_row = rows
        .iter()
        .position(|(label, _)| label == NODES_LABEL)
        .ok_or(ParseError::MissingNodesLabel)?;

    let raw_count = &rows[nodes_row].1;
    let count: usize = raw_count
        .trim()
        .parse()
        .map_err(|_| ParseError::InvalidNodeCount(raw_count.clone()))?;

    if count == 0 {
        return Ok(Vec::new());
    }
    // The count comes off the wire: the last block's memory row must exist
    // before anything is sized by it.
    let first_block = nodes_row + 1;
    let last_memory_row = (count - 1)
        .checked_mul(NODE_BLOCK_STRIDE)
        .and_then(|r| r.checked_add(first_block + MEMORY_ROW_OFFSET));
    match last_memory_row {
        Some(row) if row < rows.len() => {}
        row => {
            return Err(ParseError::TruncatedBlock {
                node: count - 1,
                row: row.unwrap_or(usize::MAX),
                len: rows.len(),
            })
        }
    }

    let mut nodes = Vec::with_capacity(count);
    let mut offset = first_block;
    for _ in 0..count {
        let memory_row = offset + MEMORY_ROW_OFFSET;
        let memory = &rows[memory_row].1;
        let (reserved, total) = memory
            .split_once('/')
            .ok_or_else(|| ParseError::MalformedMemory(memory.clone()))?;

        nodes.push(ClusterNodeInfo {
            name: rows[offset].0.trim().to_string(),
            reserved_memory_bytes: parse_byte_size(reserved)?,
            total_memory_bytes: parse_byte_size(total)?,
        });
        offset += NODE_BLOCK_STRIDE;
    }

    Ok(nodes)
}

/// Fetches and parses the cluster status table.
#[derive(Clone)]
pub struct SwarmStatusClient {
    url: String,
    client: reqwest::Client,
}

impl SwarmStatusClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<Vec<ClusterNodeInfo>, CollectError> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(CollectError::Status(resp.status()));
        }
        let info: SwarmInfoResponse = resp.json().await?;
        Ok(parse_cluster_status(&info.system_status)?)
    }
}

/// Turns each node's reserved memory into a metric tagged with the node name.
pub struct ClusterMemoryCollector {
    status: SwarmStatusClient,
    path: MetricPath,
    step: NonZeroU32,
    span: Span,
}

impl ClusterMemoryCollector {
    pub fn new(status: SwarmStatusClient, path: MetricPath, step: NonZeroU32) -> Self {
        let span = tracing::info_span!("collector", url = %status.url(), metric = %path);
        Self {
            status,
            path,
            step,
            span,
        }
    }
}

#[async_trait]
impl Collector for ClusterMemoryCollector {
    async fn collect(&self) -> Result<Vec<Metric>, CollectError> {
        async {
            let nodes = self.status.fetch().await?;
            debug!(nodes = nodes.len(), "parsed cluster status");

            let now = Utc::now();
            Ok(nodes
                .into_iter()
                .map(|node| {
                    Metric::new(self.path.clone(), node.reserved_memory_bytes as f64, self.step)
                        .with_tag("node", node.name)
                        .at(now)
                })
                .collect())
        }
        .instrument(self.span.clone())
        .await
    }

    fn name(&self) -> &str {
        "docker_reserved_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};

    fn row(label: &str, value: &str) -> StatusRow {
        (label.to_string(), value.to_string())
    }

    fn node_block(name: &str, memory: &str) -> Vec<StatusRow> {
        vec![
            row(&format!(" {name}"), "10.0.0.1:2375"),
            row("  └ ID", "ABCD"),
            row("  └ Status", "Healthy"),
            row("  └ Containers", "3"),
            row("  └ Reserved CPUs", "0 / 8"),
            row("  └ Reserved Memory", memory),
            row("  └ Labels", "executiondriver="),
            row("  └ UpdatedAt", "2017-01-01T00:00:00Z"),
            row("  └ ServerVersion", "1.12.6"),
        ]
    }

    fn two_node_table() -> Vec<StatusRow> {
        let mut rows = vec![row("Role", "primary"), row("Strategy", "spread"), row("Nodes", "2")];
        rows.extend(node_block("node-a", "512 MiB / 2 GiB"));
        rows.extend(node_block("node-b", "1.5 GiB / 4 GiB"));
        rows
    }

    #[test]
    fn test_parse_two_nodes() {
        let nodes = parse_cluster_status(&two_node_table()).unwrap();
        assert_eq!(
            nodes,
            vec![
                ClusterNodeInfo {
                    name: "node-a".to_string(),
                    reserved_memory_bytes: 536_870_912,
                    total_memory_bytes: 2_147_483_648,
                },
                ClusterNodeInfo {
                    name: "node-b".to_string(),
                    reserved_memory_bytes: 1_610_612_736,
                    total_memory_bytes: 4_294_967_296,
                },
            ]
        );
    }

    #[test]
    fn test_parse_short_last_block() {
        let rows = vec![
            row("Nodes", "1"),
            row("node-a", "-"),
            row("", ""),
            row("", ""),
            row("", ""),
            row("", ""),
            row("mem", "512 MiB / 2 GiB"),
            row("", ""),
            row("", ""),
        ];
        let nodes = parse_cluster_status(&rows).unwrap();
        assert_eq!(
            nodes,
            vec![ClusterNodeInfo {
                name: "node-a".to_string(),
                reserved_memory_bytes: 536_870_912,
                total_memory_bytes: 2_147_483_648,
            }]
        );
    }

    #[test]
    fn test_parse_zero_nodes() {
        assert!(parse_cluster_status(&[row("Nodes", "0")]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_nodes_label() {
        let rows = vec![row("Role", "primary"), row("Strategy", "spread")];
        assert_eq!(parse_cluster_status(&rows), Err(ParseError::MissingNodesLabel));
        assert_eq!(parse_cluster_status(&[]), Err(ParseError::MissingNodesLabel));
    }

    #[test]
    fn test_invalid_node_count() {
        let rows = vec![row("Nodes", "two")];
        assert_eq!(
            parse_cluster_status(&rows),
            Err(ParseError::InvalidNodeCount("two".to_string()))
        );
    }

    #[test]
    fn test_block_overrun() {
        let mut rows = vec![row("Nodes", "2")];
        rows.extend(node_block("node-a", "512 MiB / 2 GiB"));
        rows.extend(node_block("node-b", "1 GiB / 2 GiB").into_iter().take(4));
        assert_eq!(
            parse_cluster_status(&rows),
            Err(ParseError::TruncatedBlock {
                node: 1,
                row: 15,
                len: 14,
            })
        );
    }

    #[test]
    fn test_oversized_node_count_is_truncated() {
        assert_eq!(
            parse_cluster_status(&[row("Nodes", "1000000000000")]),
            Err(ParseError::TruncatedBlock {
                node: 999_999_999_999,
                row: 9_000_000_000_000 - 9 + 6,
                len: 1,
            })
        );
        assert!(matches!(
            parse_cluster_status(&[row("Nodes", &usize::MAX.to_string())]),
            Err(ParseError::TruncatedBlock { row: usize::MAX, len: 1, .. })
        ));
    }

    #[test]
    fn test_bad_memory_field() {
        let mut rows = vec![row("Nodes", "1")];
        rows.extend(node_block("node-a", "512 MiB"));
        assert_eq!(
            parse_cluster_status(&rows),
            Err(ParseError::MalformedMemory("512 MiB".to_string()))
        );

        let mut rows = vec![row("Nodes", "1")];
        rows.extend(node_block("node-a", "512 MB / 2 GiB"));
        assert!(matches!(
            parse_cluster_status(&rows),
            Err(ParseError::UnknownUnit { .. })
        ));
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_collector_builds_node_metrics() {
        let body = serde_json::json!({ "SystemStatus": two_node_table() });
        let base = serve(Router::new().route("/info", get(move || async move { Json(body) }))).await;

        let status = SwarmStatusClient::new(format!("{base}/info"), Duration::from_secs(5)).unwrap();
        let collector = ClusterMemoryCollector::new(
            status,
            MetricPath::new(DOCKER_RESERVED_MEMORY_METRIC).unwrap(),
            NonZeroU32::new(180).unwrap(),
        );

        let metrics = collector.collect().await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].value, 536_870_912.0);
        assert_eq!(metrics[0].tags.get("node").map(String::as_str), Some("node-a"));
        assert_eq!(metrics[0].step.get(), 180);
        assert_eq!(
            metrics[1].dotted_name(),
            "node-b.lain.cluster.node.docker_reserved_memory"
        );
    }

    #[tokio::test]
    async fn test_fetch_non_200() {
        let base = serve(Router::new().route(
            "/info",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let status = SwarmStatusClient::new(format!("{base}/info"), Duration::from_secs(5)).unwrap();
        match status.fetch().await {
            Err(CollectError::Status(code)) => assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_parse_failure() {
        let body = serde_json::json!({ "SystemStatus": [["Role", "primary"]] });
        let base = serve(Router::new().route("/info", get(move || async move { Json(body) }))).await;
        let status = SwarmStatusClient::new(format!("{base}/info"), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            status.fetch().await,
            Err(CollectError::Parse(ParseError::MissingNodesLabel))
        ));
    }
}
