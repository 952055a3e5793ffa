use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;

use crate::error::{CollectError, ConfigError};

/// Tags keyed and iterated in lexicographic key order.
pub type Tags = BTreeMap<String, String>;

/// A dotted metric name. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct MetricPath(String);

impl TryFrom<String> for MetricPath {
    type Error = ConfigError;

    fn try_from(path: String) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl MetricPath {
    pub fn new(path: impl Into<String>) -> Result<Self, ConfigError> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(ConfigError::InvalidMetricPath);
        }
        Ok(Self(path))
    }

    /// For compiled-in names.
    pub(crate) fn from_static(path: &'static str) -> Self {
        debug_assert!(!path.trim().is_empty());
        Self(path.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One numeric sample. Built fresh every cycle and handed to exactly one
/// backend call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub path: MetricPath,
    pub value: f64,
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
    /// Reporting period in seconds.
    pub step: NonZeroU32,
}

impl Metric {
    pub fn new(path: MetricPath, value: f64, step: NonZeroU32) -> Self {
        Self {
            path,
            value,
            tags: Tags::new(),
            timestamp: Utc::now(),
            step,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Tag values in key order, joined with `.` and prefixed to the path.
    pub fn dotted_name(&self) -> String {
        if self.tags.is_empty() {
            return self.path.to_string();
        }
        let mut name = self
            .tags
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(".");
        name.push('.');
        name.push_str(self.path.as_str());
        name
    }

    /// Pre-joined `k=v,k2=v2` form of the tags.
    pub fn joined_tags(&self) -> String {
        self.tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A source of metrics polled once per collection tick.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self) -> Result<Vec<Metric>, CollectError>;
    fn name(&self) -> &str;
}
