use std::path::PathBuf;

use thiserror::Error;

/// A malformed status table, byte size or node count. Recoverable: the
/// current collection tick is skipped.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("invalid number {value:?} in size {input:?}")]
    InvalidNumber { input: String, value: String },

    #[error("invalid size unit {unit:?} in {input:?}")]
    UnknownUnit { input: String, unit: String },

    #[error("size {0:?} is not of the form \"<number> <unit>\"")]
    MalformedSize(String),

    #[error("status table has no \"Nodes\" row")]
    MissingNodesLabel,

    #[error("invalid node count {0:?}")]
    InvalidNodeCount(String),

    #[error("node block {node} needs row {row} but the table has {len} rows")]
    TruncatedBlock { node: usize, row: usize, len: usize },

    #[error("memory field {0:?} is not of the form \"<reserved> / <total>\"")]
    MalformedMemory(String),
}

/// A connection, write or HTTP failure inside a backend. Recoverable: the
/// batch is dropped.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("push endpoint answered {0}")]
    Status(reqwest::StatusCode),

    #[error("backend is closed")]
    Closed,
}

/// Missing, unreadable or malformed configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown backend type {0:?}")]
    UnknownBackend(String),

    #[error("backend {0} requires a destination address")]
    MissingAddress(&'static str),

    #[error("{0} must be at least one second")]
    InvalidInterval(&'static str),

    #[error("metric path must not be empty")]
    InvalidMetricPath,
}

/// A health checker could not be built from its configured target. Fatal at
/// startup.
#[derive(Debug, Error)]
pub enum CheckerConstructionError {
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// One collection tick failed before anything was delivered.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("status endpoint answered {0}")]
    Status(reqwest::StatusCode),

    #[error(transparent)]
    Parse(#[from] ParseError),
}
