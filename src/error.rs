use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Problems with the configured repositories, credentials or config file.
/// Always fatal, and always raised before anything is fetched or stored.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported source type `{0}`")]
    UnsupportedSource(String),

    #[error("invalid filter pattern `{pattern}`")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid metadata field `{key}`: {reason}")]
    InvalidMetadata { key: String, reason: String },

    #[error("environment variable {0} is not set")]
    MissingCredential(&'static str),

    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("malformed configuration file {}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("could not read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not determine the home directory for the default database")]
    NoHomeDirectory,
}

/// Failures reported by a source adapter while fetching.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited by source{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] rusqlite::Error),

    #[error("metadata serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("could not prepare the database location")]
    Io(#[from] std::io::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Why a collection run stopped. None of these advance the watermark.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("fetching changes for {repository} failed")]
    Source {
        repository: String,
        #[source]
        source: SourceError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
