//! Typed error hierarchy for teamboard.
//!
//! Three top-level enums cover the three subsystems:
//! - `FeatureError`: sprint classification and estimate queries
//! - `CollectorError`: ingestion from Jira, GitLab and Jenkins
//! - `ConfigError`: loading `teamboard.toml`

use thiserror::Error;

/// Errors from the feature query services.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// A story-point estimate that is not an integer.
    #[error("Feature {feature} has a non-numeric estimate '{value}'")]
    MalformedEstimate { feature: String, value: String },

    /// Summing estimates went past the `i64` range.
    #[error("Estimate total overflows at feature {feature}")]
    EstimateOverflow { feature: String },

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Errors from a collector run.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Feature {feature} has a non-numeric estimate '{value}'")]
    MalformedEstimate { feature: String, value: String },

    #[error("{source_system} request to {url} failed: {message}")]
    Http {
        source_system: &'static str,
        url: String,
        message: String,
    },

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("Status '{status}' is listed as both in-progress and done")]
    OverlappingStatusBuckets { status: String },
}
