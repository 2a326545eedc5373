//! Exporter error types.

use thiserror::Error;

use blockwatch_cloud::CloudError;

/// Errors that can end a collection routine or exporter setup.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("cloud API error: {0}")]
    Cloud(#[from] CloudError),

    #[error("endpoint resolution failed: {0}")]
    Resolution(String),

    #[error("metric {metric} expects {expected} label values, got {got}")]
    LabelMismatch {
        metric: String,
        expected: usize,
        got: usize,
    },

    #[error("metric already declared: {0}")]
    DuplicateMetric(String),

    #[error("sample sink closed while emitting {0}")]
    SinkClosed(String),

    #[error("scrape deadline exceeded")]
    DeadlineExceeded,

    #[error("collector panicked: {0}")]
    Panicked(String),
}

pub type ExporterResult<T> = Result<T, ExporterError>;
