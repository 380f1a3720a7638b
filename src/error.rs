//! Error taxonomy for the segmentation pipeline
//!
//! Every failure is terminal for the current computation and carries a single
//! user-presentable message. Third-party errors (Polars, linfa) are
//! re-expressed as domain failures at the stage boundary where they occur.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for SegmentForge operations
#[derive(Error, Debug)]
pub enum SegmentError {
    /// The input file does not exist; raised before any computation.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Schema or type problems while extracting features from the
    /// transaction table.
    #[error("invalid transaction data: {0}")]
    Malformed(String),

    /// A parameter (cluster count, trim quantile) is invalid for this data.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Too few records for the requested computation.
    #[error("not enough data: {0}")]
    Insufficient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write report: {0}")]
    Report(String),

    #[error("failed to render chart: {0}")]
    Render(String),
}

impl From<polars::error::PolarsError> for SegmentError {
    fn from(e: polars::error::PolarsError) -> Self {
        SegmentError::Malformed(e.to_string())
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, SegmentError>;
