//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::data::DEFAULT_TRIM_QUANTILE;
use crate::error::{Result, SegmentError};
use crate::model::DEFAULT_SEED;

/// Customer segmentation from retail transactions: RFM features, K-Means
/// segments ordered by spend, and a decision-tree explainer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "transactions.csv")]
    pub input: PathBuf,

    /// Number of customer segments
    #[arg(short = 'k', long = "clusters", default_value_t = 4, value_parser = clap::value_parser!(u8).range(2..=4))]
    pub clusters: u8,

    /// Monetary percentile at which customers are trimmed as outliers
    #[arg(long, default_value_t = DEFAULT_TRIM_QUANTILE)]
    pub trim_quantile: f64,

    /// Random seed for clustering and the surrogate train/test split
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Output path for the segment charts
    #[arg(short, long, default_value = "segments.png")]
    pub output: PathBuf,

    /// Write the full segmentation report as JSON to this path
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Skip chart rendering
    #[arg(long)]
    pub no_charts: bool,

    /// Prediction mode: provide R,F,M values as a comma-separated string.
    /// Example: --predict "30,10,500.0" for Recency=30, Frequency=10,
    /// Monetary=500.0
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse RFM values from the predict string
    /// Expected format: "recency,frequency,monetary"
    pub fn parse_rfm_values(&self) -> Result<Option<[f64; 3]>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').collect();
        if parts.len() != 3 {
            return Err(SegmentError::Config(
                "predict values must be in format 'recency,frequency,monetary'".into(),
            ));
        }

        let mut values = [0.0; 3];
        for (slot, (raw, name)) in values
            .iter_mut()
            .zip(parts.iter().zip(["recency", "frequency", "monetary"]))
        {
            *slot = raw.trim().parse().map_err(|_| {
                SegmentError::Config(format!("invalid {name} value: {raw}"))
            })?;
        }
        Ok(Some(values))
    }
}
