//! Renderer-facing report artifact
//!
//! The core's obligation ends at a well-formed segmented table plus the
//! fitted explainer; charts, layout and widgets belong to whatever consumes
//! this artifact. The JSON export lets any external dashboard render it.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;

use crate::data::{RfmTable, FEATURE_NAMES};
use crate::error::{Result, SegmentError};
use crate::explain::{Explanation, TreeNode};
use crate::model::SegmentModel;
use crate::taxonomy;

/// One segmented customer
#[derive(Debug, Clone, Serialize)]
pub struct CustomerRow {
    pub customer_id: i64,
    pub recency: f64,
    pub frequency: f64,
    pub monetary: f64,
    pub segment: usize,
    pub label: &'static str,
}

/// Aggregated view of one canonical segment
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub segment: usize,
    pub label: &'static str,
    pub color: &'static str,
    pub description: &'static str,
    pub action: &'static str,
    pub customers: usize,
    /// Share of all surviving customers, in [0, 1]
    pub share: f64,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

/// Full segmentation report consumed by the rendering collaborator
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub snapshot_date: Option<String>,
    pub cluster_count: usize,
    pub trim_threshold: f64,
    pub inertia: f64,
    pub silhouette: f64,
    pub accuracy: f64,
    pub feature_names: [&'static str; 3],
    pub tree_text: String,
    pub tree: TreeNode,
    pub segments: Vec<SegmentSummary>,
    pub customers: Vec<CustomerRow>,
}

/// Assemble the report from the three pipeline stages
pub fn build_report(
    table: &RfmTable,
    model: &SegmentModel,
    explanation: &Explanation,
) -> SegmentReport {
    let n = table.len() as f64;

    let mut counts = vec![0usize; model.k];
    let mut sums = vec![[0.0f64; 3]; model.k];
    for (row, &segment) in table.raw_features.outer_iter().zip(&model.labels) {
        counts[segment] += 1;
        sums[segment][0] += row[0];
        sums[segment][1] += row[1];
        sums[segment][2] += row[2];
    }

    let segments = (0..model.k)
        .map(|segment| {
            let profile = taxonomy::profile(segment).unwrap_or(&taxonomy::GENERIC);
            let count = counts[segment].max(1) as f64;
            SegmentSummary {
                segment,
                label: profile.label,
                color: profile.color,
                description: profile.description,
                action: profile.action,
                customers: counts[segment],
                share: counts[segment] as f64 / n,
                mean_recency: sums[segment][0] / count,
                mean_frequency: sums[segment][1] / count,
                mean_monetary: sums[segment][2] / count,
            }
        })
        .collect();

    let customers = table
        .customer_ids
        .iter()
        .zip(table.raw_features.outer_iter())
        .zip(&model.labels)
        .map(|((&customer_id, row), &segment)| CustomerRow {
            customer_id,
            recency: row[0],
            frequency: row[1],
            monetary: row[2],
            segment,
            label: taxonomy::profile(segment).unwrap_or(&taxonomy::GENERIC).label,
        })
        .collect();

    SegmentReport {
        snapshot_date: table.snapshot_date().map(|date| date.to_string()),
        cluster_count: model.k,
        trim_threshold: table.trim_threshold,
        inertia: model.inertia,
        silhouette: model.silhouette_sample(100),
        accuracy: explanation.accuracy,
        feature_names: FEATURE_NAMES,
        tree_text: explanation.tree.render_text(&FEATURE_NAMES),
        tree: explanation.tree.root.clone(),
        segments,
        customers,
    }
}

/// Write the report as pretty-printed JSON
pub fn write_json(report: &SegmentReport, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)
        .map_err(|e| SegmentError::Report(e.to_string()))?;
    Ok(())
}
