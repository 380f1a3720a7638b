//! Segmentation engine: scaling, seeded K-Means and canonical labels
//!
//! Raw K-Means labels are arbitrary; downstream consumers need "segment k-1
//! is always the highest-spending group". [`canonical_mapping`] remaps raw
//! labels to ids ordered by ascending mean Monetary, so segment identity is
//! stable across retrains.

use linfa::prelude::*;
use linfa::Dataset;
use linfa_clustering::{KMeans, KMeansInit};
use linfa_nn::distance::L2Dist;
use ndarray::{arr2, Array1, Array2, ArrayView1, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::data::RfmTable;
use crate::error::{Result, SegmentError};

/// Default random seed; shared with the surrogate train/test split.
pub const DEFAULT_SEED: u64 = 42;

const N_RUNS: usize = 10;
const MAX_ITERATIONS: u64 = 300;
const TOLERANCE: f64 = 1e-4;

/// Column-wise z-score scaler, kept after fitting so new points can be
/// projected into the same space
#[derive(Debug, Clone)]
pub struct StandardScaler {
    means: Array1<f64>,
    stds: Array1<f64>,
}

impl StandardScaler {
    /// Fit per-column mean and standard deviation. Constant columns keep a
    /// unit deviation so they standardize to zero instead of NaN.
    pub fn fit(features: &Array2<f64>) -> Self {
        let means = features
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(features.ncols()));
        let stds = features
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > 1e-10 { std } else { 1.0 });
        Self { means, stds }
    }

    pub fn transform(&self, features: &Array2<f64>) -> Array2<f64> {
        (features - &self.means) / &self.stds
    }
}

/// Fitted segmentation with canonical labels ordered by ascending mean spend
#[derive(Debug)]
pub struct SegmentModel {
    /// Number of segments
    pub k: usize,
    /// Canonical segment per customer, aligned with the input table rows
    pub labels: Vec<usize>,
    /// Raw K-Means label -> canonical id
    pub mapping: Vec<usize>,
    /// Centroids in scaled feature space; row index is the canonical id
    pub centroids: Array2<f64>,
    /// Log-scaled, standardized features the model was fitted on
    pub scaled: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
    scaler: StandardScaler,
}

/// Fit K-Means on an RFM table and canonicalize the labels
///
/// Features are log(1+x) transformed and standardized before clustering so
/// Monetary's heavy right skew cannot dominate the distance computations.
/// The RNG is seeded, so identical input and k always produce identical
/// assignments.
pub fn fit_segments(table: &RfmTable, k: usize, seed: u64) -> Result<SegmentModel> {
    if k < 2 {
        return Err(SegmentError::Config(format!(
            "cluster count must be at least 2, got {k}"
        )));
    }
    let n_customers = table.len();
    if k > n_customers {
        return Err(SegmentError::Config(format!(
            "cluster count {k} exceeds the {n_customers} customers available"
        )));
    }

    let log_features = table.raw_features.mapv(f64::ln_1p);
    let scaler = StandardScaler::fit(&log_features);
    let scaled = scaler.transform(&log_features);

    let rng = ChaCha8Rng::seed_from_u64(seed);
    let observations = Dataset::new(scaled.clone(), Array1::<usize>::zeros(n_customers));
    let kmeans = KMeans::params_with(k, rng, L2Dist)
        .init_method(KMeansInit::KMeansPlusPlus)
        .n_runs(N_RUNS)
        .max_n_iterations(MAX_ITERATIONS)
        .tolerance(TOLERANCE)
        .fit(&observations)
        .map_err(|e| SegmentError::Config(format!("clustering failed for k={k}: {e}")))?;

    let raw_labels = kmeans.predict(&scaled);
    let mapping = canonical_mapping(raw_labels.view(), table.monetary(), k)?;
    let labels: Vec<usize> = raw_labels.iter().map(|&raw| mapping[raw]).collect();

    // Reorder centroid rows so that row index == canonical id.
    let raw_centroids = kmeans.centroids();
    let mut centroids = Array2::zeros((k, 3));
    for (raw, &canonical) in mapping.iter().enumerate() {
        centroids.row_mut(canonical).assign(&raw_centroids.row(raw));
    }

    let inertia = compute_inertia(&scaled, &labels, &centroids);
    debug!(k, inertia, "segments fitted");

    Ok(SegmentModel {
        k,
        labels,
        mapping,
        centroids,
        scaled,
        inertia,
        scaler,
    })
}

/// Map raw cluster labels to canonical ids ordered by ascending mean spend
///
/// Pure function: the returned vector is an injective mapping raw label ->
/// canonical id such that canonical ordering follows the per-cluster mean of
/// `monetary`. Fails when a raw label in [0, k) has no members, since the
/// ordering is undefined for empty segments.
pub fn canonical_mapping(
    labels: ArrayView1<'_, usize>,
    monetary: ArrayView1<'_, f64>,
    k: usize,
) -> Result<Vec<usize>> {
    let mut sums = vec![0.0; k];
    let mut counts = vec![0usize; k];
    for (&label, &spend) in labels.iter().zip(monetary.iter()) {
        if label >= k {
            return Err(SegmentError::Config(format!(
                "raw cluster label {label} out of range for k={k}"
            )));
        }
        sums[label] += spend;
        counts[label] += 1;
    }
    if let Some(empty) = counts.iter().position(|&count| count == 0) {
        return Err(SegmentError::Config(format!(
            "clustering produced an empty segment (raw label {empty}); try a smaller cluster count"
        )));
    }

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| {
        let mean_a = sums[a] / counts[a] as f64;
        let mean_b = sums[b] / counts[b] as f64;
        mean_a
            .partial_cmp(&mean_b)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut mapping = vec![0usize; k];
    for (rank, &raw) in order.iter().enumerate() {
        mapping[raw] = rank;
    }
    Ok(mapping)
}

impl SegmentModel {
    /// Assign a new customer's RFM values to a canonical segment via the
    /// nearest centroid in scaled space.
    pub fn predict(&self, rfm: &[f64; 3]) -> Result<usize> {
        if rfm.iter().any(|&value| value < 0.0) {
            return Err(SegmentError::Config(
                "RFM values must be non-negative".into(),
            ));
        }

        let logged = arr2(&[[rfm[0].ln_1p(), rfm[1].ln_1p(), rfm[2].ln_1p()]]);
        let scaled = self.scaler.transform(&logged);
        let point = scaled.row(0);

        let mut closest = 0;
        let mut min_distance = f64::INFINITY;
        for (segment, centroid) in self.centroids.outer_iter().enumerate() {
            let distance: f64 = point
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            if distance < min_distance {
                min_distance = distance;
                closest = segment;
            }
        }
        Ok(closest)
    }

    /// Customers per canonical segment
    pub fn segment_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k];
        for &label in &self.labels {
            if label < self.k {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient over the first `sample_size` customers.
    /// Purely diagnostic, like the surrogate accuracy.
    pub fn silhouette_sample(&self, sample_size: usize) -> f64 {
        let n = self.scaled.nrows().min(sample_size);
        if n < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        for i in 0..n {
            let own = self.labels[i];
            let mut distance_sums = vec![0.0; self.k];
            let mut counts = vec![0usize; self.k];

            for j in 0..n {
                if i == j {
                    continue;
                }
                let distance: f64 = self
                    .scaled
                    .row(i)
                    .iter()
                    .zip(self.scaled.row(j).iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                distance_sums[self.labels[j]] += distance;
                counts[self.labels[j]] += 1;
            }

            let cohesion = if counts[own] == 0 {
                0.0
            } else {
                distance_sums[own] / counts[own] as f64
            };
            let separation = (0..self.k)
                .filter(|&segment| segment != own && counts[segment] > 0)
                .map(|segment| distance_sums[segment] / counts[segment] as f64)
                .fold(f64::INFINITY, f64::min);

            total += if !separation.is_finite() || (cohesion == 0.0 && separation == 0.0) {
                0.0
            } else {
                (separation - cohesion) / cohesion.max(separation)
            };
        }
        total / n as f64
    }
}

/// Within-cluster sum of squares over canonical labels and centroids
fn compute_inertia(features: &Array2<f64>, labels: &[usize], centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;
    for (i, &segment) in labels.iter().enumerate() {
        if segment < centroids.nrows() {
            let distance_sq: f64 = features
                .row(i)
                .iter()
                .zip(centroids.row(segment).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            inertia += distance_sq;
        }
    }
    inertia
}
