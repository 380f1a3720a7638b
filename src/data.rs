//! Transaction loading and RFM feature computation using Polars

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use ndarray::{Array2, ArrayView1};
use polars::prelude::*;
use tracing::debug;

use crate::error::{Result, SegmentError};

/// Feature ordering used everywhere downstream: clustering, the surrogate
/// tree and the exported report.
pub const FEATURE_NAMES: [&str; 3] = ["Recency", "Frequency", "Monetary"];

/// Share of customers kept by the default Monetary outlier trim.
pub const DEFAULT_TRIM_QUANTILE: f64 = 0.99;

const REQUIRED_COLUMNS: [&str; 5] = [
    "CustomerID",
    "InvoiceNo",
    "InvoiceDate",
    "Quantity",
    "UnitPrice",
];

/// Accepted textual timestamp layouts when the CSV reader leaves
/// `InvoiceDate` unparsed.
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M"];

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// One row per customer surviving the outlier trim.
#[derive(Debug, Clone)]
pub struct RfmTable {
    /// Customer IDs corresponding to each row
    pub customer_ids: Vec<i64>,
    /// Raw RFM values as ndarray (n_customers, 3), columns ordered as
    /// [`FEATURE_NAMES`]
    pub raw_features: Array2<f64>,
    /// Snapshot date Recency was measured against (latest invoice + 1 day),
    /// microseconds since the Unix epoch
    pub snapshot_micros: i64,
    /// Monetary threshold the outlier trim applied; customers at or above it
    /// were dropped
    pub trim_threshold: f64,
}

impl RfmTable {
    pub fn len(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customer_ids.is_empty()
    }

    pub fn recency(&self) -> ArrayView1<'_, f64> {
        self.raw_features.column(0)
    }

    pub fn frequency(&self) -> ArrayView1<'_, f64> {
        self.raw_features.column(1)
    }

    pub fn monetary(&self) -> ArrayView1<'_, f64> {
        self.raw_features.column(2)
    }

    /// Snapshot date as a calendar date, for reporting.
    pub fn snapshot_date(&self) -> Option<NaiveDate> {
        DateTime::from_timestamp_micros(self.snapshot_micros).map(|dt| dt.date_naive())
    }
}

/// Load a CSV transaction table and compute RFM features per customer
///
/// # Arguments
/// * `path` - Path to the CSV file; must carry the columns CustomerID,
///   InvoiceNo, InvoiceDate, Quantity, UnitPrice (extra columns are ignored,
///   column-name whitespace is trimmed)
/// * `trim_quantile` - Monetary percentile at which customers are dropped
///   as outliers (one-sided); 1.0 disables the trim
///
/// # Returns
/// * `RfmTable` with one row per surviving customer
pub fn load_transactions(path: &Path, trim_quantile: f64) -> Result<RfmTable> {
    if !(0.0..=1.0).contains(&trim_quantile) {
        return Err(SegmentError::Config(format!(
            "trim quantile must lie in [0, 1], got {trim_quantile}"
        )));
    }
    if !path.exists() {
        return Err(SegmentError::MissingInput(path.to_path_buf()));
    }

    let df = LazyCsvReader::new(path)
        .has_header(true)
        .with_try_parse_dates(true)
        .finish()?
        .collect()?;

    let df = trim_column_names(df)?;
    ensure_required_columns(&df)?;
    let df = ensure_datetime(df)?;

    // Drop returns/cancellations and rows without a customer before any
    // aggregation, then derive the per-line spend.
    let df = df
        .lazy()
        .filter(
            col("Quantity")
                .gt(lit(0))
                .and(col("UnitPrice").gt(lit(0.0)))
                .and(col("CustomerID").is_not_null()),
        )
        .with_columns([(col("Quantity").cast(DataType::Float64)
            * col("UnitPrice").cast(DataType::Float64))
        .alias("TotalSum")])
        .collect()?;

    if df.height() == 0 {
        return Err(SegmentError::Malformed(
            "no usable transaction rows after filtering".into(),
        ));
    }
    debug!(rows = df.height(), "transactions loaded");

    let snapshot_micros = df
        .column("InvoiceDate")?
        .datetime()?
        .max()
        .ok_or_else(|| SegmentError::Malformed("InvoiceDate contains no values".into()))?
        + MICROS_PER_DAY;

    let rfm = aggregate_rfm(df, snapshot_micros)?;
    let (rfm, trim_threshold) = trim_outliers(rfm, trim_quantile)?;
    debug!(customers = rfm.height(), trim_threshold, "RFM table computed");

    to_table(rfm, snapshot_micros, trim_threshold)
}

fn trim_column_names(mut df: DataFrame) -> Result<DataFrame> {
    let trimmed: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.trim().to_string())
        .collect();
    df.set_column_names(&trimmed)?;
    Ok(df)
}

fn ensure_required_columns(df: &DataFrame) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| df.column(name).is_err())
        .collect();
    if !missing.is_empty() {
        return Err(SegmentError::Malformed(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Guarantee `InvoiceDate` is a datetime column, parsing textual timestamps
/// with a chrono fallback when the CSV reader could not infer them.
fn ensure_datetime(mut df: DataFrame) -> Result<DataFrame> {
    match df.column("InvoiceDate")?.dtype() {
        DataType::Datetime(_, _) => Ok(df),
        DataType::Date => {
            let casted = df
                .column("InvoiceDate")?
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;
            df.with_column(casted)?;
            Ok(df)
        }
        DataType::Utf8 => {
            let mut stamps = Vec::with_capacity(df.height());
            for value in df.column("InvoiceDate")?.utf8()?.into_iter() {
                let raw = value.ok_or_else(|| {
                    SegmentError::Malformed("InvoiceDate contains empty values".into())
                })?;
                let parsed = parse_timestamp(raw).ok_or_else(|| {
                    SegmentError::Malformed(format!("unparseable InvoiceDate value: {raw:?}"))
                })?;
                stamps.push(parsed.and_utc().timestamp_micros());
            }
            let series = Int64Chunked::from_vec("InvoiceDate", stamps)
                .into_datetime(TimeUnit::Microseconds, None)
                .into_series();
            df.with_column(series)?;
            Ok(df)
        }
        other => Err(SegmentError::Malformed(format!(
            "InvoiceDate must hold dates, found type {other}"
        ))),
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for format in DATETIME_FORMATS {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(stamp);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

/// Group transactions per customer into Recency / Frequency / Monetary
fn aggregate_rfm(df: DataFrame, snapshot_micros: i64) -> Result<DataFrame> {
    let rfm = df
        .lazy()
        .group_by([col("CustomerID")])
        .agg([
            // Recency source: most recent purchase
            col("InvoiceDate").max().alias("LastPurchase"),
            // Frequency: number of distinct invoices
            col("InvoiceNo").n_unique().alias("Frequency"),
            // Monetary: total spending
            col("TotalSum").sum().alias("Monetary"),
        ])
        .with_columns([((lit(snapshot_micros) - col("LastPurchase").cast(DataType::Int64))
            .cast(DataType::Float64)
            / lit(MICROS_PER_DAY as f64))
        .floor()
        .alias("Recency")])
        .select([
            col("CustomerID").cast(DataType::Int64),
            col("Recency"),
            col("Frequency").cast(DataType::Float64),
            col("Monetary").cast(DataType::Float64),
        ])
        // Failed numeric casts surface as nulls; those rows cannot be
        // segmented.
        .drop_nulls(None)
        .collect()?;

    if rfm.height() == 0 {
        return Err(SegmentError::Malformed(
            "no customers found after RFM computation".into(),
        ));
    }
    Ok(rfm)
}

/// One-sided outlier trim: drop customers whose Monetary reaches the
/// `quantile` percentile of the pre-trim distribution. A quantile of 1.0
/// disables the trim; the strict `<` filter would otherwise always drop the
/// top spender.
fn trim_outliers(rfm: DataFrame, quantile: f64) -> Result<(DataFrame, f64)> {
    if quantile >= 1.0 {
        return Ok((rfm, f64::INFINITY));
    }
    let threshold = rfm
        .clone()
        .lazy()
        .select([col("Monetary")
            .quantile(lit(quantile), QuantileInterpolOptions::Linear)
            .alias("threshold")])
        .collect()?
        .column("threshold")?
        .f64()?
        .get(0)
        .ok_or_else(|| {
            SegmentError::Malformed("could not compute the Monetary trim threshold".into())
        })?;

    let trimmed = rfm
        .lazy()
        .filter(col("Monetary").lt(lit(threshold)))
        .collect()?;
    if trimmed.height() == 0 {
        return Err(SegmentError::Insufficient(
            "every customer fell at or above the Monetary trim threshold".into(),
        ));
    }
    Ok((trimmed, threshold))
}

/// Convert the aggregated DataFrame into the ndarray-backed table consumed
/// by the segmentation engine.
fn to_table(rfm: DataFrame, snapshot_micros: i64, trim_threshold: f64) -> Result<RfmTable> {
    let customer_ids: Vec<i64> = rfm
        .column("CustomerID")?
        .i64()?
        .into_no_null_iter()
        .collect();
    let recency: Vec<f64> = rfm.column("Recency")?.f64()?.into_no_null_iter().collect();
    let frequency: Vec<f64> = rfm
        .column("Frequency")?
        .f64()?
        .into_no_null_iter()
        .collect();
    let monetary: Vec<f64> = rfm.column("Monetary")?.f64()?.into_no_null_iter().collect();

    let n_customers = customer_ids.len();
    let mut raw = Vec::with_capacity(n_customers * 3);
    for i in 0..n_customers {
        raw.extend_from_slice(&[recency[i], frequency[i], monetary[i]]);
    }
    let raw_features = Array2::from_shape_vec((n_customers, 3), raw)
        .map_err(|e| SegmentError::Malformed(e.to_string()))?;

    Ok(RfmTable {
        customer_ids,
        raw_features,
        snapshot_micros,
        trim_threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str =
        "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country";

    fn create_test_csv(header: &str, rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{header}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file
    }

    #[test]
    fn test_rfm_aggregation() {
        let file = create_test_csv(
            HEADER,
            &[
                "536365,85123A,HEART HOLDER,6,2010-12-01 08:26:00,2.55,17850,United Kingdom",
                "536365,71053,METAL LANTERN,6,2010-12-01 08:26:00,3.39,17850,United Kingdom",
                "536366,22633,HAND WARMER,6,2010-12-05 08:28:00,1.85,17850,United Kingdom",
                "536367,84406B,COAT HANGER,8,2010-12-01 08:34:00,2.75,13047,United Kingdom",
            ],
        );

        let table = load_transactions(file.path(), 1.0).unwrap();
        assert_eq!(table.len(), 2);

        let idx = table
            .customer_ids
            .iter()
            .position(|&id| id == 17850)
            .unwrap();
        // Snapshot is 2010-12-06 08:28; last purchase 2010-12-05 08:28 -> 1 day.
        assert_eq!(table.raw_features[[idx, 0]], 1.0);
        // Two distinct invoices.
        assert_eq!(table.raw_features[[idx, 1]], 2.0);
        // 6*2.55 + 6*3.39 + 6*1.85
        assert!((table.raw_features[[idx, 2]] - 46.74).abs() < 1e-9);
    }

    #[test]
    fn test_rfm_invariants() {
        let file = create_test_csv(
            HEADER,
            &[
                "536365,85123A,A,6,2010-12-01 08:26:00,2.55,17850,UK",
                "536366,22633,B,6,2011-11-01 08:28:00,1.85,17850,UK",
                "536367,84406B,C,8,2010-12-01 08:34:00,2.75,13047,UK",
                "536368,22752,D,2,2011-12-05 10:15:00,7.65,12345,UK",
            ],
        );

        let table = load_transactions(file.path(), 1.0).unwrap();
        for row in table.raw_features.outer_iter() {
            assert!(row[0] >= 0.0, "Recency must be non-negative");
            assert!(row[1] >= 1.0, "Frequency must be at least 1");
            assert!(row[2] >= 0.0, "Monetary must be non-negative");
        }
    }

    #[test]
    fn test_trimmed_column_names() {
        let file = create_test_csv(
            " InvoiceNo , StockCode ,Description, Quantity , InvoiceDate , UnitPrice , CustomerID ,Country",
            &["536365,85123A,A,6,2010-12-01 08:26:00,2.55,17850,UK"],
        );

        let table = load_transactions(file.path(), 1.0).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_outlier_trim_drops_top_percentile() {
        // Monetary values 1..=10; the linear 0.99 quantile is 9.91, so only
        // the top spender is dropped.
        let rows: Vec<String> = (1..=10)
            .map(|i| {
                format!(
                    "54{i:04},STOCK,ITEM,1,2011-06-0{} 09:00:00,{}.0,{}",
                    (i % 9) + 1,
                    i,
                    1000 + i
                ) + ",UK"
            })
            .collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let file = create_test_csv(HEADER, &refs);

        let table = load_transactions(file.path(), 0.99).unwrap();
        assert_eq!(table.len(), 9);
        assert!(table.trim_threshold > 9.0 && table.trim_threshold < 10.0);
        for &spend in table.monetary().iter() {
            assert!(spend < table.trim_threshold);
        }
    }

    #[test]
    fn test_missing_file() {
        let err = load_transactions(Path::new("/definitely/not/here.csv"), 0.99).unwrap_err();
        assert!(matches!(err, SegmentError::MissingInput(_)));
    }

    #[test]
    fn test_missing_columns() {
        let file = create_test_csv(
            "InvoiceNo,Quantity,InvoiceDate,CustomerID",
            &["536365,6,2010-12-01 08:26:00,17850"],
        );
        let err = load_transactions(file.path(), 0.99).unwrap_err();
        match err {
            SegmentError::Malformed(msg) => assert!(msg.contains("UnitPrice")),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_dates() {
        let file = create_test_csv(HEADER, &["536365,85123A,A,6,not-a-date,2.55,17850,UK"]);
        let err = load_transactions(file.path(), 0.99).unwrap_err();
        assert!(matches!(err, SegmentError::Malformed(_)));
    }

    #[test]
    fn test_empty_table() {
        let file = create_test_csv(HEADER, &[]);
        let err = load_transactions(file.path(), 0.99).unwrap_err();
        assert!(matches!(err, SegmentError::Malformed(_)));
    }

    #[test]
    fn test_fallback_date_format() {
        // US-style timestamps are not ISO; the chrono fallback handles them.
        let file = create_test_csv(
            HEADER,
            &[
                "536365,85123A,A,6,12/1/2010 8:26,2.55,17850,UK",
                "536367,84406B,C,8,12/3/2010 8:34,2.75,13047,UK",
            ],
        );
        let table = load_transactions(file.path(), 1.0).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_invalid_trim_quantile() {
        let file = create_test_csv(HEADER, &["536365,85123A,A,6,2010-12-01 08:26:00,2.55,17850,UK"]);
        let err = load_transactions(file.path(), 1.5).unwrap_err();
        assert!(matches!(err, SegmentError::Config(_)));
    }
}
