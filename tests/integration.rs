//! Integration tests for the full extract -> segment -> explain pipeline

use std::io::Write;

use segmentforge::{
    build_report, canonical_mapping, explain_segments, fit_segments, load_transactions,
    LoaderCache, SegmentError,
};
use tempfile::NamedTempFile;

const HEADER: &str =
    "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country";

/// 100 customers in three widely separated spend tiers (~10, ~500, ~5000)
/// with recency and frequency held constant.
fn three_tier_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();

    for i in 0..100usize {
        let tier = if i < 34 {
            0
        } else if i < 67 {
            1
        } else {
            2
        };
        let target = [10.0, 500.0, 5000.0][tier] + i as f64 * 0.1;
        let customer = 1000 + i;

        // Two invoices per customer, same day for everyone.
        for invoice in 0..2 {
            writeln!(
                file,
                "{},STOCK,ITEM,1,2011-12-01 10:{:02}:00,{:.4},{},UK",
                600000 + i * 10 + invoice,
                invoice,
                target / 2.0,
                customer
            )
            .unwrap();
        }
    }
    file.flush().unwrap();
    file
}

#[test]
fn test_end_to_end_three_tier_segmentation() {
    let file = three_tier_csv();
    let table = load_transactions(file.path(), 0.99).unwrap();

    // The 0.99 trim removes the very top of the high tier, nothing else.
    assert!(table.len() < 100);
    assert!(table.len() >= 95);

    let model = fit_segments(&table, 3, 42).unwrap();
    assert_eq!(model.labels.len(), table.len());

    // Low spenders must land in segment 0, high spenders in segment 2.
    for (row, &label) in table.raw_features.outer_iter().zip(&model.labels) {
        let spend = row[2];
        if spend < 100.0 {
            assert_eq!(label, 0, "low spender {spend} not in segment 0");
        } else if spend > 2000.0 {
            assert_eq!(label, 2, "high spender {spend} not in segment 2");
        } else {
            assert_eq!(label, 1, "mid spender {spend} not in segment 1");
        }
    }

    let explanation = explain_segments(&table.raw_features, &model.labels, 3, 42).unwrap();
    assert!(
        explanation.accuracy > 0.9,
        "surrogate accuracy {} too low",
        explanation.accuracy
    );
    assert!((0.0..=1.0).contains(&explanation.accuracy));
}

#[test]
fn test_segmentation_is_deterministic() {
    let file = three_tier_csv();
    let table = load_transactions(file.path(), 0.99).unwrap();

    let first = fit_segments(&table, 3, 42).unwrap();
    let second = fit_segments(&table, 3, 42).unwrap();
    assert_eq!(first.labels, second.labels);
    assert_eq!(first.mapping, second.mapping);
}

#[test]
fn test_canonical_ordering_holds_for_every_k() {
    let file = three_tier_csv();
    let table = load_transactions(file.path(), 0.99).unwrap();

    for k in 2..=4usize {
        let model = fit_segments(&table, k, 42).unwrap();

        // Every surviving customer is assigned a valid segment.
        assert_eq!(model.labels.len(), table.len());
        assert!(model.labels.iter().all(|&label| label < k));
        let sizes = model.segment_sizes();
        assert_eq!(sizes.iter().sum::<usize>(), table.len());
        assert!(sizes.iter().all(|&size| size > 0));

        // Mean spend is non-decreasing in the canonical id.
        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (&label, &spend) in model.labels.iter().zip(table.monetary().iter()) {
            sums[label] += spend;
            counts[label] += 1;
        }
        for pair in (0..k)
            .map(|s| sums[s] / counts[s] as f64)
            .collect::<Vec<_>>()
            .windows(2)
        {
            assert!(
                pair[0] <= pair[1],
                "k={k}: segment means not ascending ({} > {})",
                pair[0],
                pair[1]
            );
        }
    }
}

#[test]
fn test_outlier_trim_matches_threshold() {
    let file = three_tier_csv();
    let untrimmed = load_transactions(file.path(), 1.0).unwrap();
    let trimmed = load_transactions(file.path(), 0.99).unwrap();

    assert!(trimmed.len() < untrimmed.len());
    for &spend in trimmed.monetary().iter() {
        assert!(spend < trimmed.trim_threshold);
    }
    // Every dropped customer sat at or above the threshold.
    for (&id, row) in untrimmed
        .customer_ids
        .iter()
        .zip(untrimmed.raw_features.outer_iter())
    {
        if !trimmed.customer_ids.contains(&id) {
            assert!(row[2] >= trimmed.trim_threshold);
        }
    }
}

#[test]
fn test_empty_table_fails_without_partial_output() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    file.flush().unwrap();

    let err = load_transactions(file.path(), 0.99).unwrap_err();
    assert!(matches!(err, SegmentError::Malformed(_)));
}

#[test]
fn test_missing_file_is_reported_before_computation() {
    let err = load_transactions(std::path::Path::new("/no/such/file.csv"), 0.99).unwrap_err();
    assert!(matches!(err, SegmentError::MissingInput(_)));
}

#[test]
fn test_oversized_k_is_a_configuration_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for i in 0..3 {
        writeln!(
            file,
            "53636{i},STOCK,ITEM,2,2011-12-0{} 09:00:00,{}.5,{},UK",
            i + 1,
            (i + 1) * 3,
            2000 + i
        )
        .unwrap();
    }
    file.flush().unwrap();

    let table = load_transactions(file.path(), 1.0).unwrap();
    assert_eq!(table.len(), 3);

    let err = fit_segments(&table, 4, 42).unwrap_err();
    assert!(matches!(err, SegmentError::Config(_)));
}

#[test]
fn test_too_few_records_for_surrogate() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for i in 0..3 {
        writeln!(
            file,
            "53637{i},STOCK,ITEM,1,2011-12-0{} 09:00:00,{}.0,{},UK",
            i + 1,
            (i + 1) * 100,
            3000 + i
        )
        .unwrap();
    }
    file.flush().unwrap();

    let table = load_transactions(file.path(), 1.0).unwrap();
    let model = fit_segments(&table, 2, 42).unwrap();
    let err = explain_segments(&table.raw_features, &model.labels, 2, 42).unwrap_err();
    assert!(matches!(err, SegmentError::Insufficient(_)));
}

#[test]
fn test_cached_load_reuses_unchanged_file() {
    let file = three_tier_csv();
    let mut cache = LoaderCache::new();

    let first = cache.load(file.path(), 0.99).unwrap();
    let second = cache.load(file.path(), 0.99).unwrap();

    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 1);
    assert_eq!(first.len(), second.len());
}

#[test]
fn test_relabeling_stabilizes_segment_identity() {
    // Whatever raw label K-Means hands the high spenders, the canonical
    // mapping puts them last.
    let labels = ndarray::arr1(&[1usize, 1, 0, 0, 2, 2]);
    let monetary = ndarray::arr1(&[9000.0, 8000.0, 15.0, 20.0, 400.0, 450.0]);
    let mapping = canonical_mapping(labels.view(), monetary.view(), 3).unwrap();
    assert_eq!(mapping, vec![0, 2, 1]);
}

#[test]
fn test_report_aligns_with_taxonomy() {
    let file = three_tier_csv();
    let table = load_transactions(file.path(), 0.99).unwrap();
    let model = fit_segments(&table, 3, 42).unwrap();
    let explanation = explain_segments(&table.raw_features, &model.labels, 3, 42).unwrap();

    let report = build_report(&table, &model, &explanation);
    assert_eq!(report.segments.len(), 3);
    assert_eq!(report.segments[0].label, "At-Risk Customers");
    assert_eq!(report.segments[2].label, "Loyal Customers");
    assert_eq!(report.customers.len(), table.len());
    assert!((0.0..=1.0).contains(&report.accuracy));
}
