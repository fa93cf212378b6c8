//! Data quality assessment (ts_data_quality).
//!
//! Scores a series along four dimensions (completeness, temporal
//! regularity, magnitude sanity, behavioral variation) and aggregates
//! them into an overall score; also produces a multi-series report
//! against configurable thresholds.

use crate::error::Result;
use crate::filter::is_constant;
use crate::gaps::detect_frequency;

/// Data quality result for a single series.
#[derive(Debug, Clone, Default)]
pub struct DataQuality {
    /// Completeness score: share of non-NULL observations (0-1)
    pub completeness_score: f64,
    /// Temporal score: regularity of the timestamp grid (0-1)
    pub temporal_score: f64,
    /// Magnitude score: share of finite, non-outlier values (0-1)
    pub magnitude_score: f64,
    /// Behavioral score: variation present, not dominated by zeros (0-1)
    pub behavioral_score: f64,
    /// Overall quality score (mean of the four dimensions)
    pub overall_score: f64,
    /// Number of gaps in the timestamp grid
    pub n_gaps: usize,
    /// Number of missing values
    pub n_missing: usize,
    /// Number of IQR outliers
    pub n_outliers: usize,
    /// Number of duplicated timestamps
    pub n_duplicate_timestamps: usize,
    /// Whether the series is constant
    pub is_constant: bool,
}

/// Quality thresholds for the multi-series report.
#[derive(Debug, Clone)]
pub struct QualityThresholds {
    pub max_gap_ratio: f64,
    pub max_missing_ratio: f64,
    pub min_length: usize,
    pub min_nonzero_ratio: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_gap_ratio: 0.1,
            max_missing_ratio: 0.2,
            min_length: 10,
            min_nonzero_ratio: 0.5,
        }
    }
}

/// Multi-series quality report.
#[derive(Debug, Clone, Default)]
pub struct QualityReport {
    pub n_passed: usize,
    pub n_gap_issues: usize,
    pub n_missing_issues: usize,
    pub n_constant: usize,
    pub n_short: usize,
    pub n_total: usize,
}

fn count_gaps(timestamps: &[i64]) -> usize {
    let Ok(freq) = detect_frequency(timestamps) else {
        return 0;
    };
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    sorted
        .windows(2)
        .filter(|w| w[1] - w[0] > freq)
        .map(|w| ((w[1] - w[0]) / freq - 1).max(0) as usize)
        .sum()
}

fn count_duplicates(timestamps: &[i64]) -> usize {
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    sorted.windows(2).filter(|w| w[0] == w[1]).count()
}

fn count_iqr_outliers(values: &[f64]) -> usize {
    if values.len() < 4 {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[3 * sorted.len() / 4];
    let iqr = q3 - q1;
    if iqr < f64::EPSILON {
        return 0;
    }
    let lo = q1 - 3.0 * iqr;
    let hi = q3 + 3.0 * iqr;
    values.iter().filter(|&&v| v < lo || v > hi).count()
}

/// Compute data quality metrics for a series, optionally with its
/// timestamps.
pub fn compute_data_quality(
    values: &[Option<f64>],
    timestamps: Option<&[i64]>,
) -> Result<DataQuality> {
    let n = values.len();
    if n == 0 {
        return Ok(DataQuality::default());
    }

    let n_missing = values.iter().filter(|v| v.is_none()).count();
    let non_null: Vec<f64> = values.iter().filter_map(|v| *v).collect();

    let (n_gaps, n_duplicate_timestamps, temporal_score) = match timestamps {
        Some(ts) => {
            let gaps = count_gaps(ts);
            let dups = count_duplicates(ts);
            let expected = n + gaps;
            let score = if expected > 0 {
                (n.saturating_sub(dups)) as f64 / expected as f64
            } else {
                0.0
            };
            (gaps, dups, score.clamp(0.0, 1.0))
        }
        None => (0, 0, 1.0),
    };

    let completeness_score = (n - n_missing) as f64 / n as f64;

    let n_non_finite = non_null.iter().filter(|v| !v.is_finite()).count();
    let n_outliers = count_iqr_outliers(&non_null);
    let magnitude_score = if non_null.is_empty() {
        0.0
    } else {
        ((non_null.len() - n_non_finite - n_outliers) as f64 / non_null.len() as f64)
            .clamp(0.0, 1.0)
    };

    let constant = is_constant(values);
    let n_zeros = non_null.iter().filter(|&&v| v == 0.0).count();
    let behavioral_score = if non_null.is_empty() || constant {
        0.0
    } else {
        (1.0 - n_zeros as f64 / non_null.len() as f64).clamp(0.0, 1.0)
    };

    let overall_score =
        (completeness_score + temporal_score + magnitude_score + behavioral_score) / 4.0;

    Ok(DataQuality {
        completeness_score,
        temporal_score,
        magnitude_score,
        behavioral_score,
        overall_score,
        n_gaps,
        n_missing,
        n_outliers,
        n_duplicate_timestamps,
        is_constant: constant,
    })
}

/// Generate a quality report for multiple series.
pub fn generate_quality_report(
    series_list: &[Vec<Option<f64>>],
    thresholds: &QualityThresholds,
) -> QualityReport {
    let mut report = QualityReport {
        n_total: series_list.len(),
        ..Default::default()
    };

    for series in series_list {
        let n = series.len();
        let n_missing = series.iter().filter(|v| v.is_none()).count();
        let n_valid = n - n_missing;
        let missing_ratio = if n > 0 { n_missing as f64 / n as f64 } else { 1.0 };

        let mut passed = true;

        if n_valid < thresholds.min_length {
            report.n_short += 1;
            passed = false;
        }
        if missing_ratio > thresholds.max_missing_ratio {
            report.n_missing_issues += 1;
            passed = false;
        }
        if is_constant(series) {
            report.n_constant += 1;
            passed = false;
        }

        if passed {
            report.n_passed += 1;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clean_series_scores_high() {
        let values: Vec<Option<f64>> = (0..50).map(|i| Some(10.0 + (i % 7) as f64)).collect();
        let timestamps: Vec<i64> = (0..50).map(|i| i * 100).collect();

        let q = compute_data_quality(&values, Some(&timestamps)).unwrap();
        assert_relative_eq!(q.completeness_score, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.temporal_score, 1.0, epsilon = 1e-12);
        assert!(q.overall_score > 0.9);
        assert!(!q.is_constant);
    }

    #[test]
    fn test_missing_values_lower_completeness() {
        let values = vec![Some(1.0), None, Some(3.0), None];
        let q = compute_data_quality(&values, None).unwrap();
        assert_relative_eq!(q.completeness_score, 0.5, epsilon = 1e-12);
        assert_eq!(q.n_missing, 2);
    }

    #[test]
    fn test_gaps_detected() {
        let values: Vec<Option<f64>> = (0..5).map(|i| Some(i as f64)).collect();
        // Grid of 100 with one missing slot at 200.
        let timestamps = vec![0, 100, 300, 400, 500];
        let q = compute_data_quality(&values, Some(&timestamps)).unwrap();
        assert_eq!(q.n_gaps, 1);
        assert!(q.temporal_score < 1.0);
    }

    #[test]
    fn test_duplicate_timestamps_counted() {
        let values: Vec<Option<f64>> = (0..4).map(|i| Some(i as f64)).collect();
        let timestamps = vec![0, 100, 100, 200];
        let q = compute_data_quality(&values, Some(&timestamps)).unwrap();
        assert_eq!(q.n_duplicate_timestamps, 1);
    }

    #[test]
    fn test_constant_series_flagged() {
        let values: Vec<Option<f64>> = vec![Some(5.0); 20];
        let q = compute_data_quality(&values, None).unwrap();
        assert!(q.is_constant);
        assert_relative_eq!(q.behavioral_score, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_outliers_lower_magnitude() {
        let mut values: Vec<Option<f64>> = (0..40).map(|i| Some(10.0 + (i % 5) as f64)).collect();
        values.push(Some(1e9));
        let q = compute_data_quality(&values, None).unwrap();
        assert!(q.n_outliers >= 1);
        assert!(q.magnitude_score < 1.0);
    }

    #[test]
    fn test_report() {
        let series_list = vec![
            (0..20).map(|i| Some(i as f64)).collect::<Vec<_>>(),
            vec![Some(1.0); 20],
            vec![Some(1.0), None, None, None, None, None],
        ];
        let report = generate_quality_report(&series_list, &QualityThresholds::default());
        assert_eq!(report.n_total, 3);
        assert_eq!(report.n_passed, 1);
        assert_eq!(report.n_constant, 2);
        assert!(report.n_missing_issues >= 1);
    }
}
