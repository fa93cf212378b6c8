//! Per-series statistics (ts_stats).
//!
//! Computes 24 metrics per series: counts, moments, quantiles,
//! autocorrelation, trend and seasonal strength, approximate entropy,
//! and stability. The date-aware variant additionally classifies the
//! sampling frequency.

use crate::error::Result;
use crate::periods::autocorrelation;
use crate::seasonality;
use chrono::DateTime;

/// Sampling frequency classification from timestamp deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrequencyType {
    #[default]
    Unknown,
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl FrequencyType {
    /// Classify a median delta given in seconds.
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            s if s <= 0 => FrequencyType::Unknown,
            s if s < 60 => FrequencyType::Secondly,
            s if s < 3_600 => FrequencyType::Minutely,
            s if s < 86_400 => FrequencyType::Hourly,
            s if s < 7 * 86_400 => FrequencyType::Daily,
            s if s < 28 * 86_400 => FrequencyType::Weekly,
            s if s < 90 * 86_400 => FrequencyType::Monthly,
            s if s < 365 * 86_400 => FrequencyType::Quarterly,
            _ => FrequencyType::Yearly,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrequencyType::Unknown => "unknown",
            FrequencyType::Secondly => "secondly",
            FrequencyType::Minutely => "minutely",
            FrequencyType::Hourly => "hourly",
            FrequencyType::Daily => "daily",
            FrequencyType::Weekly => "weekly",
            FrequencyType::Monthly => "monthly",
            FrequencyType::Quarterly => "quarterly",
            FrequencyType::Yearly => "yearly",
        }
    }
}

/// Time series statistics result containing 24 metrics.
#[derive(Debug, Clone, Default)]
pub struct TsStats {
    /// Total number of observations
    pub length: usize,
    /// Number of NULL values
    pub n_nulls: usize,
    /// Number of zero values
    pub n_zeros: usize,
    /// Number of positive values
    pub n_positive: usize,
    /// Number of negative values
    pub n_negative: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Median (50th percentile)
    pub median: f64,
    /// Standard deviation (sample)
    pub std_dev: f64,
    /// Variance (sample)
    pub variance: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Range (max - min)
    pub range: f64,
    /// Sum of all values
    pub sum: f64,
    /// Skewness (Fisher's)
    pub skewness: f64,
    /// Kurtosis (excess)
    pub kurtosis: f64,
    /// Coefficient of variation (std_dev / |mean|)
    pub coef_variation: f64,
    /// First quartile
    pub q1: f64,
    /// Third quartile
    pub q3: f64,
    /// Interquartile range
    pub iqr: f64,
    /// Autocorrelation at lag 1
    pub autocorr_lag1: f64,
    /// Trend strength (0-1)
    pub trend_strength: f64,
    /// Seasonality strength (0-1)
    pub seasonality_strength: f64,
    /// Approximate entropy
    pub entropy: f64,
    /// Stability (1 - variance of chunk means / total variance)
    pub stability: f64,
}

/// Statistics plus frequency classification for the date-aware variant.
#[derive(Debug, Clone, Default)]
pub struct TsStatsWithDates {
    pub stats: TsStats,
    pub frequency: FrequencyType,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Sample-entropy style approximate entropy with m = 2 and r = 0.2 sd.
fn approximate_entropy(values: &[f64], std_dev: f64) -> f64 {
    let n = values.len();
    if n < 4 || std_dev < f64::EPSILON {
        return f64::NAN;
    }
    let m = 2usize;
    let r = 0.2 * std_dev;

    let phi = |m: usize| -> f64 {
        let count = n - m + 1;
        let mut total = 0.0;
        for i in 0..count {
            let mut matches = 0usize;
            for j in 0..count {
                let close = (0..m).all(|k| (values[i + k] - values[j + k]).abs() <= r);
                if close {
                    matches += 1;
                }
            }
            total += (matches as f64 / count as f64).ln();
        }
        total / count as f64
    };

    phi(m) - phi(m + 1)
}

/// Stability: how much of the variance chunk means explain.
fn stability(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 8 {
        return f64::NAN;
    }
    let n_chunks = 4usize;
    let chunk = n / n_chunks;

    let mean = values.iter().sum::<f64>() / n as f64;
    let total_var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    if total_var < f64::EPSILON {
        return 1.0;
    }

    let chunk_means: Vec<f64> = (0..n_chunks)
        .map(|c| {
            let slice = &values[c * chunk..((c + 1) * chunk).min(n)];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect();
    let mean_of_means = chunk_means.iter().sum::<f64>() / n_chunks as f64;
    let var_of_means = chunk_means
        .iter()
        .map(|m| (m - mean_of_means).powi(2))
        .sum::<f64>()
        / n_chunks as f64;

    (1.0 - var_of_means / total_var).clamp(0.0, 1.0)
}

/// Compute the 24-metric statistics for a series with potential NULLs.
pub fn compute_ts_stats(series: &[Option<f64>]) -> Result<TsStats> {
    let length = series.len();
    if length == 0 {
        return Ok(TsStats::default());
    }

    let mut n_nulls = 0;
    let mut values: Vec<f64> = Vec::with_capacity(length);
    for val in series {
        match val {
            Some(v) => values.push(*v),
            None => n_nulls += 1,
        }
    }

    let n_valid = values.len();
    if n_valid == 0 {
        return Ok(TsStats {
            length,
            n_nulls,
            mean: f64::NAN,
            median: f64::NAN,
            std_dev: f64::NAN,
            variance: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            range: f64::NAN,
            skewness: f64::NAN,
            kurtosis: f64::NAN,
            coef_variation: f64::NAN,
            q1: f64::NAN,
            q3: f64::NAN,
            iqr: f64::NAN,
            autocorr_lag1: f64::NAN,
            trend_strength: f64::NAN,
            seasonality_strength: f64::NAN,
            entropy: f64::NAN,
            stability: f64::NAN,
            ..Default::default()
        });
    }

    let n_zeros = values.iter().filter(|&&v| v == 0.0).count();
    let n_positive = values.iter().filter(|&&v| v > 0.0).count();
    let n_negative = values.iter().filter(|&&v| v < 0.0).count();

    let sum: f64 = values.iter().sum();
    let mean = sum / n_valid as f64;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let variance = if n_valid > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n_valid - 1) as f64
    } else {
        0.0
    };
    let std_dev = variance.sqrt();

    let coef_variation = if mean.abs() > f64::EPSILON {
        std_dev / mean.abs()
    } else {
        f64::NAN
    };

    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = percentile(&sorted, 0.5);
    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);

    let skewness = if n_valid > 2 && std_dev > f64::EPSILON {
        let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n_valid as f64;
        m3 / std_dev.powi(3)
    } else {
        f64::NAN
    };

    let kurtosis = if n_valid > 3 && std_dev > f64::EPSILON {
        let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n_valid as f64;
        (m4 / std_dev.powi(4)) - 3.0
    } else {
        f64::NAN
    };

    let autocorr_lag1 = if n_valid > 2 {
        autocorrelation(&values, 1).first().cloned().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    };

    let trend = if n_valid >= 8 {
        seasonality::trend_strength(&values)
    } else {
        f64::NAN
    };
    let seasonal = if n_valid >= 8 {
        crate::periods::primary_period(&values)
            .map(|p| seasonality::seasonal_strength(&values, p))
            .unwrap_or(0.0)
    } else {
        f64::NAN
    };

    // Entropy is quadratic in n; subsample long series.
    let entropy_values: Vec<f64> = if n_valid > 512 {
        let step = n_valid / 512;
        values.iter().step_by(step.max(1)).cloned().collect()
    } else {
        values.clone()
    };
    let entropy = approximate_entropy(&entropy_values, std_dev);

    Ok(TsStats {
        length,
        n_nulls,
        n_zeros,
        n_positive,
        n_negative,
        mean,
        median,
        std_dev,
        variance,
        min,
        max,
        range: max - min,
        sum,
        skewness,
        kurtosis,
        coef_variation,
        q1,
        q3,
        iqr: q3 - q1,
        autocorr_lag1,
        trend_strength: trend,
        seasonality_strength: seasonal,
        entropy,
        stability: stability(&values),
    })
}

/// Date-aware statistics: adds frequency classification from the median
/// positive timestamp delta (timestamps in microseconds since epoch).
pub fn compute_ts_stats_with_dates(
    timestamps: &[i64],
    series: &[Option<f64>],
) -> Result<TsStatsWithDates> {
    let stats = compute_ts_stats(series)?;

    if timestamps.is_empty() {
        return Ok(TsStatsWithDates {
            stats,
            ..Default::default()
        });
    }

    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();

    let mut deltas: Vec<i64> = sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&d| d > 0)
        .collect();
    deltas.sort_unstable();

    let frequency = if deltas.is_empty() {
        FrequencyType::Unknown
    } else {
        let median_micros = deltas[deltas.len() / 2];
        FrequencyType::from_seconds(median_micros / 1_000_000)
    };

    Ok(TsStatsWithDates {
        stats,
        frequency,
        start_timestamp: sorted[0],
        end_timestamp: sorted[sorted.len() - 1],
    })
}

/// Render a microsecond timestamp for reports.
pub fn format_timestamp(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| micros.to_string())
}

impl TsStatsWithDates {
    /// One-line description for quality reports and logs.
    pub fn summary(&self) -> String {
        format!(
            "{} series, {} observations ({} null) from {} to {}",
            self.frequency.name(),
            self.stats.length,
            self.stats.n_nulls,
            format_timestamp(self.start_timestamp),
            format_timestamp(self.end_timestamp),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_basic_stats() {
        let series: Vec<Option<f64>> = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)];
        let stats = compute_ts_stats(&series).unwrap();

        assert_eq!(stats.length, 5);
        assert_eq!(stats.n_nulls, 0);
        assert_relative_eq!(stats.mean, 3.0, epsilon = 1e-12);
        assert_relative_eq!(stats.median, 3.0, epsilon = 1e-12);
        assert_relative_eq!(stats.min, 1.0, epsilon = 1e-12);
        assert_relative_eq!(stats.max, 5.0, epsilon = 1e-12);
        assert_relative_eq!(stats.range, 4.0, epsilon = 1e-12);
        assert_relative_eq!(stats.sum, 15.0, epsilon = 1e-12);
    }

    #[test]
    fn test_null_and_sign_counting() {
        let series = vec![Some(-1.0), None, Some(0.0), Some(2.0), None];
        let stats = compute_ts_stats(&series).unwrap();
        assert_eq!(stats.length, 5);
        assert_eq!(stats.n_nulls, 2);
        assert_eq!(stats.n_zeros, 1);
        assert_eq!(stats.n_positive, 1);
        assert_eq!(stats.n_negative, 1);
    }

    #[test]
    fn test_all_null() {
        let series = vec![None, None, None];
        let stats = compute_ts_stats(&series).unwrap();
        assert_eq!(stats.n_nulls, 3);
        assert!(stats.mean.is_nan());
    }

    #[test]
    fn test_trend_strength_on_trending_series() {
        let series: Vec<Option<f64>> = (0..50).map(|i| Some(2.0 * i as f64)).collect();
        let stats = compute_ts_stats(&series).unwrap();
        assert!(stats.trend_strength > 0.8);
    }

    #[test]
    fn test_stability_constant_series() {
        let series: Vec<Option<f64>> = vec![Some(5.0); 40];
        let stats = compute_ts_stats(&series).unwrap();
        assert_relative_eq!(stats.stability, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frequency_classification() {
        assert_eq!(FrequencyType::from_seconds(1), FrequencyType::Secondly);
        assert_eq!(FrequencyType::from_seconds(60), FrequencyType::Minutely);
        assert_eq!(FrequencyType::from_seconds(3_600), FrequencyType::Hourly);
        assert_eq!(FrequencyType::from_seconds(86_400), FrequencyType::Daily);
        assert_eq!(FrequencyType::from_seconds(7 * 86_400), FrequencyType::Weekly);
        assert_eq!(FrequencyType::from_seconds(30 * 86_400), FrequencyType::Monthly);
        assert_eq!(FrequencyType::from_seconds(400 * 86_400), FrequencyType::Yearly);
    }

    #[test]
    fn test_with_dates() {
        let day_micros = 86_400i64 * 1_000_000;
        let timestamps: Vec<i64> = (0..10).map(|i| i * day_micros).collect();
        let series: Vec<Option<f64>> = (0..10).map(|i| Some(i as f64)).collect();

        let result = compute_ts_stats_with_dates(&timestamps, &series).unwrap();
        assert_eq!(result.frequency, FrequencyType::Daily);
        assert_eq!(result.start_timestamp, 0);
        assert_eq!(result.end_timestamp, 9 * day_micros);

        let summary = result.summary();
        assert!(summary.contains("daily"));
        assert!(summary.contains("1970-01-01"));
    }
}
