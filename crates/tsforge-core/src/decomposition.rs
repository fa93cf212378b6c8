//! Time series decomposition (MSTL).
//!
//! Iterated STL with a centered-moving-average trend and per-position
//! seasonal means. Multiple periods are peeled off largest-last; the
//! remainder is what neither trend nor any seasonal component explains.

use crate::error::{Result, TsError};

/// Result of MSTL decomposition.
#[derive(Debug, Clone)]
pub struct MstlDecomposition {
    /// Trend component
    pub trend: Vec<f64>,
    /// Seasonal components (one per period)
    pub seasonal: Vec<Vec<f64>>,
    /// Seasonal periods used
    pub periods: Vec<i32>,
    /// Remainder (residual) component
    pub remainder: Vec<f64>,
}

/// Centered moving average with edge extension.
fn moving_average_trend(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let window = window.max(3).min(n) | 1; // force odd
    let half = window / 2;

    let mut trend = vec![f64::NAN; n];
    for i in half..(n - half) {
        let sum: f64 = values[i - half..=i + half].iter().sum();
        trend[i] = sum / window as f64;
    }

    let first_valid = trend.iter().position(|v| !v.is_nan()).unwrap_or(0);
    let last_valid = trend.iter().rposition(|v| !v.is_nan()).unwrap_or(n - 1);
    for i in 0..first_valid {
        trend[i] = trend[first_valid];
    }
    for i in (last_valid + 1)..n {
        trend[i] = trend[last_valid];
    }

    trend
}

/// One STL round for a single period: trend, seasonal, remainder.
fn stl_decompose(values: &[f64], period: usize) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    let n = values.len();
    if n < 2 * period {
        return Err(TsError::InsufficientData {
            needed: 2 * period,
            got: n,
        });
    }

    let window = if period % 2 == 0 { period + 1 } else { period };
    let trend = moving_average_trend(values, window);

    let detrended: Vec<f64> = values
        .iter()
        .zip(trend.iter())
        .map(|(v, t)| v - t)
        .collect();

    // Seasonal component: mean of the detrended values at each position.
    let mut pos_sum = vec![0.0; period];
    let mut pos_count = vec![0usize; period];
    for (i, &d) in detrended.iter().enumerate() {
        pos_sum[i % period] += d;
        pos_count[i % period] += 1;
    }

    let mut seasonal = vec![0.0; n];
    for (i, s) in seasonal.iter_mut().enumerate() {
        let p = i % period;
        if pos_count[p] > 0 {
            *s = pos_sum[p] / pos_count[p] as f64;
        }
    }

    // Center the seasonal component.
    let seasonal_mean = seasonal.iter().sum::<f64>() / n as f64;
    for s in &mut seasonal {
        *s -= seasonal_mean;
    }

    let remainder: Vec<f64> = values
        .iter()
        .zip(trend.iter())
        .zip(seasonal.iter())
        .map(|((v, t), s)| v - t - s)
        .collect();

    Ok((trend, seasonal, remainder))
}

/// MSTL decomposition over one or more seasonal periods.
///
/// Periods too long for the series (n < 2 * period) are skipped rather
/// than failing the whole decomposition.
pub fn mstl_decompose(values: &[f64], periods: &[i32]) -> Result<MstlDecomposition> {
    let n = values.len();
    if n == 0 {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }

    let mut usable: Vec<usize> = periods
        .iter()
        .filter(|&&p| p >= 2 && n >= 2 * p as usize)
        .map(|&p| p as usize)
        .collect();
    usable.sort_unstable();
    usable.dedup();

    if usable.is_empty() {
        // No seasonal structure to extract: trend plus remainder only.
        let window = (n / 5).max(3).min(n);
        let trend = moving_average_trend(values, window);
        let remainder: Vec<f64> = values
            .iter()
            .zip(trend.iter())
            .map(|(v, t)| v - t)
            .collect();
        return Ok(MstlDecomposition {
            trend,
            seasonal: vec![],
            periods: vec![],
            remainder,
        });
    }

    // Peel each period off the running residual, shortest first, then
    // recompute the trend on the fully deseasonalized series.
    let mut deseasonalized = values.to_vec();
    let mut seasonal_components = Vec::with_capacity(usable.len());

    for &p in &usable {
        let (_, seasonal, _) = stl_decompose(&deseasonalized, p)?;
        for (d, s) in deseasonalized.iter_mut().zip(seasonal.iter()) {
            *d -= s;
        }
        seasonal_components.push(seasonal);
    }

    let longest = *usable.last().unwrap_or(&3);
    let window = if longest % 2 == 0 { longest + 1 } else { longest };
    let trend = moving_average_trend(&deseasonalized, window);

    let mut remainder = Vec::with_capacity(n);
    for i in 0..n {
        let seasonal_total: f64 = seasonal_components.iter().map(|s| s[i]).sum();
        remainder.push(values[i] - trend[i] - seasonal_total);
    }

    Ok(MstlDecomposition {
        trend,
        seasonal: seasonal_components,
        periods: usable.iter().map(|&p| p as i32).collect(),
        remainder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_single_period_reconstruction() {
        let period = 12;
        let values: Vec<f64> = (0..96)
            .map(|i| 100.0 + 0.5 * i as f64 + 10.0 * (2.0 * PI * (i % period) as f64 / period as f64).sin())
            .collect();

        let result = mstl_decompose(&values, &[period as i32]).unwrap();
        assert_eq!(result.periods, vec![12]);
        assert_eq!(result.seasonal.len(), 1);

        // Components sum back to the series.
        for i in 0..values.len() {
            let rebuilt = result.trend[i] + result.seasonal[0][i] + result.remainder[i];
            assert!((rebuilt - values[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_seasonal_amplitude_captured() {
        let period = 6;
        let values: Vec<f64> = (0..72)
            .map(|i| 50.0 + 8.0 * (2.0 * PI * (i % period) as f64 / period as f64).sin())
            .collect();

        let result = mstl_decompose(&values, &[period as i32]).unwrap();
        let max_seasonal = result.seasonal[0]
            .iter()
            .fold(0.0f64, |acc, s| acc.max(s.abs()));
        assert!(max_seasonal > 4.0, "seasonal component too flat: {}", max_seasonal);
    }

    #[test]
    fn test_multiple_periods() {
        let values: Vec<f64> = (0..240)
            .map(|i| {
                20.0 + 5.0 * (2.0 * PI * (i % 4) as f64 / 4.0).sin()
                    + 3.0 * (2.0 * PI * (i % 24) as f64 / 24.0).cos()
            })
            .collect();

        let result = mstl_decompose(&values, &[4, 24]).unwrap();
        assert_eq!(result.periods, vec![4, 24]);
        assert_eq!(result.seasonal.len(), 2);
    }

    #[test]
    fn test_too_long_period_skipped() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let result = mstl_decompose(&values, &[50]).unwrap();
        assert!(result.periods.is_empty());
        assert!(result.seasonal.is_empty());
        assert_eq!(result.trend.len(), 20);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(mstl_decompose(&[], &[12]).is_err());
    }
}
