//! Seasonality detection and analysis.
//!
//! `detect_seasonality` returns candidate periods ordered by strength;
//! `analyze_seasonality` adds per-period strengths plus overall trend
//! and seasonal strength derived from a decomposition variance ratio.

use crate::decomposition::mstl_decompose;
use crate::error::{Result, TsError};
use crate::periods::{autocorrelation, autoperiod};

/// Result of seasonality analysis.
#[derive(Debug, Clone)]
pub struct SeasonalityAnalysis {
    /// Detected seasonal periods
    pub periods: Vec<i32>,
    /// Strength of each detected period (0-1)
    pub strengths: Vec<f64>,
    /// Primary (dominant) period
    pub primary_period: i32,
    /// Overall trend strength (0-1)
    pub trend_strength: f64,
    /// Overall seasonal strength (0-1)
    pub seasonal_strength: f64,
    /// Whether the series is considered seasonal
    pub is_seasonal: bool,
}

/// Detect seasonal periods, strongest first.
///
/// FFT-validated candidates come first; ACF peak-picking fills in when
/// the spectrum is inconclusive.
pub fn detect_seasonality(values: &[f64], max_period: Option<usize>) -> Result<Vec<i32>> {
    if values.len() < 4 {
        return Err(TsError::InsufficientData {
            needed: 4,
            got: values.len(),
        });
    }

    let cap = max_period
        .unwrap_or(values.len() / 2)
        .min(values.len() / 2);
    if cap < 2 {
        return Ok(vec![]);
    }

    let mut periods: Vec<i32> = Vec::new();

    if let Ok(detected) = autoperiod(values) {
        for d in detected {
            if d.period >= 2 && d.period <= cap {
                periods.push(d.period as i32);
            }
        }
    }

    if periods.is_empty() {
        // ACF fallback: local maxima above the noise threshold.
        let acf = autocorrelation(values, cap);
        let mut peaks: Vec<(usize, f64)> = Vec::new();
        for i in 1..acf.len().saturating_sub(1) {
            if acf[i] > acf[i - 1] && acf[i] > acf[i + 1] && acf[i] > 0.1 {
                peaks.push((i + 1, acf[i]));
            }
        }
        peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        periods.extend(peaks.into_iter().take(5).map(|(p, _)| p as i32));
    }

    periods.truncate(5);
    Ok(periods)
}

/// Seasonal strength of a single period: 1 - Var(remainder) /
/// Var(seasonal + remainder) from an STL-style decomposition.
pub fn seasonal_strength(values: &[f64], period: usize) -> f64 {
    if period < 2 || values.len() < 2 * period {
        return 0.0;
    }

    let Ok(decomp) = mstl_decompose(values, &[period as i32]) else {
        return 0.0;
    };
    if decomp.seasonal.is_empty() {
        return 0.0;
    }

    let detrended: Vec<f64> = decomp
        .seasonal[0]
        .iter()
        .zip(decomp.remainder.iter())
        .map(|(s, r)| s + r)
        .collect();

    strength_ratio(&decomp.remainder, &detrended)
}

/// Trend strength: 1 - Var(remainder) / Var(trend + remainder).
pub fn trend_strength(values: &[f64]) -> f64 {
    let Ok(decomp) = mstl_decompose(values, &[]) else {
        return 0.0;
    };
    let detrended: Vec<f64> = decomp
        .trend
        .iter()
        .zip(decomp.remainder.iter())
        .map(|(t, r)| t + r)
        .collect();
    strength_ratio(&decomp.remainder, &detrended)
}

fn variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
}

fn strength_ratio(remainder: &[f64], with_component: &[f64]) -> f64 {
    let var_with = variance(with_component);
    if var_with < f64::EPSILON {
        return 0.0;
    }
    (1.0 - variance(remainder) / var_with).clamp(0.0, 1.0)
}

/// Full seasonality analysis: periods, strengths, trend strength.
pub fn analyze_seasonality(
    values: &[f64],
    max_period: Option<usize>,
) -> Result<SeasonalityAnalysis> {
    let periods = detect_seasonality(values, max_period)?;

    let trend = trend_strength(values);

    if periods.is_empty() {
        return Ok(SeasonalityAnalysis {
            periods: vec![],
            strengths: vec![],
            primary_period: 0,
            trend_strength: trend,
            seasonal_strength: 0.0,
            is_seasonal: false,
        });
    }

    let strengths: Vec<f64> = periods
        .iter()
        .map(|&p| seasonal_strength(values, p as usize))
        .collect();

    // Order by measured strength rather than detection order.
    let mut order: Vec<usize> = (0..periods.len()).collect();
    order.sort_by(|&a, &b| {
        strengths[b]
            .partial_cmp(&strengths[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let periods: Vec<i32> = order.iter().map(|&i| periods[i]).collect();
    let strengths: Vec<f64> = order.iter().map(|&i| strengths[i]).collect();

    let primary_period = periods[0];
    let seasonal = strengths[0];

    Ok(SeasonalityAnalysis {
        periods,
        strengths,
        primary_period,
        trend_strength: trend,
        seasonal_strength: seasonal,
        is_seasonal: seasonal > 0.3,
    })
}
