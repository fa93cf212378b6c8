//! Seasonal period detection.
//!
//! Probes: FFT periodogram (the fastest reliable default),
//! autocorrelation peak-picking, autoperiod (FFT candidates validated by
//! ACF), and an AIC comparison that scores explicit candidate periods by
//! how much a seasonal-mean fit improves on a flat one.

use crate::error::{Result, TsError};
use rustfft::{num_complex::Complex, FftPlanner};
use std::str::FromStr;

/// Detection method selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PeriodMethod {
    /// FFT periodogram peak.
    #[default]
    Fft,
    /// Autocorrelation peak-picking.
    Acf,
    /// FFT candidates validated by ACF.
    Autoperiod,
}

impl FromStr for PeriodMethod {
    type Err = TsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fft" | "periodogram" => Ok(Self::Fft),
            "acf" | "autocorrelation" => Ok(Self::Acf),
            "autoperiod" | "auto" => Ok(Self::Autoperiod),
            _ => Err(TsError::InvalidParameter {
                param: "method".to_string(),
                value: s.to_string(),
                reason: "expected one of fft, acf, autoperiod".to_string(),
            }),
        }
    }
}

/// A single detected period with its detection confidence.
#[derive(Debug, Clone)]
pub struct DetectedPeriod {
    pub period: usize,
    /// Peak power relative to mean power (FFT) or ACF value at the lag.
    pub confidence: f64,
}

/// Single-probe result.
#[derive(Debug, Clone)]
pub struct SinglePeriodResult {
    pub period: f64,
    pub confidence: f64,
}

/// Power spectrum of the mean-removed series (positive frequencies,
/// excluding DC).
pub fn periodogram(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);

    let mut buffer: Vec<Complex<f64>> = values
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .collect();
    fft.process(&mut buffer);

    buffer[1..n / 2 + 1]
        .iter()
        .map(|c| c.norm_sqr() / n as f64)
        .collect()
}

/// Estimate the dominant period from the periodogram peak.
pub fn estimate_period_fft(values: &[f64]) -> Result<SinglePeriodResult> {
    let n = values.len();
    if n < 8 {
        return Err(TsError::InsufficientData { needed: 8, got: n });
    }

    let power = periodogram(values);
    if power.is_empty() {
        return Err(TsError::InvalidInput("Empty periodogram".to_string()));
    }

    let mean_power = power.iter().sum::<f64>() / power.len() as f64;
    let (best_bin, best_power) = power
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, &p)| (i + 1, p))
        .unwrap_or((1, 0.0));

    let period = n as f64 / best_bin as f64;
    let confidence = if mean_power > f64::EPSILON {
        best_power / mean_power
    } else {
        0.0
    };

    Ok(SinglePeriodResult { period, confidence })
}

/// Autocorrelation at every lag up to `max_lag`.
pub fn autocorrelation(values: &[f64], max_lag: usize) -> Vec<f64> {
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();

    if variance.abs() < f64::EPSILON {
        return vec![0.0; max_lag];
    }

    (1..=max_lag)
        .map(|lag| {
            let mut sum = 0.0;
            for i in 0..(n - lag) {
                sum += (values[i] - mean) * (values[i + lag] - mean);
            }
            sum / variance
        })
        .collect()
}

/// Estimate the dominant period as the strongest interior ACF peak.
pub fn estimate_period_acf(values: &[f64]) -> Result<SinglePeriodResult> {
    let n = values.len();
    if n < 8 {
        return Err(TsError::InsufficientData { needed: 8, got: n });
    }

    let max_lag = n / 2;
    let acf = autocorrelation(values, max_lag);

    let mut best_lag = 0usize;
    let mut best_val = 0.0;
    for i in 1..acf.len().saturating_sub(1) {
        if acf[i] > acf[i - 1] && acf[i] > acf[i + 1] && acf[i] > best_val {
            best_val = acf[i];
            best_lag = i + 1;
        }
    }

    if best_lag == 0 {
        return Err(TsError::DataQuality(
            "No autocorrelation peak found".to_string(),
        ));
    }

    Ok(SinglePeriodResult {
        period: best_lag as f64,
        confidence: best_val,
    })
}

/// Autoperiod: FFT candidate periods validated against the ACF.
///
/// A candidate survives when the ACF at its (rounded) lag is a local
/// maximum above the validation threshold.
pub fn autoperiod(values: &[f64]) -> Result<Vec<DetectedPeriod>> {
    let n = values.len();
    if n < 8 {
        return Err(TsError::InsufficientData { needed: 8, got: n });
    }

    let power = periodogram(values);
    let mean_power = power.iter().sum::<f64>() / power.len().max(1) as f64;
    let max_lag = n / 2;
    let acf = autocorrelation(values, max_lag);

    // Candidate bins with power well above the mean.
    let mut candidates: Vec<(usize, f64)> = power
        .iter()
        .enumerate()
        .filter(|(_, &p)| p > 2.0 * mean_power)
        .map(|(i, &p)| (i + 1, p))
        .collect();
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut detected = Vec::new();
    for (bin, p) in candidates.into_iter().take(10) {
        let period = (n as f64 / bin as f64).round() as usize;
        if period < 2 || period > max_lag {
            continue;
        }
        let lag = period - 1; // acf[0] is lag 1
        if lag == 0 || lag + 1 >= acf.len() {
            continue;
        }
        let is_peak = acf[lag] >= acf[lag - 1] && acf[lag] >= acf[lag + 1];
        if is_peak && acf[lag] > 0.1 && !detected.iter().any(|d: &DetectedPeriod| d.period == period)
        {
            detected.push(DetectedPeriod {
                period,
                confidence: p / mean_power.max(f64::EPSILON),
            });
        }
    }

    Ok(detected)
}

/// Multi-period detection with the chosen method.
pub fn detect_periods(values: &[f64], method: PeriodMethod) -> Result<Vec<DetectedPeriod>> {
    match method {
        PeriodMethod::Fft => {
            let r = estimate_period_fft(values)?;
            let period = r.period.round() as usize;
            if period < 2 {
                return Ok(vec![]);
            }
            Ok(vec![DetectedPeriod {
                period,
                confidence: r.confidence,
            }])
        }
        PeriodMethod::Acf => {
            let r = estimate_period_acf(values)?;
            Ok(vec![DetectedPeriod {
                period: r.period.round() as usize,
                confidence: r.confidence,
            }])
        }
        PeriodMethod::Autoperiod => autoperiod(values),
    }
}

/// Convenience: dominant period for forecasting, or None when the series
/// shows no usable cycle. FFT probe with an ACF sanity check.
pub fn primary_period(values: &[f64]) -> Option<usize> {
    let candidates = autoperiod(values).ok()?;
    candidates.first().map(|d| d.period).or_else(|| {
        estimate_period_fft(values)
            .ok()
            .map(|r| r.period.round() as usize)
            .filter(|&p| p >= 2 && p <= values.len() / 2)
    })
}

/// Score explicit candidate periods by AIC of a seasonal-means fit
/// against the flat-mean baseline; returns (period, aic) sorted best
/// first. The baseline is included with period 1.
pub fn aic_comparison(values: &[f64], candidates: &[usize]) -> Result<Vec<(usize, f64)>> {
    let n = values.len();
    if n < 4 {
        return Err(TsError::InsufficientData { needed: 4, got: n });
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let sse_flat: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    let mut scored = vec![(1usize, aic_of(sse_flat, n, 1))];

    for &p in candidates {
        if p < 2 || n < 2 * p {
            continue;
        }
        let mut pos_sum = vec![0.0; p];
        let mut pos_count = vec![0usize; p];
        for (i, &v) in values.iter().enumerate() {
            pos_sum[i % p] += v;
            pos_count[i % p] += 1;
        }
        let sse: f64 = values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let m = pos_sum[i % p] / pos_count[i % p].max(1) as f64;
                (v - m).powi(2)
            })
            .sum();
        scored.push((p, aic_of(sse, n, p)));
    }

    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored)
}

fn aic_of(sse: f64, n: usize, k: usize) -> f64 {
    n as f64 * (sse / n as f64).max(1e-12).ln() + 2.0 * k as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(n: usize, period: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * i as f64 / period as f64).sin())
            .collect()
    }

    #[test]
    fn test_fft_finds_sine_period() {
        let values = sine(120, 12);
        let result = estimate_period_fft(&values).unwrap();
        assert!(
            (result.period - 12.0).abs() <= 1.0,
            "period was {}",
            result.period
        );
        assert!(result.confidence > 5.0);
    }

    #[test]
    fn test_acf_finds_sine_period() {
        let values = sine(120, 12);
        let result = estimate_period_acf(&values).unwrap();
        assert!((result.period - 12.0).abs() <= 1.0);
    }

    #[test]
    fn test_autoperiod_validates() {
        let values = sine(144, 12);
        let detected = autoperiod(&values).unwrap();
        assert!(!detected.is_empty());
        assert!(detected.iter().any(|d| (d.period as i64 - 12).abs() <= 1));
    }

    #[test]
    fn test_noise_low_confidence() {
        // Deterministic pseudo-noise: no strong cycle.
        let values: Vec<f64> = (0..128)
            .map(|i| ((i * 2654435761u64 as usize) % 97) as f64 / 97.0)
            .collect();
        let r = estimate_period_fft(&values).unwrap();
        let seasonal = sine(128, 8);
        let r_seasonal = estimate_period_fft(&seasonal).unwrap();
        assert!(r_seasonal.confidence > r.confidence);
    }

    #[test]
    fn test_aic_comparison_prefers_true_period() {
        let values: Vec<f64> = (0..96)
            .map(|i| 10.0 + 5.0 * (2.0 * PI * (i % 8) as f64 / 8.0).sin())
            .collect();
        let scored = aic_comparison(&values, &[4, 8, 12]).unwrap();
        assert_eq!(scored[0].0, 8, "scores: {:?}", scored);
    }

    #[test]
    fn test_primary_period() {
        let values: Vec<f64> = (0..144)
            .map(|i| 50.0 + 10.0 * (2.0 * PI * i as f64 / 24.0).sin())
            .collect();
        let p = primary_period(&values);
        assert!(p.is_some());
        assert!((p.unwrap() as i64 - 24).abs() <= 2);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("fft".parse::<PeriodMethod>().unwrap(), PeriodMethod::Fft);
        assert_eq!("ACF".parse::<PeriodMethod>().unwrap(), PeriodMethod::Acf);
        assert!("bogus".parse::<PeriodMethod>().is_err());
    }

    #[test]
    fn test_short_series_rejected() {
        assert!(estimate_period_fft(&[1.0, 2.0, 3.0]).is_err());
    }
}
