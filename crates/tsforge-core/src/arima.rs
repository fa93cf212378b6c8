//! Autoregressive forecasting (ARIMA-style) with least-squares
//! coefficient estimation.
//!
//! The model is AR(p) on a d-times differenced series with an intercept.
//! Coefficients come from the normal equations solved with faer; order
//! selection for the auto variant is by AIC over a small (p, d) grid.

use crate::error::{Result, TsError};
use crate::filter::diff;
use faer::prelude::*;

/// A fitted AR(p) model on a differenced series.
#[derive(Debug, Clone)]
pub struct ArimaFit {
    pub p: usize,
    pub d: usize,
    /// [intercept, ar_1, .., ar_p]
    pub coefficients: Vec<f64>,
    pub sigma2: f64,
    pub aic: f64,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    /// Tail of the original series needed to undo the differencing.
    last_values: Vec<f64>,
    /// Tail of the differenced series feeding the recursion.
    last_diffs: Vec<f64>,
}

/// Solve the AR normal equations X'X b = X'y with faer.
fn solve_ar(y: &[f64], p: usize) -> Option<Vec<f64>> {
    let n = y.len();
    if n <= p + 1 {
        return None;
    }
    let rows = n - p;
    let cols = p + 1; // intercept first

    let x = Mat::from_fn(rows, cols, |i, j| {
        if j == 0 {
            1.0
        } else {
            y[p + i - j]
        }
    });
    let rhs = Mat::from_fn(rows, 1, |i, _| y[p + i]);

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &rhs;

    let solution = xtx.partial_piv_lu().solve(&xty);
    let coeffs: Vec<f64> = (0..cols).map(|j| solution[(j, 0)]).collect();
    if coeffs.iter().all(|c| c.is_finite()) {
        Some(coeffs)
    } else {
        None
    }
}

/// Fit AR(p) after differencing d times.
pub fn fit_arima(values: &[f64], p: usize, d: usize) -> Result<ArimaFit> {
    let n = values.len();
    if d > 1 {
        return Err(TsError::InvalidParameter {
            param: "d".to_string(),
            value: d.to_string(),
            reason: "only differencing orders 0 and 1 are supported".to_string(),
        });
    }
    if n < p + d + 3 {
        return Err(TsError::InsufficientData {
            needed: p + d + 3,
            got: n,
        });
    }

    let worked = diff(values, d)?;
    if worked.len() <= p + 1 {
        return Err(TsError::InsufficientData {
            needed: p + d + 3,
            got: n,
        });
    }

    let coefficients = if p == 0 {
        // Intercept-only model: the differenced mean.
        vec![worked.iter().sum::<f64>() / worked.len() as f64]
    } else {
        solve_ar(&worked, p).ok_or_else(|| {
            TsError::NumericalFailure("Singular system in AR coefficient estimation".to_string())
        })?
    };

    // One-step fitted values on the differenced scale.
    let mut fitted_diff = Vec::with_capacity(worked.len());
    let mut sse = 0.0;
    let mut count = 0usize;
    for t in 0..worked.len() {
        if t < p {
            fitted_diff.push(f64::NAN);
            continue;
        }
        let mut pred = coefficients[0];
        for j in 1..=p {
            pred += coefficients[j] * worked[t - j];
        }
        fitted_diff.push(pred);
        sse += (worked[t] - pred).powi(2);
        count += 1;
    }

    let sigma2 = if count > 0 { sse / count as f64 } else { f64::NAN };
    let k = (p + 2) as f64; // intercept + AR terms + variance
    let aic = if count > 0 {
        count as f64 * sigma2.max(1e-12).ln() + 2.0 * k
    } else {
        f64::INFINITY
    };

    // Undo differencing for the fitted values on the original scale.
    // fitted[t + d] approximates y[t + d]; earlier positions stay NaN.
    let mut fitted = vec![f64::NAN; n];
    for t in 0..worked.len() {
        if fitted_diff[t].is_nan() {
            continue;
        }
        fitted[t + d] = if d == 0 {
            fitted_diff[t]
        } else {
            values[t] + fitted_diff[t]
        };
    }

    let residuals: Vec<f64> = values
        .iter()
        .zip(fitted.iter())
        .map(|(y, f)| if f.is_nan() { f64::NAN } else { y - f })
        .collect();

    let last_values = values[n.saturating_sub(d.max(1))..].to_vec();
    let last_diffs = worked[worked.len().saturating_sub(p.max(1))..].to_vec();

    Ok(ArimaFit {
        p,
        d,
        coefficients,
        sigma2,
        aic,
        fitted,
        residuals,
        last_values,
        last_diffs,
    })
}

impl ArimaFit {
    /// Recursive h-step forecast, integrating the differenced
    /// predictions back to the original scale.
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        let mut history = self.last_diffs.clone();
        let mut level = *self.last_values.last().unwrap_or(&0.0);
        let mut point = Vec::with_capacity(horizon);

        for _ in 0..horizon {
            let mut pred = self.coefficients[0];
            for j in 1..=self.p {
                let idx = history.len().checked_sub(j);
                pred += self.coefficients[j] * idx.map_or(0.0, |i| history[i]);
            }
            history.push(pred);

            let next = match self.d {
                0 => pred,
                _ => level + pred,
            };
            point.push(next);
            if self.d > 0 {
                level = next;
            }
        }

        point
    }
}

/// Order selection over a small (p, d) grid by AIC.
pub fn auto_arima(values: &[f64]) -> Result<ArimaFit> {
    let mut best: Option<ArimaFit> = None;

    for d in 0..=1usize {
        for p in 0..=3usize {
            let Ok(fit) = fit_arima(values, p, d) else {
                continue;
            };
            if !fit.aic.is_finite() {
                continue;
            }
            match &best {
                Some(b) if b.aic <= fit.aic => {}
                _ => best = Some(fit),
            }
        }
    }

    best.ok_or_else(|| {
        TsError::NumericalFailure("No ARIMA candidate could be estimated".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ar1_recovers_coefficient() {
        // y_t = 2 + 0.6 y_{t-1}, deterministic.
        let mut values = vec![5.0];
        for _ in 0..80 {
            let prev = *values.last().unwrap();
            values.push(2.0 + 0.6 * prev);
        }

        let fit = fit_arima(&values, 1, 0).unwrap();
        assert_relative_eq!(fit.coefficients[1], 0.6, epsilon = 1e-3);
        assert_relative_eq!(fit.coefficients[0], 2.0, epsilon = 1e-2);
    }

    #[test]
    fn test_differenced_trend() {
        // Linear trend: first difference is constant, AR(1) on it
        // forecasts the same slope forward.
        let values: Vec<f64> = (0..50).map(|i| 10.0 + 2.0 * i as f64).collect();
        let fit = fit_arima(&values, 1, 1).unwrap();
        let point = fit.forecast(3);

        assert_relative_eq!(point[0], 110.0, epsilon = 0.5);
        assert_relative_eq!(point[1], 112.0, epsilon = 0.5);
        assert_relative_eq!(point[2], 114.0, epsilon = 0.5);
    }

    #[test]
    fn test_auto_arima_selects_finite() {
        let values: Vec<f64> = (0..60)
            .map(|i| 30.0 + 0.5 * i as f64 + ((i * 7 % 5) as f64 - 2.0))
            .collect();
        let fit = auto_arima(&values).unwrap();
        assert!(fit.aic.is_finite());
        assert!(fit.forecast(5).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(fit_arima(&[1.0, 2.0], 1, 1).is_err());
    }
}
