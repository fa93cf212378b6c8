//! Evaluation metrics for time series forecasting.
//!
//! Provides 12 standard metrics for evaluating forecast accuracy.
//! Mismatched lengths raise `InvalidInput`; empty input raises
//! `InsufficientData`; data-quality conditions (a zero actual under
//! MAPE, a zero-MAE baseline) yield NaN, which the host surfaces as
//! NULL.

use crate::error::{Result, TsError};

/// Mean Absolute Error
pub fn mae(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;
    let sum: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| (a - f).abs())
        .sum();
    Ok(sum / actual.len() as f64)
}

/// Mean Squared Error
pub fn mse(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;
    let sum: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| (a - f).powi(2))
        .sum();
    Ok(sum / actual.len() as f64)
}

/// Root Mean Squared Error
pub fn rmse(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    Ok(mse(actual, forecast)?.sqrt())
}

/// Mean Absolute Percentage Error
///
/// Defined only when every actual is non-zero; a zero actual yields NaN
/// (NULL at the SQL surface), not a silently-skipped term.
pub fn mape(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;
    if actual.iter().any(|a| a.abs() <= f64::EPSILON) {
        return Ok(f64::NAN);
    }
    let sum: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| ((a - f) / a).abs())
        .sum();
    Ok(sum / actual.len() as f64 * 100.0)
}

/// Symmetric Mean Absolute Percentage Error, in [0, 200].
pub fn smape(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;
    let sum: f64 = actual
        .iter()
        .zip(forecast.iter())
        .filter(|(a, f)| a.abs() + f.abs() > f64::EPSILON)
        .map(|(a, f)| 2.0 * (a - f).abs() / (a.abs() + f.abs()))
        .sum();
    let count = actual
        .iter()
        .zip(forecast.iter())
        .filter(|(a, f)| a.abs() + f.abs() > f64::EPSILON)
        .count();
    if count == 0 {
        return Ok(f64::NAN);
    }
    Ok(sum / count as f64 * 100.0)
}

/// Mean Absolute Scaled Error
///
/// Three-argument form: MASE = MAE(actual, predicted) / MAE(actual, baseline).
pub fn mase(actual: &[f64], forecast: &[f64], baseline: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;

    if actual.len() != baseline.len() {
        return Err(TsError::InvalidInput(format!(
            "Actual and baseline arrays must have the same length: {} vs {}",
            actual.len(),
            baseline.len()
        )));
    }

    let forecast_mae = mae(actual, forecast)?;
    let baseline_mae = mae(actual, baseline)?;

    if baseline_mae.abs() < f64::EPSILON {
        return Ok(f64::NAN);
    }

    Ok(forecast_mae / baseline_mae)
}

/// R-squared (Coefficient of Determination), in (-inf, 1].
pub fn r2(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;

    let mean: f64 = actual.iter().sum::<f64>() / actual.len() as f64;

    let ss_res: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| (a - f).powi(2))
        .sum();

    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

    if ss_tot.abs() < f64::EPSILON {
        return Ok(f64::NAN);
    }

    Ok(1.0 - ss_res / ss_tot)
}

/// Forecast Bias (mean error)
pub fn bias(actual: &[f64], forecast: &[f64]) -> Result<f64> {
    validate_inputs(actual, forecast)?;
    let sum: f64 = actual.iter().zip(forecast.iter()).map(|(a, f)| f - a).sum();
    Ok(sum / actual.len() as f64)
}

/// Relative Mean Absolute Error
///
/// Three-argument form comparing two model predictions:
/// rMAE = MAE(actual, pred1) / MAE(actual, pred2).
pub fn rmae(actual: &[f64], pred1: &[f64], pred2: &[f64]) -> Result<f64> {
    validate_inputs(actual, pred1)?;

    if actual.len() != pred2.len() {
        return Err(TsError::InvalidInput(format!(
            "Actual and pred2 arrays must have the same length: {} vs {}",
            actual.len(),
            pred2.len()
        )));
    }

    let pred1_mae = mae(actual, pred1)?;
    let pred2_mae = mae(actual, pred2)?;

    if pred2_mae.abs() < f64::EPSILON {
        return Ok(f64::NAN);
    }

    Ok(pred1_mae / pred2_mae)
}

/// Quantile Loss (Pinball Loss) at quantile q.
pub fn quantile_loss(actual: &[f64], forecast: &[f64], quantile: f64) -> Result<f64> {
    validate_inputs(actual, forecast)?;

    if !(0.0..=1.0).contains(&quantile) {
        return Err(TsError::InvalidInput(
            "Quantile must be between 0 and 1".to_string(),
        ));
    }

    let sum: f64 = actual
        .iter()
        .zip(forecast.iter())
        .map(|(a, f)| {
            let error = a - f;
            if error >= 0.0 {
                quantile * error
            } else {
                (quantile - 1.0) * error
            }
        })
        .sum();

    Ok(sum / actual.len() as f64)
}

/// Mean Quantile Loss: arithmetic mean of per-level pinball losses over
/// a matrix of quantile forecasts.
pub fn mqloss(actual: &[f64], forecasts: &[Vec<f64>], quantiles: &[f64]) -> Result<f64> {
    if forecasts.len() != quantiles.len() {
        return Err(TsError::InvalidInput(
            "Number of forecasts must match number of quantiles".to_string(),
        ));
    }
    if quantiles.is_empty() {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }

    let mut total_loss = 0.0;
    for (forecast, &q) in forecasts.iter().zip(quantiles.iter()) {
        total_loss += quantile_loss(actual, forecast, q)?;
    }

    Ok(total_loss / quantiles.len() as f64)
}

/// Prediction Interval Coverage: fraction of actuals inside
/// [lower, upper], in [0, 1].
pub fn coverage(actual: &[f64], lower: &[f64], upper: &[f64]) -> Result<f64> {
    if actual.len() != lower.len() || actual.len() != upper.len() {
        return Err(TsError::InvalidInput(
            "All arrays must have the same length".to_string(),
        ));
    }

    if actual.is_empty() {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }

    let covered: usize = actual
        .iter()
        .zip(lower.iter())
        .zip(upper.iter())
        .filter(|((a, l), u)| *a >= *l && *a <= *u)
        .count();

    Ok(covered as f64 / actual.len() as f64)
}

fn validate_inputs(actual: &[f64], forecast: &[f64]) -> Result<()> {
    if actual.len() != forecast.len() {
        return Err(TsError::InvalidInput(format!(
            "Actual and forecast arrays must have the same length: {} vs {}",
            actual.len(),
            forecast.len()
        )));
    }
    if actual.is_empty() {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }
    Ok(())
}
