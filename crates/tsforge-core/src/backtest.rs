//! Cross-validation backtesting: fold generation, leakage controls,
//! parallel per-fold execution, and pooled metric aggregation.
//!
//! Folds slide a split position across the series with expanding or
//! rolling training windows. `gap` keeps a no-data buffer between train
//! and test; `embargo` additionally excludes the stretch right after the
//! previous fold's test window from the next fold's training (for
//! forward-looking targets). Overall metrics are computed over the
//! concatenation of all successful folds' (actual, forecast) pairs so
//! they stay valid under unequal fold sizes.

use crate::error::{Result, TsError};
use crate::metrics;
use rayon::prelude::*;
use std::str::FromStr;

/// Training window strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowStrategy {
    #[default]
    Expanding,
    /// Fixed-size window ending at the split ("rolling" and "sliding"
    /// are two names for the same thing).
    Rolling,
}

impl FromStr for WindowStrategy {
    type Err = TsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "expanding" => Ok(Self::Expanding),
            "rolling" | "sliding" => Ok(Self::Rolling),
            _ => Err(TsError::InvalidParameter {
                param: "window_type".to_string(),
                value: s.to_string(),
                reason: "expected 'expanding', 'rolling', or 'sliding'".to_string(),
            }),
        }
    }
}

/// Cross-validation configuration.
#[derive(Debug, Clone)]
pub struct CvConfig {
    /// Observations before the first split.
    pub initial_window: usize,
    /// Test length per fold.
    pub horizon: usize,
    /// Spacing between fold start positions (`skip_length`); 0 means
    /// `horizon`, which tiles the tail with disjoint test windows.
    pub step: usize,
    pub strategy: WindowStrategy,
    /// Rolling-window cap; 0 means use `initial_window` as the fixed
    /// window size.
    pub max_window: usize,
    /// No-data buffer between train end and test start.
    pub gap: usize,
    /// Exclusion zone after the previous fold's test window.
    pub embargo: usize,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            initial_window: 10,
            horizon: 1,
            step: 0,
            strategy: WindowStrategy::Expanding,
            max_window: 0,
            gap: 0,
            embargo: 0,
        }
    }
}

/// One train/test split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvFold {
    pub fold_id: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
    /// Interval excluded from training by the embargo, clipped to the
    /// training range; None when the embargo does not bite.
    pub embargo_range: Option<(usize, usize)>,
}

impl CvFold {
    pub fn train_len(&self) -> usize {
        let embargoed = self
            .embargo_range
            .map(|(s, e)| e - s)
            .unwrap_or(0);
        self.train_end - self.train_start - embargoed
    }

    pub fn test_len(&self) -> usize {
        self.test_end - self.test_start
    }
}

/// Generate folds for a series of length `n`.
///
/// Fewer than one possible fold is an error, as is a gap that consumes
/// the whole training window.
pub fn generate_folds(n: usize, config: &CvConfig) -> Result<Vec<CvFold>> {
    if config.initial_window == 0 {
        return Err(TsError::InvalidParameter {
            param: "initial_window".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if config.horizon == 0 {
        return Err(TsError::InvalidParameter {
            param: "horizon".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if config.gap >= config.initial_window {
        return Err(TsError::InvalidParameter {
            param: "gap".to_string(),
            value: config.gap.to_string(),
            reason: "gap must be smaller than the initial window".to_string(),
        });
    }
    if config.initial_window + config.horizon > n {
        return Err(TsError::InsufficientData {
            needed: config.initial_window + config.horizon,
            got: n,
        });
    }

    let step = if config.step == 0 {
        config.horizon
    } else {
        config.step
    };

    let mut folds = Vec::new();
    let mut prev_test_end: Option<usize> = None;
    let mut p = config.initial_window;

    while p + config.horizon <= n {
        let train_end = p - config.gap;
        let train_start = match config.strategy {
            WindowStrategy::Expanding => 0,
            WindowStrategy::Rolling => {
                let window = if config.max_window > 0 {
                    config.max_window.min(p)
                } else {
                    config.initial_window
                };
                train_end.saturating_sub(window)
            }
        };

        let test_start = p;
        let test_end = (p + config.horizon).min(n);

        // Embargo: exclude the stretch right after the previous test
        // window from this fold's training.
        let embargo_range = match (prev_test_end, config.embargo) {
            (Some(prev_end), e) if e > 0 => {
                let emb_start = prev_end.max(train_start).min(train_end);
                let emb_end = (prev_end + e).max(train_start).min(train_end);
                if emb_end > emb_start {
                    Some((emb_start, emb_end))
                } else {
                    None
                }
            }
            _ => None,
        };

        folds.push(CvFold {
            fold_id: folds.len(),
            train_start,
            train_end,
            test_start,
            test_end,
            embargo_range,
        });

        prev_test_end = Some(test_end);
        p += step;
    }

    if folds.is_empty() {
        return Err(TsError::InsufficientData {
            needed: config.initial_window + config.horizon,
            got: n,
        });
    }

    Ok(folds)
}

/// Per-fold evaluation metrics. A failed fold carries NaN metrics and an
/// error message; it is excluded from aggregation.
#[derive(Debug, Clone)]
pub struct FoldMetrics {
    pub fold_id: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub mape: f64,
    pub smape: f64,
    pub error_message: String,
}

impl FoldMetrics {
    fn failed(fold: &CvFold, message: String) -> Self {
        Self {
            fold_id: fold.fold_id,
            n_train: fold.train_len(),
            n_test: fold.test_len(),
            mae: f64::NAN,
            mse: f64::NAN,
            rmse: f64::NAN,
            mape: f64::NAN,
            smape: f64::NAN,
            error_message: message,
        }
    }

    pub fn is_failed(&self) -> bool {
        !self.error_message.is_empty()
    }
}

/// Backtest outcome: per-fold metrics plus pooled overall metrics.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub folds: Vec<FoldMetrics>,
    pub n_successful: usize,
    pub overall_mae: f64,
    pub overall_mse: f64,
    pub overall_rmse: f64,
    pub overall_mape: f64,
    pub overall_smape: f64,
}

/// Training slice of a fold with the embargoed stretch removed.
pub fn training_slice(values: &[f64], fold: &CvFold) -> Vec<f64> {
    match fold.embargo_range {
        None => values[fold.train_start..fold.train_end].to_vec(),
        Some((emb_start, emb_end)) => {
            let mut out =
                Vec::with_capacity(fold.train_end - fold.train_start - (emb_end - emb_start));
            out.extend_from_slice(&values[fold.train_start..emb_start]);
            out.extend_from_slice(&values[emb_end..fold.train_end]);
            out
        }
    }
}

/// Run a backtest. `forecaster` is a factory invoked once per fold with
/// the fold's training slice and required horizon, returning point
/// forecasts; folds run in parallel.
pub fn backtest<F>(values: &[f64], config: &CvConfig, forecaster: F) -> Result<BacktestResult>
where
    F: Fn(&[f64], usize) -> Result<Vec<f64>> + Sync,
{
    let folds = generate_folds(values.len(), config)?;

    let evaluated: Vec<(FoldMetrics, Option<(Vec<f64>, Vec<f64>)>)> = folds
        .par_iter()
        .map(|fold| {
            let train = training_slice(values, fold);
            let horizon = fold.test_len();
            let actual = &values[fold.test_start..fold.test_end];

            let point = match forecaster(&train, horizon) {
                Ok(point) => point,
                Err(e) => return (FoldMetrics::failed(fold, e.to_string()), None),
            };

            if point.len() != horizon {
                return (
                    FoldMetrics::failed(
                        fold,
                        format!("Forecaster returned {} points, expected {}", point.len(), horizon),
                    ),
                    None,
                );
            }
            if point.iter().any(|v| !v.is_finite()) {
                return (
                    FoldMetrics::failed(fold, "Forecaster returned non-finite values".to_string()),
                    None,
                );
            }

            let metrics_result = (|| -> Result<FoldMetrics> {
                Ok(FoldMetrics {
                    fold_id: fold.fold_id,
                    n_train: fold.train_len(),
                    n_test: horizon,
                    mae: metrics::mae(actual, &point)?,
                    mse: metrics::mse(actual, &point)?,
                    rmse: metrics::rmse(actual, &point)?,
                    mape: metrics::mape(actual, &point)?,
                    smape: metrics::smape(actual, &point)?,
                    error_message: String::new(),
                })
            })();

            match metrics_result {
                Ok(m) => (m, Some((actual.to_vec(), point))),
                Err(e) => (FoldMetrics::failed(fold, e.to_string()), None),
            }
        })
        .collect();

    let mut fold_metrics = Vec::with_capacity(evaluated.len());
    let mut pooled_actual = Vec::new();
    let mut pooled_forecast = Vec::new();
    let mut n_successful = 0usize;

    for (m, pair) in evaluated {
        if let Some((actual, point)) = pair {
            pooled_actual.extend(actual);
            pooled_forecast.extend(point);
            n_successful += 1;
        }
        fold_metrics.push(m);
    }

    if n_successful == 0 {
        return Err(TsError::NumericalFailure(
            "Every cross-validation fold failed".to_string(),
        ));
    }

    Ok(BacktestResult {
        n_successful,
        overall_mae: metrics::mae(&pooled_actual, &pooled_forecast)?,
        overall_mse: metrics::mse(&pooled_actual, &pooled_forecast)?,
        overall_rmse: metrics::rmse(&pooled_actual, &pooled_forecast)?,
        overall_mape: metrics::mape(&pooled_actual, &pooled_forecast)?,
        overall_smape: metrics::smape(&pooled_actual, &pooled_forecast)?,
        folds: fold_metrics,
    })
}
