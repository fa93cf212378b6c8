//! Intermittent-demand forecasting: the Croston family, TSB, and the
//! aggregation-based ADIDA / IMAPA methods.
//!
//! All of these produce flat demand-rate forecasts. Croston splits the
//! series into non-zero demand sizes and inter-demand intervals and
//! smooths each separately; SBA applies the bias correction; TSB smooths
//! a demand probability instead of intervals.

use crate::error::{Result, TsError};
use crate::lbfgsb::{minimize, LbfgsbConfig};
use crate::theta::{numerical_gradient, ParamKind};

/// Croston flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrostonVariant {
    Classic,
    /// Syntetos-Boylan approximation: rate scaled by (1 - alpha / 2).
    Sba,
    /// Alpha chosen by minimizing in-sample squared error.
    Optimized,
}

/// A fitted intermittent-demand model.
#[derive(Debug, Clone)]
pub struct IntermittentFit {
    pub rate: f64,
    pub alpha: f64,
    /// Smoothed demand size and interval (Croston) or probability (TSB).
    pub demand_level: f64,
    pub interval_level: f64,
    /// Fitted demand rate at each non-zero demand point.
    pub demand_fitted: Vec<f64>,
    pub n: usize,
}

impl IntermittentFit {
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        vec![self.rate; horizon]
    }
}

/// Positions and sizes of the non-zero demands.
fn demand_points(values: &[f64]) -> (Vec<usize>, Vec<f64>) {
    let mut idx = Vec::new();
    let mut sizes = Vec::new();
    for (i, &v) in values.iter().enumerate() {
        if v > 0.0 {
            idx.push(i);
            sizes.push(v);
        }
    }
    (idx, sizes)
}

fn croston_pass(values: &[f64], alpha: f64) -> (f64, f64, f64, Vec<f64>, f64) {
    let (idx, sizes) = demand_points(values);

    let mut demand_level = 0.0;
    let mut interval_level = 1.0;
    let mut first = true;
    let mut last_idx = 0usize;
    let mut demand_fitted = Vec::with_capacity(sizes.len());
    let mut sse = 0.0;

    for (k, (&i, &z)) in idx.iter().zip(sizes.iter()).enumerate() {
        if first {
            demand_level = z;
            interval_level = 1.0;
            first = false;
        } else {
            // One-step fitted rate before seeing this demand.
            let fitted = if interval_level > 0.0 {
                demand_level / interval_level
            } else {
                demand_level
            };
            demand_fitted.push(fitted);
            sse += (z - demand_level).powi(2);

            let interval = (i - last_idx) as f64;
            demand_level = alpha * z + (1.0 - alpha) * demand_level;
            interval_level = alpha * interval + (1.0 - alpha) * interval_level;
        }
        if k == 0 {
            demand_fitted.push(demand_level / interval_level.max(1.0));
        }
        last_idx = i;
    }

    let rate = if interval_level > 0.0 {
        demand_level / interval_level
    } else {
        demand_level
    };

    (rate, demand_level, interval_level, demand_fitted, sse)
}

/// Fit a Croston-family model. Requires at least one non-zero demand.
pub fn fit_croston(values: &[f64], variant: CrostonVariant) -> Result<IntermittentFit> {
    let n = values.len();
    if n == 0 {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }
    let (idx, _) = demand_points(values);
    if idx.is_empty() {
        return Err(TsError::DataQuality(
            "Intermittent-demand model requires at least one non-zero value".to_string(),
        ));
    }

    let alpha = match variant {
        CrostonVariant::Classic | CrostonVariant::Sba => 0.1,
        CrostonVariant::Optimized => {
            let eval = |x: &[f64]| croston_pass(values, x[0]).4;
            let objective = |x: &[f64]| -> (f64, Vec<f64>) {
                let base = eval(x);
                let rep = numerical_gradient(eval, x, &[ParamKind::Alpha], base);
                (base, rep.gradient)
            };
            let result = minimize(
                objective,
                &[0.1],
                &[0.01],
                &[0.99],
                &LbfgsbConfig {
                    max_iterations: 40,
                    ..Default::default()
                },
            );
            result.x[0]
        }
    };

    let (mut rate, demand_level, interval_level, demand_fitted, _) = croston_pass(values, alpha);
    if variant == CrostonVariant::Sba {
        rate *= 1.0 - alpha / 2.0;
    }

    Ok(IntermittentFit {
        rate,
        alpha,
        demand_level,
        interval_level,
        demand_fitted,
        n,
    })
}

/// Teunter-Syntetos-Babai: smooths a demand probability every period and
/// a demand size at demand periods.
pub fn fit_tsb(values: &[f64], alpha_p: f64, alpha_z: f64) -> Result<IntermittentFit> {
    let n = values.len();
    if n == 0 {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }
    let (idx, sizes) = demand_points(values);
    if idx.is_empty() {
        return Err(TsError::DataQuality(
            "Intermittent-demand model requires at least one non-zero value".to_string(),
        ));
    }

    let mut prob = idx.len() as f64 / n as f64;
    let mut size = sizes[0];
    let mut demand_fitted = Vec::with_capacity(idx.len());

    for &v in values {
        if v > 0.0 {
            demand_fitted.push(prob * size);
            prob = alpha_p + (1.0 - alpha_p) * prob;
            size = alpha_z * v + (1.0 - alpha_z) * size;
        } else {
            prob = (1.0 - alpha_p) * prob;
        }
    }

    Ok(IntermittentFit {
        rate: prob * size,
        alpha: alpha_p,
        demand_level: size,
        interval_level: prob,
        demand_fitted,
        n,
    })
}

fn ses_level(values: &[f64], alpha: f64) -> f64 {
    let mut level = values[0];
    for &v in &values[1..] {
        level = alpha * v + (1.0 - alpha) * level;
    }
    level
}

/// Mean inter-demand interval, floored at one.
fn mean_interval(values: &[f64]) -> usize {
    let (idx, _) = demand_points(values);
    if idx.len() < 2 {
        return 1;
    }
    let total: usize = idx.windows(2).map(|w| w[1] - w[0]).sum();
    (total as f64 / (idx.len() - 1) as f64).round().max(1.0) as usize
}

/// ADIDA: aggregate into buckets of the mean inter-demand interval,
/// smooth the aggregate, disaggregate the rate.
pub fn fit_adida(values: &[f64]) -> Result<IntermittentFit> {
    let n = values.len();
    if n == 0 {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }
    let (idx, _) = demand_points(values);
    if idx.is_empty() {
        return Err(TsError::DataQuality(
            "Intermittent-demand model requires at least one non-zero value".to_string(),
        ));
    }

    let bucket = mean_interval(values);
    let aggregated: Vec<f64> = values
        .chunks(bucket)
        .filter(|c| c.len() == bucket)
        .map(|c| c.iter().sum())
        .collect();

    let rate = if aggregated.is_empty() {
        values.iter().sum::<f64>() / n as f64
    } else {
        ses_level(&aggregated, 0.1) / bucket as f64
    };

    Ok(IntermittentFit {
        rate,
        alpha: 0.1,
        demand_level: rate,
        interval_level: 1.0,
        demand_fitted: vec![],
        n,
    })
}

/// IMAPA: average the per-period rates across every aggregation level up
/// to the mean inter-demand interval.
pub fn fit_imapa(values: &[f64]) -> Result<IntermittentFit> {
    let n = values.len();
    if n == 0 {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }
    let (idx, _) = demand_points(values);
    if idx.is_empty() {
        return Err(TsError::DataQuality(
            "Intermittent-demand model requires at least one non-zero value".to_string(),
        ));
    }

    let max_level = mean_interval(values).max(1);
    let mut rates = Vec::with_capacity(max_level);

    for level in 1..=max_level {
        let aggregated: Vec<f64> = values
            .chunks(level)
            .filter(|c| c.len() == level)
            .map(|c| c.iter().sum())
            .collect();
        if !aggregated.is_empty() {
            rates.push(ses_level(&aggregated, 0.1) / level as f64);
        }
    }

    let rate = if rates.is_empty() {
        values.iter().sum::<f64>() / n as f64
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    };

    Ok(IntermittentFit {
        rate,
        alpha: 0.1,
        demand_level: rate,
        interval_level: 1.0,
        demand_fitted: vec![],
        n,
    })
}

/// Target length of an expanded fitted series.
///
/// The two contracts disagree in the wild; callers must choose one, the
/// engine never picks silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandMode {
    /// One value per non-zero demand point.
    DemandLength,
    /// One value per original observation; positions before the first
    /// demand are NaN, later positions carry the most recent fitted rate.
    SeriesLength,
}

/// Expand per-demand fitted rates onto the requested grid.
pub fn expand_fitted_demand(
    values: &[f64],
    demand_fitted: &[f64],
    mode: ExpandMode,
) -> Vec<f64> {
    match mode {
        ExpandMode::DemandLength => demand_fitted.to_vec(),
        ExpandMode::SeriesLength => {
            let (idx, _) = demand_points(values);
            let mut out = vec![f64::NAN; values.len()];
            let mut current = f64::NAN;
            let mut next_demand = 0usize;
            for (i, slot) in out.iter_mut().enumerate() {
                if next_demand < idx.len() && idx[next_demand] == i {
                    if next_demand < demand_fitted.len() {
                        current = demand_fitted[next_demand];
                    }
                    next_demand += 1;
                }
                *slot = current;
            }
            out
        }
    }
}

/// Expand per-demand inter-arrival estimates onto the requested grid;
/// same contract as `expand_fitted_demand`.
pub fn expand_fitted_intervals(
    values: &[f64],
    interval_fitted: &[f64],
    mode: ExpandMode,
) -> Vec<f64> {
    expand_fitted_demand(values, interval_fitted, mode)
}
