//! ETS parameter fitting: maximum likelihood via L-BFGS-B over the
//! analytical gradients, with checkpointed backward passes for long
//! series and an information-criterion search for automatic model
//! selection.

use crate::checkpoint::{build_checkpoints, CheckpointConfig};
use crate::error::{Result, TsError};
use crate::ets::{
    forecast_from_state, negative_log_likelihood, run_forward, ErrorComponent, EtsParams, EtsSpec,
    EtsState, SeasonComponent, TrendComponent, SEASONAL_CLAMP, TREND_CLAMP,
};
use crate::ets_backward::{run_backward, run_backward_checkpointed, EtsGradients};
use crate::lbfgsb::{minimize, LbfgsbConfig};

/// A fitted ETS model.
#[derive(Debug, Clone)]
pub struct EtsFit {
    pub spec: EtsSpec,
    pub params: EtsParams,
    pub initial_state: EtsState,
    pub final_state: EtsState,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    pub sigma2: f64,
    pub nll: f64,
    pub aic: f64,
    pub bic: f64,
    pub n: usize,
    /// Set when the optimizer stopped on a numerical failure; the fit
    /// still carries the best feasible parameters found.
    pub optimizer_failed: bool,
    pub optimizer_message: String,
}

impl EtsFit {
    /// Point forecasts h steps past the end of the training series.
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        forecast_from_state(&self.spec, &self.params, &self.final_state, self.n, horizon)
    }
}

/// Whether the spec has any multiplicative component, which restricts it
/// to strictly positive data.
fn requires_positive(spec: &EtsSpec) -> bool {
    spec.error == ErrorComponent::Multiplicative
        || spec.season == SeasonComponent::Multiplicative
        || matches!(
            spec.trend,
            TrendComponent::Multiplicative | TrendComponent::DampedMultiplicative
        )
}

/// Heuristic initial state from the head of the series.
pub fn initial_state(spec: &EtsSpec, values: &[f64], m: usize) -> EtsState {
    let n = values.len();
    let seasonal_m = if spec.has_seasonal() { m.max(1) } else { 0 };

    let (level, trend) = if seasonal_m > 1 && n >= 2 * seasonal_m {
        let first: f64 = values[..seasonal_m].iter().sum::<f64>() / seasonal_m as f64;
        let second: f64 =
            values[seasonal_m..2 * seasonal_m].iter().sum::<f64>() / seasonal_m as f64;
        let trend = match spec.trend {
            TrendComponent::None => 0.0,
            TrendComponent::Additive | TrendComponent::DampedAdditive => {
                (second - first) / seasonal_m as f64
            }
            TrendComponent::Multiplicative | TrendComponent::DampedMultiplicative => {
                crate::simd::safe_div(second, first)
                    .powf(1.0 / seasonal_m as f64)
                    .clamp(TREND_CLAMP.0, TREND_CLAMP.1)
            }
        };
        (first, trend)
    } else {
        let level = values[0];
        let trend = match spec.trend {
            TrendComponent::None => 0.0,
            TrendComponent::Additive | TrendComponent::DampedAdditive => {
                if n > 1 {
                    (values[n - 1] - values[0]) / (n - 1) as f64
                } else {
                    0.0
                }
            }
            TrendComponent::Multiplicative | TrendComponent::DampedMultiplicative => {
                if n > 1 && values[0].abs() > 1e-10 {
                    crate::simd::safe_div(values[1], values[0]).clamp(TREND_CLAMP.0, TREND_CLAMP.1)
                } else {
                    1.0
                }
            }
        };
        (level, trend)
    };

    let seasonal = match spec.season {
        SeasonComponent::None => vec![],
        SeasonComponent::Additive => {
            let mut s: Vec<f64> = values
                .iter()
                .take(seasonal_m)
                .map(|v| v - level)
                .collect();
            s.resize(seasonal_m, 0.0);
            // Center so the components sum to zero.
            let mean = s.iter().sum::<f64>() / seasonal_m as f64;
            s.iter_mut().for_each(|v| *v -= mean);
            s
        }
        SeasonComponent::Multiplicative => {
            let base = if level.abs() > 1e-10 { level } else { 1.0 };
            let mut s: Vec<f64> = values
                .iter()
                .take(seasonal_m)
                .map(|v| (v / base).clamp(SEASONAL_CLAMP.0, SEASONAL_CLAMP.1))
                .collect();
            s.resize(seasonal_m, 1.0);
            // Normalize so the factors average to one.
            let mean = s.iter().sum::<f64>() / seasonal_m as f64;
            if mean.abs() > 1e-10 {
                s.iter_mut().for_each(|v| *v /= mean);
            }
            s
        }
    };

    EtsState::new(level, trend, seasonal)
}

/// Packed optimization vector layout for a spec:
/// [alpha, beta?, gamma?, phi?, level0, trend0?].
struct Packing {
    spec: EtsSpec,
    optimize_phi: bool,
}

impl Packing {
    fn new(spec: EtsSpec) -> Self {
        Self {
            spec,
            optimize_phi: spec.trend.is_damped(),
        }
    }

    fn len(&self) -> usize {
        let mut k = 2; // alpha, level0
        if self.spec.has_trend() {
            k += 2; // beta, trend0
        }
        if self.spec.has_seasonal() {
            k += 1; // gamma
        }
        if self.optimize_phi {
            k += 1;
        }
        k
    }

    fn pack(&self, params: &EtsParams, init: &EtsState) -> Vec<f64> {
        let mut x = vec![params.alpha];
        if self.spec.has_trend() {
            x.push(params.beta.unwrap_or(0.1));
        }
        if self.spec.has_seasonal() {
            x.push(params.gamma.unwrap_or(0.1));
        }
        if self.optimize_phi {
            x.push(params.phi);
        }
        x.push(init.level);
        if self.spec.has_trend() {
            x.push(init.trend);
        }
        x
    }

    fn unpack(&self, x: &[f64], seasonal: &[f64]) -> (EtsParams, EtsState) {
        let mut i = 0;
        let alpha = x[i];
        i += 1;
        let beta = if self.spec.has_trend() {
            let b = x[i];
            i += 1;
            Some(b)
        } else {
            None
        };
        let gamma = if self.spec.has_seasonal() {
            let g = x[i];
            i += 1;
            Some(g)
        } else {
            None
        };
        let phi = if self.optimize_phi {
            let p = x[i];
            i += 1;
            p
        } else {
            1.0
        };
        let level = x[i];
        i += 1;
        let trend = if self.spec.has_trend() { x[i] } else { 0.0 };

        (
            EtsParams {
                alpha,
                beta,
                gamma,
                phi,
            },
            EtsState::new(level, trend, seasonal.to_vec()),
        )
    }

    fn gradient(&self, grads: &EtsGradients) -> Vec<f64> {
        let mut g = vec![grads.d_alpha];
        if self.spec.has_trend() {
            g.push(grads.d_beta);
        }
        if self.spec.has_seasonal() {
            g.push(grads.d_gamma);
        }
        if self.optimize_phi {
            g.push(grads.d_phi);
        }
        g.push(grads.d_level0);
        if self.spec.has_trend() {
            g.push(grads.d_trend0);
        }
        g
    }

    fn bounds(&self, values: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = (max - min).max(1.0);

        let mut lower = vec![1e-4];
        let mut upper = vec![0.9999];
        if self.spec.has_trend() {
            lower.push(1e-4);
            upper.push(0.9999);
        }
        if self.spec.has_seasonal() {
            lower.push(1e-4);
            upper.push(0.9999);
        }
        if self.optimize_phi {
            lower.push(0.1);
            upper.push(0.98);
        }
        // level0
        if requires_positive(&self.spec) {
            lower.push((min - range).max(1e-6));
        } else {
            lower.push(min - range);
        }
        upper.push(max + range);
        // trend0
        if self.spec.has_trend() {
            match self.spec.trend {
                TrendComponent::Multiplicative | TrendComponent::DampedMultiplicative => {
                    lower.push(0.2);
                    upper.push(5.0);
                }
                _ => {
                    lower.push(-range);
                    upper.push(range);
                }
            }
        }
        (lower, upper)
    }
}

/// Fit an ETS model by maximum likelihood.
///
/// Seasonal specs require `n >= 2 * m`; multiplicative components
/// require strictly positive data. For series at or above the checkpoint
/// threshold the backward pass runs over a checkpoint set instead of the
/// full trajectory.
pub fn fit(
    spec: &EtsSpec,
    values: &[f64],
    m: usize,
    checkpoint_config: &CheckpointConfig,
) -> Result<EtsFit> {
    let n = values.len();
    let seasonal_m = if spec.has_seasonal() { m.max(1) } else { 1 };

    if spec.has_seasonal() {
        if seasonal_m < 2 {
            return Err(TsError::InvalidParameter {
                param: "seasonal_period".to_string(),
                value: m.to_string(),
                reason: "seasonal ETS requires a period of at least 2".to_string(),
            });
        }
        if n < 2 * seasonal_m {
            return Err(TsError::InsufficientData {
                needed: 2 * seasonal_m,
                got: n,
            });
        }
    } else if n < 3 {
        return Err(TsError::InsufficientData { needed: 3, got: n });
    }

    if requires_positive(spec) && !values.iter().all(|&v| v > 0.0) {
        return Err(TsError::InvalidInput(format!(
            "ETS({}) has multiplicative components and requires strictly positive values",
            spec.short_name()
        )));
    }

    let init0 = initial_state(spec, values, seasonal_m);
    let seasonal0 = init0.seasonal.clone();

    let packing = Packing::new(*spec);
    let start_params = EtsParams {
        alpha: 0.2,
        beta: if spec.has_trend() { Some(0.05) } else { None },
        gamma: if spec.has_seasonal() { Some(0.05) } else { None },
        phi: if spec.trend.is_damped() { 0.95 } else { 1.0 },
    };
    let x0 = packing.pack(&start_params, &init0);
    let (lower, upper) = packing.bounds(values);

    let use_checkpoints = checkpoint_config.is_enabled_for(n);
    let stride = checkpoint_config.stride;

    let objective = |x: &[f64]| -> (f64, Vec<f64>) {
        let (params, init) = packing.unpack(x, &seasonal0);
        if params.validate(spec).is_err() {
            return (f64::INFINITY, vec![0.0; x.len()]);
        }
        if use_checkpoints {
            match build_checkpoints(spec, &params, values, &init, stride) {
                Ok(set) => {
                    let sigma2 = (set.innovation_sse() / n as f64).max(1e-12);
                    let mut nll = 0.5 * n as f64 * sigma2.ln();
                    if spec.error == ErrorComponent::Multiplicative {
                        nll += set.sum_log_forecast();
                    }
                    match run_backward_checkpointed(spec, &params, values, &set) {
                        Ok(grads) => (nll, packing.gradient(&grads)),
                        Err(_) => (f64::INFINITY, vec![0.0; x.len()]),
                    }
                }
                Err(_) => (f64::INFINITY, vec![0.0; x.len()]),
            }
        } else {
            match run_forward(spec, &params, values, &init) {
                Ok(traj) => {
                    let nll = negative_log_likelihood(spec, &traj);
                    match run_backward(spec, &params, values, &traj) {
                        Ok(grads) => (nll, packing.gradient(&grads)),
                        Err(_) => (f64::INFINITY, vec![0.0; x.len()]),
                    }
                }
                Err(_) => (f64::INFINITY, vec![0.0; x.len()]),
            }
        }
    };

    let result = minimize(objective, &x0, &lower, &upper, &LbfgsbConfig::default());

    let (params, init) = packing.unpack(&result.x, &seasonal0);
    let trajectory = run_forward(spec, &params, values, &init)?;
    let nll = negative_log_likelihood(spec, &trajectory);
    let sigma2 = trajectory.sigma2();

    let residuals: Vec<f64> = values
        .iter()
        .zip(trajectory.fitted.iter())
        .map(|(y, f)| y - f)
        .collect();

    // Free parameters: packed vector plus the innovation variance.
    let k = (packing.len() + 1) as f64;
    let aic = 2.0 * nll + 2.0 * k;
    let bic = 2.0 * nll + k * (n as f64).ln();

    let final_state = trajectory.state_at(n);

    Ok(EtsFit {
        spec: *spec,
        params,
        initial_state: init,
        final_state,
        fitted: trajectory.fitted,
        residuals,
        sigma2,
        nll,
        aic,
        bic,
        n,
        optimizer_failed: result.failed,
        optimizer_message: result.message,
    })
}

/// Candidate specifications for automatic selection.
fn auto_candidates(values: &[f64], m: usize) -> Vec<EtsSpec> {
    let positive = values.iter().all(|&v| v > 0.0);
    let seasonal_ok = m > 1 && values.len() >= 2 * m;

    let errors: &[ErrorComponent] = if positive {
        &[ErrorComponent::Additive, ErrorComponent::Multiplicative]
    } else {
        &[ErrorComponent::Additive]
    };
    let trends = [
        TrendComponent::None,
        TrendComponent::Additive,
        TrendComponent::DampedAdditive,
    ];
    let seasons: Vec<SeasonComponent> = if seasonal_ok {
        if positive {
            vec![
                SeasonComponent::None,
                SeasonComponent::Additive,
                SeasonComponent::Multiplicative,
            ]
        } else {
            vec![SeasonComponent::None, SeasonComponent::Additive]
        }
    } else {
        vec![SeasonComponent::None]
    };

    let mut candidates = Vec::new();
    for &error in errors {
        for &trend in &trends {
            for &season in &seasons {
                // Multiplicative season with additive error on data close
                // to zero is numerically fragile; the positivity guard in
                // fit() rejects it anyway for non-positive data.
                candidates.push(EtsSpec::new(error, trend, season));
            }
        }
    }
    candidates
}

/// Fit every candidate specification and keep the best by AIC.
pub fn auto_fit(values: &[f64], m: usize, checkpoint_config: &CheckpointConfig) -> Result<EtsFit> {
    let mut best: Option<EtsFit> = None;

    for spec in auto_candidates(values, m) {
        let Ok(fit) = fit(&spec, values, m, checkpoint_config) else {
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

    best.ok_or_else(|| {
        TsError::NumericalFailure("No ETS candidate produced a finite likelihood".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend_series(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 10.0 + 0.8 * i as f64 + ((i as f64) * 1.3).sin())
            .collect()
    }

    fn seasonal_series(n: usize, m: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                60.0 + 0.3 * i as f64
                    + 6.0 * (2.0 * std::f64::consts::PI * (i % m) as f64 / m as f64).sin()
            })
            .collect()
    }

    #[test]
    fn test_fit_improves_on_start() {
        let spec = EtsSpec::from_notation("AAN").unwrap();
        let values = trend_series(60);
        let config = CheckpointConfig::default();

        let fit = fit(&spec, &values, 1, &config).unwrap();
        assert!(fit.nll.is_finite());
        assert!(fit.sigma2.is_finite());
        assert_eq!(fit.fitted.len(), 60);

        // Compare against the un-optimized starting parameters.
        let init = initial_state(&spec, &values, 1);
        let start = EtsParams {
            alpha: 0.2,
            beta: Some(0.05),
            gamma: None,
            phi: 1.0,
        };
        let start_traj = run_forward(&spec, &start, &values, &init).unwrap();
        let start_nll = negative_log_likelihood(&spec, &start_traj);
        assert!(fit.nll <= start_nll + 1e-9);
    }

    #[test]
    fn test_fit_seasonal() {
        let spec = EtsSpec::from_notation("AAA").unwrap();
        let values = seasonal_series(72, 12);
        let fit = fit(&spec, &values, 12, &CheckpointConfig::default()).unwrap();

        assert!(fit.params.alpha >= 1e-4 && fit.params.alpha <= 0.9999);
        assert!(fit.sigma2.is_finite());

        let point = fit.forecast(12);
        assert_eq!(point.len(), 12);
        assert!(point.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_fit_rejects_short_seasonal() {
        let spec = EtsSpec::from_notation("AAA").unwrap();
        let values = seasonal_series(10, 12);
        assert!(matches!(
            fit(&spec, &values, 12, &CheckpointConfig::default()),
            Err(TsError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_multiplicative_rejects_nonpositive() {
        let spec = EtsSpec::from_notation("MNN").unwrap();
        let values = vec![0.0; 20];
        assert!(fit(&spec, &values, 1, &CheckpointConfig::default()).is_err());
    }

    #[test]
    fn test_auto_fit_picks_finite_model() {
        let values = seasonal_series(96, 12);
        let fit = auto_fit(&values, 12, &CheckpointConfig::default()).unwrap();
        assert!(fit.aic.is_finite());
        assert!(fit.forecast(6).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_long_series_uses_checkpoints() {
        // Above the activation threshold the objective goes through the
        // checkpointed backward path; the fit must still be finite.
        let values = trend_series(600);
        let spec = EtsSpec::from_notation("AAN").unwrap();
        let config = CheckpointConfig::default();
        assert!(config.is_enabled_for(values.len()));

        let fit = fit(&spec, &values, 1, &config).unwrap();
        assert!(fit.nll.is_finite());
    }
}
