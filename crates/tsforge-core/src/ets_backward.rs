//! Analytical reverse-mode differentiation of the ETS forward recursion.
//!
//! Produces the gradient of the negative log-likelihood
//! `L = (n/2) log(max(sigma^2, eps)) + [mult ? sum log|fitted| : 0]`
//! with respect to the smoothing parameters and the initial states, by
//! walking the recursion backwards and propagating adjoints through every
//! edge of the forward step, including the feedback from state updates
//! into the innovation.
//!
//! Clamp edges (trend ratio, seasonal factor, fitted floor, innovation
//! bound) have zero derivative outside their active range; the gates are
//! recomputed from the stored trajectory.

use crate::error::{Result, TsError};
use crate::ets::{
    forward_step, ErrorComponent, EtsParams, EtsSpec, EtsState, EtsTrajectory, SeasonComponent,
    TrendComponent, FITTED_FLOOR, INNOVATION_CLAMP, SEASONAL_CLAMP, TREND_CLAMP,
};
use crate::simd;

/// Gradient of the negative log-likelihood.
///
/// Fields absent from the model specification are zero.
#[derive(Debug, Clone, Default)]
pub struct EtsGradients {
    pub d_alpha: f64,
    pub d_beta: f64,
    pub d_gamma: f64,
    pub d_phi: f64,
    pub d_level0: f64,
    pub d_trend0: f64,
    pub d_seasonal0: Vec<f64>,
}

/// Backward pass over a fully-stored trajectory.
pub fn run_backward(
    spec: &EtsSpec,
    params: &EtsParams,
    values: &[f64],
    trajectory: &EtsTrajectory,
) -> Result<EtsGradients> {
    let n = values.len();
    if trajectory.len() != n {
        return Err(TsError::InvalidInput(format!(
            "Trajectory length {} does not match series length {}",
            trajectory.len(),
            n
        )));
    }

    let seeds = innovation_seeds(trajectory);
    let m = trajectory.season_length;

    backward_core(
        spec,
        params,
        values,
        &trajectory.fitted,
        &trajectory.innovations,
        &seeds,
        m,
        trajectory.seasonal_init.len(),
        |t| {
            (
                trajectory.levels[t],
                if trajectory.trends.is_empty() {
                    0.0
                } else {
                    trajectory.trends[t]
                },
                if trajectory.seasonal_init.is_empty() {
                    0.0
                } else {
                    trajectory.seasonal_component_at(t, t % m)
                },
            )
        },
    )
}

/// dL/d innovation[t] seed vector: innovation / sigma^2, computed with
/// the batched normalize kernel. Zero when sigma^2 sits on its floor.
pub(crate) fn innovation_seeds(trajectory: &EtsTrajectory) -> Vec<f64> {
    let n = trajectory.len();
    let sigma2 = trajectory.innovation_sse / n as f64;
    let mut seeds = vec![0.0; n];
    if sigma2 > 1e-12 {
        simd::normalize(&mut seeds, &trajectory.innovations, sigma2);
    }
    seeds
}

#[inline]
fn in_range(x: f64, range: (f64, f64)) -> bool {
    x > range.0 && x < range.1
}

/// Shared reverse loop. `state_at(t)` returns (level, trend, seasonal
/// component t % m) entering step t; it is called with strictly
/// decreasing t.
#[allow(clippy::too_many_arguments)]
pub(crate) fn backward_core(
    spec: &EtsSpec,
    params: &EtsParams,
    values: &[f64],
    fitted: &[f64],
    innovations: &[f64],
    seeds: &[f64],
    m: usize,
    seasonal_len: usize,
    mut state_at: impl FnMut(usize) -> (f64, f64, f64),
) -> Result<EtsGradients> {
    let n = values.len();
    let has_trend = spec.has_trend();
    let has_season = spec.has_seasonal();
    let beta = params.beta.unwrap_or(0.0);
    let gamma = params.gamma.unwrap_or(0.0);
    let phi = params.phi;
    let damped = spec.trend.is_damped();

    let mut grads = EtsGradients {
        d_seasonal0: vec![0.0; seasonal_len],
        ..Default::default()
    };

    // Adjoints of the state entering step t + 1.
    let mut dl_next = 0.0;
    let mut db_next = 0.0;
    let mut ds_next = vec![0.0; seasonal_len];

    for t in (0..n).rev() {
        let (level, trend, seasonal) = state_at(t);
        let y = values[t];
        let f = fitted[t];
        let e = innovations[t];
        let j = t % m;

        let dl1 = dl_next;
        let db1 = db_next;
        let ds1 = if has_season { ds_next[j] } else { 0.0 };

        // Recompute forward intermediates and clamp gates.
        let trend_clamped = trend.clamp(TREND_CLAMP.0, TREND_CLAMP.1);
        let trend_gate = if in_range(trend, TREND_CLAMP) { 1.0 } else { 0.0 };
        let base = match spec.trend {
            TrendComponent::None => level,
            TrendComponent::Additive => level + trend,
            TrendComponent::Multiplicative => level * trend_clamped,
            TrendComponent::DampedAdditive => level + phi * trend,
            TrendComponent::DampedMultiplicative => level * trend_clamped.powf(phi),
        };
        let combined = match spec.season {
            SeasonComponent::None => base,
            SeasonComponent::Additive => base + seasonal,
            SeasonComponent::Multiplicative => base * seasonal,
        };
        let fitted_gate = if combined > FITTED_FLOOR { 1.0 } else { 0.0 };

        // Gates and safe-division denominator of the seasonal update.
        let q = simd::safe_div(e, base);
        let base_den = if base.abs() < 1e-10 {
            if base.is_sign_negative() { -1e-10 } else { 1e-10 }
        } else {
            base
        };
        let seasonal_raw = match (spec.error, spec.season) {
            (ErrorComponent::Additive, SeasonComponent::Multiplicative) => {
                seasonal * (1.0 + gamma * q)
            }
            (ErrorComponent::Multiplicative, SeasonComponent::Multiplicative) => {
                seasonal * (1.0 + gamma * e)
            }
            _ => 0.0,
        };
        let seasonal_gate = if spec.season == SeasonComponent::Multiplicative
            && !in_range(seasonal_raw, SEASONAL_CLAMP)
        {
            0.0
        } else {
            1.0
        };

        // --- innovation adjoint: seed plus all state-update edges ---
        let mut d_e = seeds[t];
        match spec.error {
            ErrorComponent::Additive => {
                d_e += dl1 * params.alpha;
                if has_trend {
                    d_e += db1 * beta;
                }
                if has_season {
                    d_e += match spec.season {
                        SeasonComponent::Additive => ds1 * gamma,
                        SeasonComponent::Multiplicative => {
                            ds1 * seasonal_gate * seasonal * gamma / base_den
                        }
                        SeasonComponent::None => 0.0,
                    };
                }
            }
            ErrorComponent::Multiplicative => {
                d_e += dl1 * params.alpha * base;
                if has_trend {
                    d_e += db1 * beta * base;
                }
                if has_season {
                    d_e += match spec.season {
                        SeasonComponent::Additive => ds1 * gamma * base,
                        SeasonComponent::Multiplicative => ds1 * seasonal_gate * seasonal * gamma,
                        SeasonComponent::None => 0.0,
                    };
                }
            }
        }

        // --- parameter edges of the state updates (innovation held) ---
        match spec.error {
            ErrorComponent::Additive => {
                grads.d_alpha += dl1 * e;
                if has_trend {
                    grads.d_beta += db1 * e;
                    if damped {
                        grads.d_phi += db1 * trend;
                    }
                }
                if has_season {
                    grads.d_gamma += match spec.season {
                        SeasonComponent::Additive => ds1 * e,
                        SeasonComponent::Multiplicative => ds1 * seasonal_gate * seasonal * q,
                        SeasonComponent::None => 0.0,
                    };
                }
            }
            ErrorComponent::Multiplicative => {
                let scaled = base * e;
                grads.d_alpha += dl1 * scaled;
                if has_trend {
                    grads.d_beta += db1 * scaled;
                    if damped {
                        grads.d_phi += db1 * trend;
                    }
                }
                if has_season {
                    grads.d_gamma += match spec.season {
                        SeasonComponent::Additive => ds1 * scaled,
                        SeasonComponent::Multiplicative => ds1 * seasonal_gate * seasonal * e,
                        SeasonComponent::None => 0.0,
                    };
                }
            }
        }

        // --- fitted adjoint ---
        let mut d_fitted = match spec.error {
            ErrorComponent::Additive => -d_e,
            ErrorComponent::Multiplicative => {
                let e_raw = y / f - 1.0;
                let e_gate = if in_range(e_raw, INNOVATION_CLAMP) { 1.0 } else { 0.0 };
                d_e * e_gate * (-y / (f * f))
            }
        };
        if spec.error == ErrorComponent::Multiplicative {
            // d/df of the sum log|fitted| likelihood term.
            d_fitted += 1.0 / f;
        }

        let d_combined = fitted_gate * d_fitted;

        // --- split through the seasonal combination ---
        let mut d_base;
        let mut d_s;
        match spec.season {
            SeasonComponent::None => {
                d_base = d_combined;
                d_s = 0.0;
            }
            SeasonComponent::Additive => {
                d_base = d_combined;
                d_s = d_combined;
            }
            SeasonComponent::Multiplicative => {
                d_base = d_combined * seasonal;
                d_s = d_combined * base;
            }
        }

        // --- direct base / seasonal edges of the state updates ---
        match spec.error {
            ErrorComponent::Additive => {
                d_base += dl1;
                if has_season {
                    match spec.season {
                        SeasonComponent::Additive => {
                            d_s += ds1;
                        }
                        SeasonComponent::Multiplicative => {
                            if base.abs() >= 1e-10 {
                                d_base += ds1 * seasonal_gate * (-seasonal * gamma * e / (base * base));
                            }
                            d_s += ds1 * seasonal_gate * (1.0 + gamma * q);
                        }
                        SeasonComponent::None => {}
                    }
                }
            }
            ErrorComponent::Multiplicative => {
                d_base += dl1 * (1.0 + params.alpha * e);
                if has_trend {
                    d_base += db1 * beta * e;
                }
                if has_season {
                    match spec.season {
                        SeasonComponent::Additive => {
                            d_base += ds1 * gamma * e;
                            d_s += ds1;
                        }
                        SeasonComponent::Multiplicative => {
                            d_s += ds1 * seasonal_gate * (1.0 + gamma * e);
                        }
                        SeasonComponent::None => {}
                    }
                }
            }
        }

        // --- trend pass-through edge of the trend update ---
        let mut d_b = if has_trend {
            db1 * if damped { phi } else { 1.0 }
        } else {
            0.0
        };

        // --- split base through the level-trend combination ---
        let d_l;
        match spec.trend {
            TrendComponent::None => {
                d_l = d_base;
            }
            TrendComponent::Additive => {
                d_l = d_base;
                d_b += d_base;
            }
            TrendComponent::Multiplicative => {
                d_l = d_base * trend_clamped;
                d_b += d_base * level * trend_gate;
            }
            TrendComponent::DampedAdditive => {
                d_l = d_base;
                d_b += d_base * phi;
                grads.d_phi += d_base * trend;
            }
            TrendComponent::DampedMultiplicative => {
                let cp = trend_clamped.powf(phi);
                d_l = d_base * cp;
                d_b += d_base * level * phi * trend_clamped.powf(phi - 1.0) * trend_gate;
                grads.d_phi += d_base * level * cp * trend_clamped.ln();
            }
        }

        dl_next = d_l;
        db_next = d_b;
        if has_season {
            ds_next[j] = d_s;
        }
    }

    grads.d_level0 = dl_next;
    grads.d_trend0 = db_next;
    grads.d_seasonal0.copy_from_slice(&ds_next);

    Ok(grads)
}

/// Backward pass driven by a checkpoint set instead of a full state
/// history. Each inter-checkpoint segment is re-forwarded into a scratch
/// buffer before being walked in reverse; retained memory stays bounded
/// by the segment length.
pub fn run_backward_checkpointed(
    spec: &EtsSpec,
    params: &EtsParams,
    values: &[f64],
    checkpoints: &crate::checkpoint::CheckpointSet,
) -> Result<EtsGradients> {
    let n = values.len();
    if checkpoints.series_len() != n {
        return Err(TsError::InvalidInput(format!(
            "Checkpoint set covers {} steps but series has {}",
            checkpoints.series_len(),
            n
        )));
    }

    let seeds = {
        let sigma2 = checkpoints.innovation_sse() / n as f64;
        let mut seeds = vec![0.0; n];
        if sigma2 > 1e-12 {
            simd::normalize(&mut seeds, checkpoints.innovations(), sigma2);
        }
        seeds
    };

    let m = checkpoints.season_length();
    let seasonal_len = checkpoints.seasonal_len();

    // Per-segment state cache, refilled on demand as the reverse loop
    // crosses a checkpoint boundary.
    let mut cache_start = usize::MAX;
    let mut cache: Vec<EtsState> = Vec::new();

    let result = backward_core(
        spec,
        params,
        values,
        checkpoints.fitted(),
        checkpoints.innovations(),
        &seeds,
        m,
        seasonal_len,
        |t| {
            if cache_start == usize::MAX || t < cache_start || t >= cache_start + cache.len() {
                let (start, state) = checkpoints.nearest_at_or_before(t);
                let mut states = Vec::with_capacity(t - start + 2);
                let mut s = state.clone();
                states.push(s.clone());
                for (offset, &y) in values[start..=t].iter().enumerate() {
                    forward_step(spec, params, &mut s, y, start + offset, m);
                    states.push(s.clone());
                }
                cache_start = start;
                cache = states;
            }
            let s = &cache[t - cache_start];
            let seasonal = if seasonal_len > 0 { s.seasonal[t % m] } else { 0.0 };
            (s.level, s.trend, seasonal)
        },
    )?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ets::{negative_log_likelihood, run_forward};
    use approx::assert_relative_eq;

    fn nll_at(spec: &EtsSpec, params: &EtsParams, values: &[f64], init: &EtsState) -> f64 {
        let traj = run_forward(spec, params, values, init).unwrap();
        negative_log_likelihood(spec, &traj)
    }

    fn central_diff(
        spec: &EtsSpec,
        params: &EtsParams,
        values: &[f64],
        init: &EtsState,
        bump: impl Fn(&mut EtsParams, &mut EtsState, f64),
        eps: f64,
    ) -> f64 {
        let mut p_hi = *params;
        let mut i_hi = init.clone();
        bump(&mut p_hi, &mut i_hi, eps);
        let mut p_lo = *params;
        let mut i_lo = init.clone();
        bump(&mut p_lo, &mut i_lo, -eps);
        (nll_at(spec, &p_hi, values, &i_hi) - nll_at(spec, &p_lo, values, &i_lo)) / (2.0 * eps)
    }

    fn check_gradients(spec: EtsSpec, params: EtsParams, values: Vec<f64>, init: EtsState) {
        let traj = run_forward(&spec, &params, &values, &init).unwrap();
        let grads = run_backward(&spec, &params, &values, &traj).unwrap();

        let eps = 1e-6;
        let tol = 1e-4;

        let num_alpha = central_diff(&spec, &params, &values, &init, |p, _, d| p.alpha += d, eps);
        assert_relative_eq!(grads.d_alpha, num_alpha, max_relative = tol, epsilon = 1e-7);

        if spec.has_trend() {
            let num_beta = central_diff(
                &spec,
                &params,
                &values,
                &init,
                |p, _, d| p.beta = Some(p.beta.unwrap() + d),
                eps,
            );
            assert_relative_eq!(grads.d_beta, num_beta, max_relative = tol, epsilon = 1e-7);
        }

        if spec.has_seasonal() {
            let num_gamma = central_diff(
                &spec,
                &params,
                &values,
                &init,
                |p, _, d| p.gamma = Some(p.gamma.unwrap() + d),
                eps,
            );
            assert_relative_eq!(grads.d_gamma, num_gamma, max_relative = tol, epsilon = 1e-7);
        }

        if spec.trend.is_damped() {
            let num_phi = central_diff(&spec, &params, &values, &init, |p, _, d| p.phi += d, eps);
            assert_relative_eq!(grads.d_phi, num_phi, max_relative = tol, epsilon = 1e-7);
        }

        let num_level0 = central_diff(&spec, &params, &values, &init, |_, i, d| i.level += d, eps);
        assert_relative_eq!(grads.d_level0, num_level0, max_relative = tol, epsilon = 1e-7);

        if spec.has_trend() {
            let num_trend0 = central_diff(&spec, &params, &values, &init, |_, i, d| i.trend += d, eps);
            assert_relative_eq!(grads.d_trend0, num_trend0, max_relative = tol, epsilon = 1e-7);
        }

        for j in 0..init.seasonal.len() {
            let num_s = central_diff(
                &spec,
                &params,
                &values,
                &init,
                |_, i, d| i.seasonal[j] += d,
                eps,
            );
            assert_relative_eq!(
                grads.d_seasonal0[j],
                num_s,
                max_relative = tol,
                epsilon = 1e-7
            );
        }
    }

    fn trending_series(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 50.0 + 0.7 * i as f64 + 2.0 * ((i as f64) * 0.9).sin())
            .collect()
    }

    fn seasonal_series(n: usize, m: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                100.0
                    + 0.4 * i as f64
                    + 8.0 * (2.0 * std::f64::consts::PI * (i % m) as f64 / m as f64).sin()
            })
            .collect()
    }

    #[test]
    fn test_gradient_additive_trend() {
        // The AAN sanity case: d_alpha against a central difference.
        let spec = EtsSpec::from_notation("AAN").unwrap();
        let params = EtsParams {
            alpha: 0.3,
            beta: Some(0.1),
            gamma: None,
            phi: 1.0,
        };
        let values = vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let init = EtsState::new(10.0, 1.0, vec![]);
        check_gradients(spec, params, values, init);
    }

    #[test]
    fn test_gradient_simple_level() {
        let spec = EtsSpec::from_notation("ANN").unwrap();
        let params = EtsParams {
            alpha: 0.45,
            beta: None,
            gamma: None,
            phi: 1.0,
        };
        check_gradients(spec, params, trending_series(30), EtsState::new(50.0, 0.0, vec![]));
    }

    #[test]
    fn test_gradient_damped_additive() {
        let spec = EtsSpec::from_notation("AAdN").unwrap();
        let params = EtsParams {
            alpha: 0.35,
            beta: Some(0.12),
            gamma: None,
            phi: 0.92,
        };
        check_gradients(spec, params, trending_series(40), EtsState::new(50.0, 0.7, vec![]));
    }

    #[test]
    fn test_gradient_additive_seasonal() {
        let spec = EtsSpec::from_notation("AAA").unwrap();
        let params = EtsParams {
            alpha: 0.3,
            beta: Some(0.08),
            gamma: Some(0.15),
            phi: 1.0,
        };
        let m = 4;
        let init = EtsState::new(100.0, 0.4, vec![0.0, 8.0, 0.0, -8.0]);
        check_gradients(spec, params, seasonal_series(48, m), init);
    }

    #[test]
    fn test_gradient_multiplicative_error() {
        let spec = EtsSpec::from_notation("MNN").unwrap();
        let params = EtsParams {
            alpha: 0.4,
            beta: None,
            gamma: None,
            phi: 1.0,
        };
        check_gradients(spec, params, trending_series(30), EtsState::new(50.0, 0.0, vec![]));
    }

    #[test]
    fn test_gradient_multiplicative_seasonal() {
        let spec = EtsSpec::from_notation("MNM").unwrap();
        let params = EtsParams {
            alpha: 0.25,
            beta: None,
            gamma: Some(0.1),
            phi: 1.0,
        };
        let m = 4;
        let values: Vec<f64> = (0..48)
            .map(|i| (100.0 + 0.3 * i as f64) * (1.0 + 0.1 * ((i % m) as f64 - 1.5) / 1.5))
            .collect();
        let init = EtsState::new(100.0, 0.0, vec![0.9, 0.97, 1.03, 1.1]);
        check_gradients(spec, params, values, init);
    }

    #[test]
    fn test_gradient_multiplicative_trend() {
        let spec = EtsSpec::from_notation("AMN").unwrap();
        let params = EtsParams {
            alpha: 0.3,
            beta: Some(0.05),
            gamma: None,
            phi: 1.0,
        };
        let values: Vec<f64> = (0..30).map(|i| 20.0 * 1.02f64.powi(i)).collect();
        check_gradients(spec, params, values, EtsState::new(20.0, 1.02, vec![]));
    }

    #[test]
    fn test_gradient_damped_multiplicative_full() {
        let spec = EtsSpec::from_notation("MMdM").unwrap();
        let params = EtsParams {
            alpha: 0.2,
            beta: Some(0.05),
            gamma: Some(0.08),
            phi: 0.95,
        };
        let m = 4;
        let values: Vec<f64> = (0..60)
            .map(|i| {
                30.0 * 1.01f64.powi(i) * (1.0 + 0.08 * ((i % m) as f64 - 1.5) / 1.5)
            })
            .collect();
        let init = EtsState::new(30.0, 1.01, vec![0.92, 0.98, 1.02, 1.08]);
        check_gradients(spec, params, values, init);
    }

    #[test]
    fn test_absent_components_zero() {
        let spec = EtsSpec::from_notation("ANN").unwrap();
        let params = EtsParams {
            alpha: 0.3,
            beta: None,
            gamma: None,
            phi: 1.0,
        };
        let values = trending_series(20);
        let init = EtsState::new(50.0, 0.0, vec![]);
        let traj = run_forward(&spec, &params, &values, &init).unwrap();
        let grads = run_backward(&spec, &params, &values, &traj).unwrap();

        assert_eq!(grads.d_beta, 0.0);
        assert_eq!(grads.d_gamma, 0.0);
        assert_eq!(grads.d_phi, 0.0);
        assert_eq!(grads.d_trend0, 0.0);
        assert!(grads.d_seasonal0.is_empty());
    }
}
