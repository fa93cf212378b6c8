//! ETS state-space model: specification, state, and forward recursion.
//!
//! The recursion implements the numerically-safe ETS variant used by the
//! extension: trend ratios and seasonal factors are clamped into fixed
//! ranges, fitted values carry a positive floor, and multiplicative
//! innovations are bounded. The clamps are part of the model contract.

use crate::error::{Result, TsError};

/// Floor applied to every fitted value. Keeps multiplicative innovations
/// and the log-likelihood term finite.
pub const FITTED_FLOOR: f64 = 1e-6;

/// Clamp range for multiplicative trend ratios.
pub const TREND_CLAMP: (f64, f64) = (0.01, 10.0);

/// Clamp range for multiplicative seasonal factors.
pub const SEASONAL_CLAMP: (f64, f64) = (0.1, 10.0);

/// Clamp range for multiplicative innovations.
pub const INNOVATION_CLAMP: (f64, f64) = (-0.999, 1e6);

/// Error component of an ETS specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorComponent {
    Additive,
    Multiplicative,
}

/// Trend component of an ETS specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendComponent {
    None,
    Additive,
    Multiplicative,
    DampedAdditive,
    DampedMultiplicative,
}

impl TrendComponent {
    pub fn is_damped(&self) -> bool {
        matches!(
            self,
            TrendComponent::DampedAdditive | TrendComponent::DampedMultiplicative
        )
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TrendComponent::None)
    }
}

/// Seasonal component of an ETS specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonComponent {
    None,
    Additive,
    Multiplicative,
}

impl SeasonComponent {
    pub fn is_none(&self) -> bool {
        matches!(self, SeasonComponent::None)
    }
}

/// Full ETS model specification (error x trend x season).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtsSpec {
    pub error: ErrorComponent,
    pub trend: TrendComponent,
    pub season: SeasonComponent,
}

impl EtsSpec {
    pub fn new(error: ErrorComponent, trend: TrendComponent, season: SeasonComponent) -> Self {
        Self {
            error,
            trend,
            season,
        }
    }

    /// Parse ETS notation like "AAA", "MNM", "AAdA", "MAdM".
    ///
    /// Three characters are error/trend/season; a 'd' after the trend
    /// character marks a damped trend.
    pub fn from_notation(notation: &str) -> Result<Self> {
        let chars: Vec<char> = notation.chars().collect();

        let invalid = || {
            TsError::InvalidInput(format!(
                "Invalid ETS model specification '{}'. \
                 Expected notation like 'AAA', 'MNM', 'AAdA' where \
                 E=Error (A/M), T=Trend (A/M/N, optionally with 'd' for damped), \
                 S=Seasonal (A/M/N).",
                notation
            ))
        };

        let (error_ch, trend_ch, damped, season_ch) = match chars.len() {
            3 => (chars[0], chars[1], false, chars[2]),
            4 if chars[2] == 'd' => (chars[0], chars[1], true, chars[3]),
            _ => return Err(invalid()),
        };

        let error = match error_ch {
            'A' => ErrorComponent::Additive,
            'M' => ErrorComponent::Multiplicative,
            _ => return Err(invalid()),
        };

        let trend = match (trend_ch, damped) {
            ('N', false) => TrendComponent::None,
            ('A', false) => TrendComponent::Additive,
            ('M', false) => TrendComponent::Multiplicative,
            ('A', true) => TrendComponent::DampedAdditive,
            ('M', true) => TrendComponent::DampedMultiplicative,
            _ => return Err(invalid()),
        };

        let season = match season_ch {
            'N' => SeasonComponent::None,
            'A' => SeasonComponent::Additive,
            'M' => SeasonComponent::Multiplicative,
            _ => return Err(invalid()),
        };

        Ok(Self {
            error,
            trend,
            season,
        })
    }

    /// Short notation for display, e.g. "AAdM".
    pub fn short_name(&self) -> String {
        let e = match self.error {
            ErrorComponent::Additive => "A",
            ErrorComponent::Multiplicative => "M",
        };
        let t = match self.trend {
            TrendComponent::None => "N",
            TrendComponent::Additive => "A",
            TrendComponent::Multiplicative => "M",
            TrendComponent::DampedAdditive => "Ad",
            TrendComponent::DampedMultiplicative => "Md",
        };
        let s = match self.season {
            SeasonComponent::None => "N",
            SeasonComponent::Additive => "A",
            SeasonComponent::Multiplicative => "M",
        };
        format!("{}{}{}", e, t, s)
    }

    pub fn has_trend(&self) -> bool {
        !self.trend.is_none()
    }

    pub fn has_seasonal(&self) -> bool {
        !self.season.is_none()
    }

    /// Number of free smoothing/damping parameters.
    pub fn n_params(&self) -> usize {
        let mut k = 1; // alpha
        if self.has_trend() {
            k += 1; // beta
        }
        if self.has_seasonal() {
            k += 1; // gamma
        }
        if self.trend.is_damped() {
            k += 1; // phi
        }
        k
    }
}

/// Smoothing and damping parameters.
///
/// Invariants: `beta` present iff the spec has a trend, `gamma` present
/// iff the spec has a seasonal component, `phi` only read for damped
/// trends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtsParams {
    pub alpha: f64,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    pub phi: f64,
}

impl EtsParams {
    pub fn validate(&self, spec: &EtsSpec) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(TsError::InvalidParameter {
                param: "alpha".to_string(),
                value: self.alpha.to_string(),
                reason: "must be in [0, 1]".to_string(),
            });
        }
        if spec.has_trend() != self.beta.is_some() {
            return Err(TsError::InvalidParameter {
                param: "beta".to_string(),
                value: format!("{:?}", self.beta),
                reason: "beta must be present exactly when the model has a trend".to_string(),
            });
        }
        if spec.has_seasonal() != self.gamma.is_some() {
            return Err(TsError::InvalidParameter {
                param: "gamma".to_string(),
                value: format!("{:?}", self.gamma),
                reason: "gamma must be present exactly when the model is seasonal".to_string(),
            });
        }
        if let Some(beta) = self.beta {
            if !(0.0..=1.0).contains(&beta) {
                return Err(TsError::InvalidParameter {
                    param: "beta".to_string(),
                    value: beta.to_string(),
                    reason: "must be in [0, 1]".to_string(),
                });
            }
        }
        if let Some(gamma) = self.gamma {
            if !(0.0..=1.0).contains(&gamma) {
                return Err(TsError::InvalidParameter {
                    param: "gamma".to_string(),
                    value: gamma.to_string(),
                    reason: "must be in [0, 1]".to_string(),
                });
            }
        }
        if spec.trend.is_damped() && !(self.phi > 0.0 && self.phi <= 1.0) {
            return Err(TsError::InvalidParameter {
                param: "phi".to_string(),
                value: self.phi.to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

/// Model state at one timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct EtsState {
    pub level: f64,
    /// Unused (0.0) when the spec has no trend.
    pub trend: f64,
    /// Empty when the spec has no seasonal component; otherwise length m.
    pub seasonal: Vec<f64>,
}

impl EtsState {
    pub fn new(level: f64, trend: f64, seasonal: Vec<f64>) -> Self {
        Self {
            level,
            trend,
            seasonal,
        }
    }
}

/// Forward trajectory over n steps.
///
/// Level and trend histories are stored per step. The seasonal history is
/// stored sparsely: step t only touches component `t % m`, so the updated
/// value alone is recorded and `seasonal_at` reconstructs the full vector
/// for any timestep.
#[derive(Debug, Clone)]
pub struct EtsTrajectory {
    /// One-step-ahead predictions, length n.
    pub fitted: Vec<f64>,
    /// Innovations (additive or multiplicative residuals), length n.
    pub innovations: Vec<f64>,
    /// Level state before and after each step, length n + 1.
    pub levels: Vec<f64>,
    /// Trend state, length n + 1; empty when the spec has no trend.
    pub trends: Vec<f64>,
    /// Initial seasonal vector, length m; empty when non-seasonal.
    pub seasonal_init: Vec<f64>,
    /// Updated seasonal component after each step, length n.
    pub seasonal_updates: Vec<f64>,
    /// Season length used by the pass (1 when non-seasonal).
    pub season_length: usize,
    /// Sum of squared innovations.
    pub innovation_sse: f64,
    /// Sum of log|fitted| (multiplicative-error likelihood term).
    pub sum_log_forecast: f64,
}

impl EtsTrajectory {
    pub fn len(&self) -> usize {
        self.fitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fitted.is_empty()
    }

    /// Seasonal component j as it stood entering step t.
    ///
    /// Component j was last written at the most recent step t' < t with
    /// t' = j (mod m); before any such step it is the initial value.
    pub fn seasonal_component_at(&self, t: usize, j: usize) -> f64 {
        let m = self.season_length;
        if self.seasonal_init.is_empty() {
            return 0.0;
        }
        // Last step strictly before t that wrote component j.
        if t > j {
            let steps_done = (t - 1 - j) / m;
            let last_write = j + steps_done * m;
            self.seasonal_updates[last_write]
        } else {
            self.seasonal_init[j]
        }
    }

    /// Full seasonal vector entering step t.
    pub fn seasonal_at(&self, t: usize) -> Vec<f64> {
        let m = self.season_length;
        (0..self.seasonal_init.len())
            .map(|j| self.seasonal_component_at(t, j % m))
            .collect()
    }

    /// Model state entering step t.
    pub fn state_at(&self, t: usize) -> EtsState {
        EtsState {
            level: self.levels[t],
            trend: if self.trends.is_empty() {
                0.0
            } else {
                self.trends[t]
            },
            seasonal: self.seasonal_at(t),
        }
    }

    /// Innovation variance sigma^2 = SSE / n.
    pub fn sigma2(&self) -> f64 {
        if self.fitted.is_empty() {
            f64::NAN
        } else {
            self.innovation_sse / self.fitted.len() as f64
        }
    }
}

#[inline]
fn clamp(x: f64, range: (f64, f64)) -> f64 {
    x.clamp(range.0, range.1)
}

/// One step of the recursion, shared by the full pass and checkpoint
/// replay. Returns (fitted, innovation) and advances the state in place.
pub(crate) fn forward_step(
    spec: &EtsSpec,
    params: &EtsParams,
    state: &mut EtsState,
    y: f64,
    t: usize,
    m: usize,
) -> (f64, f64) {
    let level = state.level;
    let trend = state.trend;

    // Level-trend combination.
    let base = match spec.trend {
        TrendComponent::None => level,
        TrendComponent::Additive => level + trend,
        TrendComponent::Multiplicative => level * clamp(trend, TREND_CLAMP),
        TrendComponent::DampedAdditive => level + params.phi * trend,
        TrendComponent::DampedMultiplicative => {
            level * clamp(trend, TREND_CLAMP).powf(params.phi)
        }
    };

    // Seasonal combination.
    let j = t % m;
    let seasonal = if spec.has_seasonal() {
        state.seasonal[j]
    } else {
        0.0
    };
    let combined = match spec.season {
        SeasonComponent::None => base,
        SeasonComponent::Additive => base + seasonal,
        SeasonComponent::Multiplicative => base * seasonal,
    };

    // Positive floor keeps multiplicative errors and log-likelihood finite.
    let fitted = combined.max(FITTED_FLOOR);

    let innovation = match spec.error {
        ErrorComponent::Additive => y - fitted,
        ErrorComponent::Multiplicative => clamp(y / fitted - 1.0, INNOVATION_CLAMP),
    };

    // State updates.
    match spec.error {
        ErrorComponent::Additive => {
            state.level = base + params.alpha * innovation;
            if spec.has_trend() {
                let beta = params.beta.unwrap_or(0.0);
                state.trend = if spec.trend.is_damped() {
                    params.phi * trend + beta * innovation
                } else {
                    trend + beta * innovation
                };
            }
            if spec.has_seasonal() {
                let gamma = params.gamma.unwrap_or(0.0);
                state.seasonal[j] = match spec.season {
                    SeasonComponent::Additive => seasonal + gamma * innovation,
                    SeasonComponent::Multiplicative => clamp(
                        seasonal * (1.0 + gamma * crate::simd::safe_div(innovation, base)),
                        SEASONAL_CLAMP,
                    ),
                    SeasonComponent::None => seasonal,
                };
            }
        }
        ErrorComponent::Multiplicative => {
            // base * innovation is the absolute-scale innovation.
            let scaled = base * innovation;
            state.level = base * (1.0 + params.alpha * innovation);
            if spec.has_trend() {
                let beta = params.beta.unwrap_or(0.0);
                state.trend = if spec.trend.is_damped() {
                    params.phi * trend + beta * scaled
                } else {
                    trend + beta * scaled
                };
            }
            if spec.has_seasonal() {
                let gamma = params.gamma.unwrap_or(0.0);
                state.seasonal[j] = match spec.season {
                    SeasonComponent::Additive => seasonal + gamma * scaled,
                    SeasonComponent::Multiplicative => {
                        clamp(seasonal * (1.0 + gamma * innovation), SEASONAL_CLAMP)
                    }
                    SeasonComponent::None => seasonal,
                };
            }
        }
    }

    (fitted, innovation)
}

/// Run the forward recursion over `values`, recording the full
/// trajectory.
pub fn run_forward(
    spec: &EtsSpec,
    params: &EtsParams,
    values: &[f64],
    init: &EtsState,
) -> Result<EtsTrajectory> {
    params.validate(spec)?;

    let n = values.len();
    if n == 0 {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }

    let m = if spec.has_seasonal() {
        let m = init.seasonal.len();
        if m < 1 {
            return Err(TsError::InvalidInput(
                "Seasonal model requires a non-empty initial seasonal state".to_string(),
            ));
        }
        m
    } else {
        1
    };

    let mut state = init.clone();
    let has_trend = spec.has_trend();

    let mut fitted = Vec::with_capacity(n);
    let mut innovations = Vec::with_capacity(n);
    let mut levels = Vec::with_capacity(n + 1);
    let mut trends = if has_trend {
        Vec::with_capacity(n + 1)
    } else {
        Vec::new()
    };
    let mut seasonal_updates = if spec.has_seasonal() {
        Vec::with_capacity(n)
    } else {
        Vec::new()
    };

    levels.push(state.level);
    if has_trend {
        trends.push(state.trend);
    }

    let mut sse = 0.0;
    let mut sum_log = 0.0;

    for (t, &y) in values.iter().enumerate() {
        let (f, e) = forward_step(spec, params, &mut state, y, t, m);
        fitted.push(f);
        innovations.push(e);
        levels.push(state.level);
        if has_trend {
            trends.push(state.trend);
        }
        if spec.has_seasonal() {
            seasonal_updates.push(state.seasonal[t % m]);
        }
        sse += e * e;
        if spec.error == ErrorComponent::Multiplicative {
            sum_log += f.abs().ln();
        }
    }

    Ok(EtsTrajectory {
        fitted,
        innovations,
        levels,
        trends,
        seasonal_init: init.seasonal.clone(),
        seasonal_updates,
        season_length: m,
        innovation_sse: sse,
        sum_log_forecast: sum_log,
    })
}

/// Negative log-likelihood of a completed forward pass.
///
/// L = (n/2) log(max(sigma^2, eps)) plus the sum of log|fitted| for
/// multiplicative-error models.
pub fn negative_log_likelihood(spec: &EtsSpec, trajectory: &EtsTrajectory) -> f64 {
    let n = trajectory.len() as f64;
    if n == 0.0 {
        return f64::NAN;
    }
    let sigma2 = (trajectory.innovation_sse / n).max(1e-12);
    let mut nll = 0.5 * n * sigma2.ln();
    if spec.error == ErrorComponent::Multiplicative {
        nll += trajectory.sum_log_forecast;
    }
    nll
}

/// Forecast h steps ahead from a terminal state, without state updates.
pub fn forecast_from_state(
    spec: &EtsSpec,
    params: &EtsParams,
    state: &EtsState,
    last_t: usize,
    horizon: usize,
) -> Vec<f64> {
    let m = if spec.has_seasonal() {
        state.seasonal.len().max(1)
    } else {
        1
    };

    let mut point = Vec::with_capacity(horizon);
    let mut phi_sum = 0.0;

    for h in 1..=horizon {
        let base = match spec.trend {
            TrendComponent::None => state.level,
            TrendComponent::Additive => state.level + h as f64 * state.trend,
            TrendComponent::Multiplicative => {
                state.level * clamp(state.trend, TREND_CLAMP).powi(h as i32)
            }
            TrendComponent::DampedAdditive => {
                phi_sum += params.phi.powi(h as i32);
                state.level + phi_sum * state.trend
            }
            TrendComponent::DampedMultiplicative => {
                phi_sum += params.phi.powi(h as i32);
                state.level * clamp(state.trend, TREND_CLAMP).powf(phi_sum)
            }
        };

        let value = match spec.season {
            SeasonComponent::None => base,
            SeasonComponent::Additive => base + state.seasonal[(last_t + h - 1) % m],
            SeasonComponent::Multiplicative => base * state.seasonal[(last_t + h - 1) % m],
        };

        point.push(value);
    }

    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn aaa_spec() -> EtsSpec {
        EtsSpec::new(
            ErrorComponent::Additive,
            TrendComponent::Additive,
            SeasonComponent::None,
        )
    }

    #[test]
    fn test_notation_roundtrip() {
        for notation in ["ANN", "AAN", "AAA", "MNM", "AAdA", "MAdM", "MMdN"] {
            let spec = EtsSpec::from_notation(notation).unwrap();
            assert_eq!(spec.short_name(), notation);
        }
        assert!(EtsSpec::from_notation("XYZ").is_err());
        assert!(EtsSpec::from_notation("AAxA").is_err());
        assert!(EtsSpec::from_notation("").is_err());
    }

    #[test]
    fn test_forward_deterministic() {
        let spec = EtsSpec::from_notation("AAdA").unwrap();
        let params = EtsParams {
            alpha: 0.3,
            beta: Some(0.1),
            gamma: Some(0.05),
            phi: 0.95,
        };
        let values: Vec<f64> = (0..40)
            .map(|i| 100.0 + i as f64 + ((i % 4) as f64 - 1.5) * 3.0)
            .collect();
        let init = EtsState::new(100.0, 1.0, vec![-3.0, -1.0, 1.0, 3.0]);

        let a = run_forward(&spec, &params, &values, &init).unwrap();
        let b = run_forward(&spec, &params, &values, &init).unwrap();

        assert_eq!(a.fitted, b.fitted);
        assert_eq!(a.innovations, b.innovations);
        assert_eq!(a.levels, b.levels);
        assert_eq!(a.trends, b.trends);
        assert_eq!(a.seasonal_updates, b.seasonal_updates);
    }

    #[test]
    fn test_forward_ses_matches_hand_rolled() {
        // ANN is simple exponential smoothing on the level.
        let spec = EtsSpec::from_notation("ANN").unwrap();
        let params = EtsParams {
            alpha: 0.4,
            beta: None,
            gamma: None,
            phi: 1.0,
        };
        let values = vec![10.0, 12.0, 11.0, 13.0];
        let init = EtsState::new(10.0, 0.0, vec![]);

        let traj = run_forward(&spec, &params, &values, &init).unwrap();

        let mut level = 10.0;
        for (t, &y) in values.iter().enumerate() {
            assert_relative_eq!(traj.fitted[t], level, epsilon = 1e-12);
            level = level + 0.4 * (y - level);
        }
        assert_relative_eq!(traj.levels[values.len()], level, epsilon = 1e-12);
    }

    #[test]
    fn test_sparse_seasonal_reconstruction() {
        let spec = EtsSpec::from_notation("AAA").unwrap();
        let params = EtsParams {
            alpha: 0.3,
            beta: Some(0.1),
            gamma: Some(0.2),
            phi: 1.0,
        };
        let values: Vec<f64> = (0..24).map(|i| 50.0 + ((i % 6) as f64) * 2.0).collect();
        let init = EtsState::new(50.0, 0.0, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);

        let traj = run_forward(&spec, &params, &values, &init).unwrap();

        // Re-run with explicit full state tracking and compare.
        let mut state = init.clone();
        for t in 0..values.len() {
            let reconstructed = traj.seasonal_at(t);
            assert_eq!(reconstructed, state.seasonal, "seasonal mismatch at t={}", t);
            forward_step(&spec, &params, &mut state, values[t], t, 6);
        }
        assert_eq!(traj.seasonal_at(values.len()), state.seasonal);
    }

    #[test]
    fn test_innovation_sse_finite() {
        let spec = aaa_spec();
        let params = EtsParams {
            alpha: 0.3,
            beta: Some(0.1),
            gamma: None,
            phi: 1.0,
        };
        let values = vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let init = EtsState::new(10.0, 1.0, vec![]);

        let traj = run_forward(&spec, &params, &values, &init).unwrap();
        assert!(traj.innovation_sse.is_finite());
        assert!(traj.sigma2().is_finite());
    }

    #[test]
    fn test_multiplicative_fitted_floor() {
        let spec = EtsSpec::from_notation("MNN").unwrap();
        let params = EtsParams {
            alpha: 0.5,
            beta: None,
            gamma: None,
            phi: 1.0,
        };
        // Level driven towards zero; fitted must stay at or above the floor.
        let values = vec![0.0, 0.0, 0.0, 0.0];
        let init = EtsState::new(0.0, 0.0, vec![]);

        let traj = run_forward(&spec, &params, &values, &init).unwrap();
        assert!(traj.fitted.iter().all(|&f| f >= FITTED_FLOOR));
        assert!(traj.innovations.iter().all(|&e| e >= INNOVATION_CLAMP.0));
        assert!(traj.sum_log_forecast.is_finite());
    }

    #[test]
    fn test_param_validation() {
        let spec = aaa_spec();
        let bad = EtsParams {
            alpha: 1.5,
            beta: Some(0.1),
            gamma: None,
            phi: 1.0,
        };
        assert!(bad.validate(&spec).is_err());

        let missing_beta = EtsParams {
            alpha: 0.5,
            beta: None,
            gamma: None,
            phi: 1.0,
        };
        assert!(missing_beta.validate(&spec).is_err());
    }

    #[test]
    fn test_forecast_from_state_damped() {
        let spec = EtsSpec::from_notation("AAdN").unwrap();
        let params = EtsParams {
            alpha: 0.3,
            beta: Some(0.1),
            gamma: None,
            phi: 0.9,
        };
        let state = EtsState::new(100.0, 2.0, vec![]);

        let point = forecast_from_state(&spec, &params, &state, 10, 3);
        // phi-weighted partial sums: 0.9, 0.9 + 0.81, 0.9 + 0.81 + 0.729
        assert_relative_eq!(point[0], 100.0 + 0.9 * 2.0, epsilon = 1e-12);
        assert_relative_eq!(point[1], 100.0 + (0.9 + 0.81) * 2.0, epsilon = 1e-12);
        assert_relative_eq!(point[2], 100.0 + (0.9 + 0.81 + 0.729) * 2.0, epsilon = 1e-12);
    }
}
