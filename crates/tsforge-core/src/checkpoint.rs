//! Gradient checkpointing for long-series ETS training.
//!
//! Instead of retaining every intermediate state, a sparse set of
//! snapshots is kept: the initial and terminal states always, plus one
//! every `stride` steps. Any state is reconstructed exactly by replaying
//! the forward recursion from the nearest prior snapshot, paying at most
//! `stride` extra steps. Retained memory drops from O(n * m) to
//! O(n / stride * m); the backward pass is the primary consumer.

use crate::error::{Result, TsError};
use crate::ets::{forward_step, ErrorComponent, EtsParams, EtsSpec, EtsState};

/// Checkpointing policy.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointConfig {
    /// Interior snapshot spacing.
    pub stride: usize,
    /// Checkpointing only activates for series at least this long.
    pub min_series_length: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            stride: 64,
            min_series_length: 500,
        }
    }
}

impl CheckpointConfig {
    pub fn is_enabled_for(&self, n: usize) -> bool {
        n >= self.min_series_length
    }
}

/// Sparse snapshot set plus the O(n) per-step outputs of the forward
/// pass (fitted values and innovations are needed by the backward pass
/// regardless of checkpointing).
#[derive(Debug, Clone)]
pub struct CheckpointSet {
    /// (timestep, state entering that timestep); first is t = 0, last is
    /// t = n, interior at t % stride == 0.
    points: Vec<(usize, EtsState)>,
    stride: usize,
    season_length: usize,
    seasonal_len: usize,
    fitted: Vec<f64>,
    innovations: Vec<f64>,
    innovation_sse: f64,
    sum_log_forecast: f64,
}

impl CheckpointSet {
    pub fn series_len(&self) -> usize {
        self.fitted.len()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn n_checkpoints(&self) -> usize {
        self.points.len()
    }

    pub fn season_length(&self) -> usize {
        self.season_length
    }

    pub fn seasonal_len(&self) -> usize {
        self.seasonal_len
    }

    pub fn fitted(&self) -> &[f64] {
        &self.fitted
    }

    pub fn innovations(&self) -> &[f64] {
        &self.innovations
    }

    pub fn innovation_sse(&self) -> f64 {
        self.innovation_sse
    }

    pub fn sum_log_forecast(&self) -> f64 {
        self.sum_log_forecast
    }

    /// Latest checkpoint at or before timestep t (binary search).
    pub fn nearest_at_or_before(&self, t: usize) -> (usize, &EtsState) {
        let idx = match self.points.binary_search_by_key(&t, |(ct, _)| *ct) {
            Ok(i) => i,
            Err(i) => i - 1, // points[0] is t = 0, so i >= 1 here
        };
        let (ct, state) = &self.points[idx];
        (*ct, state)
    }

    /// Reconstruct the state entering timestep t by replaying from the
    /// nearest prior checkpoint. Bit-identical to an unbroken pass.
    pub fn recompute_state_at(
        &self,
        spec: &EtsSpec,
        params: &EtsParams,
        values: &[f64],
        t: usize,
    ) -> Result<EtsState> {
        if t > values.len() {
            return Err(TsError::InvalidInput(format!(
                "Timestep {} beyond series length {}",
                t,
                values.len()
            )));
        }
        let (start, state) = self.nearest_at_or_before(t);
        let mut s = state.clone();
        for (offset, &y) in values[start..t].iter().enumerate() {
            forward_step(spec, params, &mut s, y, start + offset, self.season_length);
        }
        Ok(s)
    }
}

/// Run the forward recursion, retaining checkpoints at `stride` spacing
/// instead of the full state history.
pub fn build_checkpoints(
    spec: &EtsSpec,
    params: &EtsParams,
    values: &[f64],
    init: &EtsState,
    stride: usize,
) -> Result<CheckpointSet> {
    params.validate(spec)?;

    let n = values.len();
    if n == 0 {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }
    if stride == 0 {
        return Err(TsError::InvalidParameter {
            param: "stride".to_string(),
            value: "0".to_string(),
            reason: "checkpoint stride must be positive".to_string(),
        });
    }

    let m = if spec.has_seasonal() {
        init.seasonal.len().max(1)
    } else {
        1
    };

    let mut state = init.clone();
    let mut points = Vec::with_capacity(n / stride + 2);
    points.push((0, state.clone()));

    let mut fitted = Vec::with_capacity(n);
    let mut innovations = Vec::with_capacity(n);
    let mut sse = 0.0;
    let mut sum_log = 0.0;

    for (t, &y) in values.iter().enumerate() {
        let (f, e) = forward_step(spec, params, &mut state, y, t, m);
        fitted.push(f);
        innovations.push(e);
        sse += e * e;
        if spec.error == ErrorComponent::Multiplicative {
            sum_log += f.abs().ln();
        }

        let reached = t + 1;
        if reached < n && reached % stride == 0 {
            points.push((reached, state.clone()));
        }
    }

    // Terminal checkpoint always present.
    points.push((n, state));

    Ok(CheckpointSet {
        points,
        stride,
        season_length: m,
        seasonal_len: init.seasonal.len(),
        fitted,
        innovations,
        innovation_sse: sse,
        sum_log_forecast: sum_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ets::run_forward;
    use crate::ets_backward::{run_backward, run_backward_checkpointed};

    fn setup() -> (EtsSpec, EtsParams, Vec<f64>, EtsState) {
        let spec = EtsSpec::from_notation("AAdA").unwrap();
        let params = EtsParams {
            alpha: 0.3,
            beta: Some(0.1),
            gamma: Some(0.12),
            phi: 0.95,
        };
        let m = 6;
        let values: Vec<f64> = (0..400)
            .map(|i| {
                80.0 + 0.2 * i as f64
                    + 5.0 * (2.0 * std::f64::consts::PI * (i % m) as f64 / m as f64).sin()
            })
            .collect();
        let init = EtsState::new(80.0, 0.2, vec![0.0, 4.3, 4.3, 0.0, -4.3, -4.3]);
        (spec, params, values, init)
    }

    #[test]
    fn test_checkpoint_endpoints_and_stride() {
        let (spec, params, values, init) = setup();
        let set = build_checkpoints(&spec, &params, &values, &init, 50).unwrap();

        let first = set.points.first().unwrap().0;
        let last = set.points.last().unwrap().0;
        assert_eq!(first, 0);
        assert_eq!(last, values.len());
        for (t, _) in &set.points[1..set.points.len() - 1] {
            assert!(*t > 0 && *t % 50 == 0);
        }
    }

    #[test]
    fn test_reconstruction_bit_identical() {
        let (spec, params, values, init) = setup();
        let set = build_checkpoints(&spec, &params, &values, &init, 37).unwrap();
        let traj = run_forward(&spec, &params, &values, &init).unwrap();

        for t in [0, 1, 36, 37, 38, 100, 199, 200, 399, 400] {
            let reconstructed = set.recompute_state_at(&spec, &params, &values, t).unwrap();
            let reference = traj.state_at(t);
            assert_eq!(reconstructed.level, reference.level, "level at t={}", t);
            assert_eq!(reconstructed.trend, reference.trend, "trend at t={}", t);
            assert_eq!(reconstructed.seasonal, reference.seasonal, "seasonal at t={}", t);
        }
    }

    #[test]
    fn test_memory_bound() {
        let (spec, params, values, init) = setup();
        let stride = 50;
        let set = build_checkpoints(&spec, &params, &values, &init, stride).unwrap();
        // Endpoints plus interior snapshots only.
        assert!(set.n_checkpoints() <= values.len() / stride + 2);
    }

    #[test]
    fn test_checkpointed_backward_matches_full() {
        let (spec, params, values, init) = setup();
        let traj = run_forward(&spec, &params, &values, &init).unwrap();
        let full = run_backward(&spec, &params, &values, &traj).unwrap();

        let set = build_checkpoints(&spec, &params, &values, &init, 64).unwrap();
        let chk = run_backward_checkpointed(&spec, &params, &values, &set).unwrap();

        // Same arithmetic, replayed; results are bit-identical.
        assert_eq!(full.d_alpha, chk.d_alpha);
        assert_eq!(full.d_beta, chk.d_beta);
        assert_eq!(full.d_gamma, chk.d_gamma);
        assert_eq!(full.d_phi, chk.d_phi);
        assert_eq!(full.d_level0, chk.d_level0);
        assert_eq!(full.d_trend0, chk.d_trend0);
        assert_eq!(full.d_seasonal0, chk.d_seasonal0);
    }

    #[test]
    fn test_activation_threshold() {
        let config = CheckpointConfig::default();
        assert!(!config.is_enabled_for(100));
        assert!(config.is_enabled_for(500));
        assert!(config.is_enabled_for(100_000));
    }
}
