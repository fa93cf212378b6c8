//! Bayesian online changepoint detection (BOCPD).
//!
//! Maintains a posterior over the run length since the last changepoint
//! under a Normal-Gamma conjugate prior on each segment's mean and
//! precision, with a constant hazard 1/lambda. A changepoint is flagged
//! when the maximum-a-posteriori run length drops instead of growing:
//! the model then believes a new segment began, and the re-dated start
//! of that segment is the flagged index.

use crate::error::{Result, TsError};
use statrs::distribution::{Continuous, StudentsT};

/// Maximum run lengths tracked before truncation.
const MAX_RUN_LENGTHS: usize = 500;

/// Result of BOCPD detection.
#[derive(Debug, Clone)]
pub struct BocpdResult {
    /// Whether each point starts a new segment (MAP run length dropped
    /// to zero).
    pub is_changepoint: Vec<bool>,
    /// Changepoint probability for each point; all zeros when
    /// probabilities were not requested.
    pub changepoint_probability: Vec<f64>,
    /// Indices of detected changepoints.
    pub changepoint_indices: Vec<usize>,
}

/// Normal-Gamma sufficient statistics for one candidate run length.
#[derive(Debug, Clone, Copy, Default)]
struct RunStats {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl RunStats {
    fn observe(mut self, x: f64) -> Self {
        self.count += 1;
        self.sum += x;
        self.sum_sq += x * x;
        self
    }
}

/// Posterior predictive density of `x` under the Normal-Gamma posterior
/// for a segment with the given sufficient statistics.
fn predictive(x: f64, stats: &RunStats, mu0: f64, kappa0: f64, alpha0: f64, beta0: f64) -> f64 {
    let n = stats.count as f64;
    let kappa_n = kappa0 + n;
    let alpha_n = alpha0 + n / 2.0;

    let mu_n = if stats.count > 0 {
        (kappa0 * mu0 + stats.sum) / kappa_n
    } else {
        mu0
    };

    let ss = if stats.count > 0 {
        (stats.sum_sq - stats.sum * stats.sum / n).max(0.0)
    } else {
        0.0
    };
    let mean = if stats.count > 0 { stats.sum / n } else { mu0 };
    let beta_n = beta0 + 0.5 * ss + kappa0 * n * (mean - mu0).powi(2) / (2.0 * kappa_n);

    let df = 2.0 * alpha_n;
    let scale = (beta_n * (kappa_n + 1.0) / (alpha_n * kappa_n)).sqrt().max(1e-10);

    let standard = StudentsT::new(0.0, 1.0, df);
    match standard {
        Ok(dist) => dist.pdf((x - mu_n) / scale) / scale,
        Err(_) => 0.0,
    }
}

/// Bayesian online changepoint detection with a Normal-Gamma prior.
///
/// `hazard_lambda` is the expected run length between changepoints;
/// `include_probabilities` controls whether the per-step changepoint
/// probability vector is populated.
pub fn detect_changepoints_bocpd(
    values: &[f64],
    hazard_lambda: f64,
    include_probabilities: bool,
) -> Result<BocpdResult> {
    let n = values.len();
    if n < 3 {
        return Err(TsError::InsufficientData { needed: 3, got: n });
    }
    if !hazard_lambda.is_finite() || hazard_lambda < 1.0 {
        return Err(TsError::InvalidParameter {
            param: "hazard_lambda".to_string(),
            value: hazard_lambda.to_string(),
            reason: "must be a finite value >= 1".to_string(),
        });
    }

    let hazard = 1.0 / hazard_lambda;

    // Prior centered on the series; weakly informative.
    let mu0 = values.iter().sum::<f64>() / n as f64;
    let kappa0 = 1.0;
    let alpha0 = 1.0;
    let beta0 = 1.0;

    let mut run_prob = vec![1.0f64];
    let mut run_stats = vec![RunStats::default()];

    let mut is_changepoint = vec![false; n];
    let mut changepoint_probability = vec![0.0; n];
    let mut changepoint_indices = Vec::new();

    // MAP run length (number of observations in the believed current
    // segment) after the previous step.
    let mut map_prev = 0usize;

    for (t, &x) in values.iter().enumerate() {
        let r_count = run_prob.len();

        let pred: Vec<f64> = run_stats
            .iter()
            .map(|s| predictive(x, s, mu0, kappa0, alpha0, beta0))
            .collect();

        // Mix growth (no changepoint) with reset-to-zero. Index r in the
        // updated distribution is the number of observations in the
        // current segment; index 0 carries the mass of a segment
        // starting after x.
        let mut new_prob = vec![0.0f64; r_count + 1];
        let mut reset_mass = 0.0;
        for r in 0..r_count {
            let weighted = run_prob[r] * pred[r];
            new_prob[r + 1] += weighted * (1.0 - hazard);
            reset_mass += weighted * hazard;
        }
        new_prob[0] = reset_mass;

        let total: f64 = new_prob.iter().sum();
        if total > 1e-300 {
            for p in &mut new_prob {
                *p /= total;
            }
        } else {
            // Numerical washout: restart from a fresh segment.
            new_prob.iter_mut().for_each(|p| *p = 0.0);
            new_prob[0] = 1.0;
        }

        // Advance sufficient statistics: run r at t+1 extends run r-1.
        let mut new_stats = Vec::with_capacity(r_count + 1);
        new_stats.push(RunStats::default());
        for stats in run_stats.iter().take(r_count) {
            new_stats.push(stats.observe(x));
        }

        // MAP run length after seeing x.
        let map_run = new_prob
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(r, _)| r)
            .unwrap_or(0);

        if include_probabilities {
            // Posterior mass on runs younger than uninterrupted growth
            // would produce: the probability the run restarted.
            changepoint_probability[t] =
                new_prob.iter().take((map_prev + 1).min(new_prob.len())).sum::<f64>();
        }

        // The MAP run failing to grow means the model re-dated the
        // current segment: it now believes a new segment began at
        // t + 1 - map_run. Flag that start index once.
        if t > 0 && map_run >= 1 && map_run < map_prev + 1 {
            let start = t + 1 - map_run;
            if start > 0 && !is_changepoint[start] {
                is_changepoint[start] = true;
                changepoint_indices.push(start);
            }
        }

        map_prev = map_run;
        run_prob = new_prob;
        run_stats = new_stats;

        if run_prob.len() > MAX_RUN_LENGTHS {
            run_prob.truncate(MAX_RUN_LENGTHS);
            run_stats.truncate(MAX_RUN_LENGTHS);
            let total: f64 = run_prob.iter().sum();
            if total > 1e-300 {
                for p in &mut run_prob {
                    *p /= total;
                }
            }
        }
    }

    // Flags are pushed at detection time; report them in series order.
    changepoint_indices.sort_unstable();

    Ok(BocpdResult {
        is_changepoint,
        changepoint_probability,
        changepoint_indices,
    })
}

/// Default-hazard entry point for `ts_detect_changepoints`.
pub fn detect_changepoints(values: &[f64]) -> Result<BocpdResult> {
    detect_changepoints_bocpd(values, 250.0, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_shift_detected_once() {
        // Five ones, five tens: exactly one changepoint near the shift.
        let values = vec![1.0, 1.0, 1.0, 1.0, 1.0, 10.0, 10.0, 10.0, 10.0, 10.0];
        let result = detect_changepoints_bocpd(&values, 100.0, true).unwrap();

        assert_eq!(
            result.changepoint_indices.len(),
            1,
            "indices: {:?}",
            result.changepoint_indices
        );
        let idx = result.changepoint_indices[0];
        assert!(
            (4..=6).contains(&idx),
            "changepoint at {} not in 4..=6",
            idx
        );
    }

    #[test]
    fn test_constant_series_no_changepoints() {
        let values = vec![5.0; 50];
        let result = detect_changepoints_bocpd(&values, 100.0, false).unwrap();
        assert!(
            result.changepoint_indices.is_empty(),
            "unexpected: {:?}",
            result.changepoint_indices
        );
    }

    #[test]
    fn test_two_shifts() {
        let mut values = vec![0.0; 30];
        values.extend(vec![10.0; 30]);
        values.extend(vec![-5.0; 30]);

        let result = detect_changepoints_bocpd(&values, 100.0, false).unwrap();
        assert!(result.changepoint_indices.len() >= 2);
        assert!(result.changepoint_indices.iter().any(|&i| (28..=33).contains(&i)));
        assert!(result.changepoint_indices.iter().any(|&i| (58..=63).contains(&i)));
    }

    #[test]
    fn test_probabilities_populated_on_request() {
        let values = vec![1.0, 1.0, 1.0, 10.0, 10.0, 10.0];
        let with = detect_changepoints_bocpd(&values, 50.0, true).unwrap();
        let without = detect_changepoints_bocpd(&values, 50.0, false).unwrap();

        assert!(with.changepoint_probability.iter().any(|&p| p > 0.0));
        assert!(without.changepoint_probability.iter().all(|&p| p == 0.0));
        assert!(with
            .changepoint_probability
            .iter()
            .all(|&p| (0.0..=1.0).contains(&p)));
        // The flag set must not depend on whether probabilities are
        // requested.
        assert_eq!(with.changepoint_indices, without.changepoint_indices);
    }

    #[test]
    fn test_first_point_never_flagged() {
        let values = vec![100.0, 1.0, 1.0, 1.0];
        let result = detect_changepoints_bocpd(&values, 10.0, false).unwrap();
        assert!(!result.is_changepoint[0]);
    }

    #[test]
    fn test_invalid_hazard_rejected() {
        let values = vec![1.0, 2.0, 3.0];
        assert!(detect_changepoints_bocpd(&values, 0.5, false).is_err());
        assert!(detect_changepoints_bocpd(&values, f64::NAN, false).is_err());
    }

    #[test]
    fn test_short_series_rejected() {
        assert!(detect_changepoints_bocpd(&[1.0, 2.0], 100.0, false).is_err());
    }

    #[test]
    fn test_long_series_truncation_stable() {
        let values: Vec<f64> = (0..2000).map(|i| (i as f64 * 0.01).sin()).collect();
        let result = detect_changepoints_bocpd(&values, 500.0, false).unwrap();
        assert_eq!(result.is_changepoint.len(), 2000);
    }
}
