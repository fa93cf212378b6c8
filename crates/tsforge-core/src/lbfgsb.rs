//! Bound-constrained limited-memory BFGS driver.
//!
//! Minimizes `f(x)` subject to `lower <= x <= upper` given a callback
//! returning the objective and its gradient. The search direction comes
//! from the standard two-loop recursion over a bounded history of
//! (s, y) pairs; iterates are kept feasible by projection, and the line
//! search is a backtracking Armijo search with a Wolfe curvature check
//! deciding whether a step's curvature pair is stored.
//!
//! On any numerical failure (non-finite objective, exhausted line
//! search) the driver reports the best feasible point found so far with
//! a failure flag rather than an error; parameter fitting treats that
//! point as the fit result.

/// Optimizer settings.
#[derive(Debug, Clone, Copy)]
pub struct LbfgsbConfig {
    pub max_iterations: usize,
    /// Absolute tolerance on the projected gradient norm.
    pub tol_abs: f64,
    /// Relative tolerance on successive objective values.
    pub tol_rel: f64,
    /// Curvature-pair memory depth.
    pub memory: usize,
    /// Armijo sufficient-decrease parameter.
    pub armijo: f64,
    /// Wolfe curvature parameter.
    pub wolfe: f64,
    pub max_line_search_steps: usize,
}

impl Default for LbfgsbConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tol_abs: 1e-8,
            tol_rel: 1e-9,
            memory: 10,
            armijo: 1e-4,
            wolfe: 0.9,
            max_line_search_steps: 20,
        }
    }
}

/// Optimization outcome. `x` is always feasible.
#[derive(Debug, Clone)]
pub struct LbfgsbResult {
    pub x: Vec<f64>,
    pub f: f64,
    pub iterations: usize,
    pub converged: bool,
    pub failed: bool,
    pub message: String,
}

/// Project a point onto the box.
pub fn project(x: &mut [f64], lower: &[f64], upper: &[f64]) {
    for i in 0..x.len() {
        x[i] = x[i].clamp(lower[i], upper[i]);
    }
}

/// True when some coordinate sits at a bound with the gradient pushing
/// outward. Callers use this to decide whether to re-start from an
/// interior point.
pub fn at_bound_with_outward_gradient(
    x: &[f64],
    gradient: &[f64],
    lower: &[f64],
    upper: &[f64],
) -> bool {
    const TOL: f64 = 1e-10;
    for i in 0..x.len() {
        if (x[i] - lower[i]).abs() < TOL && gradient[i] > 0.0 {
            return true;
        }
        if (upper[i] - x[i]).abs() < TOL && gradient[i] < 0.0 {
            return true;
        }
    }
    false
}

/// Projected gradient: componentwise `x - P(x - g)`. Zero at a
/// constrained stationary point.
fn projected_gradient(x: &[f64], gradient: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
    (0..x.len())
        .map(|i| x[i] - (x[i] - gradient[i]).clamp(lower[i], upper[i]))
        .collect()
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

/// Minimize `objective` over the box `[lower, upper]`.
///
/// The callback returns `(f, gradient)`. The initial point is projected
/// onto the box before the first evaluation; the returned minimizer is
/// re-projected so it is feasible even after floating-point drift.
pub fn minimize<F>(
    mut objective: F,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    config: &LbfgsbConfig,
) -> LbfgsbResult
where
    F: FnMut(&[f64]) -> (f64, Vec<f64>),
{
    let n = x0.len();
    debug_assert_eq!(lower.len(), n);
    debug_assert_eq!(upper.len(), n);

    let mut x = x0.to_vec();
    project(&mut x, lower, upper);

    let (mut f, mut g) = objective(&x);
    if !f.is_finite() {
        return LbfgsbResult {
            x,
            f,
            iterations: 0,
            converged: false,
            failed: true,
            message: "Objective non-finite at initial point".to_string(),
        };
    }

    let mut best_x = x.clone();
    let mut best_f = f;

    // Curvature history, most recent last.
    let mut s_hist: Vec<Vec<f64>> = Vec::with_capacity(config.memory);
    let mut y_hist: Vec<Vec<f64>> = Vec::with_capacity(config.memory);
    let mut rho_hist: Vec<f64> = Vec::with_capacity(config.memory);

    let mut iterations = 0;
    let mut converged = false;
    let mut failed = false;
    let mut message = String::new();

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let pg = projected_gradient(&x, &g, lower, upper);
        if inf_norm(&pg) < config.tol_abs {
            converged = true;
            break;
        }

        // Two-loop recursion for the search direction.
        let mut d: Vec<f64> = g.iter().map(|v| -v).collect();
        if !s_hist.is_empty() {
            let k = s_hist.len();
            let mut alphas = vec![0.0; k];
            for i in (0..k).rev() {
                let a = rho_hist[i] * dot(&s_hist[i], &d);
                alphas[i] = a;
                for j in 0..n {
                    d[j] -= a * y_hist[i][j];
                }
            }
            // Initial Hessian scaling from the most recent pair.
            let last = k - 1;
            let yy = dot(&y_hist[last], &y_hist[last]);
            if yy > 0.0 {
                let scale = dot(&s_hist[last], &y_hist[last]) / yy;
                for dj in d.iter_mut() {
                    *dj *= scale;
                }
            }
            for i in 0..k {
                let b = rho_hist[i] * dot(&y_hist[i], &d);
                for j in 0..n {
                    d[j] += (alphas[i] - b) * s_hist[i][j];
                }
            }
        }

        // Zero out direction components that would immediately leave the
        // box against the gradient.
        for i in 0..n {
            let at_lower = (x[i] - lower[i]).abs() < 1e-12 && d[i] < 0.0;
            let at_upper = (upper[i] - x[i]).abs() < 1e-12 && d[i] > 0.0;
            if at_lower || at_upper {
                d[i] = 0.0;
            }
        }

        let descent = dot(&g, &d);
        if descent >= 0.0 || !descent.is_finite() {
            // Fall back to steepest descent within the box.
            d = g.iter().map(|v| -v).collect();
        }

        // Backtracking Armijo line search over the projected path.
        let mut step = 1.0;
        let mut accepted = false;
        let mut x_new = x.clone();
        let mut f_new = f;
        let mut g_new = g.clone();

        for _ in 0..config.max_line_search_steps {
            for i in 0..n {
                x_new[i] = (x[i] + step * d[i]).clamp(lower[i], upper[i]);
            }
            let (cand_f, cand_g) = objective(&x_new);
            if cand_f.is_finite() {
                let actual: f64 = (0..n).map(|i| g[i] * (x_new[i] - x[i])).sum();
                if cand_f <= f + config.armijo * actual {
                    f_new = cand_f;
                    g_new = cand_g;
                    accepted = true;
                    break;
                }
            }
            step *= 0.5;
        }

        if !accepted {
            failed = true;
            message = "Line search failed to find sufficient decrease".to_string();
            break;
        }

        let s: Vec<f64> = (0..n).map(|i| x_new[i] - x[i]).collect();
        let y: Vec<f64> = (0..n).map(|i| g_new[i] - g[i]).collect();
        let sy = dot(&s, &y);

        // Store the pair only when curvature is usable; the Wolfe check
        // filters steps whose curvature information is unreliable.
        let curvature_ok = dot(&g_new, &d).abs() <= config.wolfe * descent.abs();
        if sy > 1e-10 && (curvature_ok || s_hist.is_empty()) {
            if s_hist.len() == config.memory {
                s_hist.remove(0);
                y_hist.remove(0);
                rho_hist.remove(0);
            }
            rho_hist.push(1.0 / sy);
            s_hist.push(s);
            y_hist.push(y);
        }

        let f_prev = f;
        x = x_new.clone();
        f = f_new;
        g = g_new.clone();

        if f < best_f {
            best_f = f;
            best_x = x.clone();
        }

        if !f.is_finite() || g.iter().any(|v| !v.is_finite()) {
            failed = true;
            message = "Objective or gradient became non-finite".to_string();
            break;
        }

        if (f_prev - f).abs() <= config.tol_rel * (1.0 + f.abs()) {
            converged = true;
            break;
        }
    }

    let mut result_x = if best_f < f { best_x } else { x };
    let result_f = best_f.min(f);
    // Guarantee feasibility of the returned minimizer.
    project(&mut result_x, lower, upper);

    LbfgsbResult {
        x: result_x,
        f: result_f,
        iterations,
        converged,
        failed,
        message,
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    crate::simd::dot(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unconstrained_quadratic() {
        // f(x) = (x0 - 3)^2 + 2 (x1 + 1)^2
        let result = minimize(
            |x| {
                let f = (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2);
                let g = vec![2.0 * (x[0] - 3.0), 4.0 * (x[1] + 1.0)];
                (f, g)
            },
            &[0.0, 0.0],
            &[-10.0, -10.0],
            &[10.0, 10.0],
            &LbfgsbConfig::default(),
        );

        assert!(result.converged);
        assert!(!result.failed);
        assert_relative_eq!(result.x[0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(result.x[1], -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_minimum_outside_box() {
        // Unconstrained minimum at 5; the box caps it at 2.
        let result = minimize(
            |x| ((x[0] - 5.0).powi(2), vec![2.0 * (x[0] - 5.0)]),
            &[0.0],
            &[0.0],
            &[2.0],
            &LbfgsbConfig::default(),
        );

        assert_relative_eq!(result.x[0], 2.0, epsilon = 1e-8);
        assert!(at_bound_with_outward_gradient(
            &result.x,
            &[2.0 * (result.x[0] - 5.0)],
            &[0.0],
            &[2.0]
        ));
    }

    #[test]
    fn test_initial_point_projected() {
        let result = minimize(
            |x| (x[0] * x[0], vec![2.0 * x[0]]),
            &[100.0],
            &[-1.0],
            &[1.0],
            &LbfgsbConfig::default(),
        );
        assert!(result.x[0] >= -1.0 && result.x[0] <= 1.0);
        assert_relative_eq!(result.x[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rosenbrock_constrained() {
        let config = LbfgsbConfig {
            max_iterations: 500,
            ..Default::default()
        };
        let result = minimize(
            |x| {
                let a = 1.0 - x[0];
                let b = x[1] - x[0] * x[0];
                let f = a * a + 100.0 * b * b;
                let g = vec![-2.0 * a - 400.0 * x[0] * b, 200.0 * b];
                (f, g)
            },
            &[-1.2, 1.0],
            &[-2.0, -2.0],
            &[2.0, 2.0],
            &config,
        );

        assert!(!result.failed);
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_non_finite_objective_reports_failure() {
        let result = minimize(
            |_| (f64::NAN, vec![0.0]),
            &[0.5],
            &[0.0],
            &[1.0],
            &LbfgsbConfig::default(),
        );
        assert!(result.failed);
        assert!(!result.message.is_empty());
    }

    #[test]
    fn test_result_always_feasible() {
        let result = minimize(
            |x| ((x[0] + 4.0).powi(2), vec![2.0 * (x[0] + 4.0)]),
            &[0.9],
            &[0.1],
            &[0.9],
            &LbfgsbConfig::default(),
        );
        assert!(result.x[0] >= 0.1 && result.x[0] <= 0.9);
        assert_relative_eq!(result.x[0], 0.1, epsilon = 1e-8);
    }
}
