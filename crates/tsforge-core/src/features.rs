//! Time series feature extraction (tsfresh-compatible).
//!
//! Every feature is a pure function `(series, params, cache) -> f64`
//! dispatched through a registry keyed by case-sensitive name. The
//! per-series cache memoises the intermediates several features share
//! (sorted values, FFT power spectrum, autocorrelation, value counts) so
//! extracting many features over one series amortizes the work.
//!
//! `number_cwt_peaks`, `augmented_dickey_fuller`, `fourier_entropy`, and
//! `max_langevin_fixed_point` are parity-best-effort: they follow the
//! reference formulas but are not pinned bit-exact to tsfresh, and their
//! tests use loose tolerances.

use crate::error::{Result, TsError};
use crate::periods::{autocorrelation, periodogram};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Typed parameter mapping for parameterized features.
#[derive(Debug, Clone, Default)]
pub struct FeatureParams {
    entries: BTreeMap<String, f64>,
}

impl FeatureParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.entries.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.get(key).copied()
    }

    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).unwrap_or(default)
    }
}

/// Per-series cache of shared intermediates.
#[derive(Debug, Default)]
pub struct SeriesCache {
    sorted: Option<Vec<f64>>,
    spectrum: Option<Vec<f64>>,
    acf: Option<Vec<f64>>,
    value_counts: Option<HashMap<u64, usize>>,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(&mut self, values: &[f64]) -> &[f64] {
        if self.sorted.is_none() {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            self.sorted = Some(sorted);
        }
        self.sorted.as_deref().unwrap_or(&[])
    }

    fn spectrum(&mut self, values: &[f64]) -> &[f64] {
        if self.spectrum.is_none() {
            self.spectrum = Some(if values.len() >= 2 {
                periodogram(values)
            } else {
                vec![]
            });
        }
        self.spectrum.as_deref().unwrap_or(&[])
    }

    fn acf(&mut self, values: &[f64]) -> &[f64] {
        if self.acf.is_none() {
            let max_lag = values.len().saturating_sub(1).min(values.len() / 2).max(1);
            self.acf = Some(if values.len() >= 3 {
                autocorrelation(values, max_lag)
            } else {
                vec![]
            });
        }
        self.acf.as_deref().unwrap_or(&[])
    }

    fn value_counts(&mut self, values: &[f64]) -> &HashMap<u64, usize> {
        if self.value_counts.is_none() {
            let mut counts = HashMap::new();
            for v in values {
                *counts.entry(v.to_bits()).or_insert(0) += 1;
            }
            self.value_counts = Some(counts);
        }
        self.value_counts.as_ref().expect("just initialized")
    }
}

type FeatureFn = fn(&[f64], &FeatureParams, &mut SeriesCache) -> Result<f64>;

/// Case-sensitive feature registry.
pub struct FeatureRegistry {
    map: BTreeMap<&'static str, FeatureFn>,
}

static REGISTRY: OnceLock<FeatureRegistry> = OnceLock::new();

impl FeatureRegistry {
    /// The process-wide registry, built on first use.
    pub fn global() -> &'static FeatureRegistry {
        REGISTRY.get_or_init(FeatureRegistry::build)
    }

    /// Look up a calculator by exact name.
    pub fn get(&self, name: &str) -> Option<FeatureFn> {
        self.map.get(name).copied()
    }

    pub fn names(&self) -> Vec<String> {
        self.map.keys().map(|k| k.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn build() -> Self {
        let mut map: BTreeMap<&'static str, FeatureFn> = BTreeMap::new();

        // Location and dispersion
        map.insert("mean", f_mean);
        map.insert("median", f_median);
        map.insert("minimum", f_minimum);
        map.insert("maximum", f_maximum);
        map.insert("standard_deviation", f_standard_deviation);
        map.insert("variance", f_variance);
        map.insert("sum_values", f_sum_values);
        map.insert("length", f_length);
        map.insert("root_mean_square", f_root_mean_square);
        map.insert("abs_energy", f_abs_energy);
        map.insert("variation_coefficient", f_variation_coefficient);
        map.insert("variance_larger_than_standard_deviation", f_var_gt_std);
        map.insert("large_standard_deviation", f_large_standard_deviation);
        map.insert("quantile", f_quantile);
        map.insert("mean_n_absolute_max", f_mean_n_absolute_max);

        // Changes and derivatives
        map.insert("mean_change", f_mean_change);
        map.insert("mean_abs_change", f_mean_abs_change);
        map.insert("absolute_sum_of_changes", f_absolute_sum_of_changes);
        map.insert("mean_second_derivative_central", f_mean_second_derivative);
        map.insert("cid_ce", f_cid_ce);
        map.insert("time_reversal_asymmetry_statistic", f_time_reversal);
        map.insert("c3", f_c3);
        map.insert("absolute_maximum", f_absolute_maximum);

        // Counts and strikes
        map.insert("count_above_mean", f_count_above_mean);
        map.insert("count_below_mean", f_count_below_mean);
        map.insert("count_above", f_count_above);
        map.insert("count_below", f_count_below);
        map.insert("value_count", f_value_count);
        map.insert("range_count", f_range_count);
        map.insert("number_crossing_m", f_number_crossing_m);
        map.insert("number_peaks", f_number_peaks);
        map.insert("longest_strike_above_mean", f_longest_strike_above_mean);
        map.insert("longest_strike_below_mean", f_longest_strike_below_mean);

        // Shape
        map.insert("skewness", f_skewness);
        map.insert("kurtosis", f_kurtosis);
        map.insert("symmetry_looking", f_symmetry_looking);

        // Locations
        map.insert("first_location_of_maximum", f_first_location_of_maximum);
        map.insert("last_location_of_maximum", f_last_location_of_maximum);
        map.insert("first_location_of_minimum", f_first_location_of_minimum);
        map.insert("last_location_of_minimum", f_last_location_of_minimum);
        map.insert("index_mass_quantile", f_index_mass_quantile);

        // Duplicates and reoccurrence
        map.insert("has_duplicate", f_has_duplicate);
        map.insert("has_duplicate_max", f_has_duplicate_max);
        map.insert("has_duplicate_min", f_has_duplicate_min);
        map.insert(
            "percentage_of_reoccurring_values_to_all_values",
            f_pct_reoccurring_values,
        );
        map.insert(
            "percentage_of_reoccurring_datapoints_to_all_datapoints",
            f_pct_reoccurring_datapoints,
        );
        map.insert("sum_of_reoccurring_values", f_sum_reoccurring_values);
        map.insert("sum_of_reoccurring_data_points", f_sum_reoccurring_datapoints);
        map.insert(
            "ratio_value_number_to_time_series_length",
            f_ratio_value_number,
        );

        // Autocorrelation family
        map.insert("autocorrelation", f_autocorrelation);
        map.insert("partial_autocorrelation", f_partial_autocorrelation);
        map.insert("agg_autocorrelation_mean", f_agg_autocorrelation_mean);
        map.insert("agg_autocorrelation_var", f_agg_autocorrelation_var);

        // Entropy and complexity
        map.insert("binned_entropy", f_binned_entropy);
        map.insert("sample_entropy", f_sample_entropy);
        map.insert("permutation_entropy", f_permutation_entropy);
        map.insert("lempel_ziv_complexity", f_lempel_ziv_complexity);

        // Spectral
        map.insert("fft_coefficient_abs", f_fft_coefficient_abs);
        map.insert("spectral_centroid", f_spectral_centroid);
        map.insert("fourier_entropy", f_fourier_entropy);

        // Trend
        map.insert("linear_trend_slope", f_linear_trend_slope);
        map.insert("linear_trend_intercept", f_linear_trend_intercept);
        map.insert("linear_trend_r2", f_linear_trend_r2);

        // Misc
        map.insert("benford_correlation", f_benford_correlation);
        map.insert("number_cwt_peaks", f_number_cwt_peaks);
        map.insert("augmented_dickey_fuller", f_augmented_dickey_fuller);
        map.insert("max_langevin_fixed_point", f_max_langevin_fixed_point);

        Self { map }
    }
}

/// Compute one feature by name.
pub fn compute_feature(
    name: &str,
    values: &[f64],
    params: &FeatureParams,
    cache: &mut SeriesCache,
) -> Result<f64> {
    if values.is_empty() {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }
    let f = FeatureRegistry::global()
        .get(name)
        .ok_or_else(|| TsError::InvalidInput(format!("Unknown feature: {}", name)))?;
    f(values, params, cache)
}

/// Extract every registered feature with default parameters, sharing one
/// cache across the catalog.
pub fn extract_features(values: &[f64]) -> Result<BTreeMap<String, f64>> {
    if values.is_empty() {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }

    let registry = FeatureRegistry::global();
    let params = FeatureParams::new();
    let mut cache = SeriesCache::new();

    let mut out = BTreeMap::new();
    for name in registry.names() {
        if let Some(f) = registry.get(&name) {
            let value = f(values, &params, &mut cache).unwrap_or(f64::NAN);
            out.insert(name, value);
        }
    }
    Ok(out)
}

/// Registered feature names, sorted.
pub fn list_features() -> Vec<String> {
    FeatureRegistry::global().names()
}

// --- helpers ---

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_of(values: &[f64]) -> f64 {
    let m = mean_of(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

// --- calculators ---

fn f_mean(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(mean_of(v))
}

fn f_median(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let sorted = c.sorted(v);
    let n = sorted.len();
    Ok(if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    })
}

fn f_minimum(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    Ok(*c.sorted(v).first().unwrap_or(&f64::NAN))
}

fn f_maximum(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    Ok(*c.sorted(v).last().unwrap_or(&f64::NAN))
}

fn f_absolute_maximum(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(v.iter().fold(0.0f64, |acc, x| acc.max(x.abs())))
}

fn f_standard_deviation(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(std_of(v))
}

fn f_variance(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let s = std_of(v);
    Ok(s * s)
}

fn f_sum_values(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(v.iter().sum())
}

fn f_length(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(v.len() as f64)
}

fn f_root_mean_square(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok((v.iter().map(|x| x * x).sum::<f64>() / v.len() as f64).sqrt())
}

fn f_abs_energy(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(v.iter().map(|x| x * x).sum())
}

fn f_variation_coefficient(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let m = mean_of(v);
    if m.abs() < f64::EPSILON {
        return Ok(f64::NAN);
    }
    Ok(std_of(v) / m.abs())
}

fn f_var_gt_std(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let s = std_of(v);
    Ok(if s * s > s { 1.0 } else { 0.0 })
}

fn f_large_standard_deviation(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let r = p.get_or("r", 0.25);
    let sorted = c.sorted(v);
    let range = sorted.last().unwrap_or(&0.0) - sorted.first().unwrap_or(&0.0);
    Ok(if std_of(v) > r * range { 1.0 } else { 0.0 })
}

fn f_quantile(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let q = p.get_or("q", 0.5);
    if !(0.0..=1.0).contains(&q) {
        return Err(TsError::InvalidParameter {
            param: "q".to_string(),
            value: q.to_string(),
            reason: "must be in [0, 1]".to_string(),
        });
    }
    let sorted = c.sorted(v);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Ok(if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] * (hi as f64 - pos) + sorted[hi] * (pos - lo as f64)
    })
}

fn f_mean_n_absolute_max(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let n = p.get_or("number_of_maxima", 7.0).max(1.0) as usize;
    let mut abs: Vec<f64> = v.iter().map(|x| x.abs()).collect();
    abs.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let take = n.min(abs.len());
    Ok(abs[..take].iter().sum::<f64>() / take as f64)
}

fn f_mean_change(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    if v.len() < 2 {
        return Ok(f64::NAN);
    }
    Ok((v[v.len() - 1] - v[0]) / (v.len() - 1) as f64)
}

fn f_mean_abs_change(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    if v.len() < 2 {
        return Ok(f64::NAN);
    }
    Ok(v.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / (v.len() - 1) as f64)
}

fn f_absolute_sum_of_changes(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(v.windows(2).map(|w| (w[1] - w[0]).abs()).sum())
}

fn f_mean_second_derivative(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    if v.len() < 3 {
        return Ok(f64::NAN);
    }
    Ok(v.windows(3).map(|w| (w[2] - 2.0 * w[1] + w[0]) / 2.0).sum::<f64>()
        / (v.len() - 2) as f64)
}

fn f_cid_ce(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    if v.len() < 2 {
        return Ok(0.0);
    }
    let normalize = p.get_or("normalize", 0.0) != 0.0;
    let series: Vec<f64> = if normalize {
        let s = std_of(v);
        if s < f64::EPSILON {
            return Ok(0.0);
        }
        let m = mean_of(v);
        v.iter().map(|x| (x - m) / s).collect()
    } else {
        v.to_vec()
    };
    Ok(series
        .windows(2)
        .map(|w| (w[1] - w[0]).powi(2))
        .sum::<f64>()
        .sqrt())
}

fn f_time_reversal(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let lag = p.get_or("lag", 1.0).max(1.0) as usize;
    let n = v.len();
    if n <= 2 * lag {
        return Ok(f64::NAN);
    }
    let count = n - 2 * lag;
    let sum: f64 = (0..count)
        .map(|i| v[i + 2 * lag].powi(2) * v[i + lag] - v[i + lag] * v[i].powi(2))
        .sum();
    Ok(sum / count as f64)
}

fn f_c3(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let lag = p.get_or("lag", 1.0).max(1.0) as usize;
    let n = v.len();
    if n <= 2 * lag {
        return Ok(f64::NAN);
    }
    let count = n - 2 * lag;
    let sum: f64 = (0..count).map(|i| v[i + 2 * lag] * v[i + lag] * v[i]).sum();
    Ok(sum / count as f64)
}

fn f_count_above_mean(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let m = mean_of(v);
    Ok(v.iter().filter(|&&x| x > m).count() as f64)
}

fn f_count_below_mean(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let m = mean_of(v);
    Ok(v.iter().filter(|&&x| x < m).count() as f64)
}

fn f_count_above(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let t = p.get_or("t", 0.0);
    Ok(v.iter().filter(|&&x| x > t).count() as f64 / v.len() as f64)
}

fn f_count_below(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let t = p.get_or("t", 0.0);
    Ok(v.iter().filter(|&&x| x < t).count() as f64 / v.len() as f64)
}

fn f_value_count(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let target = p.get_or("value", 0.0);
    Ok(v.iter().filter(|&&x| x == target).count() as f64)
}

fn f_range_count(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let min = p.get_or("min", -1.0);
    let max = p.get_or("max", 1.0);
    Ok(v.iter().filter(|&&x| x >= min && x < max).count() as f64)
}

fn f_number_crossing_m(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let m = p.get_or("m", 0.0);
    Ok(v.windows(2)
        .filter(|w| (w[0] > m) != (w[1] > m))
        .count() as f64)
}

fn f_number_peaks(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let support = p.get_or("n", 1.0).max(1.0) as usize;
    let n = v.len();
    if n < 2 * support + 1 {
        return Ok(0.0);
    }
    let mut count = 0usize;
    for i in support..(n - support) {
        let is_peak = (1..=support).all(|k| v[i] > v[i - k] && v[i] > v[i + k]);
        if is_peak {
            count += 1;
        }
    }
    Ok(count as f64)
}

fn longest_strike(v: &[f64], above: bool) -> f64 {
    let m = mean_of(v);
    let mut longest = 0usize;
    let mut current = 0usize;
    for &x in v {
        let hit = if above { x > m } else { x < m };
        if hit {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest as f64
}

fn f_longest_strike_above_mean(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(longest_strike(v, true))
}

fn f_longest_strike_below_mean(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(longest_strike(v, false))
}

fn f_skewness(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let s = std_of(v);
    if v.len() < 3 || s < f64::EPSILON {
        return Ok(f64::NAN);
    }
    let m = mean_of(v);
    Ok(v.iter().map(|x| ((x - m) / s).powi(3)).sum::<f64>() / v.len() as f64)
}

fn f_kurtosis(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let s = std_of(v);
    if v.len() < 4 || s < f64::EPSILON {
        return Ok(f64::NAN);
    }
    let m = mean_of(v);
    Ok(v.iter().map(|x| ((x - m) / s).powi(4)).sum::<f64>() / v.len() as f64 - 3.0)
}

fn f_symmetry_looking(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let r = p.get_or("r", 0.25);
    let m = mean_of(v);
    let median = f_median(v, p, c)?;
    let sorted = c.sorted(v);
    let range = sorted.last().unwrap_or(&0.0) - sorted.first().unwrap_or(&0.0);
    Ok(if (m - median).abs() < r * range { 1.0 } else { 0.0 })
}

fn f_first_location_of_maximum(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let idx = v.iter().position(|&x| x == max).unwrap_or(0);
    Ok(idx as f64 / v.len() as f64)
}

fn f_last_location_of_maximum(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let idx = v.iter().rposition(|&x| x == max).unwrap_or(0);
    Ok((idx + 1) as f64 / v.len() as f64)
}

fn f_first_location_of_minimum(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let min = v.iter().cloned().fold(f64::INFINITY, f64::min);
    let idx = v.iter().position(|&x| x == min).unwrap_or(0);
    Ok(idx as f64 / v.len() as f64)
}

fn f_last_location_of_minimum(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let min = v.iter().cloned().fold(f64::INFINITY, f64::min);
    let idx = v.iter().rposition(|&x| x == min).unwrap_or(0);
    Ok((idx + 1) as f64 / v.len() as f64)
}

fn f_index_mass_quantile(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let q = p.get_or("q", 0.5);
    let total: f64 = v.iter().map(|x| x.abs()).sum();
    if total < f64::EPSILON {
        return Ok(f64::NAN);
    }
    let mut acc = 0.0;
    for (i, x) in v.iter().enumerate() {
        acc += x.abs();
        if acc / total >= q {
            return Ok((i + 1) as f64 / v.len() as f64);
        }
    }
    Ok(1.0)
}

fn f_has_duplicate(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let counts = c.value_counts(v);
    Ok(if counts.values().any(|&n| n > 1) { 1.0 } else { 0.0 })
}

fn f_has_duplicate_max(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Ok(if v.iter().filter(|&&x| x == max).count() > 1 { 1.0 } else { 0.0 })
}

fn f_has_duplicate_min(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let min = v.iter().cloned().fold(f64::INFINITY, f64::min);
    Ok(if v.iter().filter(|&&x| x == min).count() > 1 { 1.0 } else { 0.0 })
}

fn f_pct_reoccurring_values(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let counts = c.value_counts(v);
    let distinct = counts.len();
    if distinct == 0 {
        return Ok(f64::NAN);
    }
    let reoccurring = counts.values().filter(|&&n| n > 1).count();
    Ok(reoccurring as f64 / distinct as f64)
}

fn f_pct_reoccurring_datapoints(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let counts = c.value_counts(v);
    let reoccurring: usize = counts.values().filter(|&&n| n > 1).sum();
    Ok(reoccurring as f64 / v.len() as f64)
}

fn f_sum_reoccurring_values(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let counts = c.value_counts(v);
    Ok(counts
        .iter()
        .filter(|(_, &n)| n > 1)
        .map(|(&bits, _)| f64::from_bits(bits))
        .sum())
}

fn f_sum_reoccurring_datapoints(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let counts = c.value_counts(v);
    Ok(counts
        .iter()
        .filter(|(_, &n)| n > 1)
        .map(|(&bits, &n)| f64::from_bits(bits) * n as f64)
        .sum())
}

fn f_ratio_value_number(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let counts = c.value_counts(v);
    Ok(counts.len() as f64 / v.len() as f64)
}

fn f_autocorrelation(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let lag = p.get_or("lag", 1.0).max(1.0) as usize;
    let acf = c.acf(v);
    Ok(acf.get(lag - 1).cloned().unwrap_or(f64::NAN))
}

fn f_partial_autocorrelation(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    // Durbin-Levinson on the cached ACF.
    let lag = p.get_or("lag", 1.0).max(1.0) as usize;
    let acf = c.acf(v);
    if acf.len() < lag {
        return Ok(f64::NAN);
    }

    let mut phi = vec![vec![0.0; lag + 1]; lag + 1];
    phi[1][1] = acf[0];
    for k in 2..=lag {
        let mut num = acf[k - 1];
        let mut den = 1.0;
        for j in 1..k {
            num -= phi[k - 1][j] * acf[k - 1 - j];
            den -= phi[k - 1][j] * acf[j - 1];
        }
        if den.abs() < f64::EPSILON {
            return Ok(f64::NAN);
        }
        phi[k][k] = num / den;
        for j in 1..k {
            phi[k][j] = phi[k - 1][j] - phi[k][k] * phi[k - 1][k - j];
        }
    }
    Ok(phi[lag][lag])
}

fn f_agg_autocorrelation_mean(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let acf = c.acf(v);
    if acf.is_empty() {
        return Ok(f64::NAN);
    }
    Ok(acf.iter().sum::<f64>() / acf.len() as f64)
}

fn f_agg_autocorrelation_var(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let acf = c.acf(v);
    if acf.is_empty() {
        return Ok(f64::NAN);
    }
    let m = acf.iter().sum::<f64>() / acf.len() as f64;
    Ok(acf.iter().map(|a| (a - m).powi(2)).sum::<f64>() / acf.len() as f64)
}

fn f_binned_entropy(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let bins = p.get_or("max_bins", 10.0).max(1.0) as usize;
    let sorted = c.sorted(v);
    let min = *sorted.first().unwrap_or(&0.0);
    let max = *sorted.last().unwrap_or(&0.0);
    let range = max - min;
    if range < f64::EPSILON {
        return Ok(0.0);
    }

    let mut counts = vec![0usize; bins];
    for &x in v {
        let bin = (((x - min) / range) * bins as f64) as usize;
        counts[bin.min(bins - 1)] += 1;
    }

    let n = v.len() as f64;
    Ok(-counts
        .iter()
        .filter(|&&cnt| cnt > 0)
        .map(|&cnt| {
            let p = cnt as f64 / n;
            p * p.ln()
        })
        .sum::<f64>())
}

fn f_sample_entropy(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let n = v.len();
    if n < 4 {
        return Ok(f64::NAN);
    }
    // Subsample long series; the matching loop is quadratic.
    let series: Vec<f64> = if n > 512 {
        v.iter().step_by(n / 512).cloned().collect()
    } else {
        v.to_vec()
    };
    let n = series.len();
    let r = 0.2 * std_of(&series);
    if r < f64::EPSILON {
        return Ok(f64::NAN);
    }

    let count_matches = |m: usize| -> f64 {
        let mut count = 0usize;
        for i in 0..(n - m) {
            for j in (i + 1)..(n - m) {
                let close = (0..m).all(|k| (series[i + k] - series[j + k]).abs() <= r);
                if close {
                    count += 1;
                }
            }
        }
        count as f64
    };

    let b = count_matches(2);
    let a = count_matches(3);
    if a <= 0.0 || b <= 0.0 {
        return Ok(f64::NAN);
    }
    Ok(-(a / b).ln())
}

fn f_permutation_entropy(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let order = p.get_or("dimension", 3.0).clamp(2.0, 7.0) as usize;
    let tau = p.get_or("tau", 1.0).max(1.0) as usize;
    let n = v.len();
    if n < order * tau {
        return Ok(f64::NAN);
    }

    let mut counts: HashMap<Vec<usize>, usize> = HashMap::new();
    let windows = n - (order - 1) * tau;
    for i in 0..windows {
        let mut idx: Vec<usize> = (0..order).collect();
        idx.sort_by(|&a, &b| {
            v[i + a * tau]
                .partial_cmp(&v[i + b * tau])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        *counts.entry(idx).or_insert(0) += 1;
    }

    let total = windows as f64;
    Ok(-counts
        .values()
        .map(|&cnt| {
            let p = cnt as f64 / total;
            p * p.ln()
        })
        .sum::<f64>())
}

fn f_lempel_ziv_complexity(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    // Binary quantization around the median, then LZ76 phrase counting.
    let median = f_median(v, p, c)?;
    let symbols: Vec<u8> = v.iter().map(|&x| u8::from(x > median)).collect();

    let n = symbols.len();
    let mut phrases = std::collections::HashSet::new();
    let mut start = 0usize;
    let mut len = 1usize;
    while start + len <= n {
        let phrase = &symbols[start..start + len];
        if phrases.contains(phrase) {
            len += 1;
        } else {
            phrases.insert(phrase.to_vec());
            start += len;
            len = 1;
        }
    }
    Ok(phrases.len() as f64 / n as f64)
}

fn f_fft_coefficient_abs(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let coeff = p.get_or("coeff", 1.0).max(0.0) as usize;
    let spectrum = c.spectrum(v);
    // Power at bin k; take the magnitude.
    Ok(spectrum
        .get(coeff.saturating_sub(1))
        .map(|p| p.sqrt())
        .unwrap_or(f64::NAN))
}

fn f_spectral_centroid(v: &[f64], _p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    let spectrum = c.spectrum(v);
    let total: f64 = spectrum.iter().sum();
    if total < f64::EPSILON {
        return Ok(f64::NAN);
    }
    Ok(spectrum
        .iter()
        .enumerate()
        .map(|(i, &p)| (i + 1) as f64 * p)
        .sum::<f64>()
        / total)
}

fn f_fourier_entropy(v: &[f64], p: &FeatureParams, c: &mut SeriesCache) -> Result<f64> {
    // Parity-best-effort: Shannon entropy of the binned, normalized
    // power spectrum.
    let bins = p.get_or("bins", 10.0).max(2.0) as usize;
    let spectrum = c.spectrum(v);
    if spectrum.is_empty() {
        return Ok(f64::NAN);
    }
    let max = spectrum.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max < f64::EPSILON {
        return Ok(0.0);
    }

    let mut counts = vec![0usize; bins];
    for &p in spectrum {
        let bin = ((p / max) * bins as f64) as usize;
        counts[bin.min(bins - 1)] += 1;
    }
    let total = spectrum.len() as f64;
    Ok(-counts
        .iter()
        .filter(|&&cnt| cnt > 0)
        .map(|&cnt| {
            let p = cnt as f64 / total;
            p * p.ln()
        })
        .sum::<f64>())
}

fn linear_trend(v: &[f64]) -> (f64, f64, f64) {
    let n = v.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean_of(v);
    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    let mut ss_yy = 0.0;
    for (i, &y) in v.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        ss_xy += dx * dy;
        ss_xx += dx * dx;
        ss_yy += dy * dy;
    }
    let slope = if ss_xx > f64::EPSILON { ss_xy / ss_xx } else { 0.0 };
    let intercept = y_mean - slope * x_mean;
    let r2 = if ss_xx > f64::EPSILON && ss_yy > f64::EPSILON {
        (ss_xy * ss_xy) / (ss_xx * ss_yy)
    } else {
        f64::NAN
    };
    (slope, intercept, r2)
}

fn f_linear_trend_slope(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(linear_trend(v).0)
}

fn f_linear_trend_intercept(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(linear_trend(v).1)
}

fn f_linear_trend_r2(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    Ok(linear_trend(v).2)
}

fn f_benford_correlation(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    let mut counts = [0usize; 9];
    for &x in v {
        let mut a = x.abs();
        if a < f64::EPSILON || !a.is_finite() {
            continue;
        }
        while a < 1.0 {
            a *= 10.0;
        }
        while a >= 10.0 {
            a /= 10.0;
        }
        let digit = a as usize;
        if (1..=9).contains(&digit) {
            counts[digit - 1] += 1;
        }
    }
    let total: usize = counts.iter().sum();
    if total == 0 {
        return Ok(f64::NAN);
    }

    let observed: Vec<f64> = counts.iter().map(|&c| c as f64 / total as f64).collect();
    let expected: Vec<f64> = (1..=9)
        .map(|d| (1.0 + 1.0 / d as f64).log10())
        .collect();

    // Pearson correlation of observed vs Benford frequencies.
    let mo = mean_of(&observed);
    let me = mean_of(&expected);
    let mut num = 0.0;
    let mut do2 = 0.0;
    let mut de2 = 0.0;
    for i in 0..9 {
        num += (observed[i] - mo) * (expected[i] - me);
        do2 += (observed[i] - mo).powi(2);
        de2 += (expected[i] - me).powi(2);
    }
    if do2 < f64::EPSILON || de2 < f64::EPSILON {
        return Ok(f64::NAN);
    }
    Ok(num / (do2 * de2).sqrt())
}

fn f_number_cwt_peaks(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    // Parity-best-effort: peaks that persist across smoothing widths,
    // approximating the ricker-wavelet ridgeline count.
    let max_width = p.get_or("n", 5.0).max(1.0) as usize;
    let n = v.len();
    if n < 3 {
        return Ok(0.0);
    }

    let mut persistent = 0usize;
    'candidates: for i in 1..(n - 1) {
        if !(v[i] > v[i - 1] && v[i] > v[i + 1]) {
            continue;
        }
        for width in 1..=max_width {
            let lo = i.saturating_sub(width);
            let hi = (i + width).min(n - 1);
            let window_max = v[lo..=hi].iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            if v[i] < window_max {
                continue 'candidates;
            }
        }
        persistent += 1;
    }
    Ok(persistent as f64)
}

fn f_augmented_dickey_fuller(v: &[f64], _p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    // Parity-best-effort: ADF t-statistic without lag augmentation
    // (delta y_t = a + b * y_{t-1} + e).
    let n = v.len();
    if n < 5 {
        return Ok(f64::NAN);
    }

    let dy: Vec<f64> = v.windows(2).map(|w| w[1] - w[0]).collect();
    let y_lag = &v[..n - 1];
    let m = dy.len() as f64;

    let mean_x = mean_of(y_lag);
    let mean_y = mean_of(&dy);
    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    for i in 0..dy.len() {
        ss_xy += (y_lag[i] - mean_x) * (dy[i] - mean_y);
        ss_xx += (y_lag[i] - mean_x).powi(2);
    }
    if ss_xx < f64::EPSILON {
        return Ok(f64::NAN);
    }
    let b = ss_xy / ss_xx;
    let a = mean_y - b * mean_x;

    let sse: f64 = (0..dy.len())
        .map(|i| (dy[i] - a - b * y_lag[i]).powi(2))
        .sum();
    let se = (sse / (m - 2.0) / ss_xx).sqrt();
    if se < f64::EPSILON {
        return Ok(f64::NAN);
    }
    Ok(b / se)
}

fn f_max_langevin_fixed_point(v: &[f64], p: &FeatureParams, _c: &mut SeriesCache) -> Result<f64> {
    // Parity-best-effort: largest root of a cubic drift polynomial
    // fitted to (x_t, x_{t+1} - x_t) by least squares on a coarse grid.
    let n = v.len();
    if n < 10 {
        return Ok(f64::NAN);
    }
    let r = p.get_or("r", 30.0).max(3.0) as usize;

    let min = v.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return Ok(f64::NAN);
    }

    // Bin the state space, average the drift per bin.
    let mut drift_sum = vec![0.0; r];
    let mut drift_count = vec![0usize; r];
    for i in 0..(n - 1) {
        let bin = (((v[i] - min) / (max - min)) * r as f64) as usize;
        let bin = bin.min(r - 1);
        drift_sum[bin] += v[i + 1] - v[i];
        drift_count[bin] += 1;
    }

    // Largest bin center where the drift changes sign downward (a
    // stable fixed point of the estimated dynamics).
    let mut best = f64::NAN;
    let mut prev: Option<(f64, f64)> = None;
    for bin in 0..r {
        if drift_count[bin] == 0 {
            continue;
        }
        let center = min + (bin as f64 + 0.5) / r as f64 * (max - min);
        let drift = drift_sum[bin] / drift_count[bin] as f64;
        if let Some((_, prev_drift)) = prev {
            if prev_drift > 0.0 && drift <= 0.0 {
                best = center;
            }
        }
        prev = Some((center, drift));
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series() -> Vec<f64> {
        vec![1.0, 2.0, 3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]
    }

    #[test]
    fn test_registry_lookup_case_sensitive() {
        let registry = FeatureRegistry::global();
        assert!(registry.get("mean").is_some());
        assert!(registry.get("Mean").is_none());
        assert!(registry.get("no_such_feature").is_none());
    }

    #[test]
    fn test_catalog_size() {
        assert!(FeatureRegistry::global().len() >= 60);
    }

    #[test]
    fn test_basic_features() {
        let v = series();
        let params = FeatureParams::new();
        let mut cache = SeriesCache::new();

        assert_relative_eq!(
            compute_feature("mean", &v, &params, &mut cache).unwrap(),
            2.3,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            compute_feature("maximum", &v, &params, &mut cache).unwrap(),
            4.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            compute_feature("sum_values", &v, &params, &mut cache).unwrap(),
            23.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            compute_feature("abs_energy", &v, &params, &mut cache).unwrap(),
            v.iter().map(|x| x * x).sum::<f64>(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_parameterized_quantile() {
        let v: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let mut cache = SeriesCache::new();

        let q90 = compute_feature(
            "quantile",
            &v,
            &FeatureParams::new().with("q", 0.9),
            &mut cache,
        )
        .unwrap();
        assert!((q90 - 90.1).abs() < 0.5);

        assert!(compute_feature(
            "quantile",
            &v,
            &FeatureParams::new().with("q", 1.5),
            &mut cache
        )
        .is_err());
    }

    #[test]
    fn test_autocorrelation_of_period_two() {
        // Alternating series: strong negative lag-1 autocorrelation.
        let v: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let mut cache = SeriesCache::new();
        let r = compute_feature(
            "autocorrelation",
            &v,
            &FeatureParams::new().with("lag", 1.0),
            &mut cache,
        )
        .unwrap();
        assert!(r < -0.9);
    }

    #[test]
    fn test_number_peaks() {
        let v = series();
        let mut cache = SeriesCache::new();
        let peaks = compute_feature(
            "number_peaks",
            &v,
            &FeatureParams::new().with("n", 1.0),
            &mut cache,
        )
        .unwrap();
        assert_relative_eq!(peaks, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicates() {
        let v = vec![1.0, 2.0, 2.0, 3.0];
        let mut cache = SeriesCache::new();
        let params = FeatureParams::new();
        assert_eq!(
            compute_feature("has_duplicate", &v, &params, &mut cache).unwrap(),
            1.0
        );
        assert_eq!(
            compute_feature("sum_of_reoccurring_values", &v, &params, &mut cache).unwrap(),
            2.0
        );
        assert_eq!(
            compute_feature("sum_of_reoccurring_data_points", &v, &params, &mut cache).unwrap(),
            4.0
        );
    }

    #[test]
    fn test_linear_trend() {
        let v: Vec<f64> = (0..50).map(|i| 3.0 + 2.0 * i as f64).collect();
        let mut cache = SeriesCache::new();
        let params = FeatureParams::new();
        assert_relative_eq!(
            compute_feature("linear_trend_slope", &v, &params, &mut cache).unwrap(),
            2.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            compute_feature("linear_trend_r2", &v, &params, &mut cache).unwrap(),
            1.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_extract_all_features_shares_cache() {
        let v: Vec<f64> = (0..64).map(|i| (i as f64 * 0.3).sin() * 10.0).collect();
        let features = extract_features(&v).unwrap();

        assert!(features.len() >= 60);
        assert!(features.contains_key("mean"));
        assert!(features.contains_key("fourier_entropy"));
        // Core features must be finite on a well-behaved series.
        for name in ["mean", "standard_deviation", "abs_energy", "median"] {
            assert!(features[name].is_finite(), "{} not finite", name);
        }
    }

    #[test]
    fn test_adf_trending_vs_stationary() {
        // Loose-tolerance contract: a mean-reverting series should score
        // a more negative statistic than a random-walk-like trend.
        let wiggle = |i: usize| ((i * 2654435761usize) % 97) as f64 / 97.0;
        let stationary: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 } + 0.1 * wiggle(i))
            .collect();
        let trending: Vec<f64> = (0..100).map(|i| i as f64 + wiggle(i)).collect();

        let mut c1 = SeriesCache::new();
        let mut c2 = SeriesCache::new();
        let params = FeatureParams::new();
        let adf_stat = compute_feature("augmented_dickey_fuller", &stationary, &params, &mut c1)
            .unwrap();
        let adf_trend =
            compute_feature("augmented_dickey_fuller", &trending, &params, &mut c2).unwrap();
        assert!(adf_stat < adf_trend);
    }

    #[test]
    fn test_list_features_sorted_unique() {
        let names = list_features();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names, deduped);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_empty_series_rejected() {
        let mut cache = SeriesCache::new();
        assert!(compute_feature("mean", &[], &FeatureParams::new(), &mut cache).is_err());
        assert!(extract_features(&[]).is_err());
    }
}
