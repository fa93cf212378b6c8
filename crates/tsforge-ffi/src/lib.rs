//! FFI boundary layer for the tsforge DuckDB extension.
//!
//! C-compatible functions called from the C++ extension wrapper. All
//! entry points catch panics, translate errors into the `TsForgeError`
//! buffer, and hand back malloc-owned outputs the host frees through
//! the `tsforge_free_*` functions.

pub mod allocation;
pub mod conversion;
pub mod error_handling;
pub mod telemetry;
pub mod types;

use core::ffi::{c_char, c_double, c_int};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use allocation::{
    copy_string_to_buffer, free_array, free_c_string, free_c_string_array, options_to_c_arrays,
    string_to_c, strings_to_c_array, vec_to_c_double_array, vec_to_c_int_array,
};
use conversion::{buffer_to_string, c_str_to_str, to_option_f64_nonnegative, to_option_usize};
use error_handling::{check_null_pointers, ffi_try, init_error, set_error};
use types::*;

use tsforge_core::aggregate::{AggregateParams, AggregateState};
use tsforge_core::backtest::{backtest, generate_folds, CvConfig, WindowStrategy};
use tsforge_core::forecast::{forecast, list_models, ForecastOptions as CoreForecastOptions, ModelType};
use tsforge_core::params::ParamMap;
use tsforge_core::partition::{
    CancelToken, FinalizePoll, GroupRow, GroupTransform, GroupedOperator, InputRow, WorkerState,
};
use tsforge_core::periods::PeriodMethod;
use tsforge_core::{TsError, Result as CoreResult};

#[allow(non_camel_case_types)]
type size_t = usize;

// ============================================================================
// Helper Functions
// ============================================================================

/// Build a series with NULL handling from raw pointers.
unsafe fn build_series(
    data: *const c_double,
    validity: *const u64,
    length: size_t,
) -> Vec<Option<f64>> {
    let data_slice = std::slice::from_raw_parts(data, length);

    if validity.is_null() {
        data_slice.iter().map(|&v| Some(v)).collect()
    } else {
        let validity_len = length.div_ceil(64);
        let validity_slice = std::slice::from_raw_parts(validity, validity_len);

        (0..length)
            .map(|i| {
                let word = validity_slice[i / 64];
                if (word >> (i % 64)) & 1 == 1 {
                    Some(data_slice[i])
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Dense values with NULLs dropped.
unsafe fn build_dense(data: *const c_double, validity: *const u64, length: size_t) -> Vec<f64> {
    build_series(data, validity, length)
        .into_iter()
        .flatten()
        .collect()
}

// ============================================================================
// Statistics
// ============================================================================

/// Compute time series statistics.
///
/// # Safety
/// All pointer arguments must be valid; arrays must have the stated
/// lengths.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_stats(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    out_result: *mut TsStatsResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[values as *const _, out_result as *const _]) {
        return false;
    }

    if length == 0 {
        *out_result = TsStatsResult::default();
        init_error(out_error);
        return true;
    }

    match ffi_try(out_error, || {
        let series = build_series(values, validity, length);
        tsforge_core::compute_ts_stats(&series)
    }) {
        Some(stats) => {
            *out_result = stats.into();
            true
        }
        None => false,
    }
}

// ============================================================================
// Metrics
// ============================================================================

unsafe fn impl_metric_2arg<F>(
    actual: *const c_double,
    actual_len: size_t,
    forecast: *const c_double,
    forecast_len: size_t,
    out_result: *mut c_double,
    out_error: *mut TsForgeError,
    core_fn: F,
) -> bool
where
    F: FnOnce(&[f64], &[f64]) -> CoreResult<f64>,
{
    if check_null_pointers(
        out_error,
        &[actual as *const _, forecast as *const _, out_result as *const _],
    ) {
        return false;
    }

    match ffi_try(out_error, || {
        let actual = std::slice::from_raw_parts(actual, actual_len);
        let forecast = std::slice::from_raw_parts(forecast, forecast_len);
        core_fn(actual, forecast)
    }) {
        Some(value) => {
            *out_result = value;
            true
        }
        None => false,
    }
}

unsafe fn impl_metric_3arg<F>(
    actual: *const c_double,
    actual_len: size_t,
    second: *const c_double,
    second_len: size_t,
    third: *const c_double,
    third_len: size_t,
    out_result: *mut c_double,
    out_error: *mut TsForgeError,
    core_fn: F,
) -> bool
where
    F: FnOnce(&[f64], &[f64], &[f64]) -> CoreResult<f64>,
{
    if check_null_pointers(
        out_error,
        &[
            actual as *const _,
            second as *const _,
            third as *const _,
            out_result as *const _,
        ],
    ) {
        return false;
    }

    match ffi_try(out_error, || {
        let actual = std::slice::from_raw_parts(actual, actual_len);
        let second = std::slice::from_raw_parts(second, second_len);
        let third = std::slice::from_raw_parts(third, third_len);
        core_fn(actual, second, third)
    }) {
        Some(value) => {
            *out_result = value;
            true
        }
        None => false,
    }
}

macro_rules! metric_2arg {
    ($ffi_name:ident, $core_fn:path, $doc:literal) => {
        #[doc = $doc]
        ///
        /// # Safety
        /// All pointer arguments must be valid; arrays must have the
        /// stated lengths.
        #[no_mangle]
        pub unsafe extern "C" fn $ffi_name(
            actual: *const c_double,
            actual_len: size_t,
            forecast: *const c_double,
            forecast_len: size_t,
            out_result: *mut c_double,
            out_error: *mut TsForgeError,
        ) -> bool {
            impl_metric_2arg(
                actual, actual_len, forecast, forecast_len, out_result, out_error, $core_fn,
            )
        }
    };
}

metric_2arg!(tsforge_ts_mae, tsforge_core::mae, "Mean Absolute Error");
metric_2arg!(tsforge_ts_mse, tsforge_core::mse, "Mean Squared Error");
metric_2arg!(tsforge_ts_rmse, tsforge_core::rmse, "Root Mean Squared Error");
metric_2arg!(tsforge_ts_mape, tsforge_core::mape, "Mean Absolute Percentage Error");
metric_2arg!(tsforge_ts_smape, tsforge_core::smape, "Symmetric Mean Absolute Percentage Error");
metric_2arg!(tsforge_ts_r2, tsforge_core::r2, "R-squared");
metric_2arg!(tsforge_ts_bias, tsforge_core::bias, "Forecast bias (mean error)");

/// Mean Absolute Scaled Error (explicit baseline).
///
/// # Safety
/// All pointer arguments must be valid; arrays must have the stated
/// lengths.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_mase(
    actual: *const c_double,
    actual_len: size_t,
    forecast: *const c_double,
    forecast_len: size_t,
    baseline: *const c_double,
    baseline_len: size_t,
    out_result: *mut c_double,
    out_error: *mut TsForgeError,
) -> bool {
    impl_metric_3arg(
        actual,
        actual_len,
        forecast,
        forecast_len,
        baseline,
        baseline_len,
        out_result,
        out_error,
        tsforge_core::mase,
    )
}

/// Relative Mean Absolute Error of two competing predictions.
///
/// # Safety
/// All pointer arguments must be valid; arrays must have the stated
/// lengths.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_rmae(
    actual: *const c_double,
    actual_len: size_t,
    pred1: *const c_double,
    pred1_len: size_t,
    pred2: *const c_double,
    pred2_len: size_t,
    out_result: *mut c_double,
    out_error: *mut TsForgeError,
) -> bool {
    impl_metric_3arg(
        actual, actual_len, pred1, pred1_len, pred2, pred2_len, out_result, out_error,
        tsforge_core::rmae,
    )
}

/// Quantile (pinball) loss at a given quantile level.
///
/// # Safety
/// All pointer arguments must be valid; arrays must have the stated
/// lengths.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_quantile_loss(
    actual: *const c_double,
    actual_len: size_t,
    forecast: *const c_double,
    forecast_len: size_t,
    quantile: c_double,
    out_result: *mut c_double,
    out_error: *mut TsForgeError,
) -> bool {
    impl_metric_2arg(
        actual,
        actual_len,
        forecast,
        forecast_len,
        out_result,
        out_error,
        |a, f| tsforge_core::quantile_loss(a, f, quantile),
    )
}

/// Mean quantile loss over a row-major matrix of quantile forecasts
/// (`n_quantiles` rows of `actual_len` values each).
///
/// # Safety
/// All pointer arguments must be valid; arrays must have the stated
/// lengths.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_mqloss(
    actual: *const c_double,
    actual_len: size_t,
    forecasts: *const c_double,
    quantiles: *const c_double,
    n_quantiles: size_t,
    out_result: *mut c_double,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(
        out_error,
        &[
            actual as *const _,
            forecasts as *const _,
            quantiles as *const _,
            out_result as *const _,
        ],
    ) {
        return false;
    }

    match ffi_try(out_error, || {
        let actual = std::slice::from_raw_parts(actual, actual_len);
        let flat = std::slice::from_raw_parts(forecasts, n_quantiles * actual_len);
        let q = std::slice::from_raw_parts(quantiles, n_quantiles);
        let matrix: Vec<Vec<f64>> = flat.chunks(actual_len).map(|c| c.to_vec()).collect();
        tsforge_core::mqloss(actual, &matrix, q)
    }) {
        Some(value) => {
            *out_result = value;
            true
        }
        None => false,
    }
}

/// Prediction interval coverage.
///
/// # Safety
/// All pointer arguments must be valid; arrays must have the stated
/// lengths.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_coverage(
    actual: *const c_double,
    actual_len: size_t,
    lower: *const c_double,
    lower_len: size_t,
    upper: *const c_double,
    upper_len: size_t,
    out_result: *mut c_double,
    out_error: *mut TsForgeError,
) -> bool {
    impl_metric_3arg(
        actual, actual_len, lower, lower_len, upper, upper_len, out_result, out_error,
        tsforge_core::coverage,
    )
}

// ============================================================================
// Forecasting
// ============================================================================

fn core_options_from_ffi(options: &ForecastOptions) -> CoreResult<CoreForecastOptions> {
    let model_name = buffer_to_string(&options.model);
    let model: ModelType = if model_name.is_empty() {
        ModelType::AutoETS
    } else {
        model_name.parse()?
    };

    if options.horizon <= 0 {
        return Err(TsError::InvalidParameter {
            param: "horizon".to_string(),
            value: options.horizon.to_string(),
            reason: "must be positive".to_string(),
        });
    }

    let ets_spec = {
        let s = buffer_to_string(&options.ets_spec);
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    };

    Ok(CoreForecastOptions {
        model,
        ets_spec,
        horizon: options.horizon as usize,
        confidence_level: options.confidence_level,
        seasonal_period: options.seasonal_period.max(0) as usize,
        auto_detect_seasonality: options.auto_detect_seasonality,
        include_fitted: options.include_fitted,
        include_residuals: options.include_residuals,
        window: to_option_usize(options.window),
        alpha: to_option_f64_nonnegative(options.alpha),
        beta: to_option_f64_nonnegative(options.beta),
        gamma: to_option_f64_nonnegative(options.gamma),
        phi: to_option_f64_nonnegative(options.phi),
    })
}

/// Forecast a single series.
///
/// # Safety
/// All pointer arguments must be valid; arrays must have the stated
/// lengths. The result must be released with
/// `tsforge_free_forecast_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_forecast(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    options: *const ForecastOptions,
    out_result: *mut ForecastResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(
        out_error,
        &[
            values as *const _,
            options as *const _,
            out_result as *const _,
        ],
    ) {
        return false;
    }

    *out_result = ForecastResult::default();

    let outcome = ffi_try(out_error, || {
        let series = build_series(values, validity, length);
        let core_options = core_options_from_ffi(&*options)?;
        let output = forecast(&series, &core_options)?;
        Ok((output, core_options.confidence_level))
    });

    match outcome {
        Some((output, confidence)) => {
            let result = &mut *out_result;
            result.point = vec_to_c_double_array(&output.point);
            result.lower = vec_to_c_double_array(&output.lower);
            result.upper = vec_to_c_double_array(&output.upper);
            result.horizon = output.point.len();
            if let Some(fitted) = &output.fitted {
                result.fitted = vec_to_c_double_array(fitted);
                result.n_insample = fitted.len();
            }
            if let Some(residuals) = &output.residuals {
                result.residuals = vec_to_c_double_array(residuals);
                result.n_insample = residuals.len();
            }
            copy_string_to_buffer(&output.model_name, &mut result.model_name);
            result.aic = output.aic.unwrap_or(f64::NAN);
            result.bic = output.bic.unwrap_or(f64::NAN);
            result.mse = output.mse.unwrap_or(f64::NAN);
            result.confidence_percent = (confidence * 100.0).round() as c_int;
            true
        }
        None => {
            // Per-row error reporting: the message also lands on the
            // result so group-wise callers can attach it to the row.
            if !out_error.is_null() {
                let msg = buffer_to_string(&(*out_error).message);
                copy_string_to_buffer(&msg, &mut (*out_result).error_message);
            }
            false
        }
    }
}

/// Release a forecast result's arrays.
///
/// # Safety
/// The result must have been produced by `tsforge_ts_forecast` (or an
/// aggregate finalize) and not freed before.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_forecast_result(result: *mut ForecastResult) {
    if result.is_null() {
        return;
    }
    let r = &mut *result;
    free_array(r.point);
    free_array(r.lower);
    free_array(r.upper);
    free_array(r.fitted);
    free_array(r.residuals);
    *r = ForecastResult::default();
}

/// List the model catalog. Returns a malloc-owned array of C strings.
///
/// # Safety
/// Outputs must be released with `tsforge_free_string_array`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_model_list(
    out_names: *mut *mut *mut c_char,
    out_count: *mut size_t,
) -> bool {
    if out_names.is_null() || out_count.is_null() {
        return false;
    }
    let models = list_models();
    *out_names = strings_to_c_array(&models);
    *out_count = models.len();
    true
}

// ============================================================================
// Changepoints
// ============================================================================

/// BOCPD changepoint detection.
///
/// # Safety
/// All pointer arguments must be valid. Release the result with
/// `tsforge_free_bocpd_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_detect_changepoints(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    hazard_lambda: c_double,
    include_probabilities: bool,
    out_result: *mut BocpdResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[values as *const _, out_result as *const _]) {
        return false;
    }

    *out_result = BocpdResult::default();

    let lambda = if hazard_lambda > 0.0 { hazard_lambda } else { 250.0 };

    match ffi_try(out_error, || {
        let dense = build_dense(values, validity, length);
        tsforge_core::detect_changepoints_bocpd(&dense, lambda, include_probabilities)
    }) {
        Some(result) => {
            let out = &mut *out_result;
            let flags: Vec<u8> = result.is_changepoint.iter().map(|&b| b as u8).collect();
            out.is_changepoint = allocation::slice_to_c_array(&flags);
            out.changepoint_probability =
                vec_to_c_double_array(&result.changepoint_probability);
            out.length = result.is_changepoint.len();
            let indices: Vec<i32> = result
                .changepoint_indices
                .iter()
                .map(|&i| i as i32)
                .collect();
            out.changepoint_indices = vec_to_c_int_array(&indices);
            out.n_changepoints = indices.len();
            true
        }
        None => false,
    }
}

/// Alias for the explicitly-named BOCPD entry point.
///
/// # Safety
/// See `tsforge_ts_detect_changepoints`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_detect_changepoints_bocpd(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    hazard_lambda: c_double,
    include_probabilities: bool,
    out_result: *mut BocpdResult,
    out_error: *mut TsForgeError,
) -> bool {
    tsforge_ts_detect_changepoints(
        values,
        validity,
        length,
        hazard_lambda,
        include_probabilities,
        out_result,
        out_error,
    )
}

/// Release a BOCPD result.
///
/// # Safety
/// The result must have been produced by the detection functions.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_bocpd_result(result: *mut BocpdResult) {
    if result.is_null() {
        return;
    }
    let r = &mut *result;
    free_array(r.is_changepoint);
    free_array(r.changepoint_probability);
    free_array(r.changepoint_indices);
    *r = BocpdResult::default();
}

// ============================================================================
// Seasonality / periods / decomposition
// ============================================================================

/// Detect seasonal periods with the chosen method ("fft", "acf",
/// "autoperiod"; null means fft).
///
/// # Safety
/// All pointer arguments must be valid. Release the result with
/// `tsforge_free_period_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_detect_periods(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    method: *const c_char,
    out_result: *mut PeriodResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[values as *const _, out_result as *const _]) {
        return false;
    }

    *out_result = PeriodResult::default();
    let method: PeriodMethod = c_str_to_str(method, "fft").parse().unwrap_or_default();

    match ffi_try(out_error, || {
        let dense = build_dense(values, validity, length);
        tsforge_core::detect_periods(&dense, method)
    }) {
        Some(detected) => {
            let out = &mut *out_result;
            let periods: Vec<i32> = detected.iter().map(|d| d.period as i32).collect();
            let confidences: Vec<f64> = detected.iter().map(|d| d.confidence).collect();
            out.periods = vec_to_c_int_array(&periods);
            out.confidences = vec_to_c_double_array(&confidences);
            out.length = detected.len();
            true
        }
        None => false,
    }
}

/// Detect candidate seasonal periods (ACF-validated).
///
/// # Safety
/// See `tsforge_ts_detect_periods`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_detect_seasonality(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    out_result: *mut PeriodResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[values as *const _, out_result as *const _]) {
        return false;
    }

    *out_result = PeriodResult::default();

    match ffi_try(out_error, || {
        let dense = build_dense(values, validity, length);
        tsforge_core::detect_seasonality(&dense, None)
    }) {
        Some(periods) => {
            let out = &mut *out_result;
            let confidences = vec![f64::NAN; periods.len()];
            out.periods = vec_to_c_int_array(&periods);
            out.confidences = vec_to_c_double_array(&confidences);
            out.length = periods.len();
            true
        }
        None => false,
    }
}

/// Full seasonality analysis summary.
///
/// # Safety
/// All pointer arguments must be valid.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_analyze_seasonality(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    out_result: *mut SeasonalityResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[values as *const _, out_result as *const _]) {
        return false;
    }

    *out_result = SeasonalityResult::default();

    match ffi_try(out_error, || {
        let dense = build_dense(values, validity, length);
        tsforge_core::analyze_seasonality(&dense, None)
    }) {
        Some(analysis) => {
            *out_result = SeasonalityResult {
                primary_period: analysis.primary_period,
                seasonal_strength: analysis.seasonal_strength,
                trend_strength: analysis.trend_strength,
                is_seasonal: analysis.is_seasonal,
            };
            true
        }
        None => false,
    }
}

/// Release a period result.
///
/// # Safety
/// The result must have been produced by the period functions.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_period_result(result: *mut PeriodResult) {
    if result.is_null() {
        return;
    }
    let r = &mut *result;
    free_array(r.periods);
    free_array(r.confidences);
    *r = PeriodResult::default();
}

/// MSTL decomposition. `periods` may be null to auto-detect a single
/// period.
///
/// # Safety
/// All pointer arguments must be valid. Release the result with
/// `tsforge_free_mstl_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_mstl_decomposition(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    periods: *const c_int,
    n_periods: size_t,
    out_result: *mut MstlResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[values as *const _, out_result as *const _]) {
        return false;
    }

    *out_result = MstlResult::default();

    match ffi_try(out_error, || {
        let dense = build_dense(values, validity, length);
        let requested: Vec<i32> = if periods.is_null() || n_periods == 0 {
            tsforge_core::primary_period(&dense)
                .map(|p| vec![p as i32])
                .unwrap_or_default()
        } else {
            std::slice::from_raw_parts(periods, n_periods).to_vec()
        };
        tsforge_core::mstl_decompose(&dense, &requested)
    }) {
        Some(decomp) => {
            let out = &mut *out_result;
            out.trend = vec_to_c_double_array(&decomp.trend);
            out.remainder = vec_to_c_double_array(&decomp.remainder);
            out.length = decomp.trend.len();
            let flat: Vec<f64> = decomp.seasonal.iter().flatten().cloned().collect();
            out.seasonal = vec_to_c_double_array(&flat);
            out.periods = vec_to_c_int_array(&decomp.periods);
            out.n_periods = decomp.periods.len();
            true
        }
        None => false,
    }
}

/// Release an MSTL result.
///
/// # Safety
/// The result must have been produced by `tsforge_ts_mstl_decomposition`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_mstl_result(result: *mut MstlResult) {
    if result.is_null() {
        return;
    }
    let r = &mut *result;
    free_array(r.trend);
    free_array(r.seasonal);
    free_array(r.remainder);
    free_array(r.periods);
    *r = MstlResult::default();
}

// ============================================================================
// Data preparation
// ============================================================================

/// True when the series has fewer than `min_length` valid observations
/// (ts_drop_short predicate).
///
/// # Safety
/// All pointer arguments must be valid.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_is_short(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    min_length: size_t,
) -> bool {
    let series = build_series(values, validity, length);
    tsforge_core::is_short(&series, min_length)
}

/// True when the series is constant (ts_drop_constant predicate).
///
/// # Safety
/// All pointer arguments must be valid.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_is_constant(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
) -> bool {
    let series = build_series(values, validity, length);
    tsforge_core::is_constant(&series)
}

unsafe fn emit_option_series(
    result: Vec<Option<f64>>,
    out_values: *mut *mut c_double,
    out_validity: *mut *mut u64,
    out_length: *mut size_t,
) -> bool {
    let (data, validity) = options_to_c_arrays(&result);
    *out_values = data;
    *out_validity = validity;
    *out_length = result.len();
    true
}

macro_rules! drop_zero_fn {
    ($ffi_name:ident, $core_fn:path, $doc:literal) => {
        #[doc = $doc]
        ///
        /// # Safety
        /// All pointer arguments must be valid. Outputs are released
        /// with `tsforge_free_double_array` / `tsforge_free_validity`.
        #[no_mangle]
        pub unsafe extern "C" fn $ffi_name(
            values: *const c_double,
            validity: *const u64,
            length: size_t,
            out_values: *mut *mut c_double,
            out_validity: *mut *mut u64,
            out_length: *mut size_t,
        ) -> bool {
            if values.is_null() || out_values.is_null() || out_validity.is_null()
                || out_length.is_null()
            {
                return false;
            }
            let series = build_series(values, validity, length);
            emit_option_series($core_fn(&series), out_values, out_validity, out_length)
        }
    };
}

drop_zero_fn!(
    tsforge_ts_drop_leading_zeros,
    tsforge_core::drop_leading_zeros,
    "Drop leading zeros from a series."
);
drop_zero_fn!(
    tsforge_ts_drop_trailing_zeros,
    tsforge_core::drop_trailing_zeros,
    "Drop trailing zeros from a series."
);
drop_zero_fn!(
    tsforge_ts_drop_edge_zeros,
    tsforge_core::drop_edge_zeros,
    "Drop leading and trailing zeros from a series."
);
drop_zero_fn!(
    tsforge_ts_fill_nulls_forward,
    tsforge_core::fill_nulls_forward,
    "Forward-fill NULL values."
);
drop_zero_fn!(
    tsforge_ts_fill_nulls_backward,
    tsforge_core::fill_nulls_backward,
    "Backward-fill NULL values."
);

/// Fill NULLs with a constant.
///
/// # Safety
/// All pointer arguments must be valid. Output released with
/// `tsforge_free_double_array`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_fill_nulls_const(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    fill_value: c_double,
    out_values: *mut *mut c_double,
    out_length: *mut size_t,
) -> bool {
    if values.is_null() || out_values.is_null() || out_length.is_null() {
        return false;
    }
    let series = build_series(values, validity, length);
    let filled = tsforge_core::fill_nulls_const(&series, fill_value);
    *out_values = vec_to_c_double_array(&filled);
    *out_length = filled.len();
    true
}

/// Fill NULLs with the series mean.
///
/// # Safety
/// See `tsforge_ts_fill_nulls_const`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_fill_nulls_mean(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    out_values: *mut *mut c_double,
    out_length: *mut size_t,
) -> bool {
    if values.is_null() || out_values.is_null() || out_length.is_null() {
        return false;
    }
    let series = build_series(values, validity, length);
    let filled = tsforge_core::fill_nulls_mean(&series);
    *out_values = vec_to_c_double_array(&filled);
    *out_length = filled.len();
    true
}

/// Difference a series at the given order.
///
/// # Safety
/// See `tsforge_ts_fill_nulls_const`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_diff(
    values: *const c_double,
    length: size_t,
    order: size_t,
    out_values: *mut *mut c_double,
    out_length: *mut size_t,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(
        out_error,
        &[values as *const _, out_values as *const _, out_length as *const _],
    ) {
        return false;
    }

    match ffi_try(out_error, || {
        let dense = std::slice::from_raw_parts(values, length);
        tsforge_core::diff(dense, order)
    }) {
        Some(diffed) => {
            *out_values = vec_to_c_double_array(&diffed);
            *out_length = diffed.len();
            true
        }
        None => false,
    }
}

// ============================================================================
// Features
// ============================================================================

/// Extract the full feature catalog for a series.
///
/// # Safety
/// All pointer arguments must be valid. Release the result with
/// `tsforge_free_feature_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_features(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    out_result: *mut FeatureResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[values as *const _, out_result as *const _]) {
        return false;
    }

    *out_result = FeatureResult::default();

    match ffi_try(out_error, || {
        let dense = build_dense(values, validity, length);
        tsforge_core::extract_features(&dense)
    }) {
        Some(features) => {
            let out = &mut *out_result;
            let names: Vec<String> = features.keys().cloned().collect();
            let feature_values: Vec<f64> = features.values().cloned().collect();
            out.names = strings_to_c_array(&names);
            out.values = vec_to_c_double_array(&feature_values);
            out.length = names.len();
            true
        }
        None => false,
    }
}

/// List the feature catalog names.
///
/// # Safety
/// Release with `tsforge_free_string_array`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_features_list(
    out_names: *mut *mut *mut c_char,
    out_count: *mut size_t,
) -> bool {
    if out_names.is_null() || out_count.is_null() {
        return false;
    }
    let names = tsforge_core::list_features();
    *out_names = strings_to_c_array(&names);
    *out_count = names.len();
    true
}

/// Release a feature result.
///
/// # Safety
/// The result must have been produced by `tsforge_ts_features`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_feature_result(result: *mut FeatureResult) {
    if result.is_null() {
        return;
    }
    let r = &mut *result;
    free_c_string_array(r.names, r.length);
    free_array(r.values);
    *r = FeatureResult::default();
}

// ============================================================================
// Cross-validation
// ============================================================================

unsafe fn cv_config_from_args(
    initial_window: size_t,
    horizon: size_t,
    step: size_t,
    window_type: *const c_char,
    max_window: size_t,
    gap: size_t,
    embargo: size_t,
) -> CoreResult<CvConfig> {
    let strategy: WindowStrategy = c_str_to_str(window_type, "expanding").parse()?;
    Ok(CvConfig {
        initial_window,
        horizon,
        step,
        strategy,
        max_window,
        gap,
        embargo,
    })
}

/// Generate cross-validation folds.
///
/// # Safety
/// All pointer arguments must be valid. Release the result with
/// `tsforge_free_cv_split_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_cv_split(
    n: size_t,
    initial_window: size_t,
    horizon: size_t,
    step: size_t,
    window_type: *const c_char,
    max_window: size_t,
    gap: size_t,
    embargo: size_t,
    out_result: *mut CvSplitResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[out_result as *const _]) {
        return false;
    }

    *out_result = CvSplitResult::default();

    match ffi_try(out_error, || {
        let config =
            cv_config_from_args(initial_window, horizon, step, window_type, max_window, gap, embargo)?;
        generate_folds(n, &config)
    }) {
        Some(folds) => {
            let out = &mut *out_result;
            let ids: Vec<i32> = folds.iter().map(|f| f.fold_id as i32).collect();
            let train_starts: Vec<i32> = folds.iter().map(|f| f.train_start as i32).collect();
            let train_ends: Vec<i32> = folds.iter().map(|f| f.train_end as i32).collect();
            let test_starts: Vec<i32> = folds.iter().map(|f| f.test_start as i32).collect();
            let test_ends: Vec<i32> = folds.iter().map(|f| f.test_end as i32).collect();
            out.fold_ids = vec_to_c_int_array(&ids);
            out.train_starts = vec_to_c_int_array(&train_starts);
            out.train_ends = vec_to_c_int_array(&train_ends);
            out.test_starts = vec_to_c_int_array(&test_starts);
            out.test_ends = vec_to_c_int_array(&test_ends);
            out.n_folds = folds.len();
            true
        }
        None => false,
    }
}

/// Release a CV split result.
///
/// # Safety
/// The result must have been produced by `tsforge_ts_cv_split`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_cv_split_result(result: *mut CvSplitResult) {
    if result.is_null() {
        return;
    }
    let r = &mut *result;
    free_array(r.fold_ids);
    free_array(r.train_starts);
    free_array(r.train_ends);
    free_array(r.test_starts);
    free_array(r.test_ends);
    *r = CvSplitResult::default();
}

/// Backtest a model across generated folds.
///
/// # Safety
/// All pointer arguments must be valid. Release the result with
/// `tsforge_free_backtest_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_ts_backtest_auto(
    values: *const c_double,
    validity: *const u64,
    length: size_t,
    model: *const c_char,
    initial_window: size_t,
    horizon: size_t,
    step: size_t,
    window_type: *const c_char,
    max_window: size_t,
    gap: size_t,
    embargo: size_t,
    out_result: *mut BacktestResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[values as *const _, out_result as *const _]) {
        return false;
    }

    *out_result = BacktestResult::default();

    match ffi_try(out_error, || {
        let dense = build_dense(values, validity, length);
        let model: ModelType = c_str_to_str(model, "AutoETS").parse()?;
        let config =
            cv_config_from_args(initial_window, horizon, step, window_type, max_window, gap, embargo)?;

        backtest(&dense, &config, |train, fold_horizon| {
            let series: Vec<Option<f64>> = train.iter().map(|&v| Some(v)).collect();
            let options = CoreForecastOptions {
                model,
                horizon: fold_horizon,
                ..Default::default()
            };
            Ok(forecast(&series, &options)?.point)
        })
    }) {
        Some(result) => {
            let out = &mut *out_result;
            out.overall_mae = result.overall_mae;
            out.overall_mse = result.overall_mse;
            out.overall_rmse = result.overall_rmse;
            out.overall_mape = result.overall_mape;
            out.overall_smape = result.overall_smape;
            out.n_folds = result.folds.len();
            out.n_successful = result.n_successful;

            let ids: Vec<i32> = result.folds.iter().map(|f| f.fold_id as i32).collect();
            let mae: Vec<f64> = result.folds.iter().map(|f| f.mae).collect();
            let mse: Vec<f64> = result.folds.iter().map(|f| f.mse).collect();
            let rmse: Vec<f64> = result.folds.iter().map(|f| f.rmse).collect();
            let mape: Vec<f64> = result.folds.iter().map(|f| f.mape).collect();
            let smape: Vec<f64> = result.folds.iter().map(|f| f.smape).collect();
            let errors: Vec<String> =
                result.folds.iter().map(|f| f.error_message.clone()).collect();

            out.fold_ids = vec_to_c_int_array(&ids);
            out.fold_mae = vec_to_c_double_array(&mae);
            out.fold_mse = vec_to_c_double_array(&mse);
            out.fold_rmse = vec_to_c_double_array(&rmse);
            out.fold_mape = vec_to_c_double_array(&mape);
            out.fold_smape = vec_to_c_double_array(&smape);
            out.fold_error_messages = strings_to_c_array(&errors);
            true
        }
        None => false,
    }
}

/// Release a backtest result.
///
/// # Safety
/// The result must have been produced by `tsforge_ts_backtest_auto`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_backtest_result(result: *mut BacktestResult) {
    if result.is_null() {
        return;
    }
    let r = &mut *result;
    free_array(r.fold_ids);
    free_array(r.fold_mae);
    free_array(r.fold_mse);
    free_array(r.fold_rmse);
    free_array(r.fold_mape);
    free_array(r.fold_smape);
    free_c_string_array(r.fold_error_messages, r.n_folds);
    *r = BacktestResult::default();
}

// ============================================================================
// Aggregate state engines
// ============================================================================

/// Create a fresh aggregate state.
#[no_mangle]
pub extern "C" fn tsforge_agg_new() -> *mut AggregateState {
    Box::into_raw(Box::new(AggregateState::new()))
}

/// Release an aggregate state.
///
/// # Safety
/// The state must have been produced by `tsforge_agg_new` and not freed
/// before.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_free(state: *mut AggregateState) {
    if !state.is_null() {
        drop(Box::from_raw(state));
    }
}

/// Accumulate one row. The model/horizon/params snapshot is taken from
/// the first valid row.
///
/// # Safety
/// `state` must be a live aggregate state; `model` and `params` must be
/// null or valid C strings.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_update(
    state: *mut AggregateState,
    timestamp: i64,
    value: c_double,
    value_is_null: bool,
    model: *const c_char,
    horizon: c_int,
    params: *const c_char,
) -> bool {
    if state.is_null() {
        return false;
    }
    let value = if value_is_null { None } else { Some(value) };
    let model_name = c_str_to_str(model, "AutoETS").to_string();
    let params_str = c_str_to_str(params, "").to_string();
    let horizon = if horizon > 0 { horizon as usize } else { 12 };

    (*state).update(timestamp, value, move || AggregateParams {
        model: model_name,
        horizon,
        params: ParamMap::parse(&params_str),
    });
    true
}

/// Merge `source` into `target`, consuming `source`.
///
/// # Safety
/// Both pointers must be live aggregate states; `source` is freed.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_combine(
    target: *mut AggregateState,
    source: *mut AggregateState,
) -> bool {
    if target.is_null() || source.is_null() {
        return false;
    }
    let source = Box::from_raw(source);
    (*target).combine(*source);
    true
}

/// Finalize a group as a forecast.
///
/// # Safety
/// `state` must be a live aggregate state. Release the result with
/// `tsforge_free_forecast_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_finalize_forecast(
    state: *const AggregateState,
    out_result: *mut ForecastResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[state as *const _, out_result as *const _]) {
        return false;
    }
    *out_result = ForecastResult::default();

    match ffi_try(out_error, || (*state).finalize_forecast()) {
        Some(output) => {
            let result = &mut *out_result;
            result.point = vec_to_c_double_array(&output.point);
            result.lower = vec_to_c_double_array(&output.lower);
            result.upper = vec_to_c_double_array(&output.upper);
            result.horizon = output.point.len();
            if let Some(fitted) = &output.fitted {
                result.fitted = vec_to_c_double_array(fitted);
                result.n_insample = fitted.len();
            }
            if let Some(residuals) = &output.residuals {
                result.residuals = vec_to_c_double_array(residuals);
            }
            copy_string_to_buffer(&output.model_name, &mut result.model_name);
            result.aic = output.aic.unwrap_or(f64::NAN);
            result.bic = output.bic.unwrap_or(f64::NAN);
            result.mse = output.mse.unwrap_or(f64::NAN);
            true
        }
        None => false,
    }
}

/// Finalize a group as statistics.
///
/// # Safety
/// `state` must be a live aggregate state.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_finalize_stats(
    state: *const AggregateState,
    out_result: *mut TsStatsResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[state as *const _, out_result as *const _]) {
        return false;
    }
    *out_result = TsStatsResult::default();

    match ffi_try(out_error, || (*state).finalize_stats()) {
        Some(stats) => {
            *out_result = stats.into();
            true
        }
        None => false,
    }
}

/// Finalize a group as the feature catalog.
///
/// # Safety
/// `state` must be a live aggregate state; release the result with
/// `tsforge_free_feature_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_finalize_features(
    state: *const AggregateState,
    out_result: *mut FeatureResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[state as *const _, out_result as *const _]) {
        return false;
    }
    *out_result = FeatureResult::default();

    match ffi_try(out_error, || (*state).finalize_features()) {
        Some(features) => {
            let out = &mut *out_result;
            let names: Vec<String> = features.keys().cloned().collect();
            let feature_values: Vec<f64> = features.values().cloned().collect();
            out.names = strings_to_c_array(&names);
            out.values = vec_to_c_double_array(&feature_values);
            out.length = names.len();
            true
        }
        None => false,
    }
}

/// Finalize a group as BOCPD changepoints.
///
/// # Safety
/// `state` must be a live aggregate state; release the result with
/// `tsforge_free_bocpd_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_finalize_changepoints(
    state: *const AggregateState,
    hazard_lambda: c_double,
    include_probabilities: bool,
    out_result: *mut BocpdResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[state as *const _, out_result as *const _]) {
        return false;
    }
    *out_result = BocpdResult::default();

    let lambda = if hazard_lambda > 0.0 { hazard_lambda } else { 250.0 };

    match ffi_try(out_error, || {
        (*state).finalize_changepoints(lambda, include_probabilities)
    }) {
        Some(result) => {
            let out = &mut *out_result;
            let flags: Vec<u8> = result.is_changepoint.iter().map(|&b| b as u8).collect();
            out.is_changepoint = allocation::slice_to_c_array(&flags);
            out.changepoint_probability =
                vec_to_c_double_array(&result.changepoint_probability);
            out.length = result.is_changepoint.len();
            let indices: Vec<i32> = result
                .changepoint_indices
                .iter()
                .map(|&i| i as i32)
                .collect();
            out.changepoint_indices = vec_to_c_int_array(&indices);
            out.n_changepoints = indices.len();
            true
        }
        None => false,
    }
}

/// Finalize a group as detected periods.
///
/// # Safety
/// `state` must be a live aggregate state; release the result with
/// `tsforge_free_period_result`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_finalize_periods(
    state: *const AggregateState,
    method: *const c_char,
    out_result: *mut PeriodResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[state as *const _, out_result as *const _]) {
        return false;
    }
    *out_result = PeriodResult::default();
    let method: PeriodMethod = c_str_to_str(method, "fft").parse().unwrap_or_default();

    match ffi_try(out_error, || (*state).finalize_periods(method)) {
        Some(detected) => {
            let out = &mut *out_result;
            let periods: Vec<i32> = detected.iter().map(|d| d.period as i32).collect();
            let confidences: Vec<f64> = detected.iter().map(|d| d.confidence).collect();
            out.periods = vec_to_c_int_array(&periods);
            out.confidences = vec_to_c_double_array(&confidences);
            out.length = detected.len();
            true
        }
        None => false,
    }
}

/// Finalize a group as a data-quality assessment.
///
/// # Safety
/// `state` must be a live aggregate state.
#[no_mangle]
pub unsafe extern "C" fn tsforge_agg_finalize_quality(
    state: *const AggregateState,
    out_result: *mut DataQualityResult,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(out_error, &[state as *const _, out_result as *const _]) {
        return false;
    }
    *out_result = DataQualityResult::default();

    match ffi_try(out_error, || (*state).finalize_quality()) {
        Some(quality) => {
            *out_result = DataQualityResult {
                completeness_score: quality.completeness_score,
                temporal_score: quality.temporal_score,
                magnitude_score: quality.magnitude_score,
                behavioral_score: quality.behavioral_score,
                overall_score: quality.overall_score,
                n_gaps: quality.n_gaps,
                n_missing: quality.n_missing,
                n_outliers: quality.n_outliers,
                n_duplicate_timestamps: quality.n_duplicate_timestamps,
                is_constant: quality.is_constant,
            };
            true
        }
        None => false,
    }
}

// ============================================================================
// Parallel group operator
// ============================================================================

/// One emitted row of the grouped operator before C conversion.
struct OutRow {
    key: String,
    timestamp: i64,
    value: Option<f64>,
    error: Option<String>,
}

/// The per-group transform behind the table-streaming functions.
enum GroupOpTransform {
    FillGaps {
        frequency: i64,
    },
    FillForward {
        target: i64,
        frequency: i64,
    },
    Forecast {
        model: ModelType,
        horizon: usize,
        params: ParamMap,
    },
}

impl GroupTransform for GroupOpTransform {
    type Out = OutRow;

    fn apply(&self, key: &str, rows: &[GroupRow]) -> CoreResult<Vec<OutRow>> {
        let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.value).collect();

        match self {
            GroupOpTransform::FillGaps { frequency } => {
                let freq = if *frequency > 0 {
                    *frequency
                } else {
                    tsforge_core::detect_frequency(&timestamps)?
                };
                let (out_ts, out_vals) = tsforge_core::fill_gaps(&timestamps, &values, freq)?;
                Ok(out_ts
                    .into_iter()
                    .zip(out_vals)
                    .map(|(timestamp, value)| OutRow {
                        key: key.to_string(),
                        timestamp,
                        value,
                        error: None,
                    })
                    .collect())
            }
            GroupOpTransform::FillForward { target, frequency } => {
                let freq = if *frequency > 0 {
                    *frequency
                } else {
                    tsforge_core::detect_frequency(&timestamps)?
                };
                let (out_ts, out_vals) =
                    tsforge_core::fill_forward(&timestamps, &values, *target, freq)?;
                Ok(out_ts
                    .into_iter()
                    .zip(out_vals)
                    .map(|(timestamp, value)| OutRow {
                        key: key.to_string(),
                        timestamp,
                        value,
                        error: None,
                    })
                    .collect())
            }
            GroupOpTransform::Forecast {
                model,
                horizon,
                params,
            } => {
                let (options, _warnings) =
                    CoreForecastOptions::from_params(*model, *horizon, params)?;
                let output = forecast(&values, &options)?;

                let freq = tsforge_core::detect_frequency(&timestamps).unwrap_or(1);
                let last_ts = timestamps.iter().max().cloned().unwrap_or(0);

                Ok(output
                    .point
                    .iter()
                    .enumerate()
                    .map(|(h, &value)| OutRow {
                        key: key.to_string(),
                        timestamp: last_ts + (h as i64 + 1) * freq,
                        value: Some(value),
                        error: None,
                    })
                    .collect())
            }
        }
    }

    fn error_row(&self, key: &str, error: &TsError) -> OutRow {
        OutRow {
            key: key.to_string(),
            timestamp: 0,
            value: None,
            error: Some(error.to_string()),
        }
    }
}

/// Opaque operator handle for the host.
pub struct GroupOperatorHandle {
    operator: GroupedOperator<GroupOpTransform>,
    cancel: CancelToken,
    chunk_capacity: usize,
}

/// Create a grouped streaming operator.
///
/// `slot_count` should be the host's max-threads hint and
/// `chunk_capacity` the host's output chunk size. `frequency`/`target`
/// configure the fill kinds (<= 0 means auto-detect frequency);
/// `model`, `horizon`, and `params` configure the forecast kind.
///
/// # Safety
/// `model` and `params` must be null or valid C strings. The handle
/// must be released with `tsforge_groupop_free`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_groupop_new(
    kind: GroupOpKind,
    slot_count: size_t,
    chunk_capacity: size_t,
    frequency: i64,
    target: i64,
    model: *const c_char,
    horizon: c_int,
    params: *const c_char,
    out_error: *mut TsForgeError,
) -> *mut GroupOperatorHandle {
    init_error(out_error);

    let transform = match kind {
        GroupOpKind::FillGaps => GroupOpTransform::FillGaps { frequency },
        GroupOpKind::FillForward => GroupOpTransform::FillForward { target, frequency },
        GroupOpKind::Forecast => {
            let model_name = c_str_to_str(model, "AutoETS");
            let model: ModelType = match model_name.parse() {
                Ok(m) => m,
                Err(e) => {
                    set_error(
                        out_error,
                        ErrorCode::InvalidModel,
                        &format!("{}", e),
                    );
                    return std::ptr::null_mut();
                }
            };
            let horizon = if horizon > 0 { horizon as usize } else { 12 };
            GroupOpTransform::Forecast {
                model,
                horizon,
                params: ParamMap::parse(c_str_to_str(params, "")),
            }
        }
    };

    let cancel: CancelToken = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let operator = GroupedOperator::new(
        transform,
        slot_count.max(1),
        chunk_capacity.max(1),
        Some(Arc::clone(&cancel)),
    );

    Box::into_raw(Box::new(GroupOperatorHandle {
        operator,
        cancel,
        chunk_capacity: chunk_capacity.max(1),
    }))
}

/// Create per-worker-thread state for the operator.
#[no_mangle]
pub extern "C" fn tsforge_groupop_worker_new() -> *mut WorkerState {
    Box::into_raw(Box::new(WorkerState::new()))
}

/// Release per-worker state.
///
/// # Safety
/// The pointer must have been produced by `tsforge_groupop_worker_new`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_groupop_worker_free(worker: *mut WorkerState) {
    if !worker.is_null() {
        drop(Box::from_raw(worker));
    }
}

/// Stream one batch of rows into the operator.
///
/// # Safety
/// All array arguments must have `count` elements; `keys` entries must
/// be valid C strings; `worker` must belong to the calling thread.
#[no_mangle]
pub unsafe extern "C" fn tsforge_groupop_sink(
    handle: *mut GroupOperatorHandle,
    worker: *mut WorkerState,
    keys: *const *const c_char,
    timestamps: *const i64,
    values: *const c_double,
    validity: *const u64,
    count: size_t,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(
        out_error,
        &[
            handle as *const _,
            worker as *const _,
            keys as *const _,
            timestamps as *const _,
            values as *const _,
        ],
    ) {
        return false;
    }

    let handle = &*handle;
    let worker = &mut *worker;

    let result = ffi_try(out_error, || {
        let key_ptrs = std::slice::from_raw_parts(keys, count);
        let ts = std::slice::from_raw_parts(timestamps, count);
        let series = build_series(values, validity, count);

        let mut batch = Vec::with_capacity(count);
        for i in 0..count {
            batch.push(InputRow {
                key: c_str_to_str(key_ptrs[i], "").to_string(),
                timestamp: ts[i],
                value: series[i],
            });
        }
        handle.operator.sink(worker, &batch)
    });

    result.is_some()
}

/// Drain output rows. Writes at most `chunk_capacity` rows into
/// `out_rows` and sets `out_has_more` when another call is needed; a
/// losing thread gets zero rows and `out_has_more = false` immediately.
///
/// # Safety
/// `out_rows` must have room for the operator's chunk capacity. Emitted
/// rows must be released with `tsforge_free_group_rows`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_groupop_finalize(
    handle: *mut GroupOperatorHandle,
    worker: *mut WorkerState,
    out_rows: *mut GroupOutputRow,
    out_count: *mut size_t,
    out_has_more: *mut bool,
    out_error: *mut TsForgeError,
) -> bool {
    if check_null_pointers(
        out_error,
        &[
            handle as *const _,
            worker as *const _,
            out_rows as *const _,
            out_count as *const _,
            out_has_more as *const _,
        ],
    ) {
        return false;
    }

    let handle_ref = &*handle;
    let worker = &mut *worker;

    *out_count = 0;
    *out_has_more = false;

    let result = ffi_try(out_error, || {
        let mut rows = Vec::with_capacity(handle_ref.chunk_capacity);
        let poll = handle_ref.operator.finalize(worker, &mut rows)?;
        Ok((rows, poll))
    });

    match result {
        Some((rows, poll)) => {
            for (i, row) in rows.iter().enumerate() {
                let out = &mut *out_rows.add(i);
                out.key = string_to_c(&row.key);
                out.timestamp = row.timestamp;
                out.value = row.value.unwrap_or(f64::NAN);
                out.value_is_null = row.value.is_none();
                out.error_message = match &row.error {
                    Some(msg) => string_to_c(msg),
                    None => std::ptr::null_mut(),
                };
            }
            *out_count = rows.len();
            *out_has_more = poll == FinalizePoll::HaveMoreOutput;
            true
        }
        None => false,
    }
}

/// Request cancellation; honoured at the next batch or slot boundary.
///
/// # Safety
/// The handle must be live.
#[no_mangle]
pub unsafe extern "C" fn tsforge_groupop_cancel(handle: *mut GroupOperatorHandle) {
    if !handle.is_null() {
        (*handle).cancel.store(true, Ordering::SeqCst);
    }
}

/// Release the operator.
///
/// # Safety
/// The handle must have been produced by `tsforge_groupop_new`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_groupop_free(handle: *mut GroupOperatorHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Release the strings attached to emitted rows.
///
/// # Safety
/// `rows` must hold `count` rows previously filled by
/// `tsforge_groupop_finalize`.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_group_rows(rows: *mut GroupOutputRow, count: size_t) {
    if rows.is_null() {
        return;
    }
    for i in 0..count {
        let row = &mut *rows.add(i);
        free_c_string(row.key);
        row.key = std::ptr::null_mut();
        free_c_string(row.error_message);
        row.error_message = std::ptr::null_mut();
    }
}

// ============================================================================
// Generic frees
// ============================================================================

/// Free a malloc-owned double array.
///
/// # Safety
/// The pointer must have been produced by this library, or be null.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_double_array(ptr: *mut c_double) {
    free_array(ptr);
}

/// Free a malloc-owned int array.
///
/// # Safety
/// The pointer must have been produced by this library, or be null.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_int_array(ptr: *mut c_int) {
    free_array(ptr);
}

/// Free a malloc-owned validity bitmask.
///
/// # Safety
/// The pointer must have been produced by this library, or be null.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_validity(ptr: *mut u64) {
    free_array(ptr);
}

/// Free a malloc-owned array of C strings.
///
/// # Safety
/// The pointer must have been produced by this library with the given
/// length, or be null.
#[no_mangle]
pub unsafe extern "C" fn tsforge_free_string_array(ptr: *mut *mut c_char, count: size_t) {
    free_c_string_array(ptr, count);
}
