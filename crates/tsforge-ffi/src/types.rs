//! C-compatible type definitions for the FFI boundary.
//!
//! Everything here is `repr(C)` and designed to cross into the C++
//! DuckDB extension wrapper. Array outputs are malloc-owned so the host
//! frees them through the matching `tsforge_free_*` function; string
//! fields are fixed-size buffers so result structs stay POD.

// Use core::ffi types for cross-platform compatibility including WASM
use core::ffi::{c_char, c_double, c_int};

// size_t is not in core::ffi, use usize instead
#[allow(non_camel_case_types)]
type size_t = usize;

/// Error codes for the FFI boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    NullPointer = 1,
    InvalidInput = 2,
    NumericalFailure = 3,
    AllocationError = 4,
    InvalidModel = 5,
    InsufficientData = 6,
    DataQuality = 7,
    InvalidParameter = 8,
    Cancelled = 9,
    InternalError = 10,
    PanicCaught = 11,
}

impl ErrorCode {
    /// Map a core error code (TsError::to_code) onto the FFI code.
    pub fn from_core_code(code: i32) -> Self {
        match code {
            1 => ErrorCode::NullPointer,
            2 => ErrorCode::InvalidInput,
            3 => ErrorCode::NumericalFailure,
            4 => ErrorCode::AllocationError,
            5 => ErrorCode::InvalidModel,
            6 => ErrorCode::InsufficientData,
            7 => ErrorCode::DataQuality,
            8 => ErrorCode::InvalidParameter,
            9 => ErrorCode::Cancelled,
            _ => ErrorCode::InternalError,
        }
    }
}

/// Error structure with message buffer for FFI.
#[repr(C)]
pub struct TsForgeError {
    pub code: ErrorCode,
    pub message: [c_char; 256],
}

impl TsForgeError {
    /// Create a success error (no error).
    pub fn success() -> Self {
        Self {
            code: ErrorCode::Success,
            message: [0; 256],
        }
    }

    /// Set an error with code and message.
    pub fn set_error(&mut self, code: ErrorCode, msg: &str) {
        self.code = code;
        let bytes = msg.as_bytes();
        let len = bytes.len().min(255);
        for (i, &b) in bytes[..len].iter().enumerate() {
            self.message[i] = b as c_char;
        }
        self.message[len] = 0;
    }
}

impl Default for TsForgeError {
    fn default() -> Self {
        Self::success()
    }
}

/// Nullable data array following DuckDB's validity convention: bit i of
/// validity[i / 64] marks element i valid (1) or NULL (0). A null
/// validity pointer means all valid.
#[repr(C)]
pub struct DataArray {
    pub data: *const c_double,
    pub validity: *const u64,
    pub length: size_t,
}

impl DataArray {
    /// Check if element at index is valid (not NULL).
    ///
    /// # Safety
    /// Caller must ensure index < length and the validity pointer is
    /// valid if not null.
    pub unsafe fn is_valid(&self, index: usize) -> bool {
        if self.validity.is_null() {
            true
        } else {
            let word = *self.validity.add(index / 64);
            (word >> (index % 64)) & 1 == 1
        }
    }
}

/// Forecast call options.
#[repr(C)]
pub struct ForecastOptions {
    /// Model name (catalog name, case-sensitive with aliases).
    pub model: [c_char; 32],
    /// ETS notation override ("AAA", "MNM", ...); empty means default.
    pub ets_spec: [c_char; 8],
    pub horizon: c_int,
    /// 0 means auto-detect.
    pub seasonal_period: c_int,
    pub confidence_level: c_double,
    pub auto_detect_seasonality: bool,
    pub include_fitted: bool,
    pub include_residuals: bool,
    /// SMA window; <= 0 means default.
    pub window: c_int,
    /// Smoothing overrides; negative means unset.
    pub alpha: c_double,
    pub beta: c_double,
    pub gamma: c_double,
    pub phi: c_double,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            model: [0; 32],
            ets_spec: [0; 8],
            horizon: 12,
            seasonal_period: 0,
            confidence_level: 0.90,
            auto_detect_seasonality: true,
            include_fitted: false,
            include_residuals: false,
            window: 0,
            alpha: -1.0,
            beta: -1.0,
            gamma: -1.0,
            phi: -1.0,
        }
    }
}

/// Forecast result with malloc-owned arrays.
///
/// `lower` and `upper` are the interval bounds at `confidence_percent`
/// (the column names on the SQL side encode that percentage, e.g.
/// lower_90 / upper_90). `fitted` and `residuals` are null unless
/// requested. `error_message` is empty on success.
#[repr(C)]
pub struct ForecastResult {
    pub point: *mut c_double,
    pub lower: *mut c_double,
    pub upper: *mut c_double,
    pub horizon: size_t,
    pub fitted: *mut c_double,
    pub residuals: *mut c_double,
    pub n_insample: size_t,
    pub model_name: [c_char; 64],
    pub aic: c_double,
    pub bic: c_double,
    pub mse: c_double,
    pub confidence_percent: c_int,
    pub error_message: [c_char; 256],
}

impl Default for ForecastResult {
    fn default() -> Self {
        Self {
            point: std::ptr::null_mut(),
            lower: std::ptr::null_mut(),
            upper: std::ptr::null_mut(),
            horizon: 0,
            fitted: std::ptr::null_mut(),
            residuals: std::ptr::null_mut(),
            n_insample: 0,
            model_name: [0; 64],
            aic: f64::NAN,
            bic: f64::NAN,
            mse: f64::NAN,
            confidence_percent: 90,
            error_message: [0; 256],
        }
    }
}

/// BOCPD result: per-point flags/probabilities plus the index list.
#[repr(C)]
pub struct BocpdResult {
    pub is_changepoint: *mut u8,
    pub changepoint_probability: *mut c_double,
    pub length: size_t,
    pub changepoint_indices: *mut c_int,
    pub n_changepoints: size_t,
}

impl Default for BocpdResult {
    fn default() -> Self {
        Self {
            is_changepoint: std::ptr::null_mut(),
            changepoint_probability: std::ptr::null_mut(),
            length: 0,
            changepoint_indices: std::ptr::null_mut(),
            n_changepoints: 0,
        }
    }
}

/// Detected seasonal periods.
#[repr(C)]
pub struct PeriodResult {
    pub periods: *mut c_int,
    pub confidences: *mut c_double,
    pub length: size_t,
}

impl Default for PeriodResult {
    fn default() -> Self {
        Self {
            periods: std::ptr::null_mut(),
            confidences: std::ptr::null_mut(),
            length: 0,
        }
    }
}

/// Seasonality analysis summary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SeasonalityResult {
    pub primary_period: c_int,
    pub seasonal_strength: c_double,
    pub trend_strength: c_double,
    pub is_seasonal: bool,
}

impl Default for SeasonalityResult {
    fn default() -> Self {
        Self {
            primary_period: 0,
            seasonal_strength: f64::NAN,
            trend_strength: f64::NAN,
            is_seasonal: false,
        }
    }
}

/// MSTL decomposition output. `seasonal` is row-major with one row of
/// `length` values per period.
#[repr(C)]
pub struct MstlResult {
    pub trend: *mut c_double,
    pub seasonal: *mut c_double,
    pub remainder: *mut c_double,
    pub length: size_t,
    pub periods: *mut c_int,
    pub n_periods: size_t,
}

impl Default for MstlResult {
    fn default() -> Self {
        Self {
            trend: std::ptr::null_mut(),
            seasonal: std::ptr::null_mut(),
            remainder: std::ptr::null_mut(),
            length: 0,
            periods: std::ptr::null_mut(),
            n_periods: 0,
        }
    }
}

/// Time series statistics result (24 metrics).
#[repr(C)]
pub struct TsStatsResult {
    pub length: size_t,
    pub n_nulls: size_t,
    pub n_zeros: size_t,
    pub n_positive: size_t,
    pub n_negative: size_t,
    pub mean: c_double,
    pub median: c_double,
    pub std_dev: c_double,
    pub variance: c_double,
    pub min: c_double,
    pub max: c_double,
    pub range: c_double,
    pub sum: c_double,
    pub skewness: c_double,
    pub kurtosis: c_double,
    pub coef_variation: c_double,
    pub q1: c_double,
    pub q3: c_double,
    pub iqr: c_double,
    pub autocorr_lag1: c_double,
    pub trend_strength: c_double,
    pub seasonality_strength: c_double,
    pub entropy: c_double,
    pub stability: c_double,
}

impl Default for TsStatsResult {
    fn default() -> Self {
        Self {
            length: 0,
            n_nulls: 0,
            n_zeros: 0,
            n_positive: 0,
            n_negative: 0,
            mean: f64::NAN,
            median: f64::NAN,
            std_dev: f64::NAN,
            variance: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            range: f64::NAN,
            sum: f64::NAN,
            skewness: f64::NAN,
            kurtosis: f64::NAN,
            coef_variation: f64::NAN,
            q1: f64::NAN,
            q3: f64::NAN,
            iqr: f64::NAN,
            autocorr_lag1: f64::NAN,
            trend_strength: f64::NAN,
            seasonality_strength: f64::NAN,
            entropy: f64::NAN,
            stability: f64::NAN,
        }
    }
}

impl From<tsforge_core::TsStats> for TsStatsResult {
    fn from(s: tsforge_core::TsStats) -> Self {
        Self {
            length: s.length,
            n_nulls: s.n_nulls,
            n_zeros: s.n_zeros,
            n_positive: s.n_positive,
            n_negative: s.n_negative,
            mean: s.mean,
            median: s.median,
            std_dev: s.std_dev,
            variance: s.variance,
            min: s.min,
            max: s.max,
            range: s.range,
            sum: s.sum,
            skewness: s.skewness,
            kurtosis: s.kurtosis,
            coef_variation: s.coef_variation,
            q1: s.q1,
            q3: s.q3,
            iqr: s.iqr,
            autocorr_lag1: s.autocorr_lag1,
            trend_strength: s.trend_strength,
            seasonality_strength: s.seasonality_strength,
            entropy: s.entropy,
            stability: s.stability,
        }
    }
}

/// Data-quality scores for one group.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DataQualityResult {
    pub completeness_score: c_double,
    pub temporal_score: c_double,
    pub magnitude_score: c_double,
    pub behavioral_score: c_double,
    pub overall_score: c_double,
    pub n_gaps: size_t,
    pub n_missing: size_t,
    pub n_outliers: size_t,
    pub n_duplicate_timestamps: size_t,
    pub is_constant: bool,
}

impl Default for DataQualityResult {
    fn default() -> Self {
        Self {
            completeness_score: f64::NAN,
            temporal_score: f64::NAN,
            magnitude_score: f64::NAN,
            behavioral_score: f64::NAN,
            overall_score: f64::NAN,
            n_gaps: 0,
            n_missing: 0,
            n_outliers: 0,
            n_duplicate_timestamps: 0,
            is_constant: false,
        }
    }
}

/// Extracted features as parallel name/value arrays. Names are
/// malloc-owned C strings.
#[repr(C)]
pub struct FeatureResult {
    pub names: *mut *mut c_char,
    pub values: *mut c_double,
    pub length: size_t,
}

impl Default for FeatureResult {
    fn default() -> Self {
        Self {
            names: std::ptr::null_mut(),
            values: std::ptr::null_mut(),
            length: 0,
        }
    }
}

/// Cross-validation folds as parallel arrays.
#[repr(C)]
pub struct CvSplitResult {
    pub fold_ids: *mut c_int,
    pub train_starts: *mut c_int,
    pub train_ends: *mut c_int,
    pub test_starts: *mut c_int,
    pub test_ends: *mut c_int,
    pub n_folds: size_t,
}

impl Default for CvSplitResult {
    fn default() -> Self {
        Self {
            fold_ids: std::ptr::null_mut(),
            train_starts: std::ptr::null_mut(),
            train_ends: std::ptr::null_mut(),
            test_starts: std::ptr::null_mut(),
            test_ends: std::ptr::null_mut(),
            n_folds: 0,
        }
    }
}

/// Backtest result: pooled overall metrics plus per-fold arrays. Failed
/// folds carry NaN metrics and a non-empty message in
/// `fold_error_messages`.
#[repr(C)]
pub struct BacktestResult {
    pub overall_mae: c_double,
    pub overall_mse: c_double,
    pub overall_rmse: c_double,
    pub overall_mape: c_double,
    pub overall_smape: c_double,
    pub n_folds: size_t,
    pub n_successful: size_t,
    pub fold_ids: *mut c_int,
    pub fold_mae: *mut c_double,
    pub fold_mse: *mut c_double,
    pub fold_rmse: *mut c_double,
    pub fold_mape: *mut c_double,
    pub fold_smape: *mut c_double,
    pub fold_error_messages: *mut *mut c_char,
}

impl Default for BacktestResult {
    fn default() -> Self {
        Self {
            overall_mae: f64::NAN,
            overall_mse: f64::NAN,
            overall_rmse: f64::NAN,
            overall_mape: f64::NAN,
            overall_smape: f64::NAN,
            n_folds: 0,
            n_successful: 0,
            fold_ids: std::ptr::null_mut(),
            fold_mae: std::ptr::null_mut(),
            fold_mse: std::ptr::null_mut(),
            fold_rmse: std::ptr::null_mut(),
            fold_mape: std::ptr::null_mut(),
            fold_smape: std::ptr::null_mut(),
            fold_error_messages: std::ptr::null_mut(),
        }
    }
}

/// Kind selector for the grouped table-streaming operator.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOpKind {
    /// ts_fill_gaps: regularize each group's timestamp grid.
    FillGaps = 0,
    /// ts_fill_forward: extend each group to a target timestamp.
    FillForward = 1,
    /// ts_forecast_by: forecast each group.
    Forecast = 2,
}

/// One output row of the grouped operator. `key` and `error_message`
/// are malloc-owned C strings (error is null for clean rows).
#[repr(C)]
pub struct GroupOutputRow {
    pub key: *mut c_char,
    pub timestamp: i64,
    pub value: c_double,
    pub value_is_null: bool,
    pub error_message: *mut c_char,
}
