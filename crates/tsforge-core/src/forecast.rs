//! Forecasting model catalog and dispatch.
//!
//! The catalog covers basic baselines, exponential smoothing, the ETS
//! state-space family (fitted by maximum likelihood through the
//! analytical-gradient engine), Theta methods, AR-based ARIMA,
//! decomposition-based multi-seasonality models, and the
//! intermittent-demand family. Auto-selectors try candidate
//! configurations at fit time and keep the best by information
//! criterion.

use crate::arima;
use crate::checkpoint::CheckpointConfig;
use crate::error::{Result, TsError};
use crate::ets::EtsSpec;
use crate::ets_fit;
use crate::imputation::fill_nulls_interpolate;
use crate::intermittent::{self, CrostonVariant, ExpandMode};
use crate::params::ParamMap;
use crate::periods::primary_period;
use crate::theta::{fit_theta, ThetaVariant};
use statrs::distribution::{ContinuousCDF, Normal};

/// Forecast result.
#[derive(Debug, Clone)]
pub struct ForecastOutput {
    /// Point forecasts
    pub point: Vec<f64>,
    /// Lower confidence bounds
    pub lower: Vec<f64>,
    /// Upper confidence bounds
    pub upper: Vec<f64>,
    /// Fitted values (in-sample)
    pub fitted: Option<Vec<f64>>,
    /// Residuals
    pub residuals: Option<Vec<f64>>,
    /// Model name used
    pub model_name: String,
    /// AIC if available
    pub aic: Option<f64>,
    /// BIC if available
    pub bic: Option<f64>,
    /// MSE of in-sample fit
    pub mse: Option<f64>,
}

/// Available forecast models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    // Automatic Selection
    AutoETS,
    AutoARIMA,
    AutoTheta,
    AutoMFLES,
    AutoMSTL,
    AutoTBATS,
    // Basic
    Naive,
    SMA,
    SeasonalNaive,
    SES,
    SESOptimized,
    RandomWalkDrift,
    // Exponential Smoothing
    Holt,
    HoltWinters,
    SeasonalES,
    SeasonalESOptimized,
    // Theta
    Theta,
    OptimizedTheta,
    DynamicTheta,
    DynamicOptimizedTheta,
    // State Space
    ETS,
    // ARIMA
    ARIMA,
    // Multiple Seasonality
    MFLES,
    MSTL,
    TBATS,
    // Intermittent Demand
    CrostonClassic,
    CrostonOptimized,
    CrostonSBA,
    ADIDA,
    IMAPA,
    TSB,
}

impl std::str::FromStr for ModelType {
    type Err = TsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Exact, case-sensitive names first.
        match s {
            "AutoETS" => return Ok(ModelType::AutoETS),
            "AutoARIMA" => return Ok(ModelType::AutoARIMA),
            "AutoTheta" => return Ok(ModelType::AutoTheta),
            "AutoMFLES" => return Ok(ModelType::AutoMFLES),
            "AutoMSTL" => return Ok(ModelType::AutoMSTL),
            "AutoTBATS" => return Ok(ModelType::AutoTBATS),
            "Naive" => return Ok(ModelType::Naive),
            "SMA" => return Ok(ModelType::SMA),
            "SeasonalNaive" => return Ok(ModelType::SeasonalNaive),
            "SES" => return Ok(ModelType::SES),
            "SESOptimized" => return Ok(ModelType::SESOptimized),
            "RandomWalkDrift" | "RandomWalkWithDrift" => return Ok(ModelType::RandomWalkDrift),
            "Holt" => return Ok(ModelType::Holt),
            "HoltWinters" => return Ok(ModelType::HoltWinters),
            "SeasonalES" => return Ok(ModelType::SeasonalES),
            "SeasonalESOptimized" => return Ok(ModelType::SeasonalESOptimized),
            "Theta" => return Ok(ModelType::Theta),
            "OptimizedTheta" => return Ok(ModelType::OptimizedTheta),
            "DynamicTheta" => return Ok(ModelType::DynamicTheta),
            "DynamicOptimizedTheta" => return Ok(ModelType::DynamicOptimizedTheta),
            "ETS" => return Ok(ModelType::ETS),
            "ARIMA" => return Ok(ModelType::ARIMA),
            "MFLES" => return Ok(ModelType::MFLES),
            "MSTL" => return Ok(ModelType::MSTL),
            "TBATS" => return Ok(ModelType::TBATS),
            "CrostonClassic" => return Ok(ModelType::CrostonClassic),
            "CrostonOptimized" => return Ok(ModelType::CrostonOptimized),
            "CrostonSBA" => return Ok(ModelType::CrostonSBA),
            "ADIDA" => return Ok(ModelType::ADIDA),
            "IMAPA" => return Ok(ModelType::IMAPA),
            "TSB" => return Ok(ModelType::TSB),
            _ => {}
        }

        // Case-insensitive aliases for convenience.
        match s.to_lowercase().as_str() {
            "autoets" | "auto_ets" | "auto" => Ok(ModelType::AutoETS),
            "autoarima" | "auto_arima" => Ok(ModelType::AutoARIMA),
            "autotheta" | "auto_theta" => Ok(ModelType::AutoTheta),
            "automfles" | "auto_mfles" => Ok(ModelType::AutoMFLES),
            "automstl" | "auto_mstl" => Ok(ModelType::AutoMSTL),
            "autotbats" | "auto_tbats" => Ok(ModelType::AutoTBATS),
            "naive" => Ok(ModelType::Naive),
            "sma" => Ok(ModelType::SMA),
            "seasonalnaive" | "seasonal_naive" | "snaive" => Ok(ModelType::SeasonalNaive),
            "ses" => Ok(ModelType::SES),
            "sesoptimized" | "ses_optimized" => Ok(ModelType::SESOptimized),
            "randomwalkdrift" | "random_walk_drift" | "rwd" | "drift" => {
                Ok(ModelType::RandomWalkDrift)
            }
            "holt" => Ok(ModelType::Holt),
            "holtwinters" | "holt_winters" | "hw" => Ok(ModelType::HoltWinters),
            "seasonales" | "seasonal_es" => Ok(ModelType::SeasonalES),
            "seasonalesoptimized" | "seasonal_es_optimized" => Ok(ModelType::SeasonalESOptimized),
            "theta" => Ok(ModelType::Theta),
            "optimizedtheta" | "optimized_theta" | "otm" => Ok(ModelType::OptimizedTheta),
            "dynamictheta" | "dynamic_theta" | "dstm" => Ok(ModelType::DynamicTheta),
            "dynamicoptimizedtheta" | "dynamic_optimized_theta" | "dotm" => {
                Ok(ModelType::DynamicOptimizedTheta)
            }
            "ets" => Ok(ModelType::ETS),
            "arima" => Ok(ModelType::ARIMA),
            "mfles" => Ok(ModelType::MFLES),
            "mstl" => Ok(ModelType::MSTL),
            "tbats" => Ok(ModelType::TBATS),
            "crostonclassic" | "croston_classic" | "croston" => Ok(ModelType::CrostonClassic),
            "crostonoptimized" | "croston_optimized" => Ok(ModelType::CrostonOptimized),
            "crostonsba" | "croston_sba" | "sba" => Ok(ModelType::CrostonSBA),
            "adida" => Ok(ModelType::ADIDA),
            "imapa" => Ok(ModelType::IMAPA),
            "tsb" => Ok(ModelType::TSB),
            _ => Err(TsError::InvalidModel(format!("Unknown model: {}", s))),
        }
    }
}

impl ModelType {
    /// Canonical catalog name.
    pub fn name(&self) -> &'static str {
        match self {
            ModelType::AutoETS => "AutoETS",
            ModelType::AutoARIMA => "AutoARIMA",
            ModelType::AutoTheta => "AutoTheta",
            ModelType::AutoMFLES => "AutoMFLES",
            ModelType::AutoMSTL => "AutoMSTL",
            ModelType::AutoTBATS => "AutoTBATS",
            ModelType::Naive => "Naive",
            ModelType::SMA => "SMA",
            ModelType::SeasonalNaive => "SeasonalNaive",
            ModelType::SES => "SES",
            ModelType::SESOptimized => "SESOptimized",
            ModelType::RandomWalkDrift => "RandomWalkDrift",
            ModelType::Holt => "Holt",
            ModelType::HoltWinters => "HoltWinters",
            ModelType::SeasonalES => "SeasonalES",
            ModelType::SeasonalESOptimized => "SeasonalESOptimized",
            ModelType::Theta => "Theta",
            ModelType::OptimizedTheta => "OptimizedTheta",
            ModelType::DynamicTheta => "DynamicTheta",
            ModelType::DynamicOptimizedTheta => "DynamicOptimizedTheta",
            ModelType::ETS => "ETS",
            ModelType::ARIMA => "ARIMA",
            ModelType::MFLES => "MFLES",
            ModelType::MSTL => "MSTL",
            ModelType::TBATS => "TBATS",
            ModelType::CrostonClassic => "CrostonClassic",
            ModelType::CrostonOptimized => "CrostonOptimized",
            ModelType::CrostonSBA => "CrostonSBA",
            ModelType::ADIDA => "ADIDA",
            ModelType::IMAPA => "IMAPA",
            ModelType::TSB => "TSB",
        }
    }

    /// Fewest observations the model accepts.
    pub fn min_series_length(&self) -> usize {
        match self {
            ModelType::Naive | ModelType::SMA | ModelType::SeasonalNaive => 1,
            ModelType::RandomWalkDrift => 2,
            _ => 3,
        }
    }
}

/// All catalog names in catalog order.
pub fn list_models() -> Vec<String> {
    [
        "AutoETS",
        "AutoARIMA",
        "AutoTheta",
        "AutoMFLES",
        "AutoMSTL",
        "AutoTBATS",
        "Naive",
        "SMA",
        "SeasonalNaive",
        "SES",
        "SESOptimized",
        "RandomWalkDrift",
        "Holt",
        "HoltWinters",
        "SeasonalES",
        "SeasonalESOptimized",
        "Theta",
        "OptimizedTheta",
        "DynamicTheta",
        "DynamicOptimizedTheta",
        "ETS",
        "ARIMA",
        "MFLES",
        "MSTL",
        "TBATS",
        "CrostonClassic",
        "CrostonOptimized",
        "CrostonSBA",
        "ADIDA",
        "IMAPA",
        "TSB",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Forecast options.
#[derive(Debug, Clone)]
pub struct ForecastOptions {
    pub model: ModelType,
    /// ETS notation ("AAA", "MNM", "AAdA"); only read by the ETS model.
    pub ets_spec: Option<String>,
    pub horizon: usize,
    /// Confidence level in (0, 1); bound names encode the percentage.
    pub confidence_level: f64,
    /// Seasonal period (0 = auto-detect).
    pub seasonal_period: usize,
    pub auto_detect_seasonality: bool,
    pub include_fitted: bool,
    pub include_residuals: bool,
    /// SMA window; defaults to max(3, period).
    pub window: Option<usize>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    pub phi: Option<f64>,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self {
            model: ModelType::AutoETS,
            ets_spec: None,
            horizon: 12,
            confidence_level: 0.90,
            seasonal_period: 0,
            auto_detect_seasonality: true,
            include_fitted: false,
            include_residuals: false,
            window: None,
            alpha: None,
            beta: None,
            gamma: None,
            phi: None,
        }
    }
}

impl ForecastOptions {
    /// Materialize options from the parameter map. Returns warnings for
    /// unknown keys; malformed values raise.
    pub fn from_params(model: ModelType, horizon: usize, map: &ParamMap) -> Result<(Self, Vec<String>)> {
        let mut options = ForecastOptions {
            model,
            horizon,
            ..Default::default()
        };

        if let Some(p) = map.get_usize("seasonal_period")? {
            options.seasonal_period = p;
            options.auto_detect_seasonality = false;
        }
        if let Some(c) = map.get_f64("confidence_level")? {
            if !(0.0 < c && c < 1.0) {
                return Err(TsError::InvalidParameter {
                    param: "confidence_level".to_string(),
                    value: c.to_string(),
                    reason: "must be in (0, 1)".to_string(),
                });
            }
            options.confidence_level = c;
        }
        if let Some(v) = map.get_bool("include_fitted")? {
            options.include_fitted = v;
        }
        if let Some(v) = map.get_bool("return_insample")? {
            options.include_fitted = v;
            options.include_residuals = v;
        }
        options.window = map.get_usize("window")?;
        options.alpha = map.get_f64_in("alpha", 0.0, 1.0)?;
        options.beta = map.get_f64_in("beta", 0.0, 1.0)?;
        options.gamma = map.get_f64_in("gamma", 0.0, 1.0)?;
        options.phi = map.get_f64_in("phi", 0.0, 1.0)?;
        if let Some(spec) = map.get_str("method") {
            options.ets_spec = Some(spec.to_string());
        }

        Ok((options, map.unknown_key_warnings()))
    }
}

/// Intermediate per-model result before intervals are attached.
struct ModelResult {
    point: Vec<f64>,
    fitted: Option<Vec<f64>>,
    model_name: String,
    aic: Option<f64>,
    bic: Option<f64>,
    /// Residual standard deviation for interval widths.
    sigma: Option<f64>,
}

impl ModelResult {
    fn new(point: Vec<f64>, name: &str) -> Self {
        Self {
            point,
            fitted: None,
            model_name: name.to_string(),
            aic: None,
            bic: None,
            sigma: None,
        }
    }
}

/// Generate forecasts for a time series.
///
/// NULLs are linearly interpolated before modeling. Short series either
/// fall back to the repeat-last baseline (models whose
/// `min_series_length` allows it) or raise `InsufficientData`.
pub fn forecast(values: &[Option<f64>], options: &ForecastOptions) -> Result<ForecastOutput> {
    if options.horizon == 0 {
        return Err(TsError::InvalidParameter {
            param: "horizon".to_string(),
            value: "0".to_string(),
            reason: "horizon must be positive".to_string(),
        });
    }
    if !(0.0 < options.confidence_level && options.confidence_level < 1.0) {
        return Err(TsError::InvalidParameter {
            param: "confidence_level".to_string(),
            value: options.confidence_level.to_string(),
            reason: "must be in (0, 1)".to_string(),
        });
    }

    let clean: Vec<f64> = fill_nulls_interpolate(values)
        .into_iter()
        .filter(|v| v.is_finite())
        .collect();

    if clean.is_empty() {
        return Err(TsError::InsufficientData { needed: 1, got: 0 });
    }

    let needed = options.model.min_series_length();
    if clean.len() < needed {
        return Err(TsError::InsufficientData {
            needed,
            got: clean.len(),
        });
    }

    let period = resolve_period(&clean, options);

    let result = dispatch(&clean, options, period)?;

    let (fitted, residuals, mse) = finish_fitted(&clean, &result);
    let sigma = result.sigma.unwrap_or_else(|| fallback_sigma(&clean, fitted.as_deref()));
    let (lower, upper) = confidence_bounds(&result.point, sigma, options.confidence_level);

    Ok(ForecastOutput {
        point: result.point,
        lower,
        upper,
        fitted: if options.include_fitted { fitted } else { None },
        residuals: if options.include_residuals { residuals } else { None },
        model_name: result.model_name,
        aic: result.aic,
        bic: result.bic,
        mse,
    })
}

fn resolve_period(values: &[f64], options: &ForecastOptions) -> usize {
    if options.seasonal_period > 0 {
        options.seasonal_period
    } else if options.auto_detect_seasonality {
        primary_period(values).unwrap_or(1)
    } else {
        1
    }
}

fn dispatch(values: &[f64], options: &ForecastOptions, period: usize) -> Result<ModelResult> {
    let horizon = options.horizon;
    let checkpoint_config = CheckpointConfig::default();

    match options.model {
        ModelType::Naive => Ok(model_naive(values, horizon)),
        ModelType::SeasonalNaive => Ok(model_seasonal_naive(values, horizon, period)),
        ModelType::SMA => {
            let window = options.window.unwrap_or_else(|| period.max(3));
            if window == 0 {
                return Err(TsError::InvalidParameter {
                    param: "window".to_string(),
                    value: "0".to_string(),
                    reason: "window must be positive".to_string(),
                });
            }
            Ok(model_sma(values, horizon, window))
        }
        ModelType::RandomWalkDrift => Ok(model_drift(values, horizon)),
        ModelType::SES => Ok(model_ses(values, horizon, options.alpha.unwrap_or(0.3))),
        ModelType::SESOptimized => model_ets_with(values, horizon, "ANN", 1, &checkpoint_config)
            .map(|r| ModelResult {
                model_name: "SESOptimized".to_string(),
                ..r
            }),
        ModelType::Holt => Ok(model_holt(
            values,
            horizon,
            options.alpha.unwrap_or(0.3),
            options.beta.unwrap_or(0.1),
        )),
        ModelType::HoltWinters => Ok(model_holt_winters(
            values,
            horizon,
            period,
            options.alpha.unwrap_or(0.3),
            options.beta.unwrap_or(0.1),
            options.gamma.unwrap_or(0.1),
        )),
        ModelType::SeasonalES => Ok(model_seasonal_es(
            values,
            horizon,
            period,
            options.alpha.unwrap_or(0.3),
            options.gamma.unwrap_or(0.1),
        )),
        ModelType::SeasonalESOptimized => {
            if period > 1 && values.len() >= 2 * period {
                model_ets_with(values, horizon, "ANA", period, &checkpoint_config).map(|r| {
                    ModelResult {
                        model_name: "SeasonalESOptimized".to_string(),
                        ..r
                    }
                })
            } else {
                model_ets_with(values, horizon, "ANN", 1, &checkpoint_config).map(|r| ModelResult {
                    model_name: "SeasonalESOptimized".to_string(),
                    ..r
                })
            }
        }
        ModelType::ETS => {
            let notation = match options.ets_spec.as_deref() {
                Some(s) => {
                    // Validate eagerly so a bad notation is an error, not
                    // a silent fallback.
                    EtsSpec::from_notation(s)?;
                    s.to_string()
                }
                None => default_ets_notation(values, period),
            };
            model_ets_with(values, horizon, &notation, period, &checkpoint_config)
        }
        ModelType::AutoETS => {
            let fit = ets_fit::auto_fit(values, period, &checkpoint_config)?;
            Ok(ets_result(fit, horizon))
        }
        ModelType::Theta => model_theta(values, horizon, ThetaVariant::Standard, false),
        ModelType::OptimizedTheta => model_theta(values, horizon, ThetaVariant::Standard, true),
        ModelType::DynamicTheta => model_theta(values, horizon, ThetaVariant::Dynamic, false),
        ModelType::DynamicOptimizedTheta => {
            model_theta(values, horizon, ThetaVariant::Dynamic, true)
        }
        ModelType::AutoTheta => {
            // Try all four flavors, keep the best in-sample MSE.
            let mut best: Option<(f64, ModelResult)> = None;
            for (variant, optimize) in [
                (ThetaVariant::Standard, false),
                (ThetaVariant::Standard, true),
                (ThetaVariant::Dynamic, false),
                (ThetaVariant::Dynamic, true),
            ] {
                if let Ok(fit) = fit_theta(values, variant, optimize, 3) {
                    let mse = fit.mse;
                    let result = theta_result(fit);
                    match &best {
                        Some((best_mse, _)) if *best_mse <= mse => {}
                        _ => best = Some((mse, result)),
                    }
                }
            }
            best.map(|(_, mut r)| {
                r.model_name = "AutoTheta".to_string();
                r
            })
            .ok_or_else(|| {
                TsError::NumericalFailure("No Theta variant could be fitted".to_string())
            })
        }
        ModelType::ARIMA => {
            let fit = arima::fit_arima(values, 1, 1)?;
            Ok(arima_result(fit, horizon, "ARIMA"))
        }
        ModelType::AutoARIMA => {
            let fit = arima::auto_arima(values)?;
            Ok(arima_result(fit, horizon, "AutoARIMA"))
        }
        ModelType::MSTL | ModelType::AutoMSTL => {
            model_mstl(values, horizon, period).map(|mut r| {
                r.model_name = options.model.name().to_string();
                r
            })
        }
        ModelType::MFLES | ModelType::AutoMFLES => {
            model_mfles(values, horizon, period).map(|mut r| {
                r.model_name = options.model.name().to_string();
                r
            })
        }
        ModelType::TBATS | ModelType::AutoTBATS => {
            let mut r = if period > 1 && values.len() >= 2 * period {
                model_holt_winters(values, horizon, period, 0.3, 0.1, 0.1)
            } else {
                model_ses(values, horizon, 0.3)
            };
            r.model_name = options.model.name().to_string();
            Ok(r)
        }
        ModelType::CrostonClassic => model_croston(values, horizon, CrostonVariant::Classic),
        ModelType::CrostonOptimized => model_croston(values, horizon, CrostonVariant::Optimized),
        ModelType::CrostonSBA => model_croston(values, horizon, CrostonVariant::Sba),
        ModelType::TSB => {
            let fit = intermittent::fit_tsb(values, 0.1, 0.1)?;
            Ok(ModelResult::new(fit.forecast(horizon), "TSB"))
        }
        ModelType::ADIDA => {
            let fit = intermittent::fit_adida(values)?;
            Ok(ModelResult::new(fit.forecast(horizon), "ADIDA"))
        }
        ModelType::IMAPA => {
            let fit = intermittent::fit_imapa(values)?;
            Ok(ModelResult::new(fit.forecast(horizon), "IMAPA"))
        }
    }
}

// --- basic models ---

fn model_naive(values: &[f64], horizon: usize) -> ModelResult {
    let last = *values.last().expect("caller validated non-empty");
    let mut fitted = Vec::with_capacity(values.len());
    fitted.push(f64::NAN); // one-step-ahead prediction of the first point is undefined
    fitted.extend_from_slice(&values[..values.len() - 1]);

    ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(vec![last; horizon], "Naive")
    }
}

fn model_seasonal_naive(values: &[f64], horizon: usize, period: usize) -> ModelResult {
    let p = period.clamp(1, values.len());
    let last_season: Vec<f64> = values[values.len() - p..].to_vec();
    let point: Vec<f64> = (0..horizon).map(|i| last_season[i % p]).collect();

    let mut fitted = vec![f64::NAN; p.min(values.len())];
    for i in p..values.len() {
        fitted.push(values[i - p]);
    }

    ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(point, "SeasonalNaive")
    }
}

fn model_sma(values: &[f64], horizon: usize, window: usize) -> ModelResult {
    let w = window.min(values.len());
    let level: f64 = values[values.len() - w..].iter().sum::<f64>() / w as f64;

    let mut fitted = vec![f64::NAN; w.min(values.len())];
    for i in w..values.len() {
        fitted.push(values[i - w..i].iter().sum::<f64>() / w as f64);
    }

    ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(vec![level; horizon], "SMA")
    }
}

fn model_drift(values: &[f64], horizon: usize) -> ModelResult {
    let n = values.len();
    let last = values[n - 1];
    let drift = (last - values[0]) / (n - 1) as f64;

    let point: Vec<f64> = (1..=horizon).map(|h| last + drift * h as f64).collect();

    let mut fitted = Vec::with_capacity(n);
    fitted.push(f64::NAN);
    for i in 1..n {
        fitted.push(values[i - 1] + drift);
    }

    ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(point, "RandomWalkDrift")
    }
}

fn model_ses(values: &[f64], horizon: usize, alpha: f64) -> ModelResult {
    let mut level = values[0];
    let mut fitted = Vec::with_capacity(values.len());
    fitted.push(f64::NAN);

    for &v in &values[1..] {
        fitted.push(level);
        level = alpha * v + (1.0 - alpha) * level;
    }

    ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(vec![level; horizon], "SES")
    }
}

fn model_holt(values: &[f64], horizon: usize, alpha: f64, beta: f64) -> ModelResult {
    if values.len() < 2 {
        return model_ses(values, horizon, alpha);
    }

    let mut level = values[0];
    let mut trend = values[1] - values[0];
    let mut fitted = Vec::with_capacity(values.len());
    fitted.push(f64::NAN);

    for &v in &values[1..] {
        fitted.push(level + trend);
        let prev_level = level;
        level = alpha * v + (1.0 - alpha) * (level + trend);
        trend = beta * (level - prev_level) + (1.0 - beta) * trend;
    }

    let point: Vec<f64> = (1..=horizon).map(|h| level + trend * h as f64).collect();

    ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(point, "Holt")
    }
}

fn model_holt_winters(
    values: &[f64],
    horizon: usize,
    period: usize,
    alpha: f64,
    beta: f64,
    gamma: f64,
) -> ModelResult {
    let p = period.max(2).min(values.len() / 2);
    if values.len() < 2 * p || p < 2 {
        return model_holt(values, horizon, alpha, beta);
    }

    let initial_level: f64 = values[..p].iter().sum::<f64>() / p as f64;
    let mut level = initial_level;
    let mut trend = (values[p..2 * p].iter().sum::<f64>() / p as f64 - initial_level) / p as f64;
    let mut seasonal: Vec<f64> = values[..p]
        .iter()
        .map(|v| v / initial_level.max(0.001))
        .collect();

    let mut fitted = vec![f64::NAN; p];

    for (i, &v) in values.iter().enumerate().skip(p) {
        let s_idx = i % p;
        fitted.push((level + trend) * seasonal[s_idx]);

        let prev_level = level;
        level = alpha * (v / seasonal[s_idx].max(0.001)) + (1.0 - alpha) * (level + trend);
        trend = beta * (level - prev_level) + (1.0 - beta) * trend;
        seasonal[s_idx] = gamma * (v / level.max(0.001)) + (1.0 - gamma) * seasonal[s_idx];
    }

    let point: Vec<f64> = (1..=horizon)
        .map(|h| (level + trend * h as f64) * seasonal[(values.len() + h - 1) % p])
        .collect();

    ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(point, "HoltWinters")
    }
}

fn model_seasonal_es(
    values: &[f64],
    horizon: usize,
    period: usize,
    alpha: f64,
    gamma: f64,
) -> ModelResult {
    let p = period.max(2).min(values.len() / 2);
    if values.len() < 2 * p || p < 2 {
        return model_ses(values, horizon, alpha);
    }

    let initial_level: f64 = values[..p].iter().sum::<f64>() / p as f64;
    let mut level = initial_level;
    let mut seasonal: Vec<f64> = values[..p]
        .iter()
        .map(|v| v / initial_level.max(0.001))
        .collect();

    let mut fitted = vec![f64::NAN; p];

    for (i, &v) in values.iter().enumerate().skip(p) {
        let s_idx = i % p;
        fitted.push(level * seasonal[s_idx]);
        level = alpha * (v / seasonal[s_idx].max(0.001)) + (1.0 - alpha) * level;
        seasonal[s_idx] = gamma * (v / level.max(0.001)) + (1.0 - gamma) * seasonal[s_idx];
    }

    let point: Vec<f64> = (1..=horizon)
        .map(|h| level * seasonal[(values.len() + h - 1) % p])
        .collect();

    ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(point, "SeasonalES")
    }
}

// --- engine-backed models ---

fn default_ets_notation(values: &[f64], period: usize) -> String {
    if period > 1 && values.len() >= 2 * period {
        "AAA".to_string()
    } else if values.len() >= 10 {
        "AAN".to_string()
    } else {
        "ANN".to_string()
    }
}

fn ets_result(fit: ets_fit::EtsFit, horizon: usize) -> ModelResult {
    ModelResult {
        point: fit.forecast(horizon),
        fitted: Some(fit.fitted.clone()),
        model_name: format!("ETS({})", fit.spec.short_name()),
        aic: Some(fit.aic),
        bic: Some(fit.bic),
        sigma: Some(fit.sigma2.max(0.0).sqrt()),
    }
}

fn model_ets_with(
    values: &[f64],
    horizon: usize,
    notation: &str,
    period: usize,
    checkpoint_config: &CheckpointConfig,
) -> Result<ModelResult> {
    let spec = EtsSpec::from_notation(notation)?;
    let m = if spec.has_seasonal() { period.max(2) } else { 1 };
    let fit = ets_fit::fit(&spec, values, m, checkpoint_config)?;

    Ok(ModelResult {
        point: fit.forecast(horizon),
        fitted: Some(fit.fitted.clone()),
        model_name: format!("ETS({})", spec.short_name()),
        aic: Some(fit.aic),
        bic: Some(fit.bic),
        sigma: Some(fit.sigma2.max(0.0).sqrt()),
    })
}

fn theta_result(fit: crate::theta::ThetaFit) -> ModelResult {
    // Horizon is applied by the caller through point regeneration; the
    // stored fit keeps what it needs.
    ModelResult {
        point: vec![],
        fitted: Some(fit.fitted.clone()),
        model_name: match (fit.variant, fit.gradient_report.is_some()) {
            (ThetaVariant::Standard, false) => "Theta".to_string(),
            (ThetaVariant::Standard, true) => "OptimizedTheta".to_string(),
            (ThetaVariant::Dynamic, false) => "DynamicTheta".to_string(),
            (ThetaVariant::Dynamic, true) => "DynamicOptimizedTheta".to_string(),
        },
        aic: None,
        bic: None,
        sigma: Some(fit.mse.max(0.0).sqrt()),
    }
}

fn model_theta(
    values: &[f64],
    horizon: usize,
    variant: ThetaVariant,
    optimize: bool,
) -> Result<ModelResult> {
    let fit = fit_theta(values, variant, optimize, 3)?;
    let point = fit.forecast(horizon);
    let mut result = theta_result(fit);
    result.point = point;
    Ok(result)
}

fn arima_result(fit: arima::ArimaFit, horizon: usize, name: &str) -> ModelResult {
    let k = (fit.p + 2) as f64;
    let n_eff = fit.fitted.iter().filter(|f| f.is_finite()).count() as f64;
    let bic = if n_eff > 0.0 {
        Some(n_eff * fit.sigma2.max(1e-12).ln() + k * n_eff.ln())
    } else {
        None
    };

    ModelResult {
        point: fit.forecast(horizon),
        fitted: Some(fit.fitted.clone()),
        model_name: name.to_string(),
        aic: Some(fit.aic),
        bic,
        sigma: Some(fit.sigma2.max(0.0).sqrt()),
    }
}

fn model_mstl(values: &[f64], horizon: usize, period: usize) -> Result<ModelResult> {
    use crate::decomposition::mstl_decompose;

    let periods: Vec<i32> = if period > 1 { vec![period as i32] } else { vec![] };
    let decomp = mstl_decompose(values, &periods)?;
    let n = values.len();

    // Trend forecast by drift on the trend component.
    let trend_last = *decomp.trend.last().unwrap_or(&0.0);
    let trend_drift = if n > 1 {
        (trend_last - decomp.trend[0]) / (n - 1) as f64
    } else {
        0.0
    };

    let point: Vec<f64> = (1..=horizon)
        .map(|h| {
            let mut v = trend_last + trend_drift * h as f64;
            for (seasonal, &p) in decomp.seasonal.iter().zip(decomp.periods.iter()) {
                let p = p as usize;
                // The STL seasonal component depends only on the cycle
                // position.
                v += seasonal[(n + h - 1) % p];
            }
            v
        })
        .collect();

    let fitted: Vec<f64> = (0..n)
        .map(|i| {
            let seasonal_total: f64 = decomp.seasonal.iter().map(|s| s[i]).sum();
            decomp.trend[i] + seasonal_total
        })
        .collect();

    Ok(ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(point, "MSTL")
    })
}

fn model_mfles(values: &[f64], horizon: usize, period: usize) -> Result<ModelResult> {
    // Linear trend plus smoothed seasonal residual.
    let n = values.len();
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;
    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        ss_xy += dx * (y - y_mean);
        ss_xx += dx * dx;
    }
    let slope = if ss_xx.abs() > f64::EPSILON { ss_xy / ss_xx } else { 0.0 };
    let intercept = y_mean - slope * x_mean;

    let detrended: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(i, &y)| y - (intercept + slope * i as f64))
        .collect();

    // Smoothed seasonal means on the detrended residual.
    let p = if period > 1 && n >= 2 * period { period } else { 0 };
    let seasonal: Vec<f64> = if p > 0 {
        let mut sums = vec![0.0; p];
        let mut counts = vec![0usize; p];
        for (i, &d) in detrended.iter().enumerate() {
            sums[i % p] += d;
            counts[i % p] += 1;
        }
        (0..p)
            .map(|j| if counts[j] > 0 { sums[j] / counts[j] as f64 } else { 0.0 })
            .collect()
    } else {
        vec![]
    };

    let point: Vec<f64> = (1..=horizon)
        .map(|h| {
            let t = (n - 1 + h) as f64;
            let mut v = intercept + slope * t;
            if p > 0 {
                v += seasonal[(n + h - 1) % p];
            }
            v
        })
        .collect();

    let fitted: Vec<f64> = (0..n)
        .map(|i| {
            let mut v = intercept + slope * i as f64;
            if p > 0 {
                v += seasonal[i % p];
            }
            v
        })
        .collect();

    Ok(ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(point, "MFLES")
    })
}

fn model_croston(values: &[f64], horizon: usize, variant: CrostonVariant) -> Result<ModelResult> {
    let fit = intermittent::fit_croston(values, variant)?;
    let fitted =
        intermittent::expand_fitted_demand(values, &fit.demand_fitted, ExpandMode::SeriesLength);
    let name = match variant {
        CrostonVariant::Classic => "CrostonClassic",
        CrostonVariant::Optimized => "CrostonOptimized",
        CrostonVariant::Sba => "CrostonSBA",
    };

    Ok(ModelResult {
        fitted: Some(fitted),
        ..ModelResult::new(fit.forecast(horizon), name)
    })
}

// --- intervals and fitted plumbing ---

fn finish_fitted(
    values: &[f64],
    result: &ModelResult,
) -> (Option<Vec<f64>>, Option<Vec<f64>>, Option<f64>) {
    let fitted = result.fitted.clone();

    let residuals = fitted.as_ref().map(|f| {
        values
            .iter()
            .zip(f.iter())
            .map(|(y, f)| if f.is_finite() { y - f } else { f64::NAN })
            .collect::<Vec<f64>>()
    });

    let mse = residuals.as_ref().and_then(|r| {
        let finite: Vec<f64> = r.iter().filter(|v| v.is_finite()).cloned().collect();
        if finite.is_empty() {
            None
        } else {
            Some(finite.iter().map(|e| e * e).sum::<f64>() / finite.len() as f64)
        }
    });

    (fitted, residuals, mse)
}

fn fallback_sigma(values: &[f64], fitted: Option<&[f64]>) -> f64 {
    if let Some(f) = fitted {
        let errs: Vec<f64> = values
            .iter()
            .zip(f.iter())
            .filter(|(_, f)| f.is_finite())
            .map(|(y, f)| y - f)
            .collect();
        if errs.len() > 1 {
            let mean = errs.iter().sum::<f64>() / errs.len() as f64;
            let var = errs.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / errs.len() as f64;
            return var.sqrt();
        }
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn confidence_bounds(point: &[f64], sigma: f64, confidence: f64) -> (Vec<f64>, Vec<f64>) {
    let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are valid");
    let z = normal.inverse_cdf(0.5 + confidence / 2.0);

    let lower: Vec<f64> = point
        .iter()
        .enumerate()
        .map(|(i, &f)| f - z * sigma * ((i + 1) as f64).sqrt())
        .collect();
    let upper: Vec<f64> = point
        .iter()
        .enumerate()
        .map(|(i, &f)| f + z * sigma * ((i + 1) as f64).sqrt())
        .collect();

    (lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn opts(model: ModelType, horizon: usize) -> ForecastOptions {
        ForecastOptions {
            model,
            horizon,
            auto_detect_seasonality: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_sma_last_three_average() {
        // Input 1..10, window 3, horizon 3 gives the average of the last
        // three values repeated.
        let values: Vec<Option<f64>> = (1..=10).map(|i| Some(i as f64)).collect();
        let options = ForecastOptions {
            window: Some(3),
            ..opts(ModelType::SMA, 3)
        };

        let result = forecast(&values, &options).unwrap();
        assert_eq!(result.point, vec![9.0, 9.0, 9.0]);
        assert_eq!(result.model_name, "SMA");
    }

    #[test]
    fn test_naive_insample_shape() {
        let values = vec![Some(5.0), Some(7.0), Some(6.0), Some(8.0), Some(7.0)];
        let options = ForecastOptions {
            include_fitted: true,
            include_residuals: true,
            ..opts(ModelType::Naive, 1)
        };

        let result = forecast(&values, &options).unwrap();
        assert_eq!(result.point, vec![7.0]);

        let fitted = result.fitted.unwrap();
        assert!(fitted[0].is_nan());
        assert_eq!(&fitted[1..], &[5.0, 7.0, 6.0, 8.0]);
    }

    #[test]
    fn test_drift_continues_slope() {
        let values: Vec<Option<f64>> = (0..10).map(|i| Some(10.0 + 2.0 * i as f64)).collect();
        let result = forecast(&values, &opts(ModelType::RandomWalkDrift, 3)).unwrap();
        assert_relative_eq!(result.point[0], 30.0, epsilon = 1e-9);
        assert_relative_eq!(result.point[2], 34.0, epsilon = 1e-9);
    }

    #[test]
    fn test_seasonal_naive_cycles() {
        let values: Vec<Option<f64>> =
            vec![Some(1.0), Some(2.0), Some(3.0), Some(1.0), Some(2.0), Some(3.0)];
        let options = ForecastOptions {
            seasonal_period: 3,
            ..opts(ModelType::SeasonalNaive, 6)
        };
        let result = forecast(&values, &options).unwrap();
        assert_eq!(result.point, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_ets_fit_and_intervals() {
        let values: Vec<Option<f64>> = (0..48)
            .map(|i| Some(100.0 + 0.5 * i as f64 + ((i % 6) as f64 - 2.5)))
            .collect();
        let options = ForecastOptions {
            seasonal_period: 6,
            include_fitted: true,
            ..opts(ModelType::ETS, 6)
        };

        let result = forecast(&values, &options).unwrap();
        assert_eq!(result.point.len(), 6);
        assert!(result.point.iter().all(|v| v.is_finite()));
        assert!(result.aic.is_some());
        assert!(result.bic.is_some());
        assert!(result.model_name.starts_with("ETS("));

        // Intervals bracket the point forecasts and widen with horizon.
        for i in 0..6 {
            assert!(result.lower[i] < result.point[i]);
            assert!(result.upper[i] > result.point[i]);
        }
        assert!(
            result.upper[5] - result.lower[5] > result.upper[0] - result.lower[0],
            "intervals must widen"
        );
    }

    #[test]
    fn test_ets_bad_notation_is_error() {
        let values: Vec<Option<f64>> = (0..20).map(|i| Some(100.0 + i as f64)).collect();
        let options = ForecastOptions {
            ets_spec: Some("XYZ".to_string()),
            ..opts(ModelType::ETS, 5)
        };
        assert!(forecast(&values, &options).is_err());
    }

    #[test]
    fn test_all_zero_multiplicative_rejected() {
        let values: Vec<Option<f64>> = vec![Some(0.0); 20];
        let options = ForecastOptions {
            ets_spec: Some("MNN".to_string()),
            ..opts(ModelType::ETS, 3)
        };
        assert!(matches!(
            forecast(&values, &options),
            Err(TsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_auto_ets_runs() {
        let values: Vec<Option<f64>> = (0..40).map(|i| Some(50.0 + (i % 7) as f64 * 3.0)).collect();
        let result = forecast(&values, &opts(ModelType::AutoETS, 7)).unwrap();
        assert_eq!(result.point.len(), 7);
        assert!(result.point.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_theta_family() {
        let values: Vec<Option<f64>> = (0..30).map(|i| Some(10.0 + 1.5 * i as f64)).collect();
        for model in [
            ModelType::Theta,
            ModelType::OptimizedTheta,
            ModelType::DynamicTheta,
            ModelType::DynamicOptimizedTheta,
            ModelType::AutoTheta,
        ] {
            let result = forecast(&values, &opts(model, 5)).unwrap();
            assert_eq!(result.point.len(), 5, "{:?}", model);
            assert!(result.point.iter().all(|v| v.is_finite()), "{:?}", model);
        }
    }

    #[test]
    fn test_arima_trend() {
        let values: Vec<Option<f64>> = (0..40).map(|i| Some(5.0 + 2.0 * i as f64)).collect();
        let result = forecast(&values, &opts(ModelType::ARIMA, 3)).unwrap();
        assert!(result.point.iter().all(|v| v.is_finite()));
        assert!(result.point[0] > 80.0);
    }

    #[test]
    fn test_croston_flat() {
        let values: Vec<Option<f64>> = vec![
            Some(0.0),
            Some(0.0),
            Some(5.0),
            Some(0.0),
            Some(0.0),
            Some(0.0),
            Some(3.0),
            Some(0.0),
            Some(4.0),
            Some(0.0),
            Some(0.0),
            Some(6.0),
        ];
        let result = forecast(&values, &opts(ModelType::CrostonClassic, 5)).unwrap();
        assert_eq!(result.point.len(), 5);
        let first = result.point[0];
        assert!(first > 0.0);
        assert!(result.point.iter().all(|v| (*v - first).abs() < 1e-10));
    }

    #[test]
    fn test_mstl_seasonal() {
        let values: Vec<Option<f64>> = (0..72)
            .map(|i| {
                Some(50.0 + 0.2 * i as f64
                    + 6.0 * (2.0 * std::f64::consts::PI * (i % 12) as f64 / 12.0).sin())
            })
            .collect();
        let options = ForecastOptions {
            seasonal_period: 12,
            ..opts(ModelType::MSTL, 12)
        };
        let result = forecast(&values, &options).unwrap();
        assert_eq!(result.model_name, "MSTL");
        assert!(result.point.iter().all(|v| v.is_finite()));
        // Seasonal shape survives into the forecast.
        let spread = result
            .point
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
            - result.point.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(spread > 4.0, "forecast too flat: {:?}", result.point);
    }

    #[test]
    fn test_nulls_interpolated() {
        let values = vec![
            Some(1.0),
            Some(2.0),
            None,
            Some(4.0),
            Some(5.0),
            None,
            Some(7.0),
        ];
        let result = forecast(&values, &opts(ModelType::Naive, 3)).unwrap();
        assert!(result.point.iter().all(|v| v.is_finite()));
        assert_eq!(result.point[0], 7.0);
    }

    #[test]
    fn test_single_point_naive_baseline() {
        let values = vec![Some(42.0)];
        let result = forecast(&values, &opts(ModelType::Naive, 3)).unwrap();
        assert_eq!(result.point, vec![42.0, 42.0, 42.0]);

        // Models that need history refuse instead of crashing.
        assert!(matches!(
            forecast(&values, &opts(ModelType::SES, 3)),
            Err(TsError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let values: Vec<Option<f64>> = (0..10).map(|i| Some(i as f64)).collect();
        assert!(forecast(&values, &opts(ModelType::Naive, 0)).is_err());
    }

    #[test]
    fn test_model_parsing() {
        assert_eq!("Naive".parse::<ModelType>().unwrap(), ModelType::Naive);
        assert_eq!("naive".parse::<ModelType>().unwrap(), ModelType::Naive);
        assert_eq!("hw".parse::<ModelType>().unwrap(), ModelType::HoltWinters);
        assert_eq!(
            "croston".parse::<ModelType>().unwrap(),
            ModelType::CrostonClassic
        );
        assert!("not_a_model".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_list_models_complete() {
        let models = list_models();
        assert_eq!(models.len(), 31);
        for name in &models {
            assert!(name.parse::<ModelType>().is_ok(), "unparsable: {}", name);
        }
    }

    #[test]
    fn test_options_from_params() {
        let map = ParamMap::parse("seasonal_period=12,confidence_level=0.95,window=4,zzz=1");
        let (options, warnings) =
            ForecastOptions::from_params(ModelType::SMA, 6, &map).unwrap();
        assert_eq!(options.seasonal_period, 12);
        assert_eq!(options.confidence_level, 0.95);
        assert_eq!(options.window, Some(4));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("zzz"));
    }

    #[test]
    fn test_bad_confidence_rejected() {
        let map = ParamMap::parse("confidence_level=2.0");
        assert!(ForecastOptions::from_params(ModelType::Naive, 3, &map).is_err());
    }
}
