//! Core forecasting engine for the tsforge DuckDB extension.
//!
//! This crate provides the Rust implementation of time series analysis
//! and forecasting: the ETS state-space engine with analytical
//! gradients, bound-constrained optimization, the parallel group
//! operator behind the table-streaming functions, cross-validation
//! backtesting, metrics, feature extraction, and changepoint/period
//! detection.

pub mod aggregate;
pub mod arima;
pub mod backtest;
pub mod changepoint;
pub mod checkpoint;
pub mod decomposition;
pub mod error;
pub mod ets;
pub mod ets_backward;
pub mod ets_fit;
pub mod features;
pub mod filter;
pub mod forecast;
pub mod gaps;
pub mod imputation;
pub mod intermittent;
pub mod lbfgsb;
pub mod metrics;
pub mod params;
pub mod partition;
pub mod periods;
pub mod quality;
pub mod seasonality;
pub mod simd;
pub mod stats;
pub mod theta;

// Re-exports for convenience
pub use aggregate::{AggregateParams, AggregateState};
pub use backtest::{
    backtest, generate_folds, training_slice, BacktestResult, CvConfig, CvFold, FoldMetrics,
    WindowStrategy,
};
pub use changepoint::{detect_changepoints, detect_changepoints_bocpd, BocpdResult};
pub use checkpoint::{build_checkpoints, CheckpointConfig, CheckpointSet};
pub use decomposition::{mstl_decompose, MstlDecomposition};
pub use error::{Result, TsError};
pub use ets::{
    forecast_from_state, negative_log_likelihood, run_forward, ErrorComponent, EtsParams, EtsSpec,
    EtsState, EtsTrajectory, SeasonComponent, TrendComponent,
};
pub use ets_backward::{run_backward, run_backward_checkpointed, EtsGradients};
pub use ets_fit::{auto_fit, fit, EtsFit};
pub use features::{
    compute_feature, extract_features, list_features, FeatureParams, FeatureRegistry, SeriesCache,
};
pub use filter::{
    diff, drop_edge_zeros, drop_leading_zeros, drop_trailing_zeros, filter_constant, filter_short,
    is_constant, is_short,
};
pub use forecast::{forecast, list_models, ForecastOptions, ForecastOutput, ModelType};
pub use gaps::{detect_frequency, fill_forward, fill_gaps};
pub use imputation::{
    fill_nulls_backward, fill_nulls_const, fill_nulls_forward, fill_nulls_interpolate,
    fill_nulls_mean,
};
pub use intermittent::{
    expand_fitted_demand, expand_fitted_intervals, fit_adida, fit_croston, fit_imapa, fit_tsb,
    CrostonVariant, ExpandMode, IntermittentFit,
};
pub use lbfgsb::{at_bound_with_outward_gradient, minimize, LbfgsbConfig, LbfgsbResult};
pub use metrics::{
    bias, coverage, mae, mape, mase, mqloss, mse, quantile_loss, r2, rmae, rmse, smape,
};
pub use params::ParamMap;
pub use partition::{
    CancelToken, FinalizePoll, GroupRow, GroupTransform, GroupedOperator, InputRow, OperatorPhase,
    WorkerState,
};
pub use periods::{
    aic_comparison, autoperiod, detect_periods, estimate_period_acf, estimate_period_fft,
    primary_period, DetectedPeriod, PeriodMethod, SinglePeriodResult,
};
pub use quality::{compute_data_quality, generate_quality_report, DataQuality, QualityReport,
    QualityThresholds};
pub use seasonality::{
    analyze_seasonality, detect_seasonality, seasonal_strength, trend_strength,
    SeasonalityAnalysis,
};
pub use stats::{compute_ts_stats, compute_ts_stats_with_dates, FrequencyType, TsStats};
pub use theta::{
    fit_theta, numerical_gradient, GradientMode, GradientReport, ParamKind, ThetaFit,
    ThetaVariant, ThetaWorkspace,
};
