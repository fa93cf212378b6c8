//! Per-group aggregate state engines.
//!
//! Aggregate functions (ts_forecast_agg, ts_stats_agg, ts_features_agg,
//! ts_detect_changepoints_agg, ts_detect_periods_agg,
//! ts_data_quality_agg) share one accumulate-then-finalize state shape:
//! two heap-backed vectors (timestamps, values), a one-shot initialized
//! flag, and a parameter snapshot taken from the first valid row.
//! Combine appends the source's vectors; finalize sorts by timestamp
//! and hands the series to the matching kernel. A group with zero valid
//! observations produces NULL (surfaced as DataQuality here).

use crate::changepoint::{detect_changepoints_bocpd, BocpdResult};
use crate::error::{Result, TsError};
use crate::features::extract_features;
use crate::forecast::{forecast, ForecastOptions, ForecastOutput, ModelType};
use crate::params::ParamMap;
use crate::periods::{detect_periods, DetectedPeriod, PeriodMethod};
use crate::quality::{compute_data_quality, DataQuality};
use crate::stats::{compute_ts_stats, TsStats};
use std::collections::BTreeMap;

/// Parameter snapshot from the first valid row of a group.
#[derive(Debug, Clone)]
pub struct AggregateParams {
    pub model: String,
    pub horizon: usize,
    pub params: ParamMap,
}

impl Default for AggregateParams {
    fn default() -> Self {
        Self {
            model: "AutoETS".to_string(),
            horizon: 12,
            params: ParamMap::new(),
        }
    }
}

/// Accumulating per-group state. The struct header is small and
/// trivially movable; the row storage lives on the heap.
#[derive(Debug, Clone, Default)]
pub struct AggregateState {
    initialized: bool,
    params: Option<AggregateParams>,
    timestamps: Vec<i64>,
    values: Vec<Option<f64>>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn n_valid(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn params(&self) -> Option<&AggregateParams> {
        self.params.as_ref()
    }

    /// Accumulate one row. The parameter snapshot is taken from the
    /// first valid row and kept for the lifetime of the group.
    pub fn update(
        &mut self,
        timestamp: i64,
        value: Option<f64>,
        params: impl FnOnce() -> AggregateParams,
    ) {
        if !self.initialized && value.is_some() {
            self.params = Some(params());
            self.initialized = true;
        }
        self.timestamps.push(timestamp);
        self.values.push(value);
    }

    /// Merge a partial aggregate into this one (appending; ordering is
    /// restored at finalize).
    pub fn combine(&mut self, mut other: AggregateState) {
        if !self.initialized && other.initialized {
            self.params = other.params.take();
            self.initialized = true;
        }
        self.timestamps.append(&mut other.timestamps);
        self.values.append(&mut other.values);
    }

    /// Rows sorted by timestamp.
    pub fn sorted_series(&self) -> (Vec<i64>, Vec<Option<f64>>) {
        let mut order: Vec<usize> = (0..self.timestamps.len()).collect();
        order.sort_by_key(|&i| self.timestamps[i]);
        (
            order.iter().map(|&i| self.timestamps[i]).collect(),
            order.iter().map(|&i| self.values[i]).collect(),
        )
    }

    fn require_valid(&self) -> Result<Vec<f64>> {
        let (_, values) = self.sorted_series();
        let dense: Vec<f64> = values.iter().filter_map(|v| *v).collect();
        if dense.is_empty() {
            return Err(TsError::DataQuality(
                "Group has no valid observations".to_string(),
            ));
        }
        Ok(dense)
    }

    /// Finalize as a forecast using the snapshotted model and horizon.
    pub fn finalize_forecast(&self) -> Result<ForecastOutput> {
        if self.n_valid() == 0 {
            return Err(TsError::DataQuality(
                "Group has no valid observations".to_string(),
            ));
        }
        let snapshot = self.params.clone().unwrap_or_default();
        let model: ModelType = snapshot.model.parse()?;
        let (options, _warnings) =
            ForecastOptions::from_params(model, snapshot.horizon, &snapshot.params)?;

        let (_, values) = self.sorted_series();
        forecast(&values, &options)
    }

    /// Finalize as the 24-metric statistics bundle.
    pub fn finalize_stats(&self) -> Result<TsStats> {
        if self.is_empty() {
            return Err(TsError::DataQuality("Empty group".to_string()));
        }
        let (_, values) = self.sorted_series();
        compute_ts_stats(&values)
    }

    /// Finalize as the feature catalog.
    pub fn finalize_features(&self) -> Result<BTreeMap<String, f64>> {
        let dense = self.require_valid()?;
        extract_features(&dense)
    }

    /// Finalize as BOCPD changepoints.
    pub fn finalize_changepoints(
        &self,
        hazard_lambda: f64,
        include_probabilities: bool,
    ) -> Result<BocpdResult> {
        let dense = self.require_valid()?;
        detect_changepoints_bocpd(&dense, hazard_lambda, include_probabilities)
    }

    /// Finalize as detected seasonal periods.
    pub fn finalize_periods(&self, method: PeriodMethod) -> Result<Vec<DetectedPeriod>> {
        let dense = self.require_valid()?;
        detect_periods(&dense, method)
    }

    /// Finalize as a data-quality assessment.
    pub fn finalize_quality(&self) -> Result<DataQuality> {
        if self.is_empty() {
            return Err(TsError::DataQuality("Empty group".to_string()));
        }
        let (timestamps, values) = self.sorted_series();
        compute_data_quality(&values, Some(&timestamps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_state(n: usize) -> AggregateState {
        let mut state = AggregateState::new();
        for i in 0..n {
            state.update(i as i64, Some(10.0 + (i % 4) as f64), || AggregateParams {
                model: "Naive".to_string(),
                horizon: 3,
                params: ParamMap::new(),
            });
        }
        state
    }

    #[test]
    fn test_snapshot_taken_once() {
        let mut state = AggregateState::new();
        state.update(0, None, || AggregateParams {
            model: "SMA".to_string(),
            ..Default::default()
        });
        // NULL first row: not initialized yet.
        assert!(!state.is_initialized());

        state.update(1, Some(1.0), || AggregateParams {
            model: "Naive".to_string(),
            ..Default::default()
        });
        assert!(state.is_initialized());

        // A later row must not replace the snapshot.
        state.update(2, Some(2.0), || AggregateParams {
            model: "HoltWinters".to_string(),
            ..Default::default()
        });
        assert_eq!(state.params().unwrap().model, "Naive");
    }

    #[test]
    fn test_combine_appends_and_adopts_params() {
        let mut target = AggregateState::new();
        target.update(5, None, AggregateParams::default);

        let mut source = AggregateState::new();
        source.update(1, Some(1.0), || AggregateParams {
            model: "SES".to_string(),
            ..Default::default()
        });
        source.update(3, Some(3.0), AggregateParams::default);

        target.combine(source);
        assert_eq!(target.len(), 3);
        assert!(target.is_initialized());
        assert_eq!(target.params().unwrap().model, "SES");
    }

    #[test]
    fn test_finalize_sorts_by_timestamp() {
        let mut state = AggregateState::new();
        // Out-of-order arrival.
        for (ts, v) in [(3, 4.0), (1, 2.0), (0, 1.0), (2, 3.0)] {
            state.update(ts, Some(v), AggregateParams::default);
        }
        let (timestamps, values) = state.sorted_series();
        assert_eq!(timestamps, vec![0, 1, 2, 3]);
        assert_eq!(
            values,
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]
        );
    }

    #[test]
    fn test_finalize_forecast_uses_snapshot() {
        let mut state = AggregateState::new();
        for (ts, v) in [(0, 5.0), (1, 7.0), (2, 6.0), (3, 8.0), (4, 7.0)] {
            state.update(ts, Some(v), || AggregateParams {
                model: "Naive".to_string(),
                horizon: 2,
                params: ParamMap::new(),
            });
        }

        let output = state.finalize_forecast().unwrap();
        assert_eq!(output.point, vec![7.0, 7.0]);
        assert_eq!(output.model_name, "Naive");
    }

    #[test]
    fn test_all_null_group_is_data_quality_error() {
        let mut state = AggregateState::new();
        state.update(0, None, AggregateParams::default);
        state.update(1, None, AggregateParams::default);

        assert!(matches!(
            state.finalize_forecast(),
            Err(TsError::DataQuality(_))
        ));
        assert!(matches!(
            state.finalize_features(),
            Err(TsError::DataQuality(_))
        ));
    }

    #[test]
    fn test_finalize_stats_and_quality() {
        let state = filled_state(40);
        let stats = state.finalize_stats().unwrap();
        assert_eq!(stats.length, 40);
        assert_eq!(stats.n_nulls, 0);

        let quality = state.finalize_quality().unwrap();
        assert!(quality.overall_score > 0.5);
    }

    #[test]
    fn test_finalize_changepoints() {
        let mut state = AggregateState::new();
        for i in 0..20 {
            let v = if i < 10 { 1.0 } else { 25.0 };
            state.update(i, Some(v), AggregateParams::default);
        }
        let result = state.finalize_changepoints(100.0, false).unwrap();
        assert!(!result.changepoint_indices.is_empty());
    }

    #[test]
    fn test_finalize_periods() {
        let mut state = AggregateState::new();
        for i in 0..96i64 {
            let v = (2.0 * std::f64::consts::PI * (i % 12) as f64 / 12.0).sin();
            state.update(i, Some(v), AggregateParams::default);
        }
        let periods = state.finalize_periods(PeriodMethod::Fft).unwrap();
        assert!(!periods.is_empty());
        assert!((periods[0].period as i64 - 12).abs() <= 1);
    }
}
