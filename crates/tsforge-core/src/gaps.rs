//! Gap filling and series extension.
//!
//! Backs `ts_fill_gaps`: missing timestamps get explicit NULL rows so
//! downstream kernels see a regular grid.

use crate::error::{Result, TsError};

/// Fill gaps in a time series by inserting NULL values at missing
/// timestamps.
///
/// Rows are sorted by timestamp first; `frequency` is the expected
/// spacing in the timestamp's unit.
pub fn fill_gaps(
    timestamps: &[i64],
    values: &[Option<f64>],
    frequency: i64,
) -> Result<(Vec<i64>, Vec<Option<f64>>)> {
    if timestamps.len() != values.len() {
        return Err(TsError::InvalidInput(
            "Timestamps and values must have the same length".to_string(),
        ));
    }
    if frequency <= 0 {
        return Err(TsError::InvalidParameter {
            param: "frequency".to_string(),
            value: frequency.to_string(),
            reason: "must be positive".to_string(),
        });
    }

    if timestamps.is_empty() {
        return Ok((vec![], vec![]));
    }
    if timestamps.len() == 1 {
        return Ok((timestamps.to_vec(), values.to_vec()));
    }

    let mut pairs: Vec<(i64, Option<f64>)> = timestamps
        .iter()
        .cloned()
        .zip(values.iter().cloned())
        .collect();
    pairs.sort_by_key(|(t, _)| *t);

    let mut out_ts = Vec::with_capacity(pairs.len());
    let mut out_vals = Vec::with_capacity(pairs.len());

    out_ts.push(pairs[0].0);
    out_vals.push(pairs[0].1);

    for window in pairs.windows(2) {
        let (prev_ts, _) = window[0];
        let (curr_ts, curr_val) = window[1];

        let steps = (curr_ts - prev_ts) / frequency;
        for step in 1..steps {
            out_ts.push(prev_ts + step * frequency);
            out_vals.push(None);
        }

        out_ts.push(curr_ts);
        out_vals.push(curr_val);
    }

    Ok((out_ts, out_vals))
}

/// Extend a series forward with NULL rows up to `target`.
pub fn fill_forward(
    timestamps: &[i64],
    values: &[Option<f64>],
    target: i64,
    frequency: i64,
) -> Result<(Vec<i64>, Vec<Option<f64>>)> {
    if frequency <= 0 {
        return Err(TsError::InvalidParameter {
            param: "frequency".to_string(),
            value: frequency.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if timestamps.is_empty() {
        return Ok((vec![], vec![]));
    }

    let mut out_ts = timestamps.to_vec();
    let mut out_vals = values.to_vec();

    let last = *timestamps.iter().max().unwrap_or(&0);
    let mut current = last + frequency;
    while current <= target {
        out_ts.push(current);
        out_vals.push(None);
        current += frequency;
    }

    Ok((out_ts, out_vals))
}

/// Detect the sampling frequency as the mode of positive timestamp
/// deltas.
pub fn detect_frequency(timestamps: &[i64]) -> Result<i64> {
    if timestamps.len() < 2 {
        return Err(TsError::InsufficientData {
            needed: 2,
            got: timestamps.len(),
        });
    }

    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();

    let mut counts = std::collections::HashMap::new();
    for w in sorted.windows(2) {
        let d = w[1] - w[0];
        if d > 0 {
            *counts.entry(d).or_insert(0usize) += 1;
        }
    }

    counts
        .into_iter()
        // Tie-break toward the smaller delta for determinism.
        .max_by(|(d1, c1), (d2, c2)| c1.cmp(c2).then(d2.cmp(d1)))
        .map(|(d, _)| d)
        .ok_or_else(|| TsError::InvalidInput("Could not detect frequency".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_gaps() {
        let ts = vec![0, 100, 300];
        let values = vec![Some(1.0), Some(2.0), Some(3.0)];
        let (out_ts, out_vals) = fill_gaps(&ts, &values, 100).unwrap();

        assert_eq!(out_ts, vec![0, 100, 200, 300]);
        assert_eq!(out_vals, vec![Some(1.0), Some(2.0), None, Some(3.0)]);
    }

    #[test]
    fn test_fill_gaps_sorts_input() {
        let ts = vec![300, 0, 100];
        let values = vec![Some(3.0), Some(1.0), Some(2.0)];
        let (out_ts, out_vals) = fill_gaps(&ts, &values, 100).unwrap();

        assert_eq!(out_ts, vec![0, 100, 200, 300]);
        assert_eq!(out_vals[0], Some(1.0));
        assert_eq!(out_vals[3], Some(3.0));
    }

    #[test]
    fn test_fill_gaps_no_gaps_unchanged() {
        let ts = vec![0, 10, 20];
        let values = vec![Some(1.0), None, Some(3.0)];
        let (out_ts, out_vals) = fill_gaps(&ts, &values, 10).unwrap();
        assert_eq!(out_ts, ts);
        assert_eq!(out_vals, values);
    }

    #[test]
    fn test_fill_forward() {
        let ts = vec![0, 100];
        let values = vec![Some(1.0), Some(2.0)];
        let (out_ts, out_vals) = fill_forward(&ts, &values, 400, 100).unwrap();

        assert_eq!(out_ts, vec![0, 100, 200, 300, 400]);
        assert_eq!(out_vals[2], None);
        assert_eq!(out_vals[4], None);
    }

    #[test]
    fn test_detect_frequency() {
        let ts = vec![0, 100, 200, 300, 450, 550];
        assert_eq!(detect_frequency(&ts).unwrap(), 100);
    }

    #[test]
    fn test_invalid_frequency_rejected() {
        assert!(fill_gaps(&[0, 1], &[None, None], 0).is_err());
    }
}
