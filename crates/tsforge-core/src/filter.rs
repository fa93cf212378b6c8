//! Series filtering and preprocessing.
//!
//! Backs the `ts_drop_*` and `ts_diff` data-prep functions: constant and
//! short-series detection, edge-zero trimming, and differencing.

use crate::error::Result;

/// Checks if a series is constant (all non-NULL values are the same).
///
/// Fewer than two non-NULL values also count as constant.
pub fn is_constant(values: &[Option<f64>]) -> bool {
    let mut first: Option<f64> = None;
    for v in values.iter().flatten() {
        match first {
            None => first = Some(*v),
            Some(f) => {
                if (v - f).abs() >= f64::EPSILON {
                    return false;
                }
            }
        }
    }
    true
}

/// Checks if a series has fewer than `min_length` non-NULL values.
pub fn is_short(values: &[Option<f64>], min_length: usize) -> bool {
    values.iter().filter(|v| v.is_some()).count() < min_length
}

/// Indices of series with variation (not constant).
pub fn filter_constant(series_list: &[Vec<Option<f64>>]) -> Vec<usize> {
    series_list
        .iter()
        .enumerate()
        .filter(|(_, s)| !is_constant(s))
        .map(|(i, _)| i)
        .collect()
}

/// Indices of series with at least `min_length` non-NULL values.
pub fn filter_short(series_list: &[Vec<Option<f64>>], min_length: usize) -> Vec<usize> {
    series_list
        .iter()
        .enumerate()
        .filter(|(_, s)| !is_short(s, min_length))
        .map(|(i, _)| i)
        .collect()
}

/// Drop leading zeros from a series. NULLs do not count as zeros and
/// stop the trim.
pub fn drop_leading_zeros(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let first_nonzero = values
        .iter()
        .position(|v| match v {
            Some(x) => x.abs() > f64::EPSILON,
            None => true,
        })
        .unwrap_or(values.len());

    values[first_nonzero..].to_vec()
}

/// Drop trailing zeros from a series.
pub fn drop_trailing_zeros(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let last_nonzero = values
        .iter()
        .rposition(|v| match v {
            Some(x) => x.abs() > f64::EPSILON,
            None => true,
        })
        .map(|i| i + 1)
        .unwrap_or(0);

    values[..last_nonzero].to_vec()
}

/// Drop both leading and trailing zeros from a series.
pub fn drop_edge_zeros(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let trimmed = drop_leading_zeros(values);
    drop_trailing_zeros(&trimmed)
}

/// Compute the difference of a series at the given order.
///
/// Order 0 is the identity; each higher order shortens the series by
/// one.
pub fn diff(values: &[f64], order: usize) -> Result<Vec<f64>> {
    if order == 0 {
        return Ok(values.to_vec());
    }

    let mut result = values.to_vec();

    for _ in 0..order {
        if result.len() < 2 {
            return Ok(vec![]);
        }

        result = result.windows(2).map(|w| w[1] - w[0]).collect();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_constant() {
        assert!(is_constant(&[Some(1.0), Some(1.0), Some(1.0)]));
        assert!(!is_constant(&[Some(1.0), Some(2.0), Some(1.0)]));
        assert!(is_constant(&[Some(1.0), None, Some(1.0)]));
        assert!(is_constant(&[Some(7.0)]));
        assert!(is_constant(&[]));
    }

    #[test]
    fn test_is_short() {
        let with_nulls = vec![Some(1.0), None, Some(3.0), None, Some(5.0)];
        assert!(!is_short(&with_nulls, 3));
        assert!(is_short(&with_nulls, 4));
    }

    #[test]
    fn test_drop_leading_zeros() {
        let values = vec![Some(0.0), Some(0.0), Some(1.0), Some(2.0), Some(0.0)];
        assert_eq!(
            drop_leading_zeros(&values),
            vec![Some(1.0), Some(2.0), Some(0.0)]
        );
    }

    #[test]
    fn test_drop_leading_zeros_idempotent_without_leading_zeros() {
        // A series with no leading zeros comes back unchanged.
        let values = vec![Some(3.0), Some(0.0), Some(2.0)];
        assert_eq!(drop_leading_zeros(&values), values);
    }

    #[test]
    fn test_drop_trailing_zeros() {
        let values = vec![Some(0.0), Some(1.0), Some(2.0), Some(0.0), Some(0.0)];
        assert_eq!(
            drop_trailing_zeros(&values),
            vec![Some(0.0), Some(1.0), Some(2.0)]
        );
    }

    #[test]
    fn test_drop_edge_zeros_all_zeros() {
        let values = vec![Some(0.0), Some(0.0), Some(0.0)];
        assert!(drop_edge_zeros(&values).is_empty());
    }

    #[test]
    fn test_null_stops_trim() {
        let values = vec![Some(0.0), None, Some(0.0), Some(2.0)];
        assert_eq!(
            drop_leading_zeros(&values),
            vec![None, Some(0.0), Some(2.0)]
        );
    }

    #[test]
    fn test_diff_orders() {
        let values = vec![1.0, 2.0, 4.0, 7.0];
        assert_eq!(diff(&values, 0).unwrap(), values);
        assert_eq!(diff(&values, 1).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(diff(&values, 2).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_diff_then_cumsum_recovers() {
        // diff(1) followed by a partial sum anchored at the first value
        // reproduces the series.
        let values = vec![3.0, 5.0, 4.5, 8.0, 9.0];
        let d = diff(&values, 1).unwrap();
        let mut rebuilt = vec![values[0]];
        for v in d {
            rebuilt.push(rebuilt.last().unwrap() + v);
        }
        assert_eq!(rebuilt, values);
    }

    #[test]
    fn test_filter_collections() {
        let series_list = vec![
            vec![Some(1.0), Some(1.0), Some(1.0)],
            vec![Some(1.0), Some(2.0), Some(3.0)],
            vec![Some(5.0)],
            vec![Some(0.0), Some(1.0)],
        ];
        assert_eq!(filter_constant(&series_list), vec![1, 3]);
        assert_eq!(filter_short(&series_list, 3), vec![0, 1]);
    }
}
