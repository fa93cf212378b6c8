//! Missing value imputation.
//!
//! Backs the `ts_fill_nulls_*` functions. Const/mean/interpolate return
//! dense vectors; forward/backward keep NULLs where no donor value
//! exists.

/// Fill NULL values with a constant. Idempotent.
pub fn fill_nulls_const(values: &[Option<f64>], fill_value: f64) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(fill_value)).collect()
}

/// Fill NULL values with the last observed value (forward fill / LOCF).
pub fn fill_nulls_forward(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());
    let mut last_value: Option<f64> = None;

    for v in values {
        match v {
            Some(x) => {
                last_value = Some(*x);
                result.push(Some(*x));
            }
            None => result.push(last_value),
        }
    }

    result
}

/// Fill NULL values with the next observed value (backward fill / NOCB).
pub fn fill_nulls_backward(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut result = vec![None; values.len()];
    let mut next_value: Option<f64> = None;

    for (i, v) in values.iter().enumerate().rev() {
        match v {
            Some(x) => {
                next_value = Some(*x);
                result[i] = Some(*x);
            }
            None => result[i] = next_value,
        }
    }

    result
}

/// Fill NULL values with the series mean. All-NULL input produces NaN.
pub fn fill_nulls_mean(values: &[Option<f64>]) -> Vec<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values.iter().flatten() {
        sum += v;
        count += 1;
    }

    if count == 0 {
        return vec![f64::NAN; values.len()];
    }

    let mean = sum / count as f64;
    values.iter().map(|v| v.unwrap_or(mean)).collect()
}

/// Fill NULL values with linear interpolation; edge NULLs take the
/// nearest observed value.
pub fn fill_nulls_interpolate(values: &[Option<f64>]) -> Vec<f64> {
    if values.is_empty() {
        return vec![];
    }

    let mut result: Vec<f64> = vec![f64::NAN; values.len()];

    let Some(first) = values.iter().position(|v| v.is_some()) else {
        return result;
    };
    let last = values
        .iter()
        .rposition(|v| v.is_some())
        .unwrap_or(first);

    let first_val = values[first].unwrap_or(f64::NAN);
    for item in result.iter_mut().take(first) {
        *item = first_val;
    }
    let last_val = values[last].unwrap_or(f64::NAN);
    for item in result.iter_mut().skip(last + 1) {
        *item = last_val;
    }

    let mut prev_idx = first;
    let mut prev_val = first_val;
    result[first] = prev_val;

    for i in (first + 1)..=last {
        if let Some(v) = values[i] {
            let gap = i - prev_idx;
            if gap > 1 {
                let slope = (v - prev_val) / gap as f64;
                for j in 1..gap {
                    result[prev_idx + j] = prev_val + slope * j as f64;
                }
            }
            result[i] = v;
            prev_idx = i;
            prev_val = v;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fill_nulls_const() {
        let values = vec![Some(1.0), None, Some(3.0), None];
        assert_eq!(fill_nulls_const(&values, 0.0), vec![1.0, 0.0, 3.0, 0.0]);
    }

    #[test]
    fn test_fill_nulls_const_idempotent() {
        // Applying twice equals applying once.
        let values = vec![Some(1.0), None, Some(3.0)];
        let once = fill_nulls_const(&values, 7.0);
        let as_options: Vec<Option<f64>> = once.iter().map(|v| Some(*v)).collect();
        assert_eq!(fill_nulls_const(&as_options, 7.0), once);
    }

    #[test]
    fn test_fill_nulls_forward() {
        let values = vec![Some(1.0), None, None, Some(4.0), None];
        assert_eq!(
            fill_nulls_forward(&values),
            vec![Some(1.0), Some(1.0), Some(1.0), Some(4.0), Some(4.0)]
        );
    }

    #[test]
    fn test_fill_nulls_forward_leading_null_stays() {
        let values = vec![None, Some(2.0), None];
        assert_eq!(
            fill_nulls_forward(&values),
            vec![None, Some(2.0), Some(2.0)]
        );
    }

    #[test]
    fn test_fill_nulls_backward() {
        let values = vec![None, Some(2.0), None, Some(4.0), None];
        assert_eq!(
            fill_nulls_backward(&values),
            vec![Some(2.0), Some(2.0), Some(4.0), Some(4.0), None]
        );
    }

    #[test]
    fn test_fill_nulls_mean() {
        let values = vec![Some(1.0), None, Some(3.0), None, Some(5.0)];
        let result = fill_nulls_mean(&values);
        assert_relative_eq!(result[1], 3.0, epsilon = 1e-9);
        assert_relative_eq!(result[3], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fill_nulls_mean_all_null() {
        let values = vec![None, None];
        assert!(fill_nulls_mean(&values).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_fill_nulls_interpolate() {
        let values = vec![Some(1.0), None, None, Some(4.0)];
        let result = fill_nulls_interpolate(&values);
        assert_relative_eq!(result[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(result[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(result[2], 3.0, epsilon = 1e-9);
        assert_relative_eq!(result[3], 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fill_nulls_interpolate_edges() {
        let values = vec![None, Some(2.0), None, Some(4.0), None];
        let result = fill_nulls_interpolate(&values);
        assert_relative_eq!(result[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(result[4], 4.0, epsilon = 1e-9);
    }
}
