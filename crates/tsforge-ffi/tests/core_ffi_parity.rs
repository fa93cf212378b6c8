//! Core-vs-FFI parity integration tests.
//!
//! For every model in `list_models()`, the Rust core `forecast()` is
//! called directly and then the FFI `tsforge_ts_forecast()` with
//! identical inputs; both must produce bit-identical results since the
//! FFI layer is a thin translation shim. The grouped streaming operator
//! and the metric/BOCPD entry points get the same treatment.

use std::ffi::{c_char, CStr};

use tsforge_ffi::types::{
    BocpdResult, ForecastOptions as FfiForecastOptions, ForecastResult, GroupOpKind,
    GroupOutputRow, TsForgeError,
};
use tsforge_ffi::{
    tsforge_free_bocpd_result, tsforge_free_forecast_result, tsforge_free_group_rows,
    tsforge_groupop_finalize, tsforge_groupop_free, tsforge_groupop_new, tsforge_groupop_sink,
    tsforge_groupop_worker_free, tsforge_groupop_worker_new, tsforge_ts_detect_changepoints,
    tsforge_ts_forecast, tsforge_ts_mae,
};

use tsforge_core::forecast::{forecast, list_models, ForecastOptions, ModelType};

// -- Synthetic data generators ------------------------------------------

/// Seasonal time series: 60 points with period 12, trend, and
/// deterministic "noise".
fn seasonal_data() -> Vec<f64> {
    (0..60)
        .map(|i| {
            let trend = 10.0 + 0.15 * i as f64;
            let season = 5.0 * (2.0 * std::f64::consts::PI * i as f64 / 12.0).sin();
            let noise = ((i * 7 + 3) % 11) as f64 * 0.1 - 0.5;
            trend + season + noise
        })
        .collect()
}

/// Intermittent demand data: mostly zeros with sporadic non-zero values.
fn intermittent_data() -> Vec<f64> {
    vec![0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 5.0, 0.0, 2.0, 0.0, 0.0, 7.0, 0.0, 0.0, 4.0, 0.0]
}

// -- Helpers ------------------------------------------------------------

fn make_ffi_options(model_name: &str, horizon: i32, seasonal_period: i32) -> FfiForecastOptions {
    let mut opts = FfiForecastOptions::default();
    for (i, &b) in model_name.as_bytes().iter().enumerate().take(31) {
        opts.model[i] = b as c_char;
    }
    opts.model[model_name.len().min(31)] = 0;
    opts.horizon = horizon;
    opts.seasonal_period = seasonal_period;
    opts.confidence_level = 0.95;
    opts.auto_detect_seasonality = false;
    opts.include_fitted = true;
    opts.include_residuals = true;
    opts
}

struct FfiOutput {
    point: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    fitted: Option<Vec<f64>>,
    model_name: String,
}

fn call_ffi(data: &[f64], opts: &FfiForecastOptions) -> Result<FfiOutput, String> {
    let n_words = data.len().div_ceil(64);
    let validity: Vec<u64> = vec![u64::MAX; n_words];

    let mut result = ForecastResult::default();
    let mut error = TsForgeError::default();

    let ok = unsafe {
        tsforge_ts_forecast(
            data.as_ptr(),
            validity.as_ptr(),
            data.len(),
            opts as *const _,
            &mut result as *mut _,
            &mut error as *mut _,
        )
    };

    if !ok {
        let msg = unsafe { CStr::from_ptr(error.message.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        return Err(msg);
    }

    let read_array = |ptr: *mut f64, len: usize| -> Vec<f64> {
        if ptr.is_null() || len == 0 {
            vec![]
        } else {
            unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
        }
    };

    let output = FfiOutput {
        point: read_array(result.point, result.horizon),
        lower: read_array(result.lower, result.horizon),
        upper: read_array(result.upper, result.horizon),
        fitted: if result.fitted.is_null() {
            None
        } else {
            Some(read_array(result.fitted, result.n_insample))
        },
        model_name: unsafe { CStr::from_ptr(result.model_name.as_ptr()) }
            .to_string_lossy()
            .into_owned(),
    };

    unsafe { tsforge_free_forecast_result(&mut result as *mut _) };
    Ok(output)
}

fn assert_bits_equal(a: &[f64], b: &[f64], label: &str, model: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch for {}", label, model);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            x.to_bits() == y.to_bits(),
            "{}: bit mismatch for {} at {}: {} vs {}",
            label,
            model,
            i,
            x,
            y
        );
    }
}

// -- Tests --------------------------------------------------------------

#[test]
fn test_forecast_parity_all_models() {
    let seasonal = seasonal_data();
    let intermittent = intermittent_data();

    for model_name in list_models() {
        let model: ModelType = model_name.parse().expect("catalog name parses");
        let data: &[f64] = if matches!(
            model,
            ModelType::CrostonClassic
                | ModelType::CrostonOptimized
                | ModelType::CrostonSBA
                | ModelType::ADIDA
                | ModelType::IMAPA
                | ModelType::TSB
        ) {
            &intermittent
        } else {
            &seasonal
        };

        let core_options = ForecastOptions {
            model,
            horizon: 6,
            seasonal_period: 12,
            auto_detect_seasonality: false,
            confidence_level: 0.95,
            include_fitted: true,
            include_residuals: true,
            ..Default::default()
        };
        let series: Vec<Option<f64>> = data.iter().map(|&v| Some(v)).collect();
        let core = forecast(&series, &core_options);

        let ffi = call_ffi(data, &make_ffi_options(&model_name, 6, 12));

        match (core, ffi) {
            (Ok(core), Ok(ffi)) => {
                assert_bits_equal(&core.point, &ffi.point, "point", &model_name);
                assert_bits_equal(&core.lower, &ffi.lower, "lower", &model_name);
                assert_bits_equal(&core.upper, &ffi.upper, "upper", &model_name);
                if let (Some(cf), Some(ff)) = (&core.fitted, &ffi.fitted) {
                    assert_bits_equal(cf, ff, "fitted", &model_name);
                }
                assert_eq!(core.model_name, ffi.model_name, "name for {}", model_name);
            }
            (Err(_), Err(_)) => {
                // Both sides reject identically shaped input; fine.
            }
            (core, ffi) => {
                panic!(
                    "core/ffi disagree for {}: core ok={}, ffi ok={}",
                    model_name,
                    core.is_ok(),
                    ffi.is_ok()
                );
            }
        }
    }
}

#[test]
fn test_metric_parity() {
    let actual = vec![1.0, 2.0, 3.0, 4.0];
    let predicted = vec![1.1, 2.1, 2.9, 4.2];

    let core = tsforge_core::mae(&actual, &predicted).unwrap();

    let mut ffi_value = f64::NAN;
    let mut error = TsForgeError::default();
    let ok = unsafe {
        tsforge_ts_mae(
            actual.as_ptr(),
            actual.len(),
            predicted.as_ptr(),
            predicted.len(),
            &mut ffi_value as *mut _,
            &mut error as *mut _,
        )
    };
    assert!(ok);
    assert_eq!(core.to_bits(), ffi_value.to_bits());
}

#[test]
fn test_metric_length_mismatch_reported() {
    let actual = vec![1.0, 2.0];
    let predicted = vec![1.0];

    let mut ffi_value = f64::NAN;
    let mut error = TsForgeError::default();
    let ok = unsafe {
        tsforge_ts_mae(
            actual.as_ptr(),
            actual.len(),
            predicted.as_ptr(),
            predicted.len(),
            &mut ffi_value as *mut _,
            &mut error as *mut _,
        )
    };
    assert!(!ok);
    let msg = unsafe { CStr::from_ptr(error.message.as_ptr()) }.to_string_lossy();
    assert!(msg.contains("length"), "unexpected message: {}", msg);
}

#[test]
fn test_bocpd_level_shift_via_ffi() {
    let values = vec![1.0, 1.0, 1.0, 1.0, 1.0, 10.0, 10.0, 10.0, 10.0, 10.0];

    let mut result = BocpdResult::default();
    let mut error = TsForgeError::default();
    let ok = unsafe {
        tsforge_ts_detect_changepoints(
            values.as_ptr(),
            std::ptr::null(),
            values.len(),
            100.0,
            true,
            &mut result as *mut _,
            &mut error as *mut _,
        )
    };
    assert!(ok);
    assert_eq!(result.length, values.len());
    assert_eq!(result.n_changepoints, 1);

    let indices = unsafe { std::slice::from_raw_parts(result.changepoint_indices, 1) };
    assert!((4..=6).contains(&indices[0]), "index {}", indices[0]);

    unsafe { tsforge_free_bocpd_result(&mut result as *mut _) };
}

#[test]
fn test_groupop_fill_gaps_end_to_end() {
    // Many groups streamed through the operator from several threads;
    // every (group, timestamp) must come back exactly once, with the
    // gap rows added.
    let n_groups = 500usize;
    let n_threads = 4usize;
    let chunk_capacity = 256usize;

    let mut error = TsForgeError::default();
    let handle = unsafe {
        tsforge_groupop_new(
            GroupOpKind::FillGaps,
            n_threads,
            chunk_capacity,
            1, // frequency
            0,
            std::ptr::null(),
            0,
            std::ptr::null(),
            &mut error as *mut _,
        )
    };
    assert!(!handle.is_null());

    let handle_addr = handle as usize;
    let collected: Vec<(String, i64, bool)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..n_threads)
            .map(|tid| {
                scope.spawn(move || {
                    let handle = handle_addr as *mut tsforge_ffi::GroupOperatorHandle;
                    let worker = tsforge_groupop_worker_new();

                    // Each group has timestamps 0, 1, 3 (gap at 2); rows
                    // are dealt round-robin across threads.
                    let mut keys_storage: Vec<std::ffi::CString> = Vec::new();
                    let mut timestamps: Vec<i64> = Vec::new();
                    let mut values: Vec<f64> = Vec::new();

                    for g in 0..n_groups {
                        for (j, ts) in [0i64, 1, 3].iter().enumerate() {
                            if (g * 3 + j) % n_threads == tid {
                                keys_storage
                                    .push(std::ffi::CString::new(format!("g{}", g)).unwrap());
                                timestamps.push(*ts);
                                values.push(g as f64);
                            }
                        }
                    }
                    let key_ptrs: Vec<*const c_char> =
                        keys_storage.iter().map(|k| k.as_ptr()).collect();

                    let mut local_error = TsForgeError::default();
                    for chunk_start in (0..key_ptrs.len()).step_by(97) {
                        let end = (chunk_start + 97).min(key_ptrs.len());
                        let ok = unsafe {
                            tsforge_groupop_sink(
                                handle,
                                worker,
                                key_ptrs[chunk_start..end].as_ptr(),
                                timestamps[chunk_start..end].as_ptr(),
                                values[chunk_start..end].as_ptr(),
                                std::ptr::null(),
                                end - chunk_start,
                                &mut local_error as *mut _,
                            )
                        };
                        assert!(ok);
                    }

                    // Drain.
                    let mut rows: Vec<GroupOutputRow> = (0..chunk_capacity)
                        .map(|_| GroupOutputRow {
                            key: std::ptr::null_mut(),
                            timestamp: 0,
                            value: f64::NAN,
                            value_is_null: false,
                            error_message: std::ptr::null_mut(),
                        })
                        .collect();

                    let mut out = Vec::new();
                    loop {
                        let mut count = 0usize;
                        let mut has_more = false;
                        let ok = unsafe {
                            tsforge_groupop_finalize(
                                handle,
                                worker,
                                rows.as_mut_ptr(),
                                &mut count as *mut _,
                                &mut has_more as *mut _,
                                &mut local_error as *mut _,
                            )
                        };
                        assert!(ok);

                        for row in rows.iter().take(count) {
                            let key = unsafe { CStr::from_ptr(row.key) }
                                .to_string_lossy()
                                .into_owned();
                            out.push((key, row.timestamp, row.value_is_null));
                        }
                        unsafe { tsforge_free_group_rows(rows.as_mut_ptr(), count) };

                        if !has_more {
                            break;
                        }
                    }

                    unsafe { tsforge_groupop_worker_free(worker) };
                    out
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    unsafe { tsforge_groupop_free(handle) };

    // Each group: 4 rows (0, 1, 2-null, 3).
    assert_eq!(collected.len(), n_groups * 4);

    let mut seen = std::collections::HashSet::new();
    for (key, ts, is_null) in &collected {
        assert!(seen.insert((key.clone(), *ts)), "duplicate {} @ {}", key, ts);
        if *ts == 2 {
            assert!(is_null, "gap row for {} must be NULL", key);
        }
    }
}

#[test]
fn test_groupop_forecast_kind() {
    let mut error = TsForgeError::default();
    let model = std::ffi::CString::new("Naive").unwrap();
    let handle = unsafe {
        tsforge_groupop_new(
            GroupOpKind::Forecast,
            2,
            64,
            0,
            0,
            model.as_ptr(),
            3,
            std::ptr::null(),
            &mut error as *mut _,
        )
    };
    assert!(!handle.is_null());

    let worker = tsforge_groupop_worker_new();
    let keys: Vec<std::ffi::CString> = (0..10)
        .map(|i| std::ffi::CString::new(format!("k{}", i % 2)).unwrap())
        .collect();
    let key_ptrs: Vec<*const c_char> = keys.iter().map(|k| k.as_ptr()).collect();
    let timestamps: Vec<i64> = (0..10).map(|i| (i / 2) as i64).collect();
    let values: Vec<f64> = (0..10).map(|i| i as f64).collect();

    let ok = unsafe {
        tsforge_groupop_sink(
            handle,
            worker,
            key_ptrs.as_ptr(),
            timestamps.as_ptr(),
            values.as_ptr(),
            std::ptr::null(),
            10,
            &mut error as *mut _,
        )
    };
    assert!(ok);

    let mut rows: Vec<GroupOutputRow> = (0..64)
        .map(|_| GroupOutputRow {
            key: std::ptr::null_mut(),
            timestamp: 0,
            value: f64::NAN,
            value_is_null: false,
            error_message: std::ptr::null_mut(),
        })
        .collect();

    let mut total = 0usize;
    loop {
        let mut count = 0usize;
        let mut has_more = false;
        let ok = unsafe {
            tsforge_groupop_finalize(
                handle,
                worker,
                rows.as_mut_ptr(),
                &mut count as *mut _,
                &mut has_more as *mut _,
                &mut error as *mut _,
            )
        };
        assert!(ok);
        for row in rows.iter().take(count) {
            assert!(!row.value_is_null);
            assert!(row.error_message.is_null());
        }
        unsafe { tsforge_free_group_rows(rows.as_mut_ptr(), count) };
        total += count;
        if !has_more {
            break;
        }
    }

    // Two groups, horizon 3.
    assert_eq!(total, 6);

    unsafe {
        tsforge_groupop_worker_free(worker);
        tsforge_groupop_free(handle);
    }
}
