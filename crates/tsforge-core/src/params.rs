//! Typed materialization of the string-to-string parameter map.
//!
//! The SQL surface passes every option through a MAP(VARCHAR, VARCHAR).
//! Entry points validate that map into typed option structs here:
//! malformed values raise `InvalidParameter`, unknown keys are collected
//! as warnings and otherwise ignored.

use crate::error::{Result, TsError};
use std::collections::BTreeMap;

/// Keys understood by at least one entry point.
pub const KNOWN_KEYS: &[&str] = &[
    "seasonal_period",
    "alpha",
    "beta",
    "gamma",
    "phi",
    "theta",
    "window",
    "confidence_level",
    "include_fitted",
    "return_insample",
    "hazard_lambda",
    "include_probabilities",
    "gap",
    "embargo",
    "window_type",
    "skip_length",
    "min_train_size",
    "method",
    "model",
    "horizon",
];

/// An ordered view of the caller's parameter map.
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    entries: BTreeMap<String, String>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a "key=value,key=value" string (the FFI's flattened form).
    pub fn parse(s: &str) -> Self {
        let entries = s
            .split(',')
            .filter_map(|pair| {
                let pair = pair.trim();
                if pair.is_empty() {
                    return None;
                }
                let (k, v) = pair.split_once('=')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
                TsError::InvalidParameter {
                    param: key.to_string(),
                    value: raw.clone(),
                    reason: "expected a number".to_string(),
                }
            }),
        }
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<usize>().map(Some).map_err(|_| {
                TsError::InvalidParameter {
                    param: key.to_string(),
                    value: raw.clone(),
                    reason: "expected a non-negative integer".to_string(),
                }
            }),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(TsError::InvalidParameter {
                    param: key.to_string(),
                    value: raw.clone(),
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }

    /// A value constrained to a closed range.
    pub fn get_f64_in(&self, key: &str, lo: f64, hi: f64) -> Result<Option<f64>> {
        match self.get_f64(key)? {
            None => Ok(None),
            Some(v) if v >= lo && v <= hi => Ok(Some(v)),
            Some(v) => Err(TsError::InvalidParameter {
                param: key.to_string(),
                value: v.to_string(),
                reason: format!("must be in [{}, {}]", lo, hi),
            }),
        }
    }

    /// Warnings for keys no entry point understands. Deterministic order
    /// (the map is sorted).
    pub fn unknown_key_warnings(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter(|k| !KNOWN_KEYS.contains(&k.as_str()))
            .map(|k| format!("Unknown parameter '{}' ignored", k))
            .collect()
    }
}
