//! PostHog telemetry integration for anonymous usage tracking.
//!
//! Opt-out telemetry for collecting anonymous usage statistics. Users
//! can disable it via:
//! - Environment variable: TSFORGE_DISABLE_TELEMETRY=1
//! - SQL setting: SET tsforge_telemetry_enabled = false;

use std::env;
use std::ffi::{c_char, CStr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

#[cfg(feature = "telemetry")]
use std::thread;

/// Global telemetry enabled flag
static TELEMETRY_ENABLED: AtomicBool = AtomicBool::new(true);

/// PostHog API key
static TELEMETRY_KEY: OnceLock<String> = OnceLock::new();

/// Anonymous distinct ID (generated once per session)
#[cfg(feature = "telemetry")]
static DISTINCT_ID: OnceLock<String> = OnceLock::new();

/// Initialize telemetry with the given settings.
pub fn init_telemetry(enabled: bool, api_key: Option<&str>) {
    // Environment opt-out wins over everything.
    if env::var("TSFORGE_DISABLE_TELEMETRY").is_ok() {
        TELEMETRY_ENABLED.store(false, Ordering::SeqCst);
        return;
    }

    TELEMETRY_ENABLED.store(enabled, Ordering::SeqCst);

    if let Some(key) = api_key {
        if !key.is_empty() {
            let _ = TELEMETRY_KEY.set(key.to_string());
        }
    }

    #[cfg(feature = "telemetry")]
    {
        let _ = DISTINCT_ID.set(uuid::Uuid::new_v4().to_string());
    }
}

/// Check if telemetry is enabled.
pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.load(Ordering::SeqCst)
}

/// Capture a telemetry event. Events are sent from a detached thread so
/// query execution never blocks on the network.
#[cfg(feature = "telemetry")]
pub fn capture_event(event: &str, properties: serde_json::Value) {
    if !is_enabled() {
        return;
    }

    let api_key = match TELEMETRY_KEY.get() {
        Some(key) if !key.is_empty() => key.clone(),
        _ => return,
    };

    let distinct_id = DISTINCT_ID.get().cloned().unwrap_or_default();
    let event_name = event.to_string();

    thread::spawn(move || {
        let payload = serde_json::json!({
            "api_key": api_key,
            "event": event_name,
            "properties": {
                "distinct_id": distinct_id,
                "crate": "tsforge-ffi",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "custom": properties,
        });

        let _ = ureq::post("https://eu.i.posthog.com/capture/")
            .timeout(std::time::Duration::from_secs(3))
            .send_json(payload);
    });
}

/// No-op when the telemetry feature is disabled.
#[cfg(not(feature = "telemetry"))]
pub fn capture_event(_event: &str) {}

/// FFI: initialize telemetry from the extension load hook.
///
/// # Safety
/// `api_key` must be null or a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tsforge_telemetry_init(enabled: bool, api_key: *const c_char) {
    let key = if api_key.is_null() {
        None
    } else {
        CStr::from_ptr(api_key).to_str().ok()
    };
    init_telemetry(enabled, key);
}

/// FFI: flip the enabled flag at run time (SQL setting hook).
#[no_mangle]
pub extern "C" fn tsforge_telemetry_set_enabled(enabled: bool) {
    TELEMETRY_ENABLED.store(enabled, Ordering::SeqCst);
}

/// FFI: query the enabled flag.
#[no_mangle]
pub extern "C" fn tsforge_telemetry_is_enabled() -> bool {
    is_enabled()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_disable_roundtrip() {
        tsforge_telemetry_set_enabled(true);
        assert!(tsforge_telemetry_is_enabled());
        tsforge_telemetry_set_enabled(false);
        assert!(!tsforge_telemetry_is_enabled());
        tsforge_telemetry_set_enabled(true);
    }
}
