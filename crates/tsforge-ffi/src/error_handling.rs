//! Standardized error handling for FFI functions.
//!
//! Every exported function follows the same shape: initialize the error
//! output to success, run the core call inside `catch_unwind`, translate
//! a Rust error into the error buffer, never unwind across the
//! boundary.

use crate::types::{ErrorCode, TsForgeError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tsforge_core::TsError;

/// Initialize error output to success state.
///
/// # Safety
/// The error pointer must be valid if non-null.
#[inline]
pub unsafe fn init_error(out_error: *mut TsForgeError) {
    if !out_error.is_null() {
        *out_error = TsForgeError::success();
    }
}

/// Set an error on the output error pointer.
///
/// # Safety
/// The error pointer must be valid if non-null.
#[inline]
pub unsafe fn set_error(out_error: *mut TsForgeError, code: ErrorCode, message: &str) {
    if !out_error.is_null() {
        (*out_error).set_error(code, message);
    }
}

/// Translate a core error into the FFI error buffer.
///
/// # Safety
/// The error pointer must be valid if non-null.
#[inline]
pub unsafe fn set_core_error(out_error: *mut TsForgeError, error: &TsError) {
    set_error(
        out_error,
        ErrorCode::from_core_code(error.to_code()),
        &error.to_string(),
    );
}

/// Check a pointer list for nulls, setting NullPointer on the first hit.
///
/// # Safety
/// The error pointer must be valid if non-null.
#[inline]
pub unsafe fn check_null_pointers(
    out_error: *mut TsForgeError,
    ptrs: &[*const core::ffi::c_void],
) -> bool {
    for ptr in ptrs {
        if ptr.is_null() {
            set_error(out_error, ErrorCode::NullPointer, "Null pointer argument");
            return true;
        }
    }
    false
}

/// Execute a fallible core call with panic catching and error
/// translation. Returns `Some(value)` on success, `None` on error.
///
/// # Safety
/// The error pointer must be valid if non-null.
pub unsafe fn ffi_try<F, T>(out_error: *mut TsForgeError, f: F) -> Option<T>
where
    F: FnOnce() -> Result<T, TsError>,
{
    init_error(out_error);

    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            set_core_error(out_error, &e);
            None
        }
        Err(_) => {
            set_error(out_error, ErrorCode::PanicCaught, "Panic in Rust code");
            None
        }
    }
}
