//! Parameter conversion utilities for FFI functions.
//!
//! Helpers for the common C-side encodings: "0 or negative means unset",
//! null-or-invalid strings fall back to a default.

use core::ffi::{c_char, c_double, c_int};
use std::ffi::CStr;

/// Convert a `c_int` to `Option<usize>`, where values <= 0 become None.
#[inline]
pub fn to_option_usize(value: c_int) -> Option<usize> {
    if value > 0 {
        Some(value as usize)
    } else {
        None
    }
}

/// Convert a `c_double` to `Option<f64>`, where negative values become
/// None (the unset sentinel for smoothing parameters).
#[inline]
pub fn to_option_f64_nonnegative(value: c_double) -> Option<f64> {
    if value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

/// Convert a C string pointer to a Rust `&str` with a default value.
///
/// # Safety
/// The pointer must be null or point to a valid null-terminated string.
#[inline]
pub unsafe fn c_str_to_str(ptr: *const c_char, default: &str) -> &str {
    if ptr.is_null() {
        default
    } else {
        CStr::from_ptr(ptr).to_str().unwrap_or(default)
    }
}

/// Read a fixed-size char buffer as a string, stopping at the first NUL.
pub fn buffer_to_string(buffer: &[c_char]) -> String {
    let bytes: Vec<u8> = buffer
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Parse a C string to a type that implements FromStr, with a default.
///
/// # Safety
/// The pointer must be null or point to a valid null-terminated string.
pub unsafe fn c_str_parse<T>(ptr: *const c_char, default: T) -> T
where
    T: std::str::FromStr,
{
    if ptr.is_null() {
        return default;
    }

    match CStr::from_ptr(ptr).to_str() {
        Ok(s) => s.parse().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_to_option_usize() {
        assert_eq!(to_option_usize(5), Some(5));
        assert_eq!(to_option_usize(0), None);
        assert_eq!(to_option_usize(-1), None);
    }

    #[test]
    fn test_to_option_f64_nonnegative() {
        assert_eq!(to_option_f64_nonnegative(0.3), Some(0.3));
        assert_eq!(to_option_f64_nonnegative(0.0), Some(0.0));
        assert_eq!(to_option_f64_nonnegative(-1.0), None);
    }

    #[test]
    fn test_c_str_to_str() {
        let c_string = CString::new("hello").unwrap();
        unsafe {
            assert_eq!(c_str_to_str(c_string.as_ptr(), "default"), "hello");
            assert_eq!(c_str_to_str(std::ptr::null(), "default"), "default");
        }
    }

    #[test]
    fn test_buffer_to_string() {
        let mut buffer = [0 as c_char; 8];
        for (i, b) in "SMA".bytes().enumerate() {
            buffer[i] = b as c_char;
        }
        assert_eq!(buffer_to_string(&buffer), "SMA");
        assert_eq!(buffer_to_string(&[0; 4]), "");
    }

    #[test]
    fn test_c_str_parse() {
        let c_string = CString::new("42").unwrap();
        unsafe {
            assert_eq!(c_str_parse::<i32>(c_string.as_ptr(), 0), 42);
            assert_eq!(c_str_parse::<i32>(std::ptr::null(), 99), 99);
        }
    }
}
