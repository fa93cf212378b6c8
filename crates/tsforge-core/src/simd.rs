//! Batched numeric kernels with runtime-dispatched SIMD variants.
//!
//! Three primitives back the hot loops of the ETS engine: scaled
//! accumulation, variance normalization, and dot product. Each has a
//! scalar implementation and an AVX2 implementation processing four
//! doubles per lane; the CPU capability is probed once per process and
//! cached. Results may differ from the scalar version only by reduction
//! order (bounded by n * eps * max|operand|).

use std::sync::atomic::{AtomicU8, Ordering};

/// Minimum element count before the SIMD path is worth dispatching.
const SIMD_THRESHOLD: usize = 8;

const PROBE_UNKNOWN: u8 = 0;
const PROBE_SCALAR: u8 = 1;
const PROBE_AVX2: u8 = 2;

static CPU_PROBE: AtomicU8 = AtomicU8::new(PROBE_UNKNOWN);

/// Returns true when the AVX2 kernels are usable on this CPU.
///
/// The probe runs once and is cached; subsequent calls are a relaxed
/// atomic load.
pub fn avx2_available() -> bool {
    match CPU_PROBE.load(Ordering::Relaxed) {
        PROBE_AVX2 => true,
        PROBE_SCALAR => false,
        _ => {
            let detected = probe_avx2();
            CPU_PROBE.store(
                if detected { PROBE_AVX2 } else { PROBE_SCALAR },
                Ordering::Relaxed,
            );
            detected
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn probe_avx2() -> bool {
    std::arch::is_x86_feature_detected!("avx2")
}

#[cfg(not(target_arch = "x86_64"))]
fn probe_avx2() -> bool {
    false
}

/// `out[i] += scale * in[i]` for i in 0..n.
pub fn accumulate(out: &mut [f64], input: &[f64], scale: f64) {
    let n = out.len().min(input.len());
    #[cfg(target_arch = "x86_64")]
    if n >= SIMD_THRESHOLD && avx2_available() {
        unsafe { accumulate_avx2(&mut out[..n], &input[..n], scale) };
        return;
    }
    accumulate_scalar(&mut out[..n], &input[..n], scale);
}

/// `out[i] = in[i] / sigma2`. The reciprocal is computed once.
pub fn normalize(out: &mut [f64], input: &[f64], sigma2: f64) {
    let n = out.len().min(input.len());
    let inv = 1.0 / sigma2;
    #[cfg(target_arch = "x86_64")]
    if n >= SIMD_THRESHOLD && avx2_available() {
        unsafe { scale_avx2(&mut out[..n], &input[..n], inv) };
        return;
    }
    for i in 0..n {
        out[i] = input[i] * inv;
    }
}

/// Dot product of `a` and `b`.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    #[cfg(target_arch = "x86_64")]
    if n >= SIMD_THRESHOLD && avx2_available() {
        return unsafe { dot_avx2(&a[..n], &b[..n]) };
    }
    dot_scalar(&a[..n], &b[..n])
}

/// Division with a guard against tiny denominators.
///
/// Denominators below 1e-10 in magnitude are replaced by a
/// sign-preserving 1e-10. Part of the numerically-safe model contract,
/// not a convenience.
#[inline]
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den.abs() < 1e-10 {
        let sign = if den.is_sign_negative() { -1.0 } else { 1.0 };
        num / (1e-10 * sign)
    } else {
        num / den
    }
}

pub(crate) fn accumulate_scalar(out: &mut [f64], input: &[f64], scale: f64) {
    for (o, &x) in out.iter_mut().zip(input.iter()) {
        *o += scale * x;
    }
}

pub(crate) fn dot_scalar(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn accumulate_avx2(out: &mut [f64], input: &[f64], scale: f64) {
    use std::arch::x86_64::*;

    let n = out.len();
    let chunks = n / 4;
    let s = _mm256_set1_pd(scale);

    for c in 0..chunks {
        let i = c * 4;
        let o = _mm256_loadu_pd(out.as_ptr().add(i));
        let x = _mm256_loadu_pd(input.as_ptr().add(i));
        let r = _mm256_add_pd(o, _mm256_mul_pd(s, x));
        _mm256_storeu_pd(out.as_mut_ptr().add(i), r);
    }

    // Scalar tail
    for i in (chunks * 4)..n {
        out[i] += scale * input[i];
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn scale_avx2(out: &mut [f64], input: &[f64], factor: f64) {
    use std::arch::x86_64::*;

    let n = out.len();
    let chunks = n / 4;
    let s = _mm256_set1_pd(factor);

    for c in 0..chunks {
        let i = c * 4;
        let x = _mm256_loadu_pd(input.as_ptr().add(i));
        _mm256_storeu_pd(out.as_mut_ptr().add(i), _mm256_mul_pd(s, x));
    }

    for i in (chunks * 4)..n {
        out[i] = input[i] * factor;
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
pub(crate) unsafe fn dot_avx2(a: &[f64], b: &[f64]) -> f64 {
    use std::arch::x86_64::*;

    let n = a.len();
    let chunks = n / 4;
    let mut acc = _mm256_setzero_pd();

    for c in 0..chunks {
        let i = c * 4;
        let x = _mm256_loadu_pd(a.as_ptr().add(i));
        let y = _mm256_loadu_pd(b.as_ptr().add(i));
        acc = _mm256_add_pd(acc, _mm256_mul_pd(x, y));
    }

    // Horizontal reduction: extract high lane, add pairs.
    let hi = _mm256_extractf128_pd(acc, 1);
    let lo = _mm256_castpd256_pd128(acc);
    let sum2 = _mm_add_pd(hi, lo);
    let swapped = _mm_unpackhi_pd(sum2, sum2);
    let sum1 = _mm_add_sd(sum2, swapped);
    let mut total = _mm_cvtsd_f64(sum1);

    for i in (chunks * 4)..n {
        total += a[i] * b[i];
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i as f64 * 0.37).sin() + 0.01 * i as f64).collect()
    }

    #[test]
    fn test_accumulate_matches_scalar() {
        for n in [0, 1, 3, 7, 8, 9, 31, 100] {
            let input = series(n);
            let mut out_a = series(n);
            let mut out_b = out_a.clone();

            accumulate(&mut out_a, &input, 2.5);
            accumulate_scalar(&mut out_b, &input, 2.5);

            for (a, b) in out_a.iter().zip(out_b.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_normalize() {
        let input = vec![2.0, 4.0, 8.0, 16.0, 1.0, 3.0, 5.0, 7.0, 9.0];
        let mut out = vec![0.0; input.len()];
        normalize(&mut out, &input, 2.0);
        for (o, x) in out.iter().zip(input.iter()) {
            assert_relative_eq!(*o, x / 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dot_matches_scalar() {
        for n in [0, 1, 4, 8, 13, 64, 257] {
            let a = series(n);
            let b: Vec<f64> = series(n).iter().map(|v| v * 1.7 - 0.3).collect();

            let fast = dot(&a, &b);
            let slow = dot_scalar(&a, &b);

            // Reduction order may differ; bound by n * eps * max operand.
            let bound = (n as f64).max(1.0) * 1e-12;
            assert!((fast - slow).abs() <= bound.max(1e-12) * slow.abs().max(1.0));
        }
    }

    #[test]
    fn test_safe_div() {
        assert_relative_eq!(safe_div(1.0, 2.0), 0.5);
        assert!(safe_div(1.0, 0.0).is_finite());
        assert!(safe_div(1.0, 1e-300) > 0.0);
        assert!(safe_div(1.0, -1e-300) < 0.0);
    }

    #[test]
    fn test_probe_is_stable() {
        let first = avx2_available();
        for _ in 0..8 {
            assert_eq!(avx2_available(), first);
        }
    }
}
