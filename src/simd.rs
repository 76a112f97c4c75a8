//! Vector kernels.
//!
//! `dot` and `l2_distance_squared` come from `innr`, which picks a SIMD
//! implementation for the running CPU. Residual subtraction stays local.
//!
//! ```rust
//! use ivfpq::simd::{dot, l2_distance_squared};
//!
//! let a = [1.0_f32, 0.0, 0.0];
//! let b = [0.5_f32, 0.5, 0.0];
//!
//! assert!((dot(&a, &b) - 0.5).abs() < 1e-6);
//! assert!((l2_distance_squared(&a, &b) - 0.5).abs() < 1e-6);
//! ```

pub use innr::{dot, l2_distance_squared};

/// `out[i] = a[i] - b[i]`.
#[inline]
pub fn sub_into(a: &[f32], b: &[f32], out: &mut [f32]) {
    debug_assert!(a.len() == b.len() && out.len() >= a.len());
    for ((o, x), y) in out.iter_mut().zip(a).zip(b) {
        *o = x - y;
    }
}
