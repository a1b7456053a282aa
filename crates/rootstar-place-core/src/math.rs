//! Numerics for place-field estimation and decoding
//!
//! This module provides:
//! - Gaussian smoothing kernels (1D window and normalized 2D kernel)
//! - 2D convolution with symmetric boundary handling
//! - Centered moving average
//! - Sorted-array search and finite-difference gradients
//! - Row-major arg-max and coefficient of determination (R²)

use ndarray::{Array2, ArrayView2};

use crate::error::{CoreError, CoreResult};

// ============================================================================
// Gaussian Kernels
// ============================================================================

/// Gaussian window of `len` points with standard deviation `std` (in points).
///
/// `w[n] = exp(-0.5 * ((n - (len - 1) / 2) / std)^2)`, peak value 1.
pub fn gaussian_window(len: usize, std: f64) -> Vec<f64> {
    let center = (len as f64 - 1.0) / 2.0;
    (0..len)
        .map(|n| {
            let z = (n as f64 - center) / std;
            (-0.5 * z * z).exp()
        })
        .collect()
}

/// Normalized 2D Gaussian kernel (outer product of two windows, sums to 1)
pub fn gaussian_kernel_2d(len: usize, std: f64) -> CoreResult<Array2<f64>> {
    if len == 0 {
        return Err(CoreError::invalid("kernel_len", "must be at least 1"));
    }
    if !std.is_finite() || std <= 0.0 {
        return Err(CoreError::invalid("kernel_std", format!("must be positive, got {std}")));
    }
    let w = gaussian_window(len, std);
    let mut kernel = Array2::from_shape_fn((len, len), |(i, j)| w[i] * w[j]);
    let total = kernel.sum();
    kernel /= total;
    Ok(kernel)
}

// ============================================================================
// Convolution
// ============================================================================

/// Reflect an out-of-range index back into `0..n` with edge repetition
/// (`-1 -> 0`, `n -> n - 1`).
#[inline]
fn reflect(index: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let q = index.rem_euclid(period);
    (if q >= n { period - 1 - q } else { q }) as usize
}

/// 2D convolution, output the same shape as `input`, symmetric boundary.
///
/// The output is the central part of the full convolution, offset by
/// `(k - 1) / 2` along each axis, so even-sized kernels lean toward the
/// lower indices.
pub fn convolve2d_symmetric(input: &ArrayView2<'_, f64>, kernel: &ArrayView2<'_, f64>) -> Array2<f64> {
    let (rows, cols) = input.dim();
    let (kr, kc) = kernel.dim();
    if rows == 0 || cols == 0 {
        return Array2::zeros((rows, cols));
    }
    let off_r = ((kr as isize) - 1) / 2;
    let off_c = ((kc as isize) - 1) / 2;

    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let mut acc = 0.0;
        for m in 0..kr {
            let src_r = reflect(i as isize + off_r - m as isize, rows);
            for n in 0..kc {
                let src_c = reflect(j as isize + off_c - n as isize, cols);
                acc += input[[src_r, src_c]] * kernel[[m, n]];
            }
        }
        acc
    })
}

// ============================================================================
// Smoothing
// ============================================================================

/// Centered moving average over `window` samples.
///
/// Near the ends the window shrinks to the samples that exist, so the output
/// has the same length as the input and no edge bias toward zero. A window
/// of 0 or 1 returns the input unchanged.
pub fn moving_average(data: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let n = data.len();
    let left = window / 2;
    let right = window - 1 - left;

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for &x in data {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + x);
    }

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(left);
            let hi = (i + right).min(n - 1);
            (prefix[hi + 1] - prefix[lo]) / (hi + 1 - lo) as f64
        })
        .collect()
}

// ============================================================================
// Search and Differences
// ============================================================================

/// Index of the first element `>= value` in a sorted slice
#[inline]
pub fn searchsorted_left(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&x| x < value)
}

/// Index of the first element `> value` in a sorted slice
#[inline]
pub fn searchsorted_right(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|&x| x <= value)
}

/// Derivative of `values` with respect to `ts`.
///
/// Central differences in the interior, one-sided differences at the ends.
pub fn gradient(values: &[f64], ts: &[f64]) -> CoreResult<Vec<f64>> {
    if values.len() != ts.len() {
        return Err(CoreError::LengthMismatch {
            what: "gradient samples",
            expected: ts.len(),
            got: values.len(),
        });
    }
    let n = values.len();
    if n < 2 {
        return Err(CoreError::EmptyInput { what: "gradient needs at least two samples" });
    }
    let mut out = Vec::with_capacity(n);
    out.push((values[1] - values[0]) / (ts[1] - ts[0]));
    for i in 1..n - 1 {
        out.push((values[i + 1] - values[i - 1]) / (ts[i + 1] - ts[i - 1]));
    }
    out.push((values[n - 1] - values[n - 2]) / (ts[n - 1] - ts[n - 2]));
    Ok(out)
}

/// Row-major arg-max of a 2D array as `(row, col)`.
///
/// Ties resolve to the first occurrence scanning rows top to bottom and
/// columns left to right. NaN entries never win. Returns `None` for an
/// empty array or one that is entirely NaN.
pub fn argmax_2d(values: &ArrayView2<'_, f64>) -> Option<(usize, usize)> {
    let mut best: Option<((usize, usize), f64)> = None;
    for ((r, c), &v) in values.indexed_iter() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some(((r, c), v)),
        }
    }
    best.map(|(idx, _)| idx)
}

// ============================================================================
// Scoring
// ============================================================================

/// Coefficient of determination, `r2_score(truth, predicted)`.
///
/// `1 - SS_res / SS_tot`. When the truth is constant the score is 1.0 for
/// an exact prediction and 0.0 otherwise. The argument order matters.
pub fn r2_score(truth: &[f64], predicted: &[f64]) -> CoreResult<f64> {
    if truth.len() != predicted.len() {
        return Err(CoreError::LengthMismatch {
            what: "r2 inputs",
            expected: truth.len(),
            got: predicted.len(),
        });
    }
    if truth.is_empty() {
        return Err(CoreError::EmptyInput { what: "r2 inputs" });
    }
    let mean = truth.iter().sum::<f64>() / truth.len() as f64;
    let ss_tot: f64 = truth.iter().map(|t| (t - mean).powi(2)).sum();
    let ss_res: f64 = truth.iter().zip(predicted).map(|(t, p)| (t - p).powi(2)).sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_gaussian_window_symmetric() {
        let w = gaussian_window(9, 2.0);
        assert_eq!(w.len(), 9);
        assert_relative_eq!(w[4], 1.0);
        for i in 0..4 {
            assert_relative_eq!(w[i], w[8 - i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_gaussian_kernel_normalized() {
        let k = gaussian_kernel_2d(9, 2.0).unwrap();
        assert_eq!(k.dim(), (9, 9));
        assert_relative_eq!(k.sum(), 1.0, epsilon = 1e-12);
        assert!(gaussian_kernel_2d(0, 1.0).is_err());
        assert!(gaussian_kernel_2d(3, 0.0).is_err());
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(-1, 5), 0);
        assert_eq!(reflect(-2, 5), 1);
        assert_eq!(reflect(5, 5), 4);
        assert_eq!(reflect(6, 5), 3);
        assert_eq!(reflect(2, 5), 2);
    }

    #[test]
    fn test_convolve_preserves_mass_of_constant() {
        let input = Array2::from_elem((6, 7), 3.0);
        let k = gaussian_kernel_2d(5, 1.0).unwrap();
        let out = convolve2d_symmetric(&input.view(), &k.view());
        for &v in &out {
            assert_relative_eq!(v, 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_convolve_identity_kernel() {
        let input = array![[1.0, 2.0], [3.0, 4.0]];
        let k = array![[1.0]];
        let out = convolve2d_symmetric(&input.view(), &k.view());
        assert_eq!(out, input);
    }

    #[test]
    fn test_convolve_spreads_impulse() {
        let mut input = Array2::zeros((5, 5));
        input[[2, 2]] = 1.0;
        let k = gaussian_kernel_2d(3, 1.0).unwrap();
        let out = convolve2d_symmetric(&input.view(), &k.view());
        assert_relative_eq!(out.sum(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(out[[2, 2]], k[[1, 1]], epsilon = 1e-12);
        assert_relative_eq!(out[[1, 2]], out[[3, 2]], epsilon = 1e-12);
    }

    #[test]
    fn test_moving_average() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = moving_average(&data, 3);
        assert_relative_eq!(out[0], 1.5);
        assert_relative_eq!(out[2], 3.0);
        assert_relative_eq!(out[4], 4.5);
        assert_eq!(moving_average(&data, 1), data.to_vec());
    }

    #[test]
    fn test_searchsorted() {
        let s = [0.1, 0.2, 0.2, 0.5];
        assert_eq!(searchsorted_left(&s, 0.2), 1);
        assert_eq!(searchsorted_right(&s, 0.2), 3);
        assert_eq!(searchsorted_left(&s, 0.0), 0);
        assert_eq!(searchsorted_left(&s, 1.0), 4);
    }

    #[test]
    fn test_gradient_linear() {
        let ts = [0.0, 0.5, 1.0, 1.5];
        let vals = [0.0, 1.0, 2.0, 3.0];
        for g in gradient(&vals, &ts).unwrap() {
            assert_relative_eq!(g, 2.0);
        }
        assert!(gradient(&vals[..1], &ts[..1]).is_err());
    }

    #[test]
    fn test_argmax_ties_first_row_major() {
        let a = array![[0.0, 5.0, 1.0], [5.0, 0.0, 5.0]];
        assert_eq!(argmax_2d(&a.view()), Some((0, 1)));
        let nan = array![[f64::NAN, 1.0]];
        assert_eq!(argmax_2d(&nan.view()), Some((0, 1)));
    }

    #[test]
    fn test_r2_identity() {
        let t = [1.0, 2.0, 4.0, 8.0];
        assert_relative_eq!(r2_score(&t, &t).unwrap(), 1.0);
        assert!(r2_score(&t, &t[..2]).is_err());
    }

    #[test]
    fn test_r2_not_symmetric() {
        let t = [1.0, 2.0, 3.0, 4.0];
        let p = [1.0, 1.0, 1.0, 1.0];
        let a = r2_score(&t, &p).unwrap();
        let b = r2_score(&p, &t).unwrap();
        assert!(a < 0.0);
        assert_relative_eq!(b, 0.0);
    }
}
