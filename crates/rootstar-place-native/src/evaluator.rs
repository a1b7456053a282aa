//! Decoding evaluation and unit ranking
//!
//! # Scoring
//!
//! Decoded trajectories are smoothed with a centered moving average before
//! scoring. R² is computed as `r2(true, predicted)`; the argument order
//! matters because R² is not symmetric.
//!
//! # Spatial information
//!
//! With occupancy probability `p`, rate map `r` and mean rate
//! `r̄ = Σ p·r`:
//!
//! ```text
//! bits/spike = Σ p · (r/r̄) · log2(r/r̄)
//! sparsity   = Σ p · r² / r̄²
//! ```
//!
//! Zero rates are replaced by a tiny epsilon first so `log2(0)` never occurs.

use std::cmp::Ordering;

use ndarray::{ArrayView2, ArrayView3, Axis};
use rootstar_place_core::{moving_average, r2_score, NeuronId, Position};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};
use crate::fields::{PlaceFields, DEFAULT_RATE_FLOOR};

/// Evaluation parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Smoothing applied to decoded positions (s)
    pub smooth_sec: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { smooth_sec: 2.0 }
    }
}

/// Number of decoding steps covering `smooth_sec`, truncated, at least 1
pub fn smoothing_window(smooth_sec: f64, t_step: f64) -> DecodeResult<usize> {
    if !t_step.is_finite() || t_step <= 0.0 {
        return Err(DecodeError::invalid("t_step", format!("must be positive, got {t_step}")));
    }
    if !smooth_sec.is_finite() || smooth_sec < 0.0 {
        return Err(DecodeError::invalid("smooth_sec", format!("must be non-negative, got {smooth_sec}")));
    }
    Ok(((smooth_sec / t_step) as usize).max(1))
}

/// Centered moving average applied to each axis
pub fn smooth_trajectory(positions: &[Position], window: usize) -> Vec<Position> {
    let xs: Vec<f64> = positions.iter().map(|p| p[0]).collect();
    let ys: Vec<f64> = positions.iter().map(|p| p[1]).collect();
    moving_average(&xs, window)
        .into_iter()
        .zip(moving_average(&ys, window))
        .map(|(x, y)| [x, y])
        .collect()
}

/// Coefficient of determination per axis
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct R2Score {
    /// R² of the x coordinate
    pub x: f64,
    /// R² of the y coordinate
    pub y: f64,
    /// Mean of the two axes
    pub combined: f64,
}

/// Score a decoded trajectory against the truth
pub fn score(truth: &[Position], predicted: &[Position]) -> DecodeResult<R2Score> {
    if truth.len() != predicted.len() {
        return Err(DecodeError::ShapeMismatch {
            what: "predicted positions",
            expected: truth.len(),
            got: predicted.len(),
        });
    }
    let axis = |k: usize| -> DecodeResult<f64> {
        let t: Vec<f64> = truth.iter().map(|p| p[k]).collect();
        let p: Vec<f64> = predicted.iter().map(|p| p[k]).collect();
        Ok(r2_score(&t, &p)?)
    };
    let x = axis(0)?;
    let y = axis(1)?;
    Ok(R2Score {
        x,
        y,
        combined: (x + y) / 2.0,
    })
}

/// Mean Euclidean distance between decoded and true positions
pub fn mean_error(truth: &[Position], predicted: &[Position]) -> DecodeResult<f64> {
    if truth.len() != predicted.len() || truth.is_empty() {
        return Err(DecodeError::ShapeMismatch {
            what: "predicted positions",
            expected: truth.len(),
            got: predicted.len(),
        });
    }
    let total: f64 = truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (t[0] - p[0]).hypot(t[1] - p[1]))
        .sum();
    Ok(total / truth.len() as f64)
}

// ============================================================================
// Unit metrics
// ============================================================================

/// Per-neuron spatial metrics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldMetrics {
    /// Neuron id
    pub neuron_id: u32,
    /// Peak of the smoothed field (Hz)
    pub peak_rate: f64,
    /// Spikes used for the field over the trajectory duration (Hz)
    pub mean_rate: f64,
    /// Spatial information of the unsmoothed field (bits/spike)
    pub spatial_bits_per_spike: f64,
    /// Spatial information of the smoothed field (bits/spike)
    pub spatial_bits_smoothed: f64,
    /// Sparsity of the smoothed field
    pub sparsity: f64,
}

/// Ranking key for [`rank`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankMetric {
    /// [`FieldMetrics::peak_rate`]
    PeakRate,
    /// [`FieldMetrics::mean_rate`]
    MeanRate,
    /// [`FieldMetrics::spatial_bits_per_spike`]
    SpatialBits,
    /// [`FieldMetrics::spatial_bits_smoothed`]
    SpatialBitsSmoothed,
    /// [`FieldMetrics::sparsity`]
    Sparsity,
}

impl FieldMetrics {
    fn value(&self, metric: RankMetric) -> f64 {
        match metric {
            RankMetric::PeakRate => self.peak_rate,
            RankMetric::MeanRate => self.mean_rate,
            RankMetric::SpatialBits => self.spatial_bits_per_spike,
            RankMetric::SpatialBitsSmoothed => self.spatial_bits_smoothed,
            RankMetric::Sparsity => self.sparsity,
        }
    }
}

fn mean_rate(rate: &ArrayView2<'_, f64>, p: &ArrayView2<'_, f64>) -> f64 {
    rate.iter()
        .zip(p.iter())
        .map(|(&r, &pi)| pi * if r == 0.0 { DEFAULT_RATE_FLOOR } else { r })
        .sum()
}

/// `Σ p · (r/r̄) · log2(r/r̄)`
pub fn spatial_information(rate: &ArrayView2<'_, f64>, p: &ArrayView2<'_, f64>) -> f64 {
    let mean = mean_rate(rate, p);
    rate.iter()
        .zip(p.iter())
        .map(|(&r, &pi)| {
            let r = if r == 0.0 { DEFAULT_RATE_FLOOR } else { r };
            let ratio = r / mean;
            pi * ratio * ratio.log2()
        })
        .sum()
}

/// `Σ p · r² / r̄²`
pub fn sparsity(rate: &ArrayView2<'_, f64>, p: &ArrayView2<'_, f64>) -> f64 {
    let mean = mean_rate(rate, p);
    rate.iter()
        .zip(p.iter())
        .map(|(&r, &pi)| {
            let r = if r == 0.0 { DEFAULT_RATE_FLOOR } else { r };
            pi * r * r / (mean * mean)
        })
        .sum()
}

/// Metrics of every field against the build's occupancy probability
pub fn field_metrics(fields: &PlaceFields) -> Vec<FieldMetrics> {
    let p = fields.occupancy.probability();
    let duration = fields.duration;
    let peaks = fields.peak_rates();
    fields
        .neuron_ids
        .iter()
        .enumerate()
        .map(|(i, &neuron_id)| {
            let smooth = fields.rates.index_axis(Axis(0), i);
            let sharp = fields.sharp.index_axis(Axis(0), i);
            FieldMetrics {
                neuron_id,
                peak_rate: peaks[i],
                mean_rate: if duration > 0.0 {
                    fields.firing_samples[i] as f64 / duration
                } else {
                    0.0
                },
                spatial_bits_per_spike: spatial_information(&sharp, &p.view()),
                spatial_bits_smoothed: spatial_information(&smooth, &p.view()),
                sparsity: sparsity(&smooth, &p.view()),
            }
        })
        .collect()
}

/// Metrics of any `(neurons, ybins, xbins)` rate stack against an occupancy
/// probability map `p`, e.g. fields loaded from a saved model.
///
/// Only the given maps are available, so both spatial-information entries
/// are computed from them and `mean_rate` is the occupancy-weighted rate
/// `Σ p·r`.
pub fn rate_map_metrics(
    neuron_ids: &[NeuronId],
    fields: &ArrayView3<'_, f64>,
    p: &ArrayView2<'_, f64>,
) -> DecodeResult<Vec<FieldMetrics>> {
    let (n, ybins, xbins) = fields.dim();
    if neuron_ids.len() != n {
        return Err(DecodeError::ShapeMismatch {
            what: "neuron ids vs field stack",
            expected: n,
            got: neuron_ids.len(),
        });
    }
    if p.dim() != (ybins, xbins) {
        return Err(DecodeError::ShapeMismatch {
            what: "occupancy bins vs field bins",
            expected: ybins * xbins,
            got: p.len(),
        });
    }
    Ok(neuron_ids
        .iter()
        .zip(fields.outer_iter())
        .map(|(&neuron_id, rate)| {
            let bits = spatial_information(&rate, p);
            FieldMetrics {
                neuron_id,
                peak_rate: rate.fold(0.0_f64, |m, &v| m.max(v)),
                mean_rate: mean_rate(&rate, p),
                spatial_bits_per_spike: bits,
                spatial_bits_smoothed: bits,
                sparsity: sparsity(&rate, p),
            }
        })
        .collect())
}

/// Indices into `metrics` ordered by `metric`, descending, ties by index
pub fn rank(metrics: &[FieldMetrics], metric: RankMetric) -> Vec<usize> {
    let mut order: Vec<usize> = (0..metrics.len()).collect();
    order.sort_by(|&a, &b| {
        let (va, vb) = (metrics[a].value(metric), metrics[b].value(metric));
        vb.partial_cmp(&va).unwrap_or(Ordering::Equal).then(a.cmp(&b))
    });
    order
}

/// Criteria for units kept by the decoder
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitSelection {
    /// Minimum unsmoothed spatial information (bits/spike)
    pub min_bits: f64,
    /// Minimum peak rate (Hz)
    pub min_peak_rate: f64,
    /// Always drop the first unit
    pub first_unit_is_noise: bool,
}

impl Default for UnitSelection {
    fn default() -> Self {
        Self {
            min_bits: 0.1,
            min_peak_rate: 1.5,
            first_unit_is_noise: true,
        }
    }
}

/// Indices of units to drop: below either threshold, plus unit 0 when it is
/// the noise cluster. Sorted, without duplicates.
pub fn select_units(metrics: &[FieldMetrics], selection: &UnitSelection) -> Vec<usize> {
    let mut drop: Vec<usize> = metrics
        .iter()
        .enumerate()
        .filter(|(_, m)| m.spatial_bits_per_spike < selection.min_bits || m.peak_rate < selection.min_peak_rate)
        .map(|(i, _)| i)
        .collect();
    if selection.first_unit_is_noise && !metrics.is_empty() && drop.first() != Some(&0) {
        drop.insert(0, 0);
    }
    tracing::debug!(dropped = drop.len(), total = metrics.len(), "unit selection");
    drop
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn metric(id: u32, bits: f64, peak: f64) -> FieldMetrics {
        FieldMetrics {
            neuron_id: id,
            peak_rate: peak,
            mean_rate: 1.0,
            spatial_bits_per_spike: bits,
            spatial_bits_smoothed: bits,
            sparsity: 1.0,
        }
    }

    #[test]
    fn test_identical_trajectories_score_one() {
        let truth: Vec<Position> = (0..50).map(|i| [f64::from(i), (f64::from(i) * 0.3).sin()]).collect();
        let s = score(&truth, &truth).unwrap();
        assert_relative_eq!(s.x, 1.0);
        assert_relative_eq!(s.y, 1.0);
        assert_relative_eq!(s.combined, 1.0);
    }

    #[test]
    fn test_score_is_not_symmetric() {
        let truth: Vec<Position> = (0..20).map(|i| [f64::from(i), f64::from(i)]).collect();
        let pred: Vec<Position> = (0..20).map(|i| [f64::from(i) * 0.5, 3.0]).collect();
        let a = score(&truth, &pred).unwrap();
        let b = score(&pred, &truth).unwrap();
        assert!((a.x - b.x).abs() > 1e-6);
        assert!(score(&truth, &pred[..5]).is_err());
    }

    #[test]
    fn test_smoothing_window() {
        assert_eq!(smoothing_window(2.0, 0.1).unwrap(), 20);
        assert_eq!(smoothing_window(0.05, 0.1).unwrap(), 1);
        assert!(smoothing_window(2.0, 0.0).is_err());
    }

    #[test]
    fn test_smooth_keeps_constant_trajectory() {
        let pos = vec![[3.0, 4.0]; 30];
        let smoothed = smooth_trajectory(&pos, 7);
        assert_eq!(smoothed.len(), 30);
        for p in smoothed {
            assert_relative_eq!(p[0], 3.0, epsilon = 1e-12);
            assert_relative_eq!(p[1], 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_uniform_field_has_no_information() {
        let rate = Array2::from_elem((4, 4), 3.0);
        let p = Array2::from_elem((4, 4), 1.0 / 16.0);
        assert_relative_eq!(spatial_information(&rate.view(), &p.view()), 0.0, epsilon = 1e-12);
        assert_relative_eq!(sparsity(&rate.view(), &p.view()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_bin_field_information() {
        // firing in one of four equally visited bins: log2(4) = 2 bits/spike
        let rate = array![[8.0, 0.0], [0.0, 0.0]];
        let p = Array2::from_elem((2, 2), 0.25);
        assert_relative_eq!(spatial_information(&rate.view(), &p.view()), 2.0, epsilon = 1e-9);
        assert_relative_eq!(sparsity(&rate.view(), &p.view()), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rank_descending_ties_by_index() {
        let m = vec![metric(0, 0.5, 1.0), metric(1, 2.0, 1.0), metric(2, 0.5, 1.0), metric(3, 1.0, 1.0)];
        assert_eq!(rank(&m, RankMetric::SpatialBits), vec![1, 3, 0, 2]);
        assert_eq!(rank(&m, RankMetric::PeakRate), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_select_units() {
        let m = vec![metric(0, 3.0, 9.0), metric(1, 0.05, 9.0), metric(2, 1.0, 1.0), metric(3, 1.0, 4.0)];
        assert_eq!(select_units(&m, &UnitSelection::default()), vec![0, 1, 2]);
        let keep_first = UnitSelection {
            first_unit_is_noise: false,
            ..UnitSelection::default()
        };
        assert_eq!(select_units(&m, &keep_first), vec![1, 2]);
    }

    #[test]
    fn test_rate_map_metrics_ranks_external_fields() {
        let mut fields = ndarray::Array3::from_elem((3, 2, 2), 2.0);
        // unit 5 fires in one bin, unit 9 in two, unit 7 is flat
        fields.index_axis_mut(Axis(0), 0).assign(&array![[8.0, 0.0], [0.0, 0.0]]);
        fields.index_axis_mut(Axis(0), 2).assign(&array![[4.0, 4.0], [0.0, 0.0]]);
        let p = Array2::from_elem((2, 2), 0.25);

        let m = rate_map_metrics(&[5, 7, 9], &fields.view(), &p.view()).unwrap();
        assert_eq!(m.iter().map(|x| x.neuron_id).collect::<Vec<_>>(), vec![5, 7, 9]);
        assert_relative_eq!(m[0].spatial_bits_per_spike, 2.0, epsilon = 1e-9);
        assert_relative_eq!(m[2].spatial_bits_per_spike, 1.0, epsilon = 1e-9);
        assert_relative_eq!(m[1].spatial_bits_per_spike, 0.0, epsilon = 1e-12);
        assert_relative_eq!(m[1].mean_rate, 2.0, epsilon = 1e-12);
        assert_eq!(m[0].peak_rate, 8.0);
        assert_eq!(rank(&m, RankMetric::SpatialBits), vec![0, 2, 1]);
        assert_eq!(rank(&m, RankMetric::Sparsity), vec![0, 2, 1]);
    }

    #[test]
    fn test_rate_map_metrics_shape_checks() {
        let fields = ndarray::Array3::from_elem((2, 2, 2), 1.0);
        let p = Array2::from_elem((2, 2), 0.25);
        assert!(matches!(
            rate_map_metrics(&[1], &fields.view(), &p.view()),
            Err(DecodeError::ShapeMismatch { .. })
        ));
        let wide = Array2::from_elem((2, 3), 1.0 / 6.0);
        assert!(rate_map_metrics(&[1, 2], &fields.view(), &wide.view()).is_err());
    }

    #[test]
    fn test_mean_error() {
        let truth = vec![[0.0, 0.0], [1.0, 1.0]];
        let pred = vec![[3.0, 4.0], [1.0, 1.0]];
        assert_relative_eq!(mean_error(&truth, &pred).unwrap(), 2.5);
    }
}
