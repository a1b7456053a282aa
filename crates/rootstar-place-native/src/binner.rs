//! Spike-count binning
//!
//! Converts spike-time dictionaries into a time-binned spike-count matrix
//! (the "SCV"), and cleans up windows with too little population activity.

use ndarray::{Array2, Axis};
use rootstar_place_core::math::searchsorted_right;
use rootstar_place_core::{NeuronId, SpikeTrains};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};

/// Time-binned spike counts, rows = reference timestamps, columns = neurons
#[derive(Clone, Debug, PartialEq)]
pub struct SpikeCounts {
    /// Column order (ascending neuron id)
    pub neuron_ids: Vec<NeuronId>,
    /// Counts, `(rows, neurons)`
    pub counts: Array2<u32>,
    /// Integration window (s)
    pub t_window: f64,
}

impl SpikeCounts {
    /// Number of rows
    pub fn rows(&self) -> usize {
        self.counts.nrows()
    }

    /// Population (multi-unit) count of every row
    pub fn mua(&self) -> Vec<u32> {
        self.counts.sum_axis(Axis(1)).to_vec()
    }

    /// Copy without the first (lowest id) column
    #[must_use]
    pub fn without_first(&self) -> Self {
        let cols = self.counts.ncols();
        let counts = if cols > 0 {
            self.counts.slice(ndarray::s![.., 1..]).to_owned()
        } else {
            self.counts.clone()
        };
        Self {
            neuron_ids: self.neuron_ids.iter().skip(1).copied().collect(),
            counts,
            t_window: self.t_window,
        }
    }

    /// Copy of the selected rows
    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            neuron_ids: self.neuron_ids.clone(),
            counts: self.counts.select(Axis(0), rows),
            t_window: self.t_window,
        }
    }
}

/// Count spikes of every neuron in `(t - t_window, t]` for each `t` in `ts`.
///
/// Columns follow ascending neuron id; a neuron without spikes in range
/// yields an all-zero column.
pub fn spike_count_matrix(spikes: &SpikeTrains, t_window: f64, ts: &[f64]) -> DecodeResult<SpikeCounts> {
    if !t_window.is_finite() || t_window <= 0.0 {
        return Err(DecodeError::invalid("t_window", format!("must be positive, got {t_window}")));
    }
    let mut counts = Array2::<u32>::zeros((ts.len(), spikes.len()));
    for (col, (_, times)) in spikes.iter().enumerate() {
        for (row, &t) in ts.iter().enumerate() {
            let hi = searchsorted_right(times, t);
            let lo = searchsorted_right(times, t - t_window);
            counts[[row, col]] = (hi - lo) as u32;
        }
    }
    Ok(SpikeCounts {
        neuron_ids: spikes.ids(),
        counts,
        t_window,
    })
}

/// Minimum population activity required for a row to enter the decoder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountCutoffConfig {
    /// Rows whose total count is at or below this value are replaced
    pub minimum_spikes: u32,
    /// Upper bound on replacement passes
    pub max_passes: usize,
}

impl Default for CountCutoffConfig {
    fn default() -> Self {
        Self {
            minimum_spikes: 2,
            max_passes: 100,
        }
    }
}

/// Outcome of [`minimum_spike_cutoff`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CutoffReport {
    /// Passes executed
    pub passes: usize,
    /// True when a fixed point was reached within the pass budget
    pub converged: bool,
    /// Rows overwritten at least once
    pub replaced_rows: Vec<usize>,
    /// Rows still at or below the threshold afterwards
    pub remaining_low: Vec<usize>,
}

impl CutoffReport {
    /// Number of rows that kept their original values
    pub fn kept_rows(&self, total_rows: usize) -> usize {
        total_rows - self.replaced_rows.len()
    }
}

/// Replace low-activity rows with the previous row.
///
/// Every row `i >= 1` whose total count is `<= minimum_spikes` takes the
/// counts (and label, if given) of row `i - 1` as they were at the start of
/// the pass. Passes repeat because a copied row can itself be low. The loop
/// stops when no row is low, when a pass changes nothing (the remaining low
/// rows only have low predecessors, e.g. a low run starting at row 0), or
/// when `max_passes` is exhausted. Row 0 is never replaced.
pub fn minimum_spike_cutoff<L: Copy + PartialEq>(
    counts: &mut Array2<u32>,
    mut labels: Option<&mut [L]>,
    config: &CountCutoffConfig,
) -> DecodeResult<CutoffReport> {
    let n = counts.nrows();
    if let Some(labels) = labels.as_deref() {
        if labels.len() != n {
            return Err(DecodeError::ShapeMismatch {
                what: "cutoff labels",
                expected: n,
                got: labels.len(),
            });
        }
    }

    let mut report = CutoffReport::default();
    let mut replaced = vec![false; n];
    let low_rows = |counts: &Array2<u32>| -> Vec<usize> {
        let totals = counts.sum_axis(Axis(1));
        (1..n).filter(|&i| totals[i] <= config.minimum_spikes).collect()
    };

    while report.passes < config.max_passes {
        let low = low_rows(&*counts);
        if low.is_empty() {
            report.converged = true;
            break;
        }
        report.passes += 1;

        let mut changed = false;
        // descending order reads every predecessor before it is overwritten
        for &i in low.iter().rev() {
            let prev = counts.row(i - 1).to_owned();
            if counts.row(i) != prev {
                changed = true;
                counts.row_mut(i).assign(&prev);
            }
            if let Some(labels) = labels.as_deref_mut() {
                if labels[i] != labels[i - 1] {
                    changed = true;
                    labels[i] = labels[i - 1];
                }
            }
            replaced[i] = true;
        }
        if !changed {
            report.converged = true;
            break;
        }
    }

    report.replaced_rows = (0..n).filter(|&i| replaced[i]).collect();
    let totals = counts.sum_axis(Axis(1));
    report.remaining_low = (0..n).filter(|&i| totals[i] <= config.minimum_spikes).collect();

    if report.converged {
        tracing::debug!(
            passes = report.passes,
            replaced = report.replaced_rows.len(),
            remaining_low = report.remaining_low.len(),
            "count cutoff converged"
        );
    } else {
        tracing::warn!(
            max_passes = config.max_passes,
            remaining_low = report.remaining_low.len(),
            "count cutoff did not converge within the pass budget"
        );
    }
    Ok(report)
}

// ============================================================================
// Tests
// ============================================================================
