//! Trajectory model
//!
//! Time-stamped 2D positions of the animal, with derived speed traces and
//! maze geometry.
//!
//! Two speed traces are kept. The narrow one (about one second) is used to
//! filter decoding samples; the wide one (six times longer, doubled in
//! gain) decides which samples count toward occupancy and place fields,
//! because place cells often start firing shortly before the animal moves
//! and keep firing a few seconds after it stops.

use rootstar_place_core::math::{gradient, moving_average};
use rootstar_place_core::{CoreError, GridIndex, MazeBounds, Position, SpatialGrid};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};

/// Speed smoothing configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    /// Narrow smoothing window (s)
    pub narrow_window_s: f64,
    /// Wide window as a multiple of the narrow window
    pub wide_factor: usize,
    /// Gain applied to the wide trace
    pub wide_gain: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            narrow_window_s: 1.0,
            wide_factor: 6,
            wide_gain: 2.0,
        }
    }
}

/// Speed traces derived from a trajectory, one value per sample
#[derive(Clone, Debug, Default)]
pub struct SpeedProfile {
    /// Instantaneous speed (units/s)
    pub raw: Vec<f64>,
    /// Narrow-window smoothed speed
    pub smoothed: Vec<f64>,
    /// Wide-window smoothed speed used for the low-speed mask
    pub smoothed_wide: Vec<f64>,
}

impl SpeedProfile {
    /// Mask of samples whose wide-smoothed speed is below `v_cutoff`.
    ///
    /// Computed once per field build and shared by every neuron in it.
    pub fn low_speed_mask(&self, v_cutoff: f64) -> Vec<bool> {
        self.smoothed_wide.iter().map(|&v| v < v_cutoff).collect()
    }
}

/// Ordered `(timestamp, position)` samples with strictly increasing time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    ts: Vec<f64>,
    pos: Vec<Position>,
}

impl Trajectory {
    /// Create a trajectory, validating alignment and time ordering
    pub fn new(ts: Vec<f64>, pos: Vec<Position>) -> DecodeResult<Self> {
        if ts.len() != pos.len() {
            return Err(DecodeError::ShapeMismatch {
                what: "trajectory positions",
                expected: ts.len(),
                got: pos.len(),
            });
        }
        if ts.len() < 2 {
            return Err(CoreError::EmptyInput { what: "trajectory needs at least two samples" }.into());
        }
        if ts.iter().any(|t| !t.is_finite()) || pos.iter().flatten().any(|p| !p.is_finite()) {
            return Err(DecodeError::invalid("trajectory", "contains non-finite values"));
        }
        if let Some(i) = ts.windows(2).position(|w| w[1] <= w[0]) {
            return Err(DecodeError::invalid(
                "trajectory",
                format!("timestamps not strictly increasing at sample {}", i + 1),
            ));
        }
        Ok(Self { ts, pos })
    }

    /// Uniformly sampled trajectory starting at t = 0
    pub fn from_uniform(pos: Vec<Position>, dt: f64) -> DecodeResult<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(DecodeError::invalid("dt", format!("must be positive, got {dt}")));
        }
        let ts = (0..pos.len()).map(|i| i as f64 * dt).collect();
        Self::new(ts, pos)
    }

    /// Timestamps (s)
    pub fn ts(&self) -> &[f64] {
        &self.ts
    }

    /// Positions
    pub fn positions(&self) -> &[Position] {
        &self.pos
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.ts.len()
    }

    /// Always false for a validated trajectory
    pub fn is_empty(&self) -> bool {
        self.ts.is_empty()
    }

    /// Sample step, taken from the first two samples
    pub fn dt(&self) -> f64 {
        self.ts[1] - self.ts[0]
    }

    /// Sampling rate (Hz)
    pub fn fs(&self) -> f64 {
        1.0 / self.dt()
    }

    /// First timestamp
    pub fn start(&self) -> f64 {
        self.ts[0]
    }

    /// Last timestamp
    pub fn end(&self) -> f64 {
        self.ts[self.ts.len() - 1]
    }

    /// Elapsed time between first and last sample
    pub fn duration(&self) -> f64 {
        self.end() - self.start()
    }

    /// Resample onto `t0, t0 + dt, ...` strictly before the last timestamp.
    ///
    /// Positions are linearly interpolated per axis and linearly
    /// extrapolated outside the original range.
    pub fn resample(&self, dt: f64) -> DecodeResult<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(DecodeError::invalid("t_step", format!("must be positive, got {dt}")));
        }
        let t0 = self.start();
        let n = ((self.end() - t0) / dt).ceil() as usize;
        let new_ts: Vec<f64> = (0..n).map(|i| t0 + i as f64 * dt).filter(|&t| t < self.end()).collect();

        let mut new_pos = Vec::with_capacity(new_ts.len());
        for &t in &new_ts {
            // index of the segment [k, k+1] used for interpolation
            let k = self.ts.partition_point(|&x| x <= t).saturating_sub(1).min(self.len() - 2);
            let (ta, tb) = (self.ts[k], self.ts[k + 1]);
            let w = (t - ta) / (tb - ta);
            let (a, b) = (self.pos[k], self.pos[k + 1]);
            new_pos.push([a[0] + w * (b[0] - a[0]), a[1] + w * (b[1] - a[1])]);
        }
        tracing::debug!(from = self.len(), to = new_ts.len(), dt, "resampled trajectory");
        Self::new(new_ts, new_pos)
    }

    /// Align with an electrophysiology recording.
    ///
    /// Shifts timestamps by `replay_offset` (non-zero only when the neural
    /// signal was replayed through a generator) and keeps the samples with
    /// `recording_start <= t <= recording_end`.
    pub fn align_with_recording(
        &self,
        recording_start: f64,
        recording_end: f64,
        replay_offset: f64,
    ) -> DecodeResult<Self> {
        if recording_end <= recording_start {
            return Err(DecodeError::invalid(
                "recording range",
                format!("[{recording_start}, {recording_end}] is empty"),
            ));
        }
        let (ts, pos): (Vec<f64>, Vec<Position>) = self
            .ts
            .iter()
            .map(|t| t + replay_offset)
            .zip(self.pos.iter().copied())
            .filter(|(t, _)| *t >= recording_start && *t <= recording_end)
            .unzip();
        if ts.len() < 2 {
            return Err(DecodeError::DegenerateData {
                reason: format!("fewer than two trajectory samples inside [{recording_start}, {recording_end}]"),
            });
        }
        Self::new(ts, pos)
    }

    /// Speed traces, smoothing windows scaled to the sampling rate
    pub fn speed(&self, config: &SpeedConfig) -> DecodeResult<SpeedProfile> {
        let xs: Vec<f64> = self.pos.iter().map(|p| p[0]).collect();
        let ys: Vec<f64> = self.pos.iter().map(|p| p[1]).collect();
        let vx = gradient(&xs, &self.ts)?;
        let vy = gradient(&ys, &self.ts)?;
        let raw: Vec<f64> = vx.iter().zip(&vy).map(|(x, y)| x.hypot(*y)).collect();

        let narrow = (config.narrow_window_s * self.fs()).round().max(1.0) as usize;
        let wide = narrow * config.wide_factor.max(1);
        let smoothed = moving_average(&raw, narrow);
        let smoothed_wide = moving_average(&raw, wide)
            .into_iter()
            .map(|v| v * config.wide_gain)
            .collect();

        Ok(SpeedProfile { raw, smoothed, smoothed_wide })
    }

    /// Bounds of the visited area
    pub fn maze_bounds(&self) -> DecodeResult<MazeBounds> {
        Ok(MazeBounds::from_positions(&self.pos)?)
    }

    /// Bin of every sample, `None` where the sample falls outside the grid
    pub fn binned_positions(&self, grid: &SpatialGrid) -> Vec<Option<GridIndex>> {
        self.pos.iter().map(|&p| grid.locate(p)).collect()
    }

    /// Flat bin label of every sample
    pub fn label_positions(&self, grid: &SpatialGrid) -> Vec<Option<usize>> {
        self.binned_positions(grid)
            .into_iter()
            .map(|b| b.map(|b| grid.label(b)))
            .collect()
    }

    /// Index range of samples with `start <= t <= end`
    pub fn index_range(&self, start: f64, end: f64) -> std::ops::Range<usize> {
        let lo = self.ts.partition_point(|&t| t < start);
        let hi = self.ts.partition_point(|&t| t <= end);
        lo..hi.max(lo)
    }
}

// ============================================================================
// Tests
// ============================================================================
