//! Occupancy and place-field construction
//!
//! Converts a trajectory and per-neuron spike times into an occupancy map
//! and one smoothed firing-rate map ("place field") per neuron.
//!
//! # Pipeline
//!
//! ```text
//! trajectory ──► wide speed ──► low-speed mask ─┬──► occupancy histogram O
//!                                               │
//! spike times ──► sample in effect ──► drop low ┴──► firing histogram F
//!
//!   rate = F / (O · dt)      (0/0 and x/0 zeroed)
//!   field = rate ⊛ gaussian  (symmetric boundary)
//!   field[field == 0] = floor
//! ```

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rootstar_place_core::math::{convolve2d_symmetric, gaussian_kernel_2d, searchsorted_left};
use rootstar_place_core::{MazeBounds, NeuronId, Position, SpatialGrid, SpikeTrains};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};
use crate::trajectory::{SpeedConfig, SpeedProfile, Trajectory};

/// Value substituted for exact-zero rates so `ln(rate)` stays finite
pub const DEFAULT_RATE_FLOOR: f64 = 1e-25;

/// Place-field construction parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Spatial bin side length (maze units)
    pub bin_size: f64,
    /// Gaussian smoothing kernel length (bins)
    pub kernel_len: usize,
    /// Gaussian smoothing kernel standard deviation (bins)
    pub kernel_std: f64,
    /// Minimum wide-smoothed speed for a sample to count
    pub v_cutoff: f64,
    /// Explicit maze extent; derived from the trajectory when absent
    pub maze_range: Option<MazeBounds>,
    /// Rate substituted for exact zeros after smoothing
    pub rate_floor: f64,
    /// Speed smoothing
    pub speed: SpeedConfig,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            bin_size: 2.5,
            kernel_len: 9,
            kernel_std: 2.0,
            v_cutoff: 5.0,
            maze_range: None,
            rate_floor: DEFAULT_RATE_FLOOR,
            speed: SpeedConfig::default(),
        }
    }
}

/// Time spent per spatial bin, high-speed samples only
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OccupancyMap {
    /// Sample counts per bin, `(ybins, xbins)`
    pub counts: Array2<f64>,
    /// Counts smoothed with a small Gaussian
    pub smoothed: Array2<f64>,
    /// Trajectory sample step (s)
    pub dt: f64,
}

impl OccupancyMap {
    /// Number of samples that entered the histogram
    pub fn total_samples(&self) -> f64 {
        self.counts.sum()
    }

    /// Seconds spent per bin
    pub fn time_spent(&self) -> Array2<f64> {
        &self.counts * self.dt
    }

    /// Total high-speed time (s)
    pub fn total_time(&self) -> f64 {
        self.total_samples() * self.dt
    }

    /// Occupancy probability, sums to 1
    pub fn probability(&self) -> Array2<f64> {
        let total = self.total_samples();
        if total > 0.0 {
            &self.counts / total
        } else {
            Array2::zeros(self.counts.raw_dim())
        }
    }
}

/// Place fields for a set of neurons, plus the build context
#[derive(Clone, Debug)]
pub struct PlaceFields {
    /// Neuron ids in stacking order (ascending)
    pub neuron_ids: Vec<NeuronId>,
    /// Smoothed, floor-clamped rates, `(neurons, ybins, xbins)` (Hz)
    pub rates: Array3<f64>,
    /// Unsmoothed rates, same shape
    pub sharp: Array3<f64>,
    /// Number of spikes that entered each neuron's firing histogram
    pub firing_samples: Vec<usize>,
    /// Occupancy used as the denominator
    pub occupancy: OccupancyMap,
    /// Grid geometry
    pub grid: SpatialGrid,
    /// Time span covered by the source trajectory (s)
    pub duration: f64,
}

impl PlaceFields {
    /// Number of neurons
    pub fn len(&self) -> usize {
        self.neuron_ids.len()
    }

    /// True when there are no fields
    pub fn is_empty(&self) -> bool {
        self.neuron_ids.is_empty()
    }

    /// Smoothed field of the `i`th neuron
    pub fn field(&self, i: usize) -> ArrayView2<'_, f64> {
        self.rates.index_axis(Axis(0), i)
    }

    /// Peak rate of every field
    pub fn peak_rates(&self) -> Vec<f64> {
        self.rates
            .outer_iter()
            .map(|f| f.fold(0.0_f64, |m, &v| m.max(v)))
            .collect()
    }
}

/// Builds occupancy maps and place fields from one trajectory
#[derive(Clone, Debug)]
pub struct PlaceFieldBuilder {
    trajectory: Trajectory,
    config: FieldConfig,
    grid: SpatialGrid,
    speed: SpeedProfile,
    kernel: Array2<f64>,
    occupancy_kernel: Array2<f64>,
}

impl PlaceFieldBuilder {
    /// Prepare grid, speed traces and kernels for a trajectory
    pub fn new(trajectory: Trajectory, config: FieldConfig) -> DecodeResult<Self> {
        if !config.rate_floor.is_finite() || config.rate_floor <= 0.0 {
            return Err(DecodeError::invalid("rate_floor", "must be a positive finite value"));
        }
        let bounds = match config.maze_range {
            Some(bounds) => bounds,
            None => trajectory.maze_bounds()?,
        };
        let grid = SpatialGrid::new(bounds, config.bin_size)?;
        let speed = trajectory.speed(&config.speed)?;
        let kernel = gaussian_kernel_2d(config.kernel_len, config.kernel_std)?;
        let occupancy_kernel = gaussian_kernel_2d(2, 1.0)?;

        tracing::debug!(
            xbins = grid.xbins(),
            ybins = grid.ybins(),
            samples = trajectory.len(),
            "place field builder ready"
        );

        Ok(Self {
            trajectory,
            config,
            grid,
            speed,
            kernel,
            occupancy_kernel,
        })
    }

    /// Source trajectory
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Build configuration
    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// Spatial grid
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Speed traces of the trajectory
    pub fn speed(&self) -> &SpeedProfile {
        &self.speed
    }

    fn resolve_window(&self, window: Option<(f64, f64)>) -> DecodeResult<(f64, f64)> {
        let (start, end) = window.unwrap_or((self.trajectory.start(), self.trajectory.end()));
        if !(start.is_finite() && end.is_finite()) || end < start {
            return Err(DecodeError::invalid("time window", format!("[{start}, {end}] is not a valid range")));
        }
        Ok((start, end))
    }

    /// Occupancy over `window` (whole trajectory when `None`), counting only
    /// samples whose wide-smoothed speed is at least `v_cutoff`.
    pub fn occupancy(&self, window: Option<(f64, f64)>, v_cutoff: f64) -> DecodeResult<OccupancyMap> {
        let (start, end) = self.resolve_window(window)?;
        let low = self.speed.low_speed_mask(v_cutoff);
        self.occupancy_with_mask(start, end, &low)
    }

    fn occupancy_with_mask(&self, start: f64, end: f64, low: &[bool]) -> DecodeResult<OccupancyMap> {
        let mut counts = Array2::<f64>::zeros(self.grid.shape());
        let mut outside = 0usize;
        let positions = self.trajectory.positions();
        for i in self.trajectory.index_range(start, end) {
            if low[i] {
                continue;
            }
            match self.grid.locate(positions[i]) {
                Some(bin) => counts[[bin.y, bin.x]] += 1.0,
                None => outside += 1,
            }
        }
        if outside > 0 {
            tracing::warn!(outside, "high-speed samples outside the maze range were skipped");
        }
        if counts.sum() == 0.0 {
            return Err(DecodeError::DegenerateData {
                reason: format!("no high-speed samples inside the maze between {start} s and {end} s"),
            });
        }
        let smoothed = convolve2d_symmetric(&counts.view(), &self.occupancy_kernel.view());
        Ok(OccupancyMap {
            counts,
            smoothed,
            dt: self.trajectory.dt(),
        })
    }

    /// Trajectory samples in effect at each spike.
    ///
    /// A spike at time `t` maps to `searchsorted_left(ts, t) - 1`. Spikes at
    /// or before the first sample, after the last sample, or during a
    /// low-speed sample are discarded.
    pub fn firing_samples(&self, spike_times: &[f64], low: &[bool]) -> Vec<usize> {
        let ts = self.trajectory.ts();
        let end = self.trajectory.end();
        spike_times
            .iter()
            .filter(|&&t| t <= end)
            .filter_map(|&t| searchsorted_left(ts, t).checked_sub(1))
            .filter(|&idx| idx > 0 && !low[idx])
            .collect()
    }

    /// Build place fields for every neuron in `spikes`.
    ///
    /// `window` restricts both occupancy (`start <= ts <= end`) and spikes
    /// (`start <= t < end`); `v_cutoff` overrides the configured cutoff.
    pub fn build(
        &self,
        spikes: &SpikeTrains,
        window: Option<(f64, f64)>,
        v_cutoff: Option<f64>,
    ) -> DecodeResult<PlaceFields> {
        if spikes.is_empty() {
            return Err(DecodeError::DegenerateData {
                reason: "no neurons in spike dictionary".into(),
            });
        }
        let (start, end) = self.resolve_window(window)?;
        let v_cutoff = v_cutoff.unwrap_or(self.config.v_cutoff);
        // one mask for every neuron in this build
        let low = self.speed.low_speed_mask(v_cutoff);
        let occupancy = self.occupancy_with_mask(start, end, &low)?;

        let (ybins, xbins) = self.grid.shape();
        let n = spikes.len();
        let mut rates = Array3::<f64>::zeros((n, ybins, xbins));
        let mut sharp = Array3::<f64>::zeros((n, ybins, xbins));
        let mut firing_samples = Vec::with_capacity(n);
        let positions = self.trajectory.positions();
        let denom = occupancy.time_spent();

        for (i, (id, times)) in spikes.iter().enumerate() {
            let lo = searchsorted_left(times, start);
            let hi = searchsorted_left(times, end);
            let samples = self.firing_samples(&times[lo..hi], &low);

            let mut firing = Array2::<f64>::zeros((ybins, xbins));
            for &idx in &samples {
                if let Some(bin) = self.grid.locate(positions[idx]) {
                    firing[[bin.y, bin.x]] += 1.0;
                }
            }
            if samples.is_empty() {
                tracing::warn!(neuron = id, "neuron has no spikes in the field window");
            }

            let mut rate = &firing / &denom;
            rate.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
            let smoothed = convolve2d_symmetric(&rate.view(), &self.kernel.view());

            sharp.index_axis_mut(Axis(0), i).assign(&rate);
            rates.index_axis_mut(Axis(0), i).assign(&smoothed);
            firing_samples.push(samples.len());
        }

        let floor = self.config.rate_floor;
        rates.mapv_inplace(|v| if v == 0.0 { floor } else { v });

        tracing::debug!(neurons = n, start, end, v_cutoff, "built place fields");

        Ok(PlaceFields {
            neuron_ids: spikes.ids(),
            rates,
            sharp,
            firing_samples,
            occupancy,
            grid: self.grid,
            duration: self.trajectory.duration(),
        })
    }

    /// Place fields from an already binned spike-count matrix.
    ///
    /// `counts` is `(samples, neurons)` and `positions` gives the position of
    /// each row. Rates are `firing / occupancy / t_window`, undefined ratios
    /// are zeroed, then smoothed. No speed filtering is applied here; the
    /// caller decides which rows to pass.
    pub fn fields_from_counts(
        &self,
        counts: ArrayView2<'_, u32>,
        positions: &[Position],
        t_window: f64,
    ) -> DecodeResult<Array3<f64>> {
        if counts.nrows() != positions.len() {
            return Err(DecodeError::ShapeMismatch {
                what: "count rows vs positions",
                expected: positions.len(),
                got: counts.nrows(),
            });
        }
        if !t_window.is_finite() || t_window <= 0.0 {
            return Err(DecodeError::invalid("t_window", format!("must be positive, got {t_window}")));
        }
        let (ybins, xbins) = self.grid.shape();
        let n = counts.ncols();
        let mut firing = Array3::<f64>::zeros((n, ybins, xbins));
        let mut occupancy = Array2::<f64>::zeros((ybins, xbins));

        for (row, &pos) in counts.outer_iter().zip(positions) {
            let Some(bin) = self.grid.locate(pos) else { continue };
            occupancy[[bin.y, bin.x]] += 1.0;
            for (k, &c) in row.iter().enumerate() {
                firing[[k, bin.y, bin.x]] += f64::from(c);
            }
        }

        let mut fields = Array3::<f64>::zeros((n, ybins, xbins));
        for (k, map) in firing.outer_iter().enumerate() {
            let mut rate = &map / &occupancy / t_window;
            rate.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
            let smoothed = convolve2d_symmetric(&rate.view(), &self.kernel.view());
            fields.index_axis_mut(Axis(0), k).assign(&smoothed);
        }
        Ok(fields)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Back-and-forth sweep along x at constant speed, y oscillating slowly
    fn sweep(n: usize, dt: f64) -> Trajectory {
        let pos = (0..n)
            .map(|i| {
                let t = i as f64 * dt;
                let phase = (t / 10.0).fract();
                let x = if phase < 0.5 { phase * 200.0 } else { (1.0 - phase) * 200.0 };
                let y = 10.0 + 10.0 * (t / 7.0).sin();
                [x, y]
            })
            .collect();
        Trajectory::from_uniform(pos, dt).unwrap()
    }

    fn builder() -> PlaceFieldBuilder {
        PlaceFieldBuilder::new(sweep(3000, 0.02), FieldConfig::default()).unwrap()
    }

    #[test]
    fn test_occupancy_probability_sums_to_one() {
        let b = builder();
        let occ = b.occupancy(None, 5.0).unwrap();
        assert_relative_eq!(occ.probability().sum(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(occ.total_time(), occ.time_spent().sum(), epsilon = 1e-9);
    }

    #[test]
    fn test_occupancy_degenerate_when_too_slow() {
        let b = builder();
        let r = b.occupancy(None, 1e6);
        assert!(matches!(r, Err(DecodeError::DegenerateData { .. })));
    }

    #[test]
    fn test_fields_have_no_zero_entries() {
        let b = builder();
        let mut spikes = SpikeTrains::new();
        spikes.insert(0, vec![]).unwrap();
        spikes.insert(3, (1..500).map(|i| f64::from(i) * 0.1 + 0.005).collect()).unwrap();
        let fields = b.build(&spikes, None, None).unwrap();
        assert_eq!(fields.neuron_ids, vec![0, 3]);
        assert!(fields.rates.iter().all(|&v| v > 0.0 && v.is_finite()));
        assert!(fields.sharp.iter().all(|v| v.is_finite()));
        // the silent neuron is all floor
        assert!(fields.field(0).iter().all(|&v| v == DEFAULT_RATE_FLOOR));
        assert!(fields.firing_samples[1] > 0);
    }

    #[test]
    fn test_firing_samples_discards_edges() {
        let b = builder();
        let ts = b.trajectory().ts().to_vec();
        let none_low = vec![false; ts.len()];
        let spikes = [ts[0] - 1.0, ts[0], ts[1], ts[2] + 0.001, ts[ts.len() - 1] + 1.0];
        let samples = b.firing_samples(&spikes, &none_low);
        // before start, at ts[0] and at ts[1] (maps to 0) are dropped; past the end too
        assert_eq!(samples, vec![2]);
    }

    #[test]
    fn test_firing_samples_respects_low_speed_mask() {
        let b = builder();
        let mut low = vec![false; b.trajectory().len()];
        low[5] = true;
        let t = b.trajectory().ts()[5] + 0.001;
        assert!(b.firing_samples(&[t], &low).is_empty());
    }

    #[test]
    fn test_build_is_deterministic() {
        let b = builder();
        let mut spikes = SpikeTrains::new();
        spikes.insert(1, (1..300).map(|i| f64::from(i) * 0.17).collect()).unwrap();
        let a = b.build(&spikes, Some((0.0, 30.0)), None).unwrap();
        let c = b.build(&spikes, Some((0.0, 30.0)), None).unwrap();
        assert_eq!(a.rates, c.rates);
    }

    #[test]
    fn test_fields_from_counts_shape() {
        let b = builder();
        let positions: Vec<Position> = b.trajectory().positions()[..100].to_vec();
        let counts = Array2::<u32>::ones((100, 4));
        let fields = b.fields_from_counts(counts.view(), &positions, 0.5).unwrap();
        let (ybins, xbins) = b.grid().shape();
        assert_eq!(fields.dim(), (4, ybins, xbins));
        assert!(fields.iter().all(|v| v.is_finite()));
        assert!(b.fields_from_counts(counts.view(), &positions[..10], 0.5).is_err());
    }

    #[test]
    fn test_fields_from_counts_rates() {
        // 1x1 kernel leaves the raw rate untouched; 2x2 grid of 5-unit bins
        let config = FieldConfig {
            bin_size: 5.0,
            kernel_len: 1,
            maze_range: Some(MazeBounds::new([0.0, 10.0], [0.0, 10.0]).unwrap()),
            ..FieldConfig::default()
        };
        let b = PlaceFieldBuilder::new(sweep(500, 0.02), config).unwrap();
        let positions = [[1.0, 1.0], [2.0, 3.0], [4.0, 1.5], [7.0, 2.0], [2.0, 8.0]];
        let counts = ndarray::array![[2u32, 0], [4, 0], [0, 1], [3, 0], [0, 5]];
        let fields = b.fields_from_counts(counts.view(), &positions, 0.5).unwrap();

        // (x=0, y=0): 6 spikes over 3 rows of 0.5 s
        assert_relative_eq!(fields[[0, 0, 0]], 4.0, epsilon = 1e-12);
        assert_relative_eq!(fields[[1, 0, 0]], 1.0 / 3.0 / 0.5, epsilon = 1e-12);
        // (x=1, y=0) and (x=0, y=1): one row each
        assert_relative_eq!(fields[[0, 0, 1]], 6.0, epsilon = 1e-12);
        assert_relative_eq!(fields[[1, 1, 0]], 10.0, epsilon = 1e-12);
        // never visited
        assert_eq!(fields[[0, 1, 1]], 0.0);
        assert_eq!(fields[[1, 1, 1]], 0.0);
    }

    #[test]
    fn test_spikes_after_last_sample_are_dropped() {
        let b = builder();
        let ts = b.trajectory().ts().to_vec();
        let last = ts.len() - 1;
        let none_low = vec![false; ts.len()];
        // a spike at the last timestamp belongs to the preceding sample
        assert_eq!(b.firing_samples(&[ts[last]], &none_low), vec![last - 1]);
        // anything later has no sample in effect and is not clamped
        assert!(b.firing_samples(&[ts[last] + 1e-3, ts[last] + 5.0], &none_low).is_empty());
    }

    #[test]
    fn test_peak_rates_follow_fields() {
        let b = builder();
        let mut spikes = SpikeTrains::new();
        spikes.insert(2, vec![]).unwrap();
        spikes.insert(4, (1..400).map(|i| f64::from(i) * 0.13 + 0.004).collect()).unwrap();
        let fields = b.build(&spikes, None, None).unwrap();
        let peaks = fields.peak_rates();
        assert_eq!(peaks.len(), fields.len());
        assert_eq!(peaks[0], DEFAULT_RATE_FLOOR);
        assert_eq!(peaks[1], fields.field(1).fold(0.0_f64, |m, &v| m.max(v)));
        assert!(peaks[1] > peaks[0]);
    }
}
