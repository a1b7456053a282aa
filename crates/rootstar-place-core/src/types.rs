//! Core data types for spatial decoding
//!
//! Spike trains keyed by neuron id, maze geometry, and the spatial bin grid
//! that maps between real coordinates and rate-map cells.
//!
//! # Grid conventions
//!
//! Rate maps are stored row-major as `(ybins, xbins)`: each row lists the
//! bins sharing a common y range. A [`GridIndex`] is written `(x, y)` to
//! match position order, so cell `GridIndex { x, y }` lives at `[[y, x]]`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Neuron (sorted unit) identifier
pub type NeuronId = u32;

/// 2D position in maze coordinates `[x, y]`
pub type Position = [f64; 2];

/// Tolerance (in bins) applied before flooring a real position to a bin.
///
/// Keeps `binned_to_real` followed by `real_pos_to_binned` exact when the
/// origin is not representable without rounding.
const BIN_TOLERANCE: f64 = 1e-9;

// ============================================================================
// Spike Trains
// ============================================================================

/// Spike times per neuron, in seconds.
///
/// Neurons are always iterated in ascending id order, which is the column
/// order of every spike-count matrix and the stacking order of every
/// place-field tensor built from this value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpikeTrains {
    trains: BTreeMap<NeuronId, Vec<f64>>,
}

impl SpikeTrains {
    /// Create an empty dictionary
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a map, validating every train
    pub fn from_map(map: BTreeMap<NeuronId, Vec<f64>>) -> CoreResult<Self> {
        let mut trains = Self::new();
        for (id, times) in map {
            trains.insert(id, times)?;
        }
        Ok(trains)
    }

    /// Insert a spike train, replacing any previous train for `id`.
    ///
    /// Times must be finite and non-decreasing.
    pub fn insert(&mut self, id: NeuronId, times: Vec<f64>) -> CoreResult<()> {
        if times.iter().any(|t| !t.is_finite()) {
            return Err(CoreError::invalid("spike_times", format!("neuron {id} has non-finite spike times")));
        }
        if times.windows(2).any(|w| w[1] < w[0]) {
            return Err(CoreError::invalid("spike_times", format!("neuron {id} spike times are not sorted")));
        }
        self.trains.insert(id, times);
        Ok(())
    }

    /// Number of neurons
    pub fn len(&self) -> usize {
        self.trains.len()
    }

    /// True when no neuron is present
    pub fn is_empty(&self) -> bool {
        self.trains.is_empty()
    }

    /// Neuron ids in ascending order
    pub fn ids(&self) -> Vec<NeuronId> {
        self.trains.keys().copied().collect()
    }

    /// Spike times of one neuron
    pub fn get(&self, id: NeuronId) -> Option<&[f64]> {
        self.trains.get(&id).map(Vec::as_slice)
    }

    /// Iterate `(id, times)` in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (NeuronId, &[f64])> {
        self.trains.iter().map(|(&id, times)| (id, times.as_slice()))
    }

    /// Total number of spikes across all neurons
    pub fn total_spikes(&self) -> usize {
        self.trains.values().map(Vec::len).sum()
    }

    /// Copy without the lowest-id neuron.
    ///
    /// Spike sorters conventionally place unsorted threshold crossings in
    /// the first unit, so this is how the noise unit is discarded. The
    /// remaining ids are kept as they are.
    #[must_use]
    pub fn without_first(&self) -> Self {
        let mut trains = self.trains.clone();
        if let Some(&first) = trains.keys().next() {
            trains.remove(&first);
        }
        Self { trains }
    }

    /// Copy keeping only the given neuron ids
    #[must_use]
    pub fn select(&self, ids: &[NeuronId]) -> Self {
        let trains = self
            .trains
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(&id, times)| (id, times.clone()))
            .collect();
        Self { trains }
    }
}

// ============================================================================
// Maze Geometry
// ============================================================================

/// Axis-aligned maze extent `[min, max]` per axis
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MazeBounds {
    /// x range
    pub x: [f64; 2],
    /// y range
    pub y: [f64; 2],
}

impl MazeBounds {
    /// Create bounds, validating that each range is finite and non-empty
    pub fn new(x: [f64; 2], y: [f64; 2]) -> CoreResult<Self> {
        for (name, range) in [("maze_range.x", x), ("maze_range.y", y)] {
            if !range[0].is_finite() || !range[1].is_finite() || range[1] <= range[0] {
                return Err(CoreError::invalid(name, format!("range {range:?} is empty or not finite")));
            }
        }
        Ok(Self { x, y })
    }

    /// Tightest bounds containing every position
    pub fn from_positions(positions: &[Position]) -> CoreResult<Self> {
        if positions.is_empty() {
            return Err(CoreError::EmptyInput { what: "positions" });
        }
        let mut x = [f64::INFINITY, f64::NEG_INFINITY];
        let mut y = [f64::INFINITY, f64::NEG_INFINITY];
        for p in positions {
            x = [x[0].min(p[0]), x[1].max(p[0])];
            y = [y[0].min(p[1]), y[1].max(p[1])];
        }
        Self::new(x, y)
    }

    /// Lower-left corner
    pub fn origin(&self) -> Position {
        [self.x[0], self.y[0]]
    }

    /// Side lengths `[width, height]`
    pub fn extent(&self) -> [f64; 2] {
        [self.x[1] - self.x[0], self.y[1] - self.y[0]]
    }

    /// Center point
    pub fn center(&self) -> Position {
        let [w, h] = self.extent();
        [self.x[0] + w / 2.0, self.y[0] + h / 2.0]
    }

    /// True if the position lies inside the closed rectangle
    pub fn contains(&self, pos: Position) -> bool {
        pos[0] >= self.x[0] && pos[0] <= self.x[1] && pos[1] >= self.y[0] && pos[1] <= self.y[1]
    }
}

/// Cell of the spatial grid, `(x, y)` order
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridIndex {
    /// Column (x bin)
    pub x: usize,
    /// Row (y bin)
    pub y: usize,
}

impl GridIndex {
    /// Create a grid index
    #[must_use]
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Uniform square-bin grid laid over the maze.
///
/// The bin count per axis is `floor(extent / bin_size)`. Bins are anchored
/// at the maze origin; a strip narrower than one bin along the far edges is
/// folded into the last bin of that axis.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpatialGrid {
    bounds: MazeBounds,
    bin_size: f64,
    xbins: usize,
    ybins: usize,
}

impl SpatialGrid {
    /// Lay a grid of `bin_size` cells over `bounds`
    pub fn new(bounds: MazeBounds, bin_size: f64) -> CoreResult<Self> {
        if !bin_size.is_finite() || bin_size <= 0.0 {
            return Err(CoreError::invalid("bin_size", format!("must be positive, got {bin_size}")));
        }
        let [w, h] = bounds.extent();
        let xbins = (w / bin_size).floor() as usize;
        let ybins = (h / bin_size).floor() as usize;
        if xbins == 0 || ybins == 0 {
            return Err(CoreError::invalid(
                "bin_size",
                format!("{bin_size} exceeds maze extent {w}x{h}"),
            ));
        }
        Ok(Self { bounds, bin_size, xbins, ybins })
    }

    /// Maze bounds the grid covers
    pub fn bounds(&self) -> MazeBounds {
        self.bounds
    }

    /// Side length of one bin
    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    /// Real coordinate of bin `(0, 0)`
    pub fn origin(&self) -> Position {
        self.bounds.origin()
    }

    /// Number of x bins
    pub fn xbins(&self) -> usize {
        self.xbins
    }

    /// Number of y bins
    pub fn ybins(&self) -> usize {
        self.ybins
    }

    /// Rate-map shape `(ybins, xbins)`
    pub fn shape(&self) -> (usize, usize) {
        (self.ybins, self.xbins)
    }

    /// Total number of bins
    pub fn n_bins(&self) -> usize {
        self.xbins * self.ybins
    }

    /// True if the index addresses a bin of this grid
    pub fn contains(&self, bin: GridIndex) -> bool {
        bin.x < self.xbins && bin.y < self.ybins
    }

    /// Real coordinate of a bin's lower-left corner:
    /// `bin * bin_size + origin`
    pub fn binned_to_real(&self, bin: GridIndex) -> Position {
        let origin = self.origin();
        [
            bin.x as f64 * self.bin_size + origin[0],
            bin.y as f64 * self.bin_size + origin[1],
        ]
    }

    /// Unclamped bin coordinates of a real position.
    ///
    /// Computes `floor((pos - origin) / bin_size)` per axis, truncating
    /// toward negative infinity after a `1e-9` bin tolerance, so positions
    /// left of or below the origin map to negative bins.
    pub fn real_pos_to_binned(&self, pos: Position) -> [i64; 2] {
        let origin = self.origin();
        let to_bin = |p: f64, o: f64| ((p - o) / self.bin_size + BIN_TOLERANCE).floor() as i64;
        [to_bin(pos[0], origin[0]), to_bin(pos[1], origin[1])]
    }

    /// Bin containing a position, as used for histograms.
    ///
    /// Positions outside the maze bounds yield `None`. Positions inside the
    /// bounds but past the last full bin are folded into the last bin.
    pub fn locate(&self, pos: Position) -> Option<GridIndex> {
        if !self.bounds.contains(pos) {
            return None;
        }
        let [bx, by] = self.real_pos_to_binned(pos);
        let clamp = |b: i64, n: usize| (b.max(0) as usize).min(n - 1);
        Some(GridIndex::new(clamp(bx, self.xbins), clamp(by, self.ybins)))
    }

    /// Flat label `x + y * xbins`
    pub fn label(&self, bin: GridIndex) -> usize {
        bin.x + bin.y * self.xbins
    }

    /// Inverse of [`SpatialGrid::label`]
    pub fn from_label(&self, label: usize) -> GridIndex {
        GridIndex::new(label % self.xbins, label / self.xbins)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn grid() -> SpatialGrid {
        SpatialGrid::new(MazeBounds::new([-50.0, 50.0], [-20.0, 30.0]).unwrap(), 2.5).unwrap()
    }

    #[test]
    fn test_spike_trains_ordering() {
        let mut trains = SpikeTrains::new();
        trains.insert(7, vec![0.1, 0.2]).unwrap();
        trains.insert(2, vec![0.5]).unwrap();
        trains.insert(4, vec![]).unwrap();
        assert_eq!(trains.ids(), vec![2, 4, 7]);
        assert_eq!(trains.total_spikes(), 3);
        assert_eq!(trains.without_first().ids(), vec![4, 7]);
    }

    #[test]
    fn test_spike_trains_reject_unsorted() {
        let mut trains = SpikeTrains::new();
        assert!(trains.insert(0, vec![0.3, 0.1]).is_err());
        assert!(trains.insert(0, vec![f64::NAN]).is_err());
    }

    #[test]
    fn test_grid_shape() {
        let g = grid();
        assert_eq!(g.xbins(), 40);
        assert_eq!(g.ybins(), 20);
        assert_eq!(g.shape(), (20, 40));
        assert_eq!(g.n_bins(), 800);
    }

    #[test]
    fn test_grid_rejects_bad_bin_size() {
        let bounds = MazeBounds::new([0.0, 10.0], [0.0, 10.0]).unwrap();
        assert!(SpatialGrid::new(bounds, 0.0).is_err());
        assert!(SpatialGrid::new(bounds, -1.0).is_err());
        assert!(SpatialGrid::new(bounds, 20.0).is_err());
    }

    #[test]
    fn test_locate_folds_far_edge() {
        // 10 / 3 -> 3 bins, the last 1.0 strip folds into bin 2
        let bounds = MazeBounds::new([0.0, 10.0], [0.0, 10.0]).unwrap();
        let g = SpatialGrid::new(bounds, 3.0).unwrap();
        assert_eq!(g.locate([9.5, 10.0]), Some(GridIndex::new(2, 2)));
        assert_eq!(g.locate([0.0, 0.0]), Some(GridIndex::new(0, 0)));
        assert_eq!(g.locate([10.5, 1.0]), None);
    }

    #[test]
    fn test_negative_positions_floor_down() {
        let g = grid();
        assert_eq!(g.real_pos_to_binned([-51.0, -21.0]), [-1, -1]);
    }

    #[test]
    fn test_label_round_trip() {
        let g = grid();
        let bin = GridIndex::new(13, 17);
        assert_eq!(g.from_label(g.label(bin)), bin);
    }

    proptest! {
        #[test]
        fn prop_grid_round_trip(x in 0usize..40, y in 0usize..20) {
            let g = grid();
            let bin = GridIndex::new(x, y);
            let real = g.binned_to_real(bin);
            prop_assert_eq!(g.real_pos_to_binned(real), [x as i64, y as i64]);
            prop_assert_eq!(g.locate(real), Some(bin));
        }
    }
}
