//! Fitted decoder model
//!
//! The immutable product of `fit`: the place-field stack plus the terms
//! cached for low-latency decoding. Both decode paths only read it, so a
//! model can be shared across threads behind an `Arc`.
//!
//! # Poisson log-likelihood
//!
//! For a count vector `k` collected over `t_window` seconds:
//!
//! ```text
//! loglik(bin) = Σ_n k[n] · ln(rate[n, bin]) − t_window · Σ_n rate[n, bin]
//!             = Σ_n k[n] · log_fr[n, bin]  − poisson_matrix[bin]
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use rootstar_place_core::math::argmax_2d;
use rootstar_place_core::{GridIndex, NeuronId, Position, SpatialGrid};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};

/// Current on-disk model format
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Parameters the fields were estimated with, kept for provenance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitContext {
    /// Smoothing kernel length (bins)
    pub kernel_len: usize,
    /// Smoothing kernel standard deviation (bins)
    pub kernel_std: f64,
    /// Speed cutoff used for occupancy and fields
    pub v_cutoff: f64,
    /// Training time window `(start, end)` (s)
    pub train_window: (f64, f64),
}

/// Position estimate from one real-time window
#[derive(Clone, Debug)]
pub struct RealtimeEstimate {
    /// Decoded position (bin corner in maze coordinates)
    pub position: Position,
    /// Decoded bin
    pub bin: GridIndex,
    /// Posterior over the grid, `(ybins, xbins)`, sums to 1
    pub posterior: Array2<f64>,
}

impl RealtimeEstimate {
    /// Posterior mass of the decoded bin
    pub fn confidence(&self) -> f64 {
        self.posterior[[self.bin.y, self.bin.x]]
    }
}

/// Batch decode output with per-row posteriors
#[derive(Clone, Debug)]
pub struct BatchDecode {
    /// Decoded positions, one per row
    pub positions: Vec<Position>,
    /// Decoded bins, one per row
    pub bins: Vec<GridIndex>,
    /// Normalized posteriors, `(rows, ybins, xbins)`
    pub posteriors: Array3<f64>,
}

/// Fitted place-field decoder model
#[derive(Clone, Debug)]
pub struct DecoderModel {
    neuron_ids: Vec<NeuronId>,
    fields: Array3<f64>,
    log_fr: Array3<f64>,
    poisson_matrix: Array2<f64>,
    grid: SpatialGrid,
    t_window: f64,
    context: FitContext,
}

impl DecoderModel {
    /// Assemble a model and derive its cached terms.
    ///
    /// `fields` is `(neurons, ybins, xbins)` and must be strictly positive
    /// and finite so that `ln(fields)` is defined everywhere.
    pub fn new(
        neuron_ids: Vec<NeuronId>,
        fields: Array3<f64>,
        grid: SpatialGrid,
        t_window: f64,
        context: FitContext,
    ) -> DecodeResult<Self> {
        if !t_window.is_finite() || t_window <= 0.0 {
            return Err(DecodeError::invalid("t_window", format!("must be positive, got {t_window}")));
        }
        let (ybins, xbins) = grid.shape();
        let expected = (neuron_ids.len(), ybins, xbins);
        if fields.dim() != expected {
            return Err(DecodeError::ShapeMismatch {
                what: "field tensor elements",
                expected: expected.0 * expected.1 * expected.2,
                got: fields.len(),
            });
        }
        if neuron_ids.is_empty() {
            return Err(DecodeError::DegenerateData {
                reason: "model has no neurons".into(),
            });
        }
        if fields.iter().any(|&v| !(v.is_finite() && v > 0.0)) {
            return Err(DecodeError::DegenerateData {
                reason: "fields must be positive and finite".into(),
            });
        }

        let log_fr = fields.mapv(f64::ln);
        let poisson_matrix = fields.sum_axis(Axis(0)) * t_window;

        Ok(Self {
            neuron_ids,
            fields,
            log_fr,
            poisson_matrix,
            grid,
            t_window,
            context,
        })
    }

    /// Neuron ids in column order
    pub fn neuron_ids(&self) -> &[NeuronId] {
        &self.neuron_ids
    }

    /// Number of neurons
    pub fn n_neurons(&self) -> usize {
        self.neuron_ids.len()
    }

    /// Rate maps `(neurons, ybins, xbins)`
    pub fn fields(&self) -> ArrayView3<'_, f64> {
        self.fields.view()
    }

    /// Cached `ln(fields)`
    pub fn log_fr(&self) -> ArrayView3<'_, f64> {
        self.log_fr.view()
    }

    /// Cached `t_window · Σ_n fields[n]`
    pub fn poisson_matrix(&self) -> ArrayView2<'_, f64> {
        self.poisson_matrix.view()
    }

    /// Spatial grid
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Bin side length
    pub fn spatial_bin_size(&self) -> f64 {
        self.grid.bin_size()
    }

    /// Real coordinate of bin `(0, 0)`
    pub fn spatial_origin(&self) -> Position {
        self.grid.origin()
    }

    /// Integration window the model expects (s)
    pub fn t_window(&self) -> f64 {
        self.t_window
    }

    /// Fit provenance
    pub fn context(&self) -> &FitContext {
        &self.context
    }

    /// Model restricted to the given neuron positions, caches re-derived
    pub fn subset(&self, keep: &[usize]) -> DecodeResult<Self> {
        if let Some(&bad) = keep.iter().find(|&&i| i >= self.n_neurons()) {
            return Err(DecodeError::invalid(
                "neuron index",
                format!("{bad} out of range for {} neurons", self.n_neurons()),
            ));
        }
        let ids = keep.iter().map(|&i| self.neuron_ids[i]).collect();
        let fields = self.fields.select(Axis(0), keep);
        Self::new(ids, fields, self.grid, self.t_window, self.context.clone())
    }

    fn check_width(&self, got: usize) -> DecodeResult<()> {
        if got == self.n_neurons() {
            Ok(())
        } else {
            Err(DecodeError::ShapeMismatch {
                what: "count columns vs fitted neurons",
                expected: self.n_neurons(),
                got,
            })
        }
    }

    fn to_estimate(&self, row: usize, col: usize) -> (GridIndex, Position) {
        let bin = GridIndex::new(col, row);
        (bin, self.grid.binned_to_real(bin))
    }

    /// Batch decode, one position per row of `counts`.
    ///
    /// `ln(rate)` and the expected-count term are recomputed from the fields
    /// for this call. Rows are independent and decoded in parallel. The
    /// decoded bin is the arg-max of the log-likelihood; ties go to the
    /// first bin in row-major order (lowest y, then lowest x).
    pub fn predict(&self, counts: ArrayView2<'_, u32>) -> DecodeResult<Vec<Position>> {
        self.check_width(counts.ncols())?;
        let log_rates = self.fields.mapv(f64::ln);
        let expected = self.fields.sum_axis(Axis(0)) * self.t_window;

        let positions = (0..counts.nrows())
            .into_par_iter()
            .map(|r| {
                let k = counts.row(r).mapv(f64::from);
                let loglik = log_likelihood(k.view(), log_rates.view(), expected.view());
                self.arg_max_position(&loglik)
            })
            .collect::<DecodeResult<Vec<_>>>()?;
        Ok(positions.into_iter().map(|(_, p)| p).collect())
    }

    /// Batch decode returning normalized posteriors as well
    pub fn predict_with_posterior(&self, counts: ArrayView2<'_, u32>) -> DecodeResult<BatchDecode> {
        self.check_width(counts.ncols())?;
        let (ybins, xbins) = self.grid.shape();
        let rows: Vec<(GridIndex, Position, Array2<f64>)> = (0..counts.nrows())
            .into_par_iter()
            .map(|r| {
                let k = counts.row(r).mapv(f64::from);
                let loglik = log_likelihood(k.view(), self.log_fr.view(), self.poisson_matrix.view());
                let (bin, pos) = self.arg_max_position(&loglik)?;
                Ok((bin, pos, normalize_posterior(&loglik)))
            })
            .collect::<DecodeResult<_>>()?;

        let mut posteriors = Array3::<f64>::zeros((rows.len(), ybins, xbins));
        let mut positions = Vec::with_capacity(rows.len());
        let mut bins = Vec::with_capacity(rows.len());
        for (i, (bin, pos, post)) in rows.into_iter().enumerate() {
            posteriors.index_axis_mut(Axis(0), i).assign(&post);
            positions.push(pos);
            bins.push(bin);
        }
        Ok(BatchDecode { positions, bins, posteriors })
    }

    /// Real-time decode of one window.
    ///
    /// All rows of `window` are summed into one count vector. The cached
    /// `log_fr` and `poisson_matrix` are used directly, and the posterior is
    /// normalized to sum to 1 over the grid.
    pub fn predict_rt(&self, window: ArrayView2<'_, u32>) -> DecodeResult<RealtimeEstimate> {
        self.check_width(window.ncols())?;
        if window.nrows() == 0 {
            return Err(DecodeError::invalid("real-time window", "contains no rows"));
        }
        let k: Array1<f64> = window.sum_axis(Axis(0)).mapv(f64::from);
        self.predict_rt_counts(k.view())
    }

    /// Real-time decode of an already aggregated count vector
    pub fn predict_rt_counts(&self, counts: ArrayView1<'_, f64>) -> DecodeResult<RealtimeEstimate> {
        self.check_width(counts.len())?;
        let loglik = log_likelihood(counts, self.log_fr.view(), self.poisson_matrix.view());
        let (bin, position) = self.arg_max_position(&loglik)?;
        let posterior = normalize_posterior(&loglik);
        tracing::trace!(x = bin.x, y = bin.y, "real-time decode");
        Ok(RealtimeEstimate { position, bin, posterior })
    }

    fn arg_max_position(&self, loglik: &Array2<f64>) -> DecodeResult<(GridIndex, Position)> {
        let (r, c) = argmax_2d(&loglik.view()).ok_or_else(|| DecodeError::DegenerateData {
            reason: "log-likelihood is undefined over the whole grid".into(),
        })?;
        Ok(self.to_estimate(r, c))
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write the model as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> DecodeResult<()> {
        let file = ModelFile {
            format_version: MODEL_FORMAT_VERSION,
            neuron_ids: self.neuron_ids.clone(),
            fields: self.fields.clone(),
            grid: self.grid,
            t_window: self.t_window,
            context: self.context.clone(),
        };
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, &file)?;
        writer.flush()?;
        tracing::info!(path = %path.as_ref().display(), neurons = self.n_neurons(), "saved decoder model");
        Ok(())
    }

    /// Read a model written by [`DecoderModel::save`], re-deriving caches
    pub fn load(path: impl AsRef<Path>) -> DecodeResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let file: ModelFile = serde_json::from_reader(reader)?;
        if file.format_version != MODEL_FORMAT_VERSION {
            return Err(DecodeError::invalid(
                "model format",
                format!("version {} is not supported", file.format_version),
            ));
        }
        Self::new(file.neuron_ids, file.fields, file.grid, file.t_window, file.context)
    }
}

/// On-disk model layout. Caches are not stored; they are derived on load.
#[derive(Serialize, Deserialize)]
struct ModelFile {
    format_version: u32,
    neuron_ids: Vec<NeuronId>,
    fields: Array3<f64>,
    grid: SpatialGrid,
    t_window: f64,
    context: FitContext,
}

/// `Σ_n k[n] · log_fr[n] − poisson`
fn log_likelihood(k: ArrayView1<'_, f64>, log_fr: ArrayView3<'_, f64>, poisson: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut acc = poisson.mapv(|v| -v);
    for (n, &count) in k.iter().enumerate() {
        if count != 0.0 {
            acc.scaled_add(count, &log_fr.index_axis(Axis(0), n));
        }
    }
    acc
}

/// `exp(loglik)` normalized over the grid, shifted by the maximum first so
/// the exponent cannot overflow
fn normalize_posterior(loglik: &Array2<f64>) -> Array2<f64> {
    let max = loglik.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let mut post = loglik.mapv(|v| (v - max).exp());
    let total = post.sum();
    if total > 0.0 && total.is_finite() {
        post /= total;
    }
    post
}

// ============================================================================
// Tests
// ============================================================================
