//! Bayesian place decoder
//!
//! Holds the decoder configuration and, once fitted, a shared
//! [`DecoderModel`]. The decoder moves from `Unfit` to `Fit` on
//! [`BayesianDecoder::fit`]; every decode call before that fails with
//! [`DecodeError::NotFitted`].
//!
//! # Neuron masking
//!
//! [`BayesianDecoder::drop_neurons`] silences neurons without refitting.
//! Callers keep passing count rows with one column per fitted neuron; the
//! masked columns are removed before decoding and the matching rows of the
//! field stack are removed once, when the mask is set, so the real-time
//! path still runs on cached terms.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2, Axis};
use rootstar_place_core::{Position, SpikeTrains};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};
use crate::fields::PlaceFieldBuilder;
use crate::model::{BatchDecode, DecoderModel, FitContext, RealtimeEstimate};

/// Decoder configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Spike-count integration window (s)
    pub t_window: f64,
    /// Decoding step (s); the trajectory's own step is used when absent
    pub t_step: Option<f64>,
    /// Drop the lowest-id unit (the noise cluster) before fitting
    pub remove_noise_unit: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            t_window: 0.5,
            t_step: Some(0.1),
            remove_noise_unit: false,
        }
    }
}

/// Decoder lifecycle state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecoderState {
    /// No model yet
    Unfit,
    /// Model fitted and frozen
    Fit,
}

/// Active model after masking, with the surviving column indices
#[derive(Clone, Debug)]
struct MaskedView {
    columns: Vec<usize>,
    model: Arc<DecoderModel>,
}

/// Poisson naive-Bayes position decoder
#[derive(Clone, Debug, Default)]
pub struct BayesianDecoder {
    config: DecoderConfig,
    model: Option<Arc<DecoderModel>>,
    masked: Option<MaskedView>,
    disabled: Vec<usize>,
}

impl BayesianDecoder {
    /// Create an unfitted decoder
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Wrap an existing model (e.g. one loaded from disk)
    pub fn from_model(config: DecoderConfig, model: DecoderModel) -> Self {
        Self {
            config,
            model: Some(Arc::new(model)),
            masked: None,
            disabled: Vec::new(),
        }
    }

    /// Decoder configuration
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> DecoderState {
        if self.model.is_some() {
            DecoderState::Fit
        } else {
            DecoderState::Unfit
        }
    }

    /// Fit place fields over `train_window` and cache the decoding terms.
    ///
    /// Fields are rebuilt from precise spike times, not from binned counts.
    /// Any previously set neuron mask is re-applied to the new model.
    pub fn fit(
        &mut self,
        builder: &PlaceFieldBuilder,
        spikes: &SpikeTrains,
        train_window: (f64, f64),
        v_cutoff: f64,
    ) -> DecodeResult<Arc<DecoderModel>> {
        let selected;
        let spikes = if self.config.remove_noise_unit {
            selected = spikes.without_first();
            &selected
        } else {
            spikes
        };

        let fields = builder.build(spikes, Some(train_window), Some(v_cutoff))?;
        let cfg = builder.config();
        let context = FitContext {
            kernel_len: cfg.kernel_len,
            kernel_std: cfg.kernel_std,
            v_cutoff,
            train_window,
        };
        let model = DecoderModel::new(fields.neuron_ids, fields.rates, fields.grid, self.config.t_window, context)?;
        tracing::info!(
            neurons = model.n_neurons(),
            start = train_window.0,
            end = train_window.1,
            v_cutoff,
            "fitted decoder"
        );

        let model = Arc::new(model);
        self.masked = Self::derive_mask(&model, &self.disabled)?;
        self.model = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Full fitted model
    pub fn model(&self) -> DecodeResult<&Arc<DecoderModel>> {
        self.model.as_ref().ok_or(DecodeError::NotFitted)
    }

    /// Model actually used for decoding (masked when neurons are dropped)
    pub fn active_model(&self) -> DecodeResult<&Arc<DecoderModel>> {
        match &self.masked {
            Some(view) => Ok(&view.model),
            None => self.model(),
        }
    }

    /// Columns that survive the mask, `None` when nothing is dropped
    pub fn active_columns(&self) -> Option<&[usize]> {
        self.masked.as_ref().map(|view| view.columns.as_slice())
    }

    /// Indices currently excluded from decoding
    pub fn dropped_neurons(&self) -> &[usize] {
        &self.disabled
    }

    /// Exclude neurons (positions in the fitted order) from decoding.
    ///
    /// Replaces any earlier mask; an empty list restores all neurons. Before
    /// `fit` the list is stored and checked when the model is built.
    pub fn drop_neurons(&mut self, indices: &[usize]) -> DecodeResult<()> {
        let mut disabled = indices.to_vec();
        disabled.sort_unstable();
        disabled.dedup();
        if let Some(model) = &self.model {
            self.masked = Self::derive_mask(model, &disabled)?;
        }
        if !disabled.is_empty() {
            tracing::info!(dropped = ?disabled, "neuron mask updated");
        }
        self.disabled = disabled;
        Ok(())
    }

    fn derive_mask(model: &DecoderModel, disabled: &[usize]) -> DecodeResult<Option<MaskedView>> {
        if disabled.is_empty() {
            return Ok(None);
        }
        let n = model.n_neurons();
        if let Some(&bad) = disabled.iter().find(|&&i| i >= n) {
            return Err(DecodeError::invalid(
                "neuron index",
                format!("{bad} out of range for {n} fitted neurons"),
            ));
        }
        let columns: Vec<usize> = (0..n).filter(|i| disabled.binary_search(i).is_err()).collect();
        if columns.is_empty() {
            return Err(DecodeError::invalid("neuron mask", "cannot drop every neuron"));
        }
        let model = Arc::new(model.subset(&columns)?);
        Ok(Some(MaskedView { columns, model }))
    }

    /// Validate width against the full model and drop masked columns
    fn active_counts(&self, counts: ArrayView2<'_, u32>) -> DecodeResult<Option<Array2<u32>>> {
        let full = self.model()?;
        if counts.ncols() != full.n_neurons() {
            return Err(DecodeError::ShapeMismatch {
                what: "count columns vs fitted neurons",
                expected: full.n_neurons(),
                got: counts.ncols(),
            });
        }
        Ok(self.masked.as_ref().map(|view| counts.select(Axis(1), &view.columns)))
    }

    /// Batch decode, one position per row of `counts`
    pub fn predict(&self, counts: ArrayView2<'_, u32>) -> DecodeResult<Vec<Position>> {
        let selected = self.active_counts(counts)?;
        let model = self.active_model()?;
        match &selected {
            Some(c) => model.predict(c.view()),
            None => model.predict(counts),
        }
    }

    /// Batch decode with normalized posteriors
    pub fn predict_with_posterior(&self, counts: ArrayView2<'_, u32>) -> DecodeResult<BatchDecode> {
        let selected = self.active_counts(counts)?;
        let model = self.active_model()?;
        match &selected {
            Some(c) => model.predict_with_posterior(c.view()),
            None => model.predict_with_posterior(counts),
        }
    }

    /// Real-time decode of one window (rows are summed)
    pub fn predict_rt(&self, window: ArrayView2<'_, u32>) -> DecodeResult<RealtimeEstimate> {
        let selected = self.active_counts(window)?;
        let model = self.active_model()?;
        match &selected {
            Some(c) => model.predict_rt(c.view()),
            None => model.predict_rt(window),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
