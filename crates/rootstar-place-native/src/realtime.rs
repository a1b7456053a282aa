//! Closed-loop windowed decoding
//!
//! An external binner delivers one spike-count bin per call. The decoder
//! keeps the last `B` bins, where `B = round(t_window / bin_size)`, and
//! decodes their sum with the cached model terms once the buffer is full.
//!
//! ```text
//! bin ──► ring buffer (B bins) ──► running sum ──► predict_rt ──► estimate
//! ```
//!
//! Each call is a single bounded computation with no I/O.

use std::collections::VecDeque;
use std::sync::Arc;

use ndarray::Array1;

use crate::decoder::BayesianDecoder;
use crate::error::{DecodeError, DecodeResult};
use crate::model::{DecoderModel, RealtimeEstimate};

/// Windowed real-time decoder over a frozen model
#[derive(Clone, Debug)]
pub struct RealtimeDecoder {
    model: Arc<DecoderModel>,
    /// Input columns kept for the model, `None` = all
    columns: Option<Vec<usize>>,
    input_width: usize,
    buffer: VecDeque<Vec<u32>>,
    window_bins: usize,
    running: Array1<f64>,
    decoded: u64,
}

impl RealtimeDecoder {
    /// Create a decoder whose input bins are `bin_size` seconds long
    pub fn new(model: Arc<DecoderModel>, bin_size: f64) -> DecodeResult<Self> {
        let width = model.n_neurons();
        Self::with_columns(model, None, width, bin_size)
    }

    /// Decoder over a fitted [`BayesianDecoder`], honouring its neuron mask.
    ///
    /// Incoming bins carry one column per fitted neuron.
    pub fn from_decoder(decoder: &BayesianDecoder, bin_size: f64) -> DecodeResult<Self> {
        let width = decoder.model()?.n_neurons();
        let model = Arc::clone(decoder.active_model()?);
        let columns = decoder.active_columns().map(<[usize]>::to_vec);
        Self::with_columns(model, columns, width, bin_size)
    }

    fn with_columns(
        model: Arc<DecoderModel>,
        columns: Option<Vec<usize>>,
        input_width: usize,
        bin_size: f64,
    ) -> DecodeResult<Self> {
        if !bin_size.is_finite() || bin_size <= 0.0 {
            return Err(DecodeError::invalid("bin_size", format!("must be positive, got {bin_size}")));
        }
        let window_bins = (model.t_window() / bin_size).round().max(1.0) as usize;
        let n = model.n_neurons();
        tracing::debug!(window_bins, neurons = n, "real-time decoder ready");
        Ok(Self {
            model,
            columns,
            input_width,
            buffer: VecDeque::with_capacity(window_bins),
            window_bins,
            running: Array1::zeros(n),
            decoded: 0,
        })
    }

    /// Bins summed per decode
    pub fn window_bins(&self) -> usize {
        self.window_bins
    }

    /// Bins currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Estimates produced so far
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Model in use
    pub fn model(&self) -> &Arc<DecoderModel> {
        &self.model
    }

    /// Push one count bin; returns an estimate once `window_bins` bins are
    /// buffered, `None` before that.
    pub fn push_bin(&mut self, bin: &[u32]) -> DecodeResult<Option<RealtimeEstimate>> {
        if bin.len() != self.input_width {
            return Err(DecodeError::ShapeMismatch {
                what: "real-time bin width",
                expected: self.input_width,
                got: bin.len(),
            });
        }
        let counts: Vec<u32> = match &self.columns {
            Some(cols) => cols.iter().map(|&c| bin[c]).collect(),
            None => bin.to_vec(),
        };

        for (acc, &c) in self.running.iter_mut().zip(&counts) {
            *acc += f64::from(c);
        }
        self.buffer.push_back(counts);
        if self.buffer.len() > self.window_bins {
            if let Some(old) = self.buffer.pop_front() {
                for (acc, &c) in self.running.iter_mut().zip(&old) {
                    *acc -= f64::from(c);
                }
            }
        }
        if self.buffer.len() < self.window_bins {
            return Ok(None);
        }

        let estimate = self.model.predict_rt_counts(self.running.view())?;
        self.decoded += 1;
        Ok(Some(estimate))
    }

    /// Drop buffered bins
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.running.fill(0.0);
    }
}

// ============================================================================
// Tests
// ============================================================================
