//! End-to-end decoding session
//!
//! Ties the stages together for one recording:
//!
//! ```text
//! trajectory (resampled to t_step) ─► PlaceFieldBuilder ─┐
//!                                                         ├─► fit ─► predict(test) ─► smooth ─► R²
//! spike trains ─► spike counts on ts[1..] ─► partition ───┘
//! ```
//!
//! Count row `i` is aligned with trajectory sample `i + 1`; the first sample
//! has no preceding window and is not decoded.

use std::fs;
use std::path::Path;

use rootstar_place_core::{Position, SpikeTrains};
use serde::{Deserialize, Serialize};

use crate::binner::{minimum_spike_cutoff, spike_count_matrix, CountCutoffConfig, CutoffReport, SpikeCounts};
use crate::decoder::{BayesianDecoder, DecoderConfig};
use crate::error::{DecodeError, DecodeResult};
use crate::evaluator::{
    field_metrics, score, select_units, smooth_trajectory, smoothing_window, EvaluationConfig, FieldMetrics,
    R2Score, UnitSelection,
};
use crate::fields::{FieldConfig, PlaceFieldBuilder};
use crate::partition::{partition, Partition, PartitionConfig, Split};
use crate::trajectory::Trajectory;

/// Every tunable of a decoding run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Place-field construction
    pub fields: FieldConfig,
    /// Decoder window and step
    pub decoder: DecoderConfig,
    /// Train/valid/test split
    pub partition: PartitionConfig,
    /// Low-activity row cleanup
    pub cutoff: CountCutoffConfig,
    /// Scoring
    pub evaluation: EvaluationConfig,
    /// Unit selection before decoding
    pub units: UnitSelection,
}

impl PipelineConfig {
    /// Parse from JSON; missing sections take their defaults
    pub fn from_json(json: &str) -> DecodeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> DecodeResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

/// Counts and true positions of one split
#[derive(Clone, Debug)]
pub struct SplitData {
    /// Spike counts, one row per sample
    pub counts: SpikeCounts,
    /// True position of every row
    pub positions: Vec<Position>,
    /// Outcome of the count cutoff, `None` when it was disabled
    pub cutoff: Option<CutoffReport>,
}

/// Data of all three splits
#[derive(Clone, Debug)]
pub struct SessionData {
    /// Training split
    pub train: SplitData,
    /// Validation split
    pub valid: SplitData,
    /// Test split
    pub test: SplitData,
}

/// Result of a fit-and-score run
#[derive(Clone, Debug)]
pub struct DecodingRun {
    /// Fitted decoder
    pub decoder: BayesianDecoder,
    /// Raw decoded test positions
    pub predicted: Vec<Position>,
    /// Decoded positions after smoothing
    pub smoothed: Vec<Position>,
    /// True test positions
    pub truth: Vec<Position>,
    /// R² of the smoothed prediction against the truth
    pub r2: R2Score,
}

/// One recording prepared for decoding
#[derive(Clone, Debug)]
pub struct DecodingSession {
    builder: PlaceFieldBuilder,
    spikes: SpikeTrains,
    config: PipelineConfig,
    partition: Partition,
}

impl DecodingSession {
    /// Prepare a session; the trajectory is resampled to the decoder
    /// `t_step` when one is configured.
    pub fn new(trajectory: Trajectory, spikes: SpikeTrains, config: PipelineConfig) -> DecodeResult<Self> {
        if spikes.is_empty() {
            return Err(DecodeError::DegenerateData {
                reason: "session has no units".into(),
            });
        }
        let trajectory = match config.decoder.t_step {
            Some(dt) => trajectory.resample(dt)?,
            None => trajectory,
        };
        let builder = PlaceFieldBuilder::new(trajectory, config.fields.clone())?;
        let partition = Self::compute_partition(&builder, &config)?;
        Ok(Self {
            builder,
            spikes,
            config,
            partition,
        })
    }

    fn compute_partition(builder: &PlaceFieldBuilder, config: &PipelineConfig) -> DecodeResult<Partition> {
        partition(
            builder.trajectory().ts(),
            &builder.speed().smoothed,
            &config.partition,
            config.fields.v_cutoff,
        )
    }

    /// Field builder over the session trajectory
    pub fn builder(&self) -> &PlaceFieldBuilder {
        &self.builder
    }

    /// Spike trains
    pub fn spikes(&self) -> &SpikeTrains {
        &self.spikes
    }

    /// Session configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current partition
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Decoding step (s)
    pub fn t_step(&self) -> f64 {
        self.builder.trajectory().dt()
    }

    /// Replace the partition configuration and recompute the splits
    pub fn repartition(&mut self, config: PartitionConfig) -> DecodeResult<&Partition> {
        self.config.partition = config;
        self.partition = Self::compute_partition(&self.builder, &self.config)?;
        Ok(&self.partition)
    }

    /// Spike counts and true positions of every split.
    ///
    /// The count cutoff runs per split when `minimum_spikes > 0`. With
    /// `first_unit_is_noise` the lowest-id column is removed afterwards.
    pub fn get_data(&self, cutoff: &CountCutoffConfig, first_unit_is_noise: bool) -> DecodeResult<SessionData> {
        let ts = self.builder.trajectory().ts();
        let counts = spike_count_matrix(&self.spikes, self.config.decoder.t_window, &ts[1..])?;
        let labels = &self.builder.trajectory().positions()[1..];

        let take = |split: &Split| -> DecodeResult<SplitData> {
            let mut rows = counts.select_rows(&split.indices);
            let mut positions: Vec<Position> = split.indices.iter().map(|&i| labels[i]).collect();
            let report = if cutoff.minimum_spikes > 0 {
                Some(minimum_spike_cutoff(&mut rows.counts, Some(&mut positions[..]), cutoff)?)
            } else {
                None
            };
            if first_unit_is_noise {
                rows = rows.without_first();
            }
            Ok(SplitData {
                counts: rows,
                positions,
                cutoff: report,
            })
        };

        Ok(SessionData {
            train: take(&self.partition.train)?,
            valid: take(&self.partition.valid)?,
            test: take(&self.partition.test)?,
        })
    }

    /// Spatial metrics of every unit, fields built over `window`
    pub fn unit_metrics(&self, window: Option<(f64, f64)>) -> DecodeResult<Vec<FieldMetrics>> {
        let fields = self.builder.build(&self.spikes, window, None)?;
        Ok(field_metrics(&fields))
    }

    /// Fit on the training window, decode the test split, smooth and score.
    ///
    /// With `remove_first_neuron` the lowest-id unit is excluded from both
    /// the fields and the counts.
    pub fn score(&self, smooth_sec: f64, remove_first_neuron: bool) -> DecodeResult<DecodingRun> {
        let data = self.get_data(&self.config.cutoff, remove_first_neuron)?;
        let mut decoder = BayesianDecoder::new(DecoderConfig {
            remove_noise_unit: remove_first_neuron,
            ..self.config.decoder.clone()
        });
        decoder.fit(&self.builder, &self.spikes, self.partition.train.time, self.partition.v_cutoff)?;
        self.evaluate(decoder, data.test, smooth_sec)
    }

    /// Like [`DecodingSession::score`], but first drops the units rejected
    /// by `selection` (metrics from fields over the whole session) through
    /// the decoder's neuron mask.
    pub fn score_selected(&self, smooth_sec: f64, selection: &UnitSelection) -> DecodeResult<DecodingRun> {
        let metrics = self.unit_metrics(None)?;
        let dropped = select_units(&metrics, selection);
        let data = self.get_data(&self.config.cutoff, false)?;

        let mut decoder = BayesianDecoder::new(DecoderConfig {
            remove_noise_unit: false,
            ..self.config.decoder.clone()
        });
        decoder.drop_neurons(&dropped)?;
        decoder.fit(&self.builder, &self.spikes, self.partition.train.time, self.partition.v_cutoff)?;
        self.evaluate(decoder, data.test, smooth_sec)
    }

    fn evaluate(&self, decoder: BayesianDecoder, test: SplitData, smooth_sec: f64) -> DecodeResult<DecodingRun> {
        if test.positions.is_empty() {
            return Err(DecodeError::DegenerateData {
                reason: "test split is empty".into(),
            });
        }
        let predicted = decoder.predict(test.counts.counts.view())?;
        let window = smoothing_window(smooth_sec, self.t_step())?;
        let smoothed = smooth_trajectory(&predicted, window);
        // r2 takes the truth first
        let r2 = score(&test.positions, &smoothed)?;
        tracing::info!(
            r2_x = r2.x,
            r2_y = r2.y,
            test_rows = test.positions.len(),
            smooth_window = window,
            "decoding scored"
        );
        Ok(DecodingRun {
            decoder,
            predicted,
            smoothed,
            truth: test.positions,
            r2,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
