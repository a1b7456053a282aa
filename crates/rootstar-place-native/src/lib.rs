//! Rootstar Place Native - place-field estimation and position decoding
//!
//! This crate provides the host-side decoding pipeline:
//! - Trajectory handling (speed, resampling, alignment)
//! - Occupancy maps and smoothed place fields
//! - Train/validation/test partitioning
//! - Spike-count binning with low-activity cleanup
//! - Poisson naive-Bayes decoding, batch and real-time
//! - Scoring and spatial-information ranking
//!
//! # Modules
//!
//! - [`trajectory`]: Tracked positions and speed traces
//! - [`fields`]: Occupancy and place-field builder
//! - [`partition`]: Fractional time splits
//! - [`binner`]: Spike-count matrices
//! - [`model`]: Fitted, immutable decoder model
//! - [`decoder`]: Decoder lifecycle and neuron masking
//! - [`realtime`]: Windowed closed-loop decoding
//! - [`evaluator`]: R², smoothing, unit metrics
//! - [`session`]: End-to-end fit and score
//! - [`simulation`]: Synthetic sessions
//!
//! # Example
//!
//! ```rust,no_run
//! use rootstar_place_native::{simulate_session, DecodingSession, PipelineConfig, SimulationConfig};
//!
//! let sim = simulate_session(&SimulationConfig::default())?;
//! let session = DecodingSession::new(sim.trajectory, sim.spikes, PipelineConfig::default())?;
//! let run = session.score(2.0, true)?;
//! println!("R² x = {:.3}, y = {:.3}", run.r2.x, run.r2.y);
//! # Ok::<(), rootstar_place_native::DecodeError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]

pub mod binner;
pub mod decoder;
pub mod error;
pub mod evaluator;
pub mod fields;
pub mod model;
pub mod partition;
pub mod realtime;
pub mod session;
pub mod simulation;
pub mod trajectory;

// Re-export key types
pub use binner::{minimum_spike_cutoff, spike_count_matrix, CountCutoffConfig, CutoffReport, SpikeCounts};
pub use decoder::{BayesianDecoder, DecoderConfig, DecoderState};
pub use error::{DecodeError, DecodeResult};
pub use evaluator::{
    field_metrics, rank, rate_map_metrics, score, select_units, smooth_trajectory, EvaluationConfig, FieldMetrics,
    R2Score, RankMetric, UnitSelection,
};
pub use fields::{FieldConfig, OccupancyMap, PlaceFieldBuilder, PlaceFields};
pub use model::{BatchDecode, DecoderModel, FitContext, RealtimeEstimate};
pub use partition::{partition, Partition, PartitionConfig, SpeedCutoffPolicy, Split, SplitRange};
pub use realtime::RealtimeDecoder;
pub use session::{DecodingRun, DecodingSession, PipelineConfig, SessionData, SplitData};
pub use simulation::{simulate_session, SimulatedCell, SimulatedSession, SimulationConfig};
pub use trajectory::{SpeedConfig, SpeedProfile, Trajectory};
