//! Rootstar Place Core - shared types and numerics for spatial decoding
//!
//! This crate provides the foundational pieces used to turn hippocampal
//! spike trains and a tracked trajectory into position estimates:
//!
//! - [`types`]: Spike-train dictionaries, maze bounds and the spatial bin grid
//! - [`math`]: Gaussian kernels, 2D convolution, moving averages, R²
//! - [`error`]: Error types for invalid parameters and malformed inputs
//!
//! # Example
//!
//! ```rust
//! use rootstar_place_core::types::{GridIndex, MazeBounds, SpatialGrid};
//!
//! let bounds = MazeBounds::new([0.0, 100.0], [0.0, 50.0]).unwrap();
//! let grid = SpatialGrid::new(bounds, 2.5).unwrap();
//! assert_eq!(grid.shape(), (20, 40));
//!
//! let bin = GridIndex::new(3, 7);
//! let pos = grid.binned_to_real(bin);
//! assert_eq!(grid.real_pos_to_binned(pos), [3, 7]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod error;
pub mod math;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{CoreError, CoreResult};
pub use math::{convolve2d_symmetric, gaussian_kernel_2d, moving_average, r2_score};
pub use types::{GridIndex, MazeBounds, NeuronId, Position, SpatialGrid, SpikeTrains};
