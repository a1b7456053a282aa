//! Synthetic recording sessions
//!
//! Generates a seeded random-walk trajectory in a square maze together with
//! spike trains of Gaussian place cells, for tests, benchmarks and demos.
//!
//! # Model
//!
//! ```text
//! heading += U(-turn, turn)          position bounces off the walls
//! pause    with small probability    (low-speed epochs)
//! rate(p)  = baseline + peak · exp(-|p - c|² / 2σ²)
//! spike    with probability rate · dt per sample
//! ```
//!
//! An optional noise unit fires uniformly and always takes id 0, the
//! lowest id, mirroring the noise cluster of a sorted recording.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rootstar_place_core::{NeuronId, Position, SpikeTrains};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};
use crate::trajectory::Trajectory;

/// Simulation configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for the trajectory and spike sampling
    pub seed: u64,
    /// Seed for the place-cell layout, so one layout can be replayed with
    /// fresh behavior
    pub layout_seed: u64,
    /// Session length (s)
    pub duration_s: f64,
    /// Tracking sample step (s)
    pub dt: f64,
    /// Side length of the square maze
    pub maze_size: f64,
    /// Mean running speed (units/s)
    pub mean_speed: f64,
    /// Maximum heading change per sample (rad)
    pub turn_rate: f64,
    /// Per-sample probability of starting a pause
    pub pause_probability: f64,
    /// Pause length (s)
    pub pause_s: f64,
    /// Number of place cells
    pub n_place_cells: usize,
    /// In-field peak rate (Hz)
    pub peak_rate: f64,
    /// Out-of-field rate (Hz)
    pub baseline_rate: f64,
    /// Place field width σ (maze units)
    pub field_width: f64,
    /// Rate of the noise unit (Hz); no noise unit when absent
    pub noise_rate: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            layout_seed: 1,
            duration_s: 600.0,
            dt: 0.02,
            maze_size: 100.0,
            mean_speed: 20.0,
            turn_rate: 0.3,
            pause_probability: 0.002,
            pause_s: 2.0,
            n_place_cells: 40,
            peak_rate: 15.0,
            baseline_rate: 0.1,
            field_width: 8.0,
            noise_rate: Some(5.0),
        }
    }
}

/// Generated place cell
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulatedCell {
    /// Neuron id
    pub id: NeuronId,
    /// Field center
    pub center: Position,
}

/// A generated session
#[derive(Clone, Debug)]
pub struct SimulatedSession {
    /// Tracked trajectory
    pub trajectory: Trajectory,
    /// Spike trains of every unit, noise unit included
    pub spikes: SpikeTrains,
    /// Ground-truth place cells
    pub cells: Vec<SimulatedCell>,
    /// Id of the noise unit, if one was generated
    pub noise_unit: Option<NeuronId>,
}

impl SimulationConfig {
    fn validate(&self) -> DecodeResult<()> {
        let positive = [
            ("duration_s", self.duration_s),
            ("dt", self.dt),
            ("maze_size", self.maze_size),
            ("field_width", self.field_width),
        ];
        for (name, v) in positive {
            if !v.is_finite() || v <= 0.0 {
                return Err(DecodeError::invalid(name, format!("must be positive, got {v}")));
            }
        }
        if self.duration_s / self.dt < 2.0 {
            return Err(DecodeError::invalid("duration_s", "shorter than two samples"));
        }
        if !(self.turn_rate.is_finite() && self.turn_rate >= 0.0) {
            return Err(DecodeError::invalid("turn_rate", "must be non-negative"));
        }
        if self.n_place_cells == 0 {
            return Err(DecodeError::invalid("n_place_cells", "need at least one place cell"));
        }
        Ok(())
    }
}

fn random_walk(config: &SimulationConfig, rng: &mut StdRng) -> Vec<Position> {
    let n = (config.duration_s / config.dt).round() as usize;
    let size = config.maze_size;
    let mut pos = [size / 2.0, size / 2.0];
    let mut heading = rng.gen_range(0.0..2.0 * PI);
    let mut paused = 0usize;
    let pause_len = (config.pause_s / config.dt).round() as usize;

    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(pos);
        if paused > 0 {
            paused -= 1;
            continue;
        }
        if rng.gen::<f64>() < config.pause_probability {
            paused = pause_len;
            continue;
        }
        heading += rng.gen_range(-config.turn_rate..=config.turn_rate);
        let speed = config.mean_speed * rng.gen_range(0.5..1.5);
        let mut next = [
            pos[0] + speed * config.dt * heading.cos(),
            pos[1] + speed * config.dt * heading.sin(),
        ];
        // reflect off the walls
        if next[0] < 0.0 || next[0] > size {
            next[0] = next[0].clamp(0.0, size);
            heading = PI - heading;
        }
        if next[1] < 0.0 || next[1] > size {
            next[1] = next[1].clamp(0.0, size);
            heading = -heading;
        }
        pos = next;
    }
    out
}

fn bernoulli_train(ts: &[f64], dt: f64, rng: &mut StdRng, rate: impl Fn(usize) -> f64) -> Vec<f64> {
    ts.iter()
        .enumerate()
        .filter_map(|(i, &t)| {
            let p = (rate(i) * dt).clamp(0.0, 1.0);
            // strictly inside the sample interval
            (rng.gen::<f64>() < p).then(|| t + dt * rng.gen_range(0.01..0.99))
        })
        .collect()
}

/// Generate a session
pub fn simulate_session(config: &SimulationConfig) -> DecodeResult<SimulatedSession> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut layout_rng = StdRng::seed_from_u64(config.layout_seed);
    let positions = random_walk(config, &mut rng);
    let trajectory = Trajectory::from_uniform(positions, config.dt)?;
    let ts = trajectory.ts().to_vec();
    let pos = trajectory.positions();

    let mut spikes = SpikeTrains::new();
    let noise_unit = match config.noise_rate {
        Some(rate) => {
            let train = bernoulli_train(&ts, config.dt, &mut rng, |_| rate);
            spikes.insert(0, train)?;
            Some(0)
        }
        None => None,
    };

    let two_sigma_sq = 2.0 * config.field_width * config.field_width;
    let mut cells = Vec::with_capacity(config.n_place_cells);
    for k in 0..config.n_place_cells {
        let id = NeuronId::try_from(k + 1)
            .map_err(|_| DecodeError::invalid("n_place_cells", "too many cells for the id space"))?;
        let center = [
            layout_rng.gen_range(0.0..config.maze_size),
            layout_rng.gen_range(0.0..config.maze_size),
        ];
        let train = bernoulli_train(&ts, config.dt, &mut rng, |i| {
            let d2 = (pos[i][0] - center[0]).powi(2) + (pos[i][1] - center[1]).powi(2);
            config.baseline_rate + config.peak_rate * (-d2 / two_sigma_sq).exp()
        });
        spikes.insert(id, train)?;
        cells.push(SimulatedCell { id, center });
    }

    tracing::info!(
        samples = trajectory.len(),
        units = spikes.len(),
        spikes = spikes.total_spikes(),
        seed = config.seed,
        "simulated session"
    );
    Ok(SimulatedSession {
        trajectory,
        spikes,
        cells,
        noise_unit,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulationConfig {
        SimulationConfig {
            duration_s: 60.0,
            n_place_cells: 5,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_seeded_sessions_repeat() {
        let a = simulate_session(&small()).unwrap();
        let b = simulate_session(&small()).unwrap();
        assert_eq!(a.trajectory, b.trajectory);
        assert_eq!(a.spikes, b.spikes);
    }

    #[test]
    fn test_layout_seed_fixes_cells() {
        let a = simulate_session(&small()).unwrap();
        let b = simulate_session(&SimulationConfig { seed: 99, ..small() }).unwrap();
        assert_eq!(a.cells, b.cells);
        assert_ne!(a.trajectory, b.trajectory);
    }

    #[test]
    fn test_stays_inside_maze() {
        let s = simulate_session(&small()).unwrap();
        assert_eq!(s.trajectory.len(), 3000);
        assert!(s
            .trajectory
            .positions()
            .iter()
            .all(|p| (0.0..=100.0).contains(&p[0]) && (0.0..=100.0).contains(&p[1])));
    }

    #[test]
    fn test_noise_unit_has_lowest_id() {
        let s = simulate_session(&small()).unwrap();
        assert_eq!(s.noise_unit, Some(0));
        assert_eq!(s.spikes.ids(), vec![0, 1, 2, 3, 4, 5]);
        let quiet = simulate_session(&SimulationConfig {
            noise_rate: None,
            ..small()
        })
        .unwrap();
        assert_eq!(quiet.spikes.ids(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_noise_rate_is_roughly_right() {
        let s = simulate_session(&small()).unwrap();
        let n = s.spikes.get(0).map_or(0, <[f64]>::len) as f64;
        // 5 Hz over 60 s
        assert!((200.0..400.0).contains(&n), "noise spikes: {n}");
    }

    #[test]
    fn test_rejects_bad_config() {
        let cfg = SimulationConfig {
            dt: 0.0,
            ..small()
        };
        assert!(simulate_session(&cfg).is_err());
    }
}
