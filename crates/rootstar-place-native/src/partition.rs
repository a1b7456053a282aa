//! Train / validation / test partitioning
//!
//! Fractional time ranges become index sets over the trajectory samples.
//! Each split can additionally drop samples whose narrow-smoothed speed is
//! not above the cutoff. Splits may overlap; nothing here enforces
//! disjointness.

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};

/// Fractional range `[start, end]` of a recording, both in `[0, 1]`
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitRange {
    /// Start fraction
    pub start: f64,
    /// End fraction
    pub end: f64,
}

impl SplitRange {
    /// Create a validated range
    pub fn new(start: f64, end: f64) -> DecodeResult<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    fn validate(&self) -> DecodeResult<()> {
        let unit = 0.0..=1.0;
        if !(unit.contains(&self.start) && unit.contains(&self.end)) || self.start > self.end {
            return Err(DecodeError::invalid(
                "split range",
                format!("[{}, {}] must satisfy 0 <= start <= end <= 1", self.start, self.end),
            ));
        }
        Ok(())
    }
}

/// Which splits drop low-speed samples
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedCutoffPolicy {
    /// Filter the training split
    pub training: bool,
    /// Filter the validation split
    pub validation: bool,
    /// Filter the test split
    pub testing: bool,
}

impl Default for SpeedCutoffPolicy {
    fn default() -> Self {
        Self {
            training: true,
            validation: true,
            testing: false,
        }
    }
}

/// Partition configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Training fraction range
    pub train: SplitRange,
    /// Validation fraction range
    pub valid: SplitRange,
    /// Test fraction range
    pub test: SplitRange,
    /// Per-split speed filtering
    pub low_speed_cutoff: SpeedCutoffPolicy,
    /// Speed cutoff; the field cutoff is used when absent
    pub v_cutoff: Option<f64>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            train: SplitRange { start: 0.0, end: 0.5 },
            valid: SplitRange { start: 0.5, end: 0.6 },
            test: SplitRange { start: 0.6, end: 1.0 },
            low_speed_cutoff: SpeedCutoffPolicy::default(),
            v_cutoff: None,
        }
    }
}

/// One split: sample indices and the time bounds of its fractional range
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Split {
    /// Sample indices, ascending
    pub indices: Vec<usize>,
    /// `(ts[start_index], ts[end_index])`
    pub time: (f64, f64),
}

impl Split {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True when the split has no samples
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// The three splits
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    /// Training split
    pub train: Split,
    /// Validation split
    pub valid: Split,
    /// Test split
    pub test: Split,
    /// Speed cutoff that was applied
    pub v_cutoff: f64,
}

/// `round(fraction · len)` clamped to `[0, len - 1]`
pub fn percent_to_index(fraction: f64, len: usize) -> usize {
    let idx = (fraction * len as f64).round().max(0.0) as usize;
    idx.min(len.saturating_sub(1))
}

fn split(ts: &[f64], speed: &[f64], range: SplitRange, filter: Option<f64>) -> Split {
    let a = percent_to_index(range.start, ts.len());
    let b = percent_to_index(range.end, ts.len());
    let indices = (a..b)
        .filter(|&i| filter.map_or(true, |cutoff| speed[i] > cutoff))
        .collect();
    Split {
        indices,
        time: (ts[a], ts[b]),
    }
}

/// Partition `ts` into train/valid/test index sets.
///
/// `speed` is the narrow-smoothed speed per sample and `default_v_cutoff`
/// applies when the config carries no cutoff. A split's indices run from
/// `percent_to_index(start)` up to, but excluding, `percent_to_index(end)`.
pub fn partition(
    ts: &[f64],
    speed: &[f64],
    config: &PartitionConfig,
    default_v_cutoff: f64,
) -> DecodeResult<Partition> {
    if ts.is_empty() {
        return Err(DecodeError::DegenerateData {
            reason: "cannot partition an empty recording".into(),
        });
    }
    if speed.len() != ts.len() {
        return Err(DecodeError::ShapeMismatch {
            what: "speed samples",
            expected: ts.len(),
            got: speed.len(),
        });
    }
    config.train.validate()?;
    config.valid.validate()?;
    config.test.validate()?;

    let v_cutoff = config.v_cutoff.unwrap_or(default_v_cutoff);
    let policy = config.low_speed_cutoff;
    let when = |flag: bool| flag.then_some(v_cutoff);

    let result = Partition {
        train: split(ts, speed, config.train, when(policy.training)),
        valid: split(ts, speed, config.valid, when(policy.validation)),
        test: split(ts, speed, config.test, when(policy.testing)),
        v_cutoff,
    };

    tracing::info!(
        train = result.train.len(),
        valid = result.valid.len(),
        test = result.test.len(),
        v_cutoff,
        "partitioned recording"
    );
    Ok(result)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ts(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 * 0.1).collect()
    }

    fn no_filter(train: SplitRange, test: SplitRange) -> PartitionConfig {
        PartitionConfig {
            train,
            valid: SplitRange { start: 0.5, end: 0.6 },
            test,
            low_speed_cutoff: SpeedCutoffPolicy {
                training: false,
                validation: false,
                testing: false,
            },
            v_cutoff: None,
        }
    }

    #[test]
    fn test_percent_to_index_clamps() {
        assert_eq!(percent_to_index(0.0, 100), 0);
        assert_eq!(percent_to_index(0.5, 100), 50);
        assert_eq!(percent_to_index(1.0, 100), 99);
        assert_eq!(percent_to_index(0.004, 100), 0);
    }

    #[test]
    fn test_non_overlapping_ranges_are_disjoint() {
        let t = ts(100);
        let speed = vec![10.0; 100];
        let cfg = no_filter(SplitRange::new(0.0, 0.5).unwrap(), SplitRange::new(0.5, 1.0).unwrap());
        let p = partition(&t, &speed, &cfg, 5.0).unwrap();
        assert!(p.train.len() <= 50);
        assert!(p.test.len() <= 50);
        let train: HashSet<_> = p.train.indices.iter().collect();
        assert!(p.test.indices.iter().all(|i| !train.contains(i)));
        assert_eq!(p.train.time, (0.0, t[50]));
    }

    #[test]
    fn test_overlapping_ranges_are_kept() {
        let t = ts(100);
        let speed = vec![10.0; 100];
        let cfg = no_filter(SplitRange::new(0.0, 0.8).unwrap(), SplitRange::new(0.5, 1.0).unwrap());
        let p = partition(&t, &speed, &cfg, 5.0).unwrap();
        assert!(p.train.indices.contains(&60));
        assert!(p.test.indices.contains(&60));
    }

    #[test]
    fn test_speed_filter_is_strict_and_per_split() {
        let t = ts(100);
        let speed: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 5.0 } else { 8.0 }).collect();
        let p = partition(&t, &speed, &PartitionConfig::default(), 5.0).unwrap();
        // training filtered: only odd samples exceed 5.0
        assert!(p.train.indices.iter().all(|i| i % 2 == 1));
        assert_eq!(p.train.len(), 25);
        // testing not filtered by default
        assert_eq!(p.test.len(), 39);
        assert_eq!(p.v_cutoff, 5.0);
    }

    #[test]
    fn test_explicit_cutoff_overrides_default() {
        let t = ts(10);
        let speed = vec![6.0; 10];
        let cfg = PartitionConfig {
            v_cutoff: Some(7.0),
            ..PartitionConfig::default()
        };
        let p = partition(&t, &speed, &cfg, 5.0).unwrap();
        assert!(p.train.is_empty());
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert!(SplitRange::new(0.6, 0.4).is_err());
        assert!(SplitRange::new(-0.1, 0.4).is_err());
        let cfg = PartitionConfig {
            test: SplitRange { start: 0.2, end: 1.5 },
            ..PartitionConfig::default()
        };
        let r = partition(&ts(10), &[1.0; 10], &cfg, 5.0);
        assert!(matches!(r, Err(DecodeError::InvalidRange { .. })));
    }
}
