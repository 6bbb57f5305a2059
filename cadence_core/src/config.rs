//! Sequencer configuration
//!
//! The configuration surface is a small TOML file:
//!
//! ```toml
//! period_ns = 33_333_333          # 30 Hz base rate
//! cycle_budget = 900
//! telemetry_capacity = 10_000
//! telemetry_sink = "results.csv"
//!
//! [[task]]
//! name = "frame_sampler"
//! divisor = 3                     # released every 3rd cycle
//!
//! [[task]]
//! name = "analyzer"
//! divisor = 4
//! core = 2                        # optional affinity hint
//! ```
//!
//! Configuration is immutable once the sequencer starts. Priorities
//! are not configured directly: they are derived by the
//! rate-monotonic rule (smaller divisor = higher priority, ties
//! broken by declaration order, everything strictly below the
//! sequencer's own priority).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CadenceError, CadenceResult};

/// One task entry as declared in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    /// Release divisor: the task is released when
    /// `cycle % divisor == 0`. Must be positive; 1 is legal and
    /// means "every cycle".
    pub divisor: u32,
    /// Optional CPU core the task thread should be pinned to.
    #[serde(default)]
    pub core: Option<usize>,
}

/// Immutable sequencer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SequencerConfig {
    /// Base period of the master loop in nanoseconds.
    pub period_ns: u64,
    /// Total number of cycles to run before shutdown.
    pub cycle_budget: u64,
    /// Capacity of the telemetry buffer (records).
    pub telemetry_capacity: usize,
    /// Append-only sink the telemetry is flushed to.
    pub telemetry_sink: PathBuf,
    /// Ordered task list. Order matters: it breaks priority ties and
    /// fixes task ids (1-based; id 0 is the sequencer itself).
    #[serde(rename = "task")]
    pub tasks: Vec<TaskSpec>,
}

/// A validated task with its derived scheduling parameters.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    /// 1-based task id; 0 is reserved for the sequencer's own
    /// telemetry bracket.
    pub id: u32,
    pub name: String,
    pub divisor: u32,
    /// SCHED_FIFO priority derived by the rate-monotonic rule.
    pub priority: i32,
    pub core: Option<usize>,
}

impl SequencerConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml_str(text: &str) -> CadenceResult<Self> {
        let config: SequencerConfig = toml::from_str(text)
            .map_err(|e| CadenceError::InvalidConfig(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_path(path: &Path) -> CadenceResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Base period as a `Duration`.
    pub fn base_period(&self) -> Duration {
        Duration::from_nanos(self.period_ns)
    }

    /// Reject configurations the sequencer must never start with.
    pub fn validate(&self) -> CadenceResult<()> {
        if self.period_ns == 0 {
            return Err(CadenceError::InvalidConfig(
                "base period must be positive".into(),
            ));
        }
        if self.tasks.is_empty() {
            return Err(CadenceError::InvalidConfig("task list is empty".into()));
        }
        if self.telemetry_capacity == 0 {
            return Err(CadenceError::InvalidConfig(
                "telemetry capacity must be positive".into(),
            ));
        }
        for (i, task) in self.tasks.iter().enumerate() {
            if task.divisor == 0 {
                return Err(CadenceError::InvalidConfig(format!(
                    "task '{}' (index {}) has divisor 0",
                    task.name, i
                )));
            }
        }
        Ok(())
    }

    /// Derive per-task descriptors with rate-monotonic priorities.
    ///
    /// `sequencer_priority` is the priority the master loop itself
    /// runs at (it has the smallest effective period, so it ranks
    /// highest). Task ranks are assigned by ascending divisor with
    /// ties broken by declaration order; priorities never fall below
    /// the minimum FIFO priority of 1.
    pub fn descriptors(&self, sequencer_priority: i32) -> CadenceResult<Vec<TaskDescriptor>> {
        self.validate()?;

        // Stable sort of indices by divisor keeps declaration order
        // within equal rates.
        let mut order: Vec<usize> = (0..self.tasks.len()).collect();
        order.sort_by_key(|&i| self.tasks[i].divisor);
        let mut rank_of = vec![0usize; self.tasks.len()];
        for (rank, &index) in order.iter().enumerate() {
            rank_of[index] = rank;
        }

        Ok(self
            .tasks
            .iter()
            .enumerate()
            .map(|(index, spec)| TaskDescriptor {
                id: index as u32 + 1,
                name: spec.name.clone(),
                divisor: spec.divisor,
                priority: (sequencer_priority - 1 - rank_of[index] as i32).max(1),
                core: spec.core,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_divisors(divisors: &[u32]) -> SequencerConfig {
        SequencerConfig {
            period_ns: 33_333_333,
            cycle_budget: 900,
            telemetry_capacity: 10_000,
            telemetry_sink: PathBuf::from("results.csv"),
            tasks: divisors
                .iter()
                .enumerate()
                .map(|(i, &divisor)| TaskSpec {
                    name: format!("task{}", i + 1),
                    divisor,
                    core: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_zero_divisor_rejected() {
        let config = config_with_divisors(&[3, 0, 5]);
        assert!(matches!(
            config.validate(),
            Err(CadenceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_task_list_rejected() {
        let config = config_with_divisors(&[]);
        assert!(matches!(
            config.validate(),
            Err(CadenceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = config_with_divisors(&[3]);
        config.telemetry_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(CadenceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rate_monotonic_priorities() {
        // Declaration order: divisors 5, 3, 4. Smaller divisor wins.
        let config = config_with_divisors(&[5, 3, 4]);
        let descriptors = config.descriptors(99).unwrap();

        assert_eq!(descriptors[1].priority, 98); // divisor 3
        assert_eq!(descriptors[2].priority, 97); // divisor 4
        assert_eq!(descriptors[0].priority, 96); // divisor 5
    }

    #[test]
    fn test_priority_ties_broken_by_declaration_order() {
        let config = config_with_divisors(&[4, 4, 2]);
        let descriptors = config.descriptors(99).unwrap();

        assert_eq!(descriptors[2].priority, 98); // divisor 2
        assert_eq!(descriptors[0].priority, 97); // first divisor 4
        assert_eq!(descriptors[1].priority, 96); // second divisor 4
    }

    #[test]
    fn test_priorities_clamped_to_minimum() {
        let config = config_with_divisors(&[1, 2, 3, 4]);
        let descriptors = config.descriptors(3).unwrap();
        assert!(descriptors.iter().all(|d| d.priority >= 1));
    }

    #[test]
    fn test_task_ids_follow_declaration_order() {
        let config = config_with_divisors(&[5, 3]);
        let descriptors = config.descriptors(99).unwrap();
        assert_eq!(descriptors[0].id, 1);
        assert_eq!(descriptors[1].id, 2);
    }

    #[test]
    fn test_toml_round_trip() {
        let text = r#"
            period_ns = 33333333
            cycle_budget = 30
            telemetry_capacity = 128
            telemetry_sink = "out.csv"

            [[task]]
            name = "sampler"
            divisor = 10

            [[task]]
            name = "analyzer"
            divisor = 30
            core = 1
        "#;
        let config = SequencerConfig::from_toml_str(text).unwrap();
        assert_eq!(config.base_period(), Duration::from_nanos(33_333_333));
        assert_eq!(config.cycle_budget, 30);
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[1].core, Some(1));
    }

    #[test]
    fn test_malformed_toml_is_invalid_config() {
        assert!(matches!(
            SequencerConfig::from_toml_str("period_ns = \"fast\""),
            Err(CadenceError::InvalidConfig(_))
        ));
    }
}
