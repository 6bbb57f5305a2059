//! # Cadence Core
//!
//! A fixed-priority cyclic sequencer for soft real-time pipelines.
//!
//! A master loop ticks on a fixed base period and releases a fixed
//! set of worker tasks at harmonic sub-rates (release when
//! `cycle % divisor == 0`), under rate-monotonic SCHED_FIFO
//! scheduling. Every unit of work is bracketed with begin/end
//! timestamps in a bounded, concurrently written telemetry buffer
//! that can be flushed to an append-only sink for latency/jitter
//! analysis.
//!
//! - **Sequencer**: timed master loop with interrupted-sleep
//!   correction and an orderly wake-to-die shutdown cascade
//! - **Task slots**: per-task wait/execute loops over opaque
//!   [`WorkUnit`] capabilities supplied by the application
//! - **Telemetry**: atomic-cursor timing buffer, overflow-safe
//! - **RT integration**: best-effort FIFO priorities and core
//!   pinning that degrade gracefully without privilege
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cadence_core::{Sequencer, SequencerConfig, WorkStatus, WorkUnit};
//!
//! struct Sampler;
//!
//! impl WorkUnit for Sampler {
//!     fn name(&self) -> &str { "sampler" }
//!     fn perform(&mut self) -> WorkStatus {
//!         // one frame's worth of work
//!         WorkStatus::Continue
//!     }
//! }
//!
//! let config = SequencerConfig::from_toml_str(r#"
//!     period_ns = 33_333_333
//!     cycle_budget = 900
//!     telemetry_capacity = 10000
//!     telemetry_sink = "results.csv"
//!
//!     [[task]]
//!     name = "sampler"
//!     divisor = 10
//! "#).unwrap();
//!
//! let sequencer = Sequencer::new(config, vec![Box::new(Sampler)]).unwrap();
//! let outcome = sequencer.run().unwrap();
//! println!("{} cycles, {:?} releases", outcome.cycles, outcome.releases);
//! ```

pub mod config;
pub mod error;
pub mod rt;
pub mod sequencer;
pub mod sync;
pub mod task;
pub mod telemetry;

// Re-export commonly used types for easy access
pub use config::{SequencerConfig, TaskDescriptor, TaskSpec};
pub use error::{CadenceError, CadenceResult};
pub use sequencer::{priority_table, RunOutcome, Sequencer, SequencerState, SEQUENCER_TASK_ID};
pub use sync::{AbortFlag, ReleaseGate, SchedulerContext, StopHandle};
pub use task::{WorkStatus, WorkUnit};
pub use telemetry::{RecordHandle, TelemetryBuffer, TelemetryOverflow, TelemetryRecord};
