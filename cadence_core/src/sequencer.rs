//! The periodic sequencer: master loop of the cyclic executive
//!
//! The sequencer ticks on a fixed base period and releases each task
//! whose divisor divides the current cycle count. It runs at the
//! highest FIFO priority (it has the smallest effective period);
//! worker priorities follow the rate-monotonic rule below it. When
//! the cycle budget is exhausted, or an external stop is requested,
//! it performs the shutdown cascade, joins every task, and flushes
//! telemetry to the configured sink.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::config::{SequencerConfig, TaskDescriptor};
use crate::error::{CadenceError, CadenceResult};
use crate::rt;
use crate::sync::{SchedulerContext, StopHandle};
use crate::task::{spawn_task, TaskSlot, WorkUnit};
use crate::telemetry::TelemetryBuffer;

/// Telemetry id under which the sequencer brackets its own cycles.
pub const SEQUENCER_TASK_ID: u32 = 0;

/// Lifecycle of one sequencer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Init,
    Running,
    ShuttingDown,
    Done,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Cycles actually completed.
    pub cycles: u64,
    /// Releases issued per task, in declaration order.
    pub releases: Vec<u64>,
    /// Interrupted-sleep retries observed across the whole run.
    pub sleep_retries: u64,
    /// Completed telemetry records appended to the sink.
    pub records_exported: usize,
    /// False when real-time priority installation was denied and the
    /// run degraded to best-effort scheduling.
    pub realtime_installed: bool,
    /// True when an external stop request ended the run before the
    /// cycle budget.
    pub stopped_early: bool,
}

/// Release decision: post-increment convention, so cycle 0 dispatches
/// nothing and the first dispatch of divisor `d` happens at cycle `d`.
fn due(cycle: u64, divisor: u32) -> bool {
    cycle > 0 && cycle % divisor as u64 == 0
}

/// The master loop plus everything it owns: validated configuration,
/// one work unit per task, and the stop handle.
pub struct Sequencer {
    config: SequencerConfig,
    works: Vec<Box<dyn WorkUnit>>,
    stop: StopHandle,
    state: SequencerState,
}

impl Sequencer {
    /// Validate the configuration and bind one work unit to each
    /// declared task (by position).
    pub fn new(config: SequencerConfig, works: Vec<Box<dyn WorkUnit>>) -> CadenceResult<Self> {
        config.validate()?;
        if works.len() != config.tasks.len() {
            return Err(CadenceError::InvalidConfig(format!(
                "{} tasks declared but {} work units supplied",
                config.tasks.len(),
                works.len()
            )));
        }
        Ok(Self {
            config,
            works,
            stop: StopHandle::new(),
            state: SequencerState::Init,
        })
    }

    /// Handle that requests an early, orderly shutdown (e.g. from a
    /// signal handler).
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current lifecycle state. `Running` is re-entered every cycle;
    /// `ShuttingDown` is entered exactly once.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Drive the run to completion: spawn task threads, tick the
    /// master loop, cascade the shutdown, join, flush telemetry.
    ///
    /// Startup failures and an unrecoverable timer are fatal and
    /// returned as errors (after the cascade, so no task is left
    /// blocked). Denied real-time privilege only degrades the run and
    /// is reported through the outcome.
    pub fn run(mut self) -> CadenceResult<RunOutcome> {
        let sequencer_priority = rt::max_fifo_priority();
        let descriptors = self.config.descriptors(sequencer_priority)?;
        let telemetry = Arc::new(TelemetryBuffer::new(self.config.telemetry_capacity)?);
        let context = Arc::new(SchedulerContext::new(descriptors.len()));

        // Task threads start blocked on their gates.
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(descriptors.len());
        let mut spawn_err = None;
        for (descriptor, work) in descriptors.iter().cloned().zip(self.works.drain(..)) {
            match spawn_task(TaskSlot::new(
                descriptor,
                work,
                context.clone(),
                telemetry.clone(),
            )) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_err = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = spawn_err {
            context.cascade();
            join_all(handles);
            return Err(e);
        }

        let realtime_installed = match rt::set_current_thread_priority(sequencer_priority) {
            Ok(()) => {
                info!("sequencer running at FIFO priority {}", sequencer_priority);
                true
            }
            Err(e) => {
                warn!("sequencer degraded to default scheduling: {}", e);
                false
            }
        };

        self.state = SequencerState::Running;
        info!(
            "sequencer started: period {:?}, budget {} cycles, {} tasks",
            self.config.base_period(),
            self.config.cycle_budget,
            descriptors.len()
        );

        let period = self.config.base_period();
        let mut cycle: u64 = 0;
        let mut releases = vec![0u64; descriptors.len()];
        let mut sleep_retries: u64 = 0;
        let mut stopped_early = false;
        let mut timer_err = None;

        while cycle < self.config.cycle_budget {
            match rt::interruptible_sleep(period) {
                Ok(retries) => {
                    sleep_retries += u64::from(retries);
                    if retries > 1 {
                        debug!("cycle {} sleep interrupted {} times", cycle + 1, retries);
                    }
                }
                Err(e) => {
                    timer_err = Some(e);
                    break;
                }
            }

            // A retried sleep still advances the cycle exactly once.
            cycle += 1;

            let bracket = telemetry.acquire().ok();
            if let Some(ref handle) = bracket {
                telemetry.begin(handle, SEQUENCER_TASK_ID);
            }

            for (i, descriptor) in descriptors.iter().enumerate() {
                if due(cycle, descriptor.divisor) {
                    let backlog = context.gate(i).pending();
                    if backlog > 0 {
                        // Unconsumed releases accumulate; the task will
                        // catch up phase-delayed rather than lose work.
                        warn!(
                            "task '{}' is {} releases behind at cycle {}",
                            descriptor.name, backlog, cycle
                        );
                    }
                    context.gate(i).post();
                    releases[i] += 1;
                }
            }

            if let Some(handle) = bracket {
                telemetry.end(handle);
            }

            if self.stop.is_stopped() {
                stopped_early = true;
                break;
            }
        }

        self.state = SequencerState::ShuttingDown;
        info!(
            "sequencer shutting down after {} cycles{}",
            cycle,
            if stopped_early { " (stop requested)" } else { "" }
        );
        context.cascade();
        join_all(handles);

        if let Some(e) = timer_err {
            return Err(e);
        }

        let records_exported = telemetry.export_to_path(&self.config.telemetry_sink)?;
        info!(
            "telemetry: {} records appended to {}",
            records_exported,
            self.config.telemetry_sink.display()
        );

        self.state = SequencerState::Done;
        Ok(RunOutcome {
            cycles: cycle,
            releases,
            sleep_retries,
            records_exported,
            realtime_installed,
            stopped_early,
        })
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        // The task slot contains panics itself; a join error here
        // means the thread was killed externally, which we only log.
        if handle.join().is_err() {
            warn!("task thread terminated abnormally");
        }
    }
}

/// Expose descriptor derivation for inspection (demo apps print the
/// resulting priority table before starting).
pub fn priority_table(config: &SequencerConfig) -> CadenceResult<Vec<TaskDescriptor>> {
    config.descriptors(rt::max_fifo_priority())
}
