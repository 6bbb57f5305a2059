//! Task slots: the per-task run loop
//!
//! A task slot owns one opaque work unit and loops: wait for release,
//! check abort, execute the work bracketed by telemetry, repeat. The
//! core never inspects what the work does; the only signal a
//! collaborator can send back is `WorkStatus::Abort`, which shuts down
//! that task alone.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use log::{debug, error, warn};

use crate::config::TaskDescriptor;
use crate::error::{CadenceError, CadenceResult};
use crate::rt;
use crate::sync::SchedulerContext;
use crate::telemetry::TelemetryBuffer;

/// Outcome of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Keep the task alive for further releases.
    Continue,
    /// The collaborator requests its own early shutdown.
    Abort,
}

/// One opaque unit of work, supplied by the surrounding application
/// (camera sampling, vision processing, rendering, ...). Invoked
/// exactly once per release; the core never looks past the returned
/// status.
pub trait WorkUnit: Send {
    fn name(&self) -> &str;
    fn perform(&mut self) -> WorkStatus;
}

/// The run loop bound to one task.
pub struct TaskSlot {
    descriptor: TaskDescriptor,
    work: Box<dyn WorkUnit>,
    context: Arc<SchedulerContext>,
    telemetry: Arc<TelemetryBuffer>,
}

impl TaskSlot {
    pub fn new(
        descriptor: TaskDescriptor,
        work: Box<dyn WorkUnit>,
        context: Arc<SchedulerContext>,
        telemetry: Arc<TelemetryBuffer>,
    ) -> Self {
        Self {
            descriptor,
            work,
            context,
            telemetry,
        }
    }

    /// Wait / execute until the abort flag is observed.
    ///
    /// Telemetry overflow stops recording but never stops the task.
    /// A panicking work unit is contained here and treated as that
    /// collaborator requesting its own shutdown; nothing unwinds
    /// across the wait boundary.
    pub fn run(mut self) {
        let index = self.descriptor.id as usize - 1;
        let mut executions: u64 = 0;

        loop {
            self.context.gate(index).wait();
            if self.context.abort(index).is_set() {
                break;
            }

            let handle = self.telemetry.acquire().ok();
            if let Some(ref handle) = handle {
                self.telemetry.begin(handle, self.descriptor.id);
            }

            let status = panic::catch_unwind(AssertUnwindSafe(|| self.work.perform()));

            if let Some(handle) = handle {
                self.telemetry.end(handle);
            }
            executions += 1;

            match status {
                Ok(WorkStatus::Continue) => {}
                Ok(WorkStatus::Abort) => {
                    warn!(
                        "task '{}' requested shutdown after {} executions",
                        self.descriptor.name, executions
                    );
                    self.context.abort(index).trigger();
                    break;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        "task '{}' work unit panicked: {}",
                        self.descriptor.name, message
                    );
                    self.context.abort(index).trigger();
                    break;
                }
            }
        }

        debug!(
            "task '{}' exiting after {} executions",
            self.descriptor.name, executions
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

/// Spawn the thread for one task slot, applying its derived FIFO
/// priority and optional core affinity before the first wait.
///
/// Priority denial is non-fatal: the task continues under default
/// scheduling with a warning. A failed spawn is a startup failure.
pub fn spawn_task(slot: TaskSlot) -> CadenceResult<thread::JoinHandle<()>> {
    let name = slot.descriptor.name.clone();
    let priority = slot.descriptor.priority;
    let core = slot.descriptor.core;

    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            match rt::set_current_thread_priority(priority) {
                Ok(()) => debug!("task '{}' running at FIFO priority {}", name, priority),
                Err(e) => warn!("task '{}' degraded to default scheduling: {}", name, e),
            }
            if let Some(core) = core {
                if rt::pin_current_thread(core) {
                    debug!("task '{}' pinned to core {}", name, core);
                }
            }
            slot.run();
        })
        .map_err(|e| CadenceError::ResourceInit(format!("cannot spawn task thread: {}", e)))
}
