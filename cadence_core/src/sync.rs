//! Synchronization primitives for the sequencing core
//!
//! - **ReleaseGate**: counting wake-up signal, one per task. Posts
//!   accumulate, so a slow task catches up instead of losing work.
//! - **AbortFlag**: one-way `false -> true` cooperative cancellation.
//! - **SchedulerContext**: owned aggregate of every task's gate and
//!   abort flag, shared by `Arc` with every thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Counting wake-up signal.
///
/// Only the sequencer posts; only the owning task slot waits. Pending
/// releases accumulate and are consumed one per wait, so a release is
/// never silently dropped.
pub struct ReleaseGate {
    pending: Mutex<u64>,
    wakeup: Condvar,
}

impl ReleaseGate {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            wakeup: Condvar::new(),
        }
    }

    /// Post one release. Never blocks, never fails.
    pub fn post(&self) {
        let mut pending = self.pending.lock();
        *pending += 1;
        self.wakeup.notify_one();
    }

    /// Block until at least one release is pending, then consume it.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending == 0 {
            self.wakeup.wait(&mut pending);
        }
        *pending -= 1;
    }

    /// Number of posted releases not yet consumed.
    ///
    /// A value above 1 at release time means the task is running
    /// behind the sequencer (observable overload, not lost work).
    pub fn pending(&self) -> u64 {
        *self.pending.lock()
    }
}

impl Default for ReleaseGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation flag with a monotonic `false -> true`
/// transition. Once set it never resets.
pub struct AbortFlag {
    flag: AtomicBool,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Set the flag. Returns true only for the transition that
    /// actually flipped it.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle that requests an early, orderly shutdown of a
/// running sequencer (e.g. from a Ctrl-C handler).
#[derive(Clone)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task control block: the release gate the sequencer posts and
/// the abort flag the task observes.
pub struct TaskControl {
    pub gate: ReleaseGate,
    pub abort: AbortFlag,
}

/// Owned aggregate of all per-task gates and abort flags.
///
/// Constructed once before any thread starts and shared by `Arc`;
/// replaces the file-scope semaphore/abort globals of older cyclic
/// executives with a single owned value.
pub struct SchedulerContext {
    tasks: Vec<TaskControl>,
    cascaded: AtomicBool,
}

impl SchedulerContext {
    pub fn new(task_count: usize) -> Self {
        let tasks = (0..task_count)
            .map(|_| TaskControl {
                gate: ReleaseGate::new(),
                abort: AbortFlag::new(),
            })
            .collect();
        Self {
            tasks,
            cascaded: AtomicBool::new(false),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn gate(&self, index: usize) -> &ReleaseGate {
        &self.tasks[index].gate
    }

    pub fn abort(&self, index: usize) -> &AbortFlag {
        &self.tasks[index].abort
    }

    /// Shutdown cascade: set every abort flag, then post one final
    /// release per gate so a task blocked in `wait` observes both and
    /// exits instead of hanging ("wake-to-die").
    ///
    /// Idempotent: only the first call performs the cascade.
    pub fn cascade(&self) {
        if self.cascaded.swap(true, Ordering::SeqCst) {
            return;
        }
        for control in &self.tasks {
            control.abort.trigger();
            control.gate.post();
        }
    }

    pub fn cascade_done(&self) -> bool {
        self.cascaded.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_gate_accumulates_releases() {
        let gate = ReleaseGate::new();
        gate.post();
        gate.post();
        gate.post();
        assert_eq!(gate.pending(), 3);

        gate.wait();
        gate.wait();
        assert_eq!(gate.pending(), 1);
        gate.wait();
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_gate_wakes_blocked_waiter() {
        let gate = Arc::new(ReleaseGate::new());
        let waiter_gate = gate.clone();
        let waiter = thread::spawn(move || {
            waiter_gate.wait();
        });

        thread::sleep(Duration::from_millis(20));
        gate.post();
        waiter.join().unwrap();
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_abort_flag_is_one_way() {
        let flag = AbortFlag::new();
        assert!(!flag.is_set());
        assert!(flag.trigger());
        assert!(flag.is_set());
        // Re-triggering reports no transition and never resets.
        assert!(!flag.trigger());
        assert!(flag.is_set());
    }

    #[test]
    fn test_cascade_sets_every_flag_and_posts_every_gate() {
        let ctx = SchedulerContext::new(3);
        ctx.cascade();

        for i in 0..3 {
            assert!(ctx.abort(i).is_set());
            assert_eq!(ctx.gate(i).pending(), 1);
        }
    }

    #[test]
    fn test_cascade_is_idempotent() {
        let ctx = SchedulerContext::new(2);
        ctx.cascade();
        ctx.cascade();
        ctx.cascade();

        // No double-cascade: exactly one wake-to-die post per gate.
        assert_eq!(ctx.gate(0).pending(), 1);
        assert_eq!(ctx.gate(1).pending(), 1);
        assert!(ctx.cascade_done());
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
    }
}
