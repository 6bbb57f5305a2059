//! Best-effort OS real-time integration
//!
//! SCHED_FIFO priority installation, CPU pinning, and the
//! interrupted-sleep correction the master loop depends on. Real-time
//! privilege may be unavailable (CI, containers, plain desktops), so
//! priority installation degrades to the default scheduler with a
//! warning instead of aborting; callers can observe the degradation
//! through the returned error.

use std::time::Duration;

use log::warn;

use crate::error::{CadenceError, CadenceResult};

/// Upper bound on consecutive interrupted-sleep retries within one
/// cycle before the timer is declared unrecoverable.
pub const MAX_SLEEP_RETRIES: u32 = 100;

/// Result of one low-level sleep attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepStatus {
    /// The full requested duration elapsed.
    Completed,
    /// The sleep was interrupted with this much time left.
    Interrupted { remaining: Duration },
}

/// Sleep for `duration`, retrying the *remaining* time after each
/// interruption, bounded by [`MAX_SLEEP_RETRIES`]. Returns the number
/// of retries that were needed.
pub fn interruptible_sleep(duration: Duration) -> CadenceResult<u32> {
    sleep_with(duration, MAX_SLEEP_RETRIES, os_sleep)
}

/// Retry loop over an injectable sleep primitive. Split out so the
/// correction logic is testable without delivering real signals.
pub(crate) fn sleep_with<F>(
    duration: Duration,
    max_retries: u32,
    mut sleep_fn: F,
) -> CadenceResult<u32>
where
    F: FnMut(Duration) -> SleepStatus,
{
    let mut remaining = duration;
    let mut retries = 0u32;
    loop {
        match sleep_fn(remaining) {
            SleepStatus::Completed => return Ok(retries),
            SleepStatus::Interrupted { remaining: left } => {
                retries += 1;
                if retries >= max_retries {
                    return Err(CadenceError::TimerUnrecoverable { retries });
                }
                if left.is_zero() {
                    // Interrupted at the very end; nothing left to sleep.
                    return Ok(retries);
                }
                remaining = left;
            }
        }
    }
}

#[cfg(unix)]
fn os_sleep(duration: Duration) -> SleepStatus {
    let request = libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    let mut remaining = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    let rc = unsafe { libc::nanosleep(&request, &mut remaining) };
    if rc == 0 {
        return SleepStatus::Completed;
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINTR) {
        SleepStatus::Interrupted {
            remaining: Duration::new(remaining.tv_sec as u64, remaining.tv_nsec as u32),
        }
    } else {
        // nanosleep only fails with EINTR or EINVAL; a validated
        // Duration cannot produce EINVAL, so treat anything else as
        // a completed (degenerate) sleep rather than spinning.
        warn!("nanosleep failed unexpectedly: {}", err);
        SleepStatus::Completed
    }
}

#[cfg(not(unix))]
fn os_sleep(duration: Duration) -> SleepStatus {
    std::thread::sleep(duration);
    SleepStatus::Completed
}

/// Highest SCHED_FIFO priority available on this system.
pub fn max_fifo_priority() -> i32 {
    #[cfg(target_os = "linux")]
    {
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        if max > 0 {
            return max;
        }
    }
    // Portable fallback matching the common Linux range.
    99
}

/// Install a SCHED_FIFO priority on the calling thread.
///
/// Requires CAP_SYS_NICE or root on Linux. Denial is reported as
/// `PrivilegeDenied` and must be treated as a warning, not a fatal
/// condition: the thread keeps running under best-effort scheduling.
pub fn set_current_thread_priority(priority: i32) -> CadenceResult<()> {
    #[cfg(target_os = "linux")]
    {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            return Err(CadenceError::PrivilegeDenied(format!(
                "cannot set SCHED_FIFO priority {}: {} (needs CAP_SYS_NICE or root)",
                priority, err
            )));
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = priority;
        Err(CadenceError::Unsupported(
            "SCHED_FIFO scheduling is only supported on Linux".to_string(),
        ))
    }
}

/// Pin the calling thread to one CPU core. Best-effort: returns false
/// (and warns) when the core does not exist or pinning fails.
pub fn pin_current_thread(core: usize) -> bool {
    let Some(core_ids) = core_affinity::get_core_ids() else {
        warn!("CPU core enumeration failed; skipping affinity for core {}", core);
        return false;
    };
    match core_ids.into_iter().find(|c| c.id == core) {
        Some(core_id) => core_affinity::set_for_current(core_id),
        None => {
            warn!("CPU core {} not present; skipping affinity", core);
            false
        }
    }
}
