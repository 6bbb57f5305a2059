//! Per-cycle timing telemetry
//!
//! A fixed-capacity buffer of begin/end timing brackets, written
//! concurrently by every task slot. Slot reservation is a single
//! atomic fetch-and-increment, so two tasks never receive the same
//! index; once the cursor reaches capacity, `acquire` deterministically
//! reports overflow and recording stops without disturbing stored
//! records.
//!
//! Timestamps come from the monotonic clock, expressed as nanoseconds
//! since the buffer's creation. The export format is line-oriented and
//! append-only: `id, start_sec.start_nsec, end_sec.end_nsec`.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use log::warn;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// The buffer is at capacity; the caller must stop recording. Not a
/// fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryOverflow;

impl std::fmt::Display for TelemetryOverflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "telemetry buffer at capacity")
    }
}

impl std::error::Error for TelemetryOverflow {}

/// A completed timing bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub task_id: u32,
    /// Nanoseconds since the buffer epoch at bracket start.
    pub start_ns: u64,
    /// Nanoseconds since the buffer epoch at bracket end.
    pub end_ns: u64,
}

impl TelemetryRecord {
    /// Render as one sink line: `id, s.nnnnnnnnn, s.nnnnnnnnn`.
    pub fn to_line(&self) -> String {
        format!(
            "{}, {}.{:09}, {}.{:09}",
            self.task_id,
            self.start_ns / NANOS_PER_SEC,
            self.start_ns % NANOS_PER_SEC,
            self.end_ns / NANOS_PER_SEC,
            self.end_ns % NANOS_PER_SEC
        )
    }

    /// Parse one sink line back into a record.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.split(',').map(str::trim);
        let task_id = fields.next()?.parse().ok()?;
        let start_ns = parse_stamp(fields.next()?)?;
        let end_ns = parse_stamp(fields.next()?)?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            task_id,
            start_ns,
            end_ns,
        })
    }
}

fn parse_stamp(text: &str) -> Option<u64> {
    let (sec, nsec) = text.split_once('.')?;
    if nsec.len() != 9 {
        return None;
    }
    let sec: u64 = sec.parse().ok()?;
    let nsec: u64 = nsec.parse().ok()?;
    Some(sec * NANOS_PER_SEC + nsec)
}

/// Handle to a reserved slot. Obtained from `acquire`; consumed by
/// bracketing a single unit of work.
#[derive(Debug)]
pub struct RecordHandle {
    index: usize,
}

struct Slot {
    task_id: AtomicU32,
    start_ns: AtomicU64,
    end_ns: AtomicU64,
    completed: AtomicBool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            task_id: AtomicU32::new(0),
            start_ns: AtomicU64::new(0),
            end_ns: AtomicU64::new(0),
            completed: AtomicBool::new(false),
        }
    }
}

/// Fixed-capacity, concurrently written timing buffer.
///
/// The write cursor only ever advances; it never wraps within a run.
/// Each reserved slot is written by exactly one thread, so the slot
/// fields need no lock, and no suspension happens while a slot is
/// held.
pub struct TelemetryBuffer {
    slots: Box<[Slot]>,
    cursor: AtomicUsize,
    epoch: Instant,
    overflow_reported: AtomicBool,
}

impl TelemetryBuffer {
    /// Allocate a buffer for `capacity` records.
    pub fn new(capacity: usize) -> crate::error::CadenceResult<Self> {
        if capacity == 0 {
            return Err(crate::error::CadenceError::InvalidConfig(
                "telemetry capacity must be positive".into(),
            ));
        }
        let slots: Vec<Slot> = (0..capacity).map(|_| Slot::empty()).collect();
        Ok(Self {
            slots: slots.into_boxed_slice(),
            cursor: AtomicUsize::new(0),
            epoch: Instant::now(),
            overflow_reported: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of records stored so far (completed or not).
    pub fn len(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically reserve the next record index.
    ///
    /// Deterministically fails once the cursor has reached capacity;
    /// the failure leaves stored records untouched and the caller is
    /// expected to keep running without recording.
    pub fn acquire(&self) -> Result<RecordHandle, TelemetryOverflow> {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel);
        if index >= self.slots.len() {
            if !self.overflow_reported.swap(true, Ordering::Relaxed) {
                warn!(
                    "telemetry buffer full ({} records); further brackets are dropped",
                    self.slots.len()
                );
            }
            return Err(TelemetryOverflow);
        }
        Ok(RecordHandle { index })
    }

    /// Stamp the bracket start for `task_id`.
    pub fn begin(&self, handle: &RecordHandle, task_id: u32) {
        let slot = &self.slots[handle.index];
        slot.task_id.store(task_id, Ordering::Relaxed);
        slot.start_ns.store(self.now_ns(), Ordering::Relaxed);
    }

    /// Stamp the bracket end. The record becomes visible to `export`
    /// only after this call.
    pub fn end(&self, handle: RecordHandle) {
        let slot = &self.slots[handle.index];
        slot.end_ns.store(self.now_ns(), Ordering::Relaxed);
        slot.completed.store(true, Ordering::Release);
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Snapshot every completed record in acquisition order. Records
    /// acquired but never ended are skipped as incomplete.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.slots[..self.len()]
            .iter()
            .filter(|slot| slot.completed.load(Ordering::Acquire))
            .map(|slot| TelemetryRecord {
                task_id: slot.task_id.load(Ordering::Relaxed),
                start_ns: slot.start_ns.load(Ordering::Relaxed),
                end_ns: slot.end_ns.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Write every completed record to `sink`, one line each, in
    /// acquisition order. Returns the number of lines written.
    pub fn export<W: Write>(&self, sink: &mut W) -> io::Result<usize> {
        let records = self.records();
        for record in &records {
            writeln!(sink, "{}", record.to_line())?;
        }
        Ok(records.len())
    }

    /// Append completed records to the file at `path`. The file is
    /// created if missing and never truncated, so repeated runs
    /// accumulate history.
    pub fn export_to_path(&self, path: &Path) -> io::Result<usize> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut sink = BufWriter::new(file);
        let count = self.export(&mut sink)?;
        sink.flush()?;
        Ok(count)
    }
}
