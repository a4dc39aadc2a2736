//! Build state and progress tracking.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

/// Default capacity of a progress channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Build phase.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum BuildState {
    Idle = 0,
    Discovering = 1,
    Extracting = 2,
    Writing = 3,
    Finished = 4,
    Failed = 5,
}

impl BuildState {
    /// Loads the state from an atomic.
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::Relaxed) {
            1 => Self::Discovering,
            2 => Self::Extracting,
            3 => Self::Writing,
            4 => Self::Finished,
            5 => Self::Failed,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Extracting => "extracting",
            Self::Writing => "writing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// Progress counters for one build. Every counter only ever increases
/// between two calls to [`BuildProgress::reset_for_build`].
#[derive(Debug, Default)]
pub struct BuildProgress {
    pub state: AtomicU8,
    pub scanned_dirs: AtomicUsize,
    pub scanned_files: AtomicUsize,
    pub series_dirs: AtomicUsize,
    pub extracted: AtomicUsize,
    pub skipped: AtomicUsize,
    pub started_at: AtomicU64,
    pub finished_at: AtomicU64,
}

impl BuildProgress {
    /// Resets progress for a new build.
    pub fn reset_for_build(&self, started_at: u64) {
        self.set_state(BuildState::Idle);
        self.scanned_dirs.store(0, Ordering::Relaxed);
        self.scanned_files.store(0, Ordering::Relaxed);
        self.series_dirs.store(0, Ordering::Relaxed);
        self.extracted.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.started_at.store(started_at, Ordering::Relaxed);
        self.finished_at.store(0, Ordering::Relaxed);
    }

    pub fn set_state(&self, state: BuildState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn state(&self) -> BuildState {
        BuildState::load(&self.state)
    }

    /// Takes a snapshot of the progress values.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            state: self.state(),
            scanned_dirs: self.scanned_dirs.load(Ordering::Relaxed),
            scanned_files: self.scanned_files.load(Ordering::Relaxed),
            series_dirs: self.series_dirs.load(Ordering::Relaxed),
            extracted: self.extracted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            started_at: zero_to_none(self.started_at.load(Ordering::Relaxed)),
            finished_at: zero_to_none(self.finished_at.load(Ordering::Relaxed)),
        }
    }
}

/// A snapshot of build progress values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub state: BuildState,
    pub scanned_dirs: usize,
    pub scanned_files: usize,
    pub series_dirs: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

/// Messages sent to a progress consumer during a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Discovery is complete; extraction of `series` directories begins.
    Discovered { series: usize },
    /// `done` of `total` series have been extracted.
    Extracted { done: usize, total: usize },
    /// Last message of a successful build.
    Finished { rows: usize, skipped: usize },
}

/// Sending half of a progress channel.
///
/// `Extracted` events are best-effort: when the channel is full they are
/// dropped, and `done` never decreases across the events that do arrive.
/// `Discovered` and `Finished` always wait for room, so the receiver must
/// keep draining until it sees `Finished` or the channel closes. The build
/// must not run inside an async context.
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    done: Mutex<usize>,
}

impl ProgressSender {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            tx,
            done: Mutex::new(0),
        }
    }

    /// Creates a bounded channel and wraps its sender.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub(crate) fn discovered(&self, series: usize) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        self.send(ProgressEvent::Discovered { series });
    }

    pub(crate) fn extracted_one(&self, total: usize) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done += 1;
        // Full or closed: drop the update, the next one carries a higher count.
        let _ = self.tx.try_send(ProgressEvent::Extracted { done: *done, total });
    }

    pub(crate) fn finished(&self, rows: usize, skipped: usize) {
        self.send(ProgressEvent::Finished { rows, skipped });
    }

    fn send(&self, event: ProgressEvent) {
        if self.tx.blocking_send(event).is_err() {
            tracing::debug!("progress receiver dropped, discarding {:?}", event);
        }
    }
}

/// Returns the current Unix timestamp in seconds.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

/// Converts 0 to None for optional timestamps.
pub fn zero_to_none(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}
