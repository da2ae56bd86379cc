// Checkpointing: an independent, periodic partial save that bounds
// rebuild cost without waiting for a full clean shutdown (spec.md §4.7).
// `process_checkpointing` is called cooperatively from whichever zone just
// closed a chapter; it only decides *whether* a checkpoint is due, the
// actual snapshot write goes through `layout::save_slot` the same way a
// full save does.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

/// Shared checkpoint state. `frequency` is in units of closed chapters; 0
/// disables checkpointing entirely. A `due` flag plus condvar lets a
/// dedicated checkpoint-writer thread (owned by the session) sleep until a
/// zone's chapter close actually trips the threshold, rather than polling.
pub(crate) struct CheckpointState {
    frequency: AtomicU32,
    chapters_since_last: AtomicU64,
    due: Mutex<bool>,
    due_cv: Condvar,
    shutdown: AtomicBool,
}

impl CheckpointState {
    #[must_use]
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency: AtomicU32::new(frequency),
            chapters_since_last: AtomicU64::new(0),
            due: Mutex::new(false),
            due_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Chapters closed since the last checkpoint or save, persisted into the
    /// save-slot snapshot so a reload resumes the same phase rather than
    /// restarting the count from zero.
    #[must_use]
    pub fn chapters_since_last(&self) -> u64 {
        self.chapters_since_last.load(Ordering::Relaxed)
    }

    pub fn restore_chapters_since_last(&self, count: u64) {
        self.chapters_since_last.store(count, Ordering::Relaxed);
    }

    pub fn set_frequency(&self, frequency: u32) {
        self.frequency.store(frequency, Ordering::Relaxed);
        self.chapters_since_last.store(0, Ordering::Relaxed);
    }

    /// Called once per chapter close, from any zone. Returns `true` if a
    /// checkpoint should be spilled now, and wakes the checkpoint thread.
    #[must_use]
    pub fn process_checkpointing(&self) -> bool {
        let frequency = self.frequency.load(Ordering::Relaxed);
        if frequency == 0 {
            return false;
        }
        let count = self.chapters_since_last.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= u64::from(frequency) {
            self.chapters_since_last.store(0, Ordering::Relaxed);
            *self.due.lock().expect("checkpoint due mutex poisoned") = true;
            self.due_cv.notify_one();
            true
        } else {
            false
        }
    }

    /// Blocks the checkpoint thread until either a checkpoint is due or the
    /// session is shutting down. Returns `false` on shutdown.
    pub fn wait_for_due(&self) -> bool {
        let mut due = self.due.lock().expect("checkpoint due mutex poisoned");
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return false;
            }
            if *due {
                *due = false;
                return true;
            }
            due = self.due_cv.wait(due).expect("checkpoint due mutex poisoned");
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.due_cv.notify_all();
    }
}
