//! Per-CTU decode progress with blocking waits
//!
//! Each CTU owns a monotonic counter. Producers raise it once a CTU is
//! reconstructed; consumers (the wavefront row below, motion compensation
//! of later pictures) block until it reaches the level they need. A
//! poisoned tracker fails every pending and future wait instead of
//! blocking, so an abandoned picture never stalls its readers.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Nothing decoded yet
pub const PROGRESS_NONE: u32 = 0;
/// Prediction and residual reconstruction finished (or the CTU was given up)
pub const PROGRESS_RECONSTRUCTED: u32 = 1;

/// Returned from a wait on a tracker whose picture was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poisoned;

impl From<Poisoned> for crate::error::HevcError {
    fn from(_: Poisoned) -> Self {
        crate::error::HevcError::Poisoned
    }
}

/// Progress counters for every CTU of a picture
#[derive(Debug)]
pub struct CtuProgress {
    levels: Box<[AtomicU32]>,
    poisoned: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CtuProgress {
    /// Tracker for `num_ctbs` CTUs, all at [`PROGRESS_NONE`]
    pub fn new(num_ctbs: u32) -> Self {
        Self {
            levels: (0..num_ctbs).map(|_| AtomicU32::new(PROGRESS_NONE)).collect(),
            poisoned: AtomicBool::new(false),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Number of tracked CTUs
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the tracker covers no CTUs
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Current level of a CTU (raster address)
    pub fn level(&self, ctb_rs: u32) -> u32 {
        self.levels[ctb_rs as usize].load(Ordering::Acquire)
    }

    /// Whether the tracker was poisoned
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Block until CTU `ctb_rs` reaches `level`
    pub fn wait_for(&self, ctb_rs: u32, level: u32) -> Result<(), Poisoned> {
        let counter = &self.levels[ctb_rs as usize];
        if counter.load(Ordering::Acquire) >= level {
            return Ok(());
        }
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if counter.load(Ordering::Acquire) >= level {
                return Ok(());
            }
            if self.poisoned.load(Ordering::Acquire) {
                return Err(Poisoned);
            }
            guard = self.wake.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Raise CTU `ctb_rs` to at least `level` and wake waiters
    pub fn signal(&self, ctb_rs: u32, level: u32) {
        self.levels[ctb_rs as usize].fetch_max(level, Ordering::Release);
        drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.wake.notify_all();
    }

    /// Raise a set of CTUs at once (used to release CTUs that will not be decoded)
    pub fn signal_many(&self, ctbs: impl IntoIterator<Item = u32>, level: u32) {
        for rs in ctbs {
            self.levels[rs as usize].fetch_max(level, Ordering::Release);
        }
        drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.wake.notify_all();
    }

    /// Raise every CTU to `level`
    pub fn signal_all(&self, level: u32) {
        self.signal_many(0..self.levels.len() as u32, level);
    }

    /// Fail all current and future waits that are not already satisfied
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
        drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.wake.notify_all();
    }

    /// Back to [`PROGRESS_NONE`], unpoisoned
    pub fn reset(&self) {
        for level in self.levels.iter() {
            level.store(PROGRESS_NONE, Ordering::Relaxed);
        }
        self.poisoned.store(false, Ordering::Release);
    }
}
