//! High-priority sub-queue state machine (spec §4.5).
//!
//! The high-priority ring itself is just another `Ring`; what lives here is
//! the bookkeeping around *entering* and *leaving* a high-priority segment,
//! and the cross-module rules spec_full §5 makes explicit: a segment
//! cannot be open at the same time as a block recording, in either
//! direction.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Tracks whether a high-priority segment is currently open and how many
/// completed segments the kernel has not yet swapped in, for
/// `highpri_sync` to block on.
pub struct HighPri {
    open: AtomicBool,
    /// Incremented each time `highpri_end` closes a segment; the stub
    /// kernel (or a real one) increments a matching "processed" counter as
    /// it executes the SWAP_BUFFERS that closes each segment out.
    segments_submitted: AtomicU32,
    segments_processed: AtomicU32,
}

impl HighPri {
    pub fn new() -> Self {
        HighPri {
            open: AtomicBool::new(false),
            segments_submitted: AtomicU32::new(0),
            segments_processed: AtomicU32::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Opens a high-priority segment. Panics if one is already open or if
    /// a block recording is open (the latter check lives in `Engine`,
    /// which is the only place both flags are visible).
    pub fn begin(&self) {
        assert!(
            !self.open.swap(true, Ordering::AcqRel),
            "highpri_begin() called while a high-priority segment is already open"
        );
    }

    /// Closes the currently open segment.
    pub fn end(&self) {
        assert!(
            self.open.swap(false, Ordering::AcqRel),
            "highpri_end() called with no open high-priority segment"
        );
        self.segments_submitted.fetch_add(1, Ordering::Release);
    }

    /// Called by the consumer side once it has executed the SWAP_BUFFERS
    /// that closes out a high-priority segment.
    pub fn note_processed(&self) {
        self.segments_processed.fetch_add(1, Ordering::Release);
    }

    /// Blocks until the kernel has finished processing every segment
    /// submitted so far.
    pub fn sync(&self) {
        let target = self.segments_submitted.load(Ordering::Acquire);
        while self.segments_processed.load(Ordering::Acquire) < target {
            core::hint::spin_loop();
        }
    }
}

impl Default for HighPri {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_end_round_trip() {
        let hp = HighPri::new();
        assert!(!hp.is_open());
        hp.begin();
        assert!(hp.is_open());
        hp.end();
        assert!(!hp.is_open());
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn double_begin_panics() {
        let hp = HighPri::new();
        hp.begin();
        hp.begin();
    }

    #[test]
    #[should_panic(expected = "no open high-priority segment")]
    fn end_without_begin_panics() {
        let hp = HighPri::new();
        hp.end();
    }

    #[test]
    fn sync_returns_once_processed_catches_up() {
        let hp = HighPri::new();
        hp.begin();
        hp.end();
        hp.note_processed();
        hp.sync();
    }
}
