//! Clock (second-chance) eviction. A single cursor walks the inverted page
//! table circularly; frames touched since the last sweep get their
//! reference bit cleared and survive one more revolution before they are
//! eligible again.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::ipt::{ClaimOutcome, Ipt};
use crate::translation::TranslationEntry;

pub struct ClockPolicy {
    /// Circular scan position, persisted between eviction calls.
    cursor: Mutex<usize>,
}

impl ClockPolicy {
    pub fn new() -> Self {
        ClockPolicy { cursor: Mutex::new(0) }
    }

    /// Scan position the next selection starts from.
    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    /// Choose a victim frame. The returned frame is left pinned for the
    /// caller, with its (former) owning entry alongside. The cursor advances
    /// past the victim so the next scan resumes after it.
    ///
    /// If a full revolution finds every frame pinned, the scan blocks until
    /// some pin is released rather than spinning; the caller's backpressure
    /// (see `Ipt::acquire_pin_slot`) keeps this from waiting forever.
    pub fn select_victim(&self, ipt: &Ipt) -> (usize, Arc<TranslationEntry>) {
        let mut cursor = self.cursor.lock();
        let num_frames = ipt.num_frames();
        let mut skipped = 0usize;
        loop {
            let frame = *cursor;
            *cursor = (frame + 1) % num_frames;
            match ipt.claim_for_eviction(frame) {
                ClaimOutcome::Victim(owner) => {
                    trace!("clock selected victim frame {frame}");
                    return (frame, owner);
                }
                ClaimOutcome::SecondChance => {
                    trace!("clock spared frame {frame}, cleared reference bit");
                    skipped = 0;
                }
                ClaimOutcome::Skip => {
                    skipped += 1;
                    if skipped >= num_frames {
                        ipt.wait_for_unpinned_frame();
                        skipped = 0;
                    }
                }
            }
        }
    }
}

impl Default for ClockPolicy {
    fn default() -> Self {
        Self::new()
    }
}
