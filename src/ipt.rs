//! Inverted page table: one slot per physical frame recording the owning
//! translation entry and the frame's pin state. Pins are counts, not flags:
//! a gateway copy and an in-flight eviction may both hold a pin on the same
//! frame. A frame with any pins is never chosen as a victim.

use std::sync::Arc;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::translation::TranslationEntry;

struct FrameSlot {
    owner: Option<Arc<TranslationEntry>>,
    pins: u32,
}

struct IptState {
    slots: Vec<FrameSlot>,
    /// Number of frames with at least one pin.
    pinned_frames: usize,
}

/// What the clock scan found at a frame.
pub(crate) enum ClaimOutcome {
    /// Unpinned and unreferenced: claimed, pinned, owner returned.
    Victim(Arc<TranslationEntry>),
    /// Pinned or unowned; not evictable right now.
    Skip,
    /// Reference bit was set; cleared it, spare the frame this pass.
    SecondChance,
}

pub struct Ipt {
    state: Mutex<IptState>,
    /// Signaled on every pin-state transition; backpressure waiters
    /// re-check their condition under the state lock.
    pin_changed: Condvar,
    num_frames: usize,
}

impl Ipt {
    pub fn new(num_frames: usize) -> Self {
        let slots = (0..num_frames)
            .map(|_| FrameSlot { owner: None, pins: 0 })
            .collect();
        Ipt {
            state: Mutex::new(IptState { slots, pinned_frames: 0 }),
            pin_changed: Condvar::new(),
            num_frames,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Record that `frame` is now owned by `entry`. The frame must be free
    /// or held pinned by the caller (fresh from the pool or mid-eviction).
    pub fn bind(&self, frame: usize, entry: Arc<TranslationEntry>) {
        let mut state = self.state.lock();
        let slot = &mut state.slots[frame];
        assert!(
            slot.pins > 0 || slot.owner.is_none(),
            "binding frame {frame} while it is live and unpinned"
        );
        slot.owner = Some(entry);
    }

    /// Clear `frame`'s ownership (address-space teardown or failed fault).
    pub fn unbind(&self, frame: usize) {
        let mut state = self.state.lock();
        let slot = &mut state.slots[frame];
        debug_assert!(slot.owner.is_some(), "unbinding unowned frame {frame}");
        slot.owner = None;
    }

    pub fn owner(&self, frame: usize) -> Option<Arc<TranslationEntry>> {
        self.state.lock().slots[frame].owner.clone()
    }

    /// Pin unconditionally. Used on the fault path, where the caller is the
    /// one making eviction progress and must not wait for capacity.
    pub fn pin(&self, frame: usize) {
        let mut state = self.state.lock();
        Self::add_pin(&mut state, frame);
        self.pin_changed.notify_all();
    }

    /// Pin for a gateway copy, blocking while the pin would leave zero
    /// evictable frames. Pinning an already-pinned frame never waits: it
    /// does not shrink the evictable set.
    pub fn acquire_pin_slot(&self, frame: usize) {
        let mut state = self.state.lock();
        while state.slots[frame].pins == 0 && state.pinned_frames + 1 >= self.num_frames {
            self.pin_changed.wait(&mut state);
        }
        Self::add_pin(&mut state, frame);
        self.pin_changed.notify_all();
    }

    /// Drop one pin, waking backpressure waiters.
    pub fn unpin(&self, frame: usize) {
        let mut state = self.state.lock();
        let slot = &mut state.slots[frame];
        assert!(slot.pins > 0, "unpinning frame {frame} with no pins");
        slot.pins -= 1;
        if slot.pins == 0 {
            state.pinned_frames -= 1;
        }
        self.pin_changed.notify_all();
    }

    pub fn is_pinned(&self, frame: usize) -> bool {
        self.state.lock().slots[frame].pins > 0
    }

    /// Number of frames currently holding at least one pin.
    pub fn pinned_frames(&self) -> usize {
        self.state.lock().pinned_frames
    }

    /// The owning entry's reference bit, or false for an unowned frame.
    pub fn reference_bit(&self, frame: usize) -> bool {
        self.state.lock().slots[frame]
            .owner
            .as_ref()
            .is_some_and(|owner| owner.is_used())
    }

    /// Single clock-scan step at `frame`: skip pinned or unowned frames,
    /// clear a set reference bit (second chance), otherwise claim the frame
    /// as victim, leaving it pinned for the evictor.
    pub(crate) fn claim_for_eviction(&self, frame: usize) -> ClaimOutcome {
        let mut state = self.state.lock();
        let slot = &mut state.slots[frame];
        if slot.pins > 0 {
            return ClaimOutcome::Skip;
        }
        let Some(owner) = slot.owner.clone() else {
            return ClaimOutcome::Skip;
        };
        if owner.take_used() {
            return ClaimOutcome::SecondChance;
        }
        slot.pins = 1;
        state.pinned_frames += 1;
        self.pin_changed.notify_all();
        trace!("claimed frame {frame} (vpn {}) for eviction", owner.vpn());
        ClaimOutcome::Victim(owner)
    }

    /// Block while every frame is pinned. The clock scan calls this after a
    /// fruitless revolution instead of spinning; any unpin re-runs the scan.
    pub(crate) fn wait_for_unpinned_frame(&self) {
        let mut state = self.state.lock();
        while state.pinned_frames >= self.num_frames {
            trace!("all {} frames pinned, waiting for an unpin", self.num_frames);
            self.pin_changed.wait(&mut state);
        }
    }

    fn add_pin(state: &mut IptState, frame: usize) {
        let slot = &mut state.slots[frame];
        slot.pins += 1;
        if slot.pins == 1 {
            state.pinned_frames += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::PageLocation;
    use std::thread;
    use std::time::Duration;

    fn resident_entry(vpn: usize, frame: usize) -> Arc<TranslationEntry> {
        let entry = Arc::new(TranslationEntry::new(vpn));
        *entry.lock_location() = PageLocation::Resident(frame);
        entry
    }

    #[test]
    fn test_pin_counts_and_pinned_frames() {
        let ipt = Ipt::new(4);
        assert_eq!(ipt.pinned_frames(), 0);

        ipt.pin(2);
        ipt.pin(2);
        assert!(ipt.is_pinned(2));
        assert_eq!(ipt.pinned_frames(), 1, "two pins on one frame count once");

        ipt.unpin(2);
        assert!(ipt.is_pinned(2));
        ipt.unpin(2);
        assert!(!ipt.is_pinned(2));
        assert_eq!(ipt.pinned_frames(), 0);
    }

    #[test]
    fn test_bind_and_reference_bit_delegation() {
        let ipt = Ipt::new(2);
        let entry = resident_entry(5, 0);
        ipt.pin(0);
        ipt.bind(0, Arc::clone(&entry));
        ipt.unpin(0);

        assert!(!ipt.reference_bit(0));
        entry.mark_used();
        assert!(ipt.reference_bit(0));
        assert!(!ipt.reference_bit(1));
    }

    #[test]
    #[should_panic(expected = "live and unpinned")]
    fn test_bind_live_unpinned_frame_panics() {
        let ipt = Ipt::new(1);
        ipt.pin(0);
        ipt.bind(0, resident_entry(0, 0));
        ipt.unpin(0);
        // Frame 0 is owned and unpinned; rebinding it is a protocol bug.
        ipt.bind(0, resident_entry(1, 0));
    }

    #[test]
    fn test_claim_skips_pinned_and_unowned() {
        let ipt = Ipt::new(2);
        assert!(matches!(ipt.claim_for_eviction(0), ClaimOutcome::Skip));

        ipt.pin(1);
        ipt.bind(1, resident_entry(0, 1));
        assert!(matches!(ipt.claim_for_eviction(1), ClaimOutcome::Skip));
        ipt.unpin(1);

        assert!(matches!(ipt.claim_for_eviction(1), ClaimOutcome::Victim(_)));
        assert!(ipt.is_pinned(1), "claimed victim stays pinned for the evictor");
    }

    #[test]
    fn test_claim_clears_reference_bit_once() {
        let ipt = Ipt::new(1);
        let entry = resident_entry(0, 0);
        ipt.pin(0);
        ipt.bind(0, Arc::clone(&entry));
        ipt.unpin(0);
        entry.mark_used();

        assert!(matches!(ipt.claim_for_eviction(0), ClaimOutcome::SecondChance));
        assert!(!entry.is_used());
        assert!(matches!(ipt.claim_for_eviction(0), ClaimOutcome::Victim(_)));
    }

    #[test]
    fn test_unpin_wakes_backpressure_waiter() {
        let ipt = Arc::new(Ipt::new(2));
        ipt.pin(0);
        ipt.pin(1);

        let waiter = {
            let ipt = Arc::clone(&ipt);
            thread::spawn(move || {
                ipt.wait_for_unpinned_frame();
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished(), "waiter must block while all frames pinned");

        ipt.unpin(1);
        waiter.join().unwrap();
    }

    #[test]
    fn test_acquire_pin_slot_blocks_at_capacity() {
        let ipt = Arc::new(Ipt::new(2));
        ipt.pin(0);

        // Frame 1 is the last unpinned frame; a gateway pin on it must wait.
        let waiter = {
            let ipt = Arc::clone(&ipt);
            thread::spawn(move || {
                ipt.acquire_pin_slot(1);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        ipt.unpin(0);
        waiter.join().unwrap();
        assert!(ipt.is_pinned(1));
    }

    #[test]
    fn test_acquire_pin_slot_on_pinned_frame_never_waits() {
        let ipt = Ipt::new(2);
        ipt.pin(0);
        ipt.pin(1);
        // Both frames pinned, but frame 0 already holds a pin: piling a
        // second pin on it does not shrink the evictable set.
        ipt.acquire_pin_slot(0);
        ipt.unpin(0);
        ipt.unpin(0);
        ipt.unpin(1);
    }
}
