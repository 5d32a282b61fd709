//! The kernel-wide memory-manager context: simulated physical memory, the
//! free-frame pool, the inverted page table, the swap space, and the clock
//! policy. One `VmManager` lives for the whole simulation; address spaces
//! hold a handle to it instead of reaching for globals.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info};

use crate::VmError;
use crate::clock::ClockPolicy;
use crate::ipt::Ipt;
use crate::memory::{FreeFrameList, PhysicalMemory};
use crate::swap::SwapSpace;
use crate::translation::PageLocation;

/// Event counters for the paging machinery. Relaxed atomics; totals are
/// exact once the threads that generated them are joined.
#[derive(Default)]
pub struct VmStats {
    page_faults: AtomicU64,
    evictions: AtomicU64,
    swap_ins: AtomicU64,
    swap_outs: AtomicU64,
    segment_loads: AtomicU64,
    zero_fills: AtomicU64,
}

macro_rules! stat_accessors {
    ($($field:ident => $bump:ident),* $(,)?) => {
        $(
            pub fn $field(&self) -> u64 {
                self.$field.load(Ordering::Relaxed)
            }

            pub(crate) fn $bump(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl VmStats {
    stat_accessors! {
        page_faults => bump_page_faults,
        evictions => bump_evictions,
        swap_ins => bump_swap_ins,
        swap_outs => bump_swap_outs,
        segment_loads => bump_segment_loads,
        zero_fills => bump_zero_fills,
    }
}

pub struct VmManager {
    memory: PhysicalMemory,
    pool: FreeFrameList,
    ipt: Ipt,
    swap: SwapSpace,
    clock: ClockPolicy,
    stats: VmStats,
}

impl VmManager {
    /// Set up a machine with `num_frames` physical frames and a fresh swap
    /// file at `swap_path`. The file is removed again when the manager is
    /// dropped.
    pub fn new<P: AsRef<Path>>(num_frames: usize, swap_path: P) -> Result<Self, VmError> {
        assert!(num_frames >= 2, "need at least two physical frames");
        let swap = SwapSpace::create(swap_path)?;
        info!("memory manager up: {num_frames} frames of {} bytes", crate::PAGE_SIZE);
        Ok(VmManager {
            memory: PhysicalMemory::new(num_frames),
            pool: FreeFrameList::new(num_frames),
            ipt: Ipt::new(num_frames),
            swap,
            clock: ClockPolicy::new(),
            stats: VmStats::default(),
        })
    }

    pub fn num_frames(&self) -> usize {
        self.memory.num_frames()
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn free_frames(&self) -> &FreeFrameList {
        &self.pool
    }

    pub fn ipt(&self) -> &Ipt {
        &self.ipt
    }

    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    pub fn stats(&self) -> &VmStats {
        &self.stats
    }

    /// Produce a frame for a faulting page: from the free pool if one
    /// remains, otherwise by evicting. The returned frame is pinned and has
    /// no current owner binding the caller needs to respect; the caller
    /// binds its own entry and unpins once the page is populated.
    pub(crate) fn obtain_frame(&self) -> Result<usize, VmError> {
        if let Some(frame) = self.pool.acquire() {
            self.ipt.pin(frame);
            return Ok(frame);
        }
        self.evict_one()
    }

    /// Select a victim, invalidate its entry, and save its contents to swap
    /// if dirty. The victim's location lock is held across the whole
    /// sequence, so no thread observes the entry mid-transition.
    fn evict_one(&self) -> Result<usize, VmError> {
        let (frame, victim) = self.clock.select_victim(&self.ipt);
        let mut location = victim.lock_location();
        debug_assert!(
            matches!(*location, PageLocation::Resident(f) if f == frame),
            "victim entry does not own the claimed frame"
        );

        // Invalidate before any I/O: from here on the old translation is
        // unreachable, and the lock keeps the transition atomic to others.
        *location = PageLocation::Unbacked;

        if victim.is_dirty() {
            let slot = self.swap.allocate_slot();
            match self.swap.write_slot(slot, &self.memory, frame) {
                Ok(_) => {
                    *location = PageLocation::Swapped(slot);
                    victim.clear_dirty();
                    self.stats.bump_swap_outs();
                }
                Err(e) => {
                    // The fault cannot proceed and the victim's data is
                    // gone; put the frame back where a later fault can use
                    // it and fail upward.
                    error!("swap-out of frame {frame} failed, page lost: {e}");
                    self.swap.free_slot(slot);
                    drop(location);
                    self.ipt.unbind(frame);
                    self.ipt.unpin(frame);
                    self.pool.release(frame);
                    return Err(e);
                }
            }
        }
        victim.take_used();
        drop(location);
        // Ownership transfers: the caller binds its own entry. Clear the
        // stale binding so the frame is uniformly unowned-and-pinned here.
        self.ipt.unbind(frame);
        self.stats.bump_evictions();
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PAGE_SIZE;
    use crate::translation::TranslationEntry;
    use std::sync::Arc;

    fn manager(num_frames: usize) -> (tempfile::TempDir, VmManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = VmManager::new(num_frames, dir.path().join("swap")).unwrap();
        (dir, mgr)
    }

    /// Install a resident page in `frame`, the way a completed fault would.
    fn install_page(mgr: &VmManager, vpn: usize, frame: usize, dirty: bool) -> Arc<TranslationEntry> {
        let entry = Arc::new(TranslationEntry::new(vpn));
        *entry.lock_location() = PageLocation::Resident(frame);
        if dirty {
            entry.mark_dirty();
        }
        mgr.ipt().bind(frame, Arc::clone(&entry));
        mgr.ipt().unpin(frame);
        entry
    }

    #[test]
    fn test_obtain_frame_prefers_free_pool() {
        let (_dir, mgr) = manager(3);
        let frame = mgr.obtain_frame().unwrap();
        assert!(mgr.ipt().is_pinned(frame));
        assert_eq!(mgr.free_frames().free_count(), 2);
        assert_eq!(mgr.stats().evictions(), 0);
    }

    #[test]
    fn test_eviction_of_clean_page_discards_contents() {
        let (_dir, mgr) = manager(2);
        let f0 = mgr.obtain_frame().unwrap();
        let f1 = mgr.obtain_frame().unwrap();
        let e0 = install_page(&mgr, 0, f0, false);
        let _e1 = install_page(&mgr, 1, f1, false);

        let frame = mgr.obtain_frame().unwrap();
        assert_eq!(frame, f0, "clock starts at frame 0");
        assert_eq!(e0.location(), PageLocation::Unbacked);
        assert_eq!(mgr.stats().evictions(), 1);
        assert_eq!(mgr.stats().swap_outs(), 0);
        assert_eq!(mgr.swap().slot_count(), 0);
    }

    #[test]
    fn test_eviction_of_dirty_page_swaps_out() {
        let (_dir, mgr) = manager(2);
        let f0 = mgr.obtain_frame().unwrap();
        let f1 = mgr.obtain_frame().unwrap();

        let pattern = [0x5au8; PAGE_SIZE];
        mgr.memory().copy_in(f0, 0, &pattern);
        let e0 = install_page(&mgr, 0, f0, true);
        let _e1 = install_page(&mgr, 1, f1, false);

        let frame = mgr.obtain_frame().unwrap();
        assert_eq!(frame, f0);
        let PageLocation::Swapped(slot) = e0.location() else {
            panic!("dirty victim must move to swap, got {:?}", e0.location());
        };
        assert!(!e0.is_dirty(), "swap-out leaves the saved copy clean");
        assert_eq!(mgr.stats().swap_outs(), 1);

        // The saved bytes match what was in the frame.
        mgr.memory().zero_frame(f1);
        mgr.swap().read_slot(slot, mgr.memory(), f1).unwrap();
        let mut back = [0u8; PAGE_SIZE];
        mgr.memory().copy_out(f1, 0, &mut back);
        assert_eq!(back, pattern);
    }

    #[test]
    fn test_eviction_respects_reference_bits() {
        let (_dir, mgr) = manager(2);
        let f0 = mgr.obtain_frame().unwrap();
        let f1 = mgr.obtain_frame().unwrap();
        let e0 = install_page(&mgr, 0, f0, false);
        let _e1 = install_page(&mgr, 1, f1, false);
        e0.mark_used();

        let frame = mgr.obtain_frame().unwrap();
        assert_eq!(frame, f1, "recently used frame 0 gets a second chance");
    }

    #[test]
    fn test_evicted_frame_stays_pinned_until_rebound() {
        let (_dir, mgr) = manager(2);
        let f0 = mgr.obtain_frame().unwrap();
        let f1 = mgr.obtain_frame().unwrap();
        install_page(&mgr, 0, f0, false);
        install_page(&mgr, 1, f1, false);

        let frame = mgr.obtain_frame().unwrap();
        assert!(mgr.ipt().is_pinned(frame));
    }
}
