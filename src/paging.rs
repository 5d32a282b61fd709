//! Demand paging: the per-process page table, the page-fault handler, and
//! the memory-access gateway. Pages start unbacked and are loaded the first
//! time the gateway touches them; eviction moves dirty pages to swap and
//! the next fault brings them back.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::VmError;
use crate::constants::*;
use crate::segment::SegmentSource;
use crate::space::TranslationStrategy;
use crate::translation::{PageLocation, TranslationEntry};
use crate::vm_manager::VmManager;

enum Access<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

/// A demand-paged address space: `source.num_pages()` loadable pages
/// followed by `stack_pages` of zero-fill.
pub struct PagedSpace {
    manager: Arc<VmManager>,
    source: Box<dyn SegmentSource>,
    entries: Vec<Arc<TranslationEntry>>,
    /// Serializes faults within this space so two threads faulting on the
    /// same page load it once.
    fault_lock: Mutex<()>,
}

impl PagedSpace {
    pub fn new(
        manager: Arc<VmManager>,
        source: Box<dyn SegmentSource>,
        stack_pages: usize,
    ) -> Self {
        let num_pages = source.num_pages() + stack_pages;
        let entries = (0..num_pages)
            .map(|vpn| Arc::new(TranslationEntry::new(vpn)))
            .collect();
        debug!("paged space created: {num_pages} pages, all invalid");
        PagedSpace {
            manager,
            source,
            entries,
            fault_lock: Mutex::new(()),
        }
    }

    /// Current location of a page, for observation.
    pub fn page_location(&self, vpn: usize) -> PageLocation {
        self.entries[vpn].location()
    }

    /// Bring `vpn` into a physical frame. On return the page is resident
    /// (unless the swap read failed) and its frame is unpinned; the caller
    /// re-checks residency and may fault again if eviction got there first.
    fn handle_fault(&self, vpn: usize) -> Result<(), VmError> {
        let _serial = self.fault_lock.lock();
        let entry = &self.entries[vpn];
        if entry.is_resident() {
            // Another thread of this space faulted the page in while we
            // waited on the fault lock.
            return Ok(());
        }
        self.manager.stats().bump_page_faults();

        // Frame comes back pinned and unowned; eviction cannot touch it
        // until we bind and unpin.
        let frame = self.manager.obtain_frame()?;
        let mut location = entry.lock_location();
        match *location {
            PageLocation::Swapped(slot) => {
                if let Err(e) =
                    self.manager.swap().read_slot(slot, self.manager.memory(), frame)
                {
                    drop(location);
                    self.manager.ipt().unpin(frame);
                    self.manager.free_frames().release(frame);
                    return Err(e);
                }
                self.manager.swap().free_slot(slot);
                // The slot is gone, so the page must be written back out if
                // it is ever evicted again.
                entry.mark_dirty();
                self.manager.stats().bump_swap_ins();
                debug!("fault vpn {vpn}: swapped in from slot {slot} to frame {frame}");
            }
            PageLocation::Unbacked => match self.source.locate(vpn) {
                Some((segment, page, read_only)) => {
                    self.manager
                        .memory()
                        .with_frame(frame, |buf| self.source.load_page(segment, page, buf));
                    entry.set_read_only(read_only);
                    self.manager.stats().bump_segment_loads();
                    debug!("fault vpn {vpn}: loaded segment {segment} page {page} into frame {frame}");
                }
                None => {
                    self.manager.memory().zero_frame(frame);
                    self.manager.stats().bump_zero_fills();
                    debug!("fault vpn {vpn}: zero-filled frame {frame}");
                }
            },
            PageLocation::Resident(_) => unreachable!("residency checked under the fault lock"),
        }
        entry.mark_used();
        *location = PageLocation::Resident(frame);
        self.manager.ipt().bind(frame, Arc::clone(entry));
        drop(location);
        self.manager.ipt().unpin(frame);
        Ok(())
    }

    /// Page-wise copy loop shared by reads and writes. Stops early (and
    /// returns the partial count) on: an address past the space, a write
    /// reaching a read-only page, or a fault that failed.
    fn transfer(&self, vaddr: usize, mut access: Access<'_>) -> usize {
        let total = match &access {
            Access::Read(data) => data.len(),
            Access::Write(data) => data.len(),
        };
        let mut transferred = 0;
        let mut vpn = page_from_address(vaddr);
        let mut offset = offset_from_address(vaddr);

        while transferred < total {
            if vpn >= self.entries.len() {
                break;
            }
            let entry = &self.entries[vpn];
            let location = entry.lock_location();
            let frame = match *location {
                PageLocation::Resident(frame) => frame,
                _ => {
                    drop(location);
                    match self.handle_fault(vpn) {
                        Ok(()) => continue, // retry the same page
                        Err(e) => {
                            warn!("fault on vpn {vpn} failed, truncating transfer: {e}");
                            break;
                        }
                    }
                }
            };
            if matches!(access, Access::Write(_)) && entry.is_read_only() {
                break;
            }

            // Pin strictly around the byte copy; holding the location lock
            // keeps eviction from invalidating the entry underneath us, the
            // pin keeps the clock scan from even proposing the frame.
            self.manager.ipt().acquire_pin_slot(frame);
            let amount = (total - transferred).min(PAGE_SIZE - offset);
            match &mut access {
                Access::Read(data) => {
                    self.manager.memory().copy_out(
                        frame,
                        offset,
                        &mut data[transferred..transferred + amount],
                    );
                }
                Access::Write(data) => {
                    self.manager.memory().copy_in(
                        frame,
                        offset,
                        &data[transferred..transferred + amount],
                    );
                    entry.mark_dirty();
                }
            }
            entry.mark_used();
            self.manager.ipt().unpin(frame);
            drop(location);

            transferred += amount;
            offset = 0;
            vpn += 1;
        }
        transferred
    }

    /// Invalidate every page, returning frames to the pool and swap slots
    /// to the free list. Callers must have quiesced all access to the
    /// space; this runs automatically on drop.
    fn release_pages(&self) {
        for entry in &self.entries {
            let mut location = entry.lock_location();
            match *location {
                PageLocation::Resident(frame) => {
                    self.manager.ipt().unbind(frame);
                    self.manager.free_frames().release(frame);
                }
                PageLocation::Swapped(slot) => self.manager.swap().free_slot(slot),
                PageLocation::Unbacked => {}
            }
            *location = PageLocation::Unbacked;
        }
    }
}

impl TranslationStrategy for PagedSpace {
    fn num_pages(&self) -> usize {
        self.entries.len()
    }

    fn read_virtual_memory(&self, vaddr: usize, data: &mut [u8]) -> usize {
        self.transfer(vaddr, Access::Read(data))
    }

    fn write_virtual_memory(&self, vaddr: usize, data: &[u8]) -> usize {
        self.transfer(vaddr, Access::Write(data))
    }
}

impl Drop for PagedSpace {
    fn drop(&mut self) {
        self.release_pages();
    }
}
