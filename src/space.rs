//! Address-space strategies. A process is constructed with one of two
//! ways of reaching physical memory: `DirectMapped` pre-allocates every
//! frame up front and never faults, `PagedSpace` (see `paging`) loads pages
//! on demand and lives with eviction. Both expose the same gateway surface,
//! so the process layer picks a strategy at construction instead of
//! subclassing.

use std::sync::Arc;

use log::debug;

use crate::VmError;
use crate::constants::*;
use crate::segment::SegmentSource;
use crate::translation::{PageLocation, TranslationEntry};
use crate::vm_manager::VmManager;

/// The memory-access surface syscall handlers copy user data through.
/// Transfers are always page-wise and partial on failure: a short count,
/// never an error, is how bad addresses and permission stops surface.
pub trait TranslationStrategy: Send + Sync {
    fn num_pages(&self) -> usize;

    /// Copy out of virtual memory into `data`; returns bytes transferred.
    fn read_virtual_memory(&self, vaddr: usize, data: &mut [u8]) -> usize;

    /// Copy `data` into virtual memory; returns bytes transferred.
    fn write_virtual_memory(&self, vaddr: usize, data: &[u8]) -> usize;
}

/// Identity-style mapping: every page gets a frame at construction, bound
/// and permanently pinned in the IPT so the eviction scan passes it over.
pub struct DirectMapped {
    manager: Arc<VmManager>,
    entries: Vec<Arc<TranslationEntry>>,
}

impl std::fmt::Debug for DirectMapped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectMapped")
            .field("num_pages", &self.entries.len())
            .finish()
    }
}

impl DirectMapped {
    /// Allocate and populate all `source` pages plus `stack_pages` zeroed
    /// pages. Fails with `OutOfFrames` when the pool cannot cover the whole
    /// space; nothing stays allocated on failure.
    pub fn new(
        manager: Arc<VmManager>,
        source: &dyn SegmentSource,
        stack_pages: usize,
    ) -> Result<Self, VmError> {
        let num_pages = source.num_pages() + stack_pages;
        let mut entries: Vec<Arc<TranslationEntry>> = Vec::with_capacity(num_pages);

        for vpn in 0..num_pages {
            let Some(frame) = manager.free_frames().acquire() else {
                Self::release_entries(&manager, &entries);
                let available = manager.free_frames().free_count();
                return Err(VmError::OutOfFrames { requested: num_pages, available });
            };
            manager.ipt().pin(frame);

            let entry = Arc::new(TranslationEntry::new(vpn));
            // Pool frames may hold a dropped space's stale bytes.
            match source.locate(vpn) {
                Some((segment, page, read_only)) => {
                    manager
                        .memory()
                        .with_frame(frame, |buf| source.load_page(segment, page, buf));
                    entry.set_read_only(read_only);
                }
                None => manager.memory().zero_frame(frame),
            }
            *entry.lock_location() = PageLocation::Resident(frame);
            manager.ipt().bind(frame, Arc::clone(&entry));
            entries.push(entry);
        }
        debug!("direct-mapped space: {num_pages} pages resident and pinned");
        Ok(DirectMapped { manager, entries })
    }

    fn release_entries(manager: &VmManager, entries: &[Arc<TranslationEntry>]) {
        for entry in entries {
            if let PageLocation::Resident(frame) = entry.location() {
                manager.ipt().unbind(frame);
                manager.ipt().unpin(frame);
                manager.free_frames().release(frame);
            }
        }
    }

    fn frame_of(&self, vpn: usize) -> usize {
        match self.entries[vpn].location() {
            PageLocation::Resident(frame) => frame,
            other => unreachable!("direct-mapped page {vpn} not resident: {other:?}"),
        }
    }
}

impl TranslationStrategy for DirectMapped {
    fn num_pages(&self) -> usize {
        self.entries.len()
    }

    fn read_virtual_memory(&self, vaddr: usize, data: &mut [u8]) -> usize {
        let mut transferred = 0;
        let mut vpn = page_from_address(vaddr);
        let mut offset = offset_from_address(vaddr);
        while transferred < data.len() && vpn < self.entries.len() {
            let amount = (data.len() - transferred).min(PAGE_SIZE - offset);
            self.manager.memory().copy_out(
                self.frame_of(vpn),
                offset,
                &mut data[transferred..transferred + amount],
            );
            transferred += amount;
            offset = 0;
            vpn += 1;
        }
        transferred
    }

    fn write_virtual_memory(&self, vaddr: usize, data: &[u8]) -> usize {
        let mut transferred = 0;
        let mut vpn = page_from_address(vaddr);
        let mut offset = offset_from_address(vaddr);
        while transferred < data.len() && vpn < self.entries.len() {
            if self.entries[vpn].is_read_only() {
                break;
            }
            let amount = (data.len() - transferred).min(PAGE_SIZE - offset);
            self.manager.memory().copy_in(
                self.frame_of(vpn),
                offset,
                &data[transferred..transferred + amount],
            );
            transferred += amount;
            offset = 0;
            vpn += 1;
        }
        transferred
    }
}

impl Drop for DirectMapped {
    fn drop(&mut self) {
        Self::release_entries(&self.manager, &self.entries);
    }
}
