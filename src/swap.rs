//! Swap space: a single growable backing file divided into page-sized
//! slots. Slot `k` occupies bytes `[k * PAGE_SIZE, (k + 1) * PAGE_SIZE)`;
//! there is no header and no on-disk metadata. Slot ownership lives in the
//! in-memory translation entries, so the file carries no state across runs
//! and is deleted when the manager shuts down.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use parking_lot::Mutex;

use crate::VmError;
use crate::constants::PAGE_SIZE;
use crate::memory::PhysicalMemory;

struct SwapState {
    file: File,
    /// Slots reclaimed by swap-ins or process teardown, ready for reuse.
    free_slots: Vec<usize>,
    /// High-water mark; the next slot when the free list is empty.
    slot_count: usize,
}

/// Allocates, frees, and transfers page-sized slots of the backing file.
///
/// Bookkeeping and I/O are serialized under one lock: no two swap transfers
/// run concurrently. Callers must hold the involved frame pinned; the swap
/// manager itself does not pin.
pub struct SwapSpace {
    state: Mutex<SwapState>,
    path: PathBuf,
}

impl SwapSpace {
    /// Create (or truncate) the backing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, VmError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| VmError::SwapCreate {
                path: path.display().to_string(),
                source,
            })?;
        info!("swap file created at {}", path.display());
        Ok(SwapSpace {
            state: Mutex::new(SwapState {
                file,
                free_slots: Vec::new(),
                slot_count: 0,
            }),
            path,
        })
    }

    /// Hand out a slot: a reclaimed one if any exist, else grow by one.
    /// Never fails; the backing store grows monotonically.
    pub fn allocate_slot(&self) -> usize {
        let mut state = self.state.lock();
        match state.free_slots.pop() {
            Some(slot) => slot,
            None => {
                let slot = state.slot_count;
                state.slot_count += 1;
                slot
            }
        }
    }

    /// Return a slot to the free list. Only valid once no page references it.
    pub fn free_slot(&self, slot: usize) {
        let mut state = self.state.lock();
        debug_assert!(slot < state.slot_count, "slot {slot} was never allocated");
        debug_assert!(!state.free_slots.contains(&slot), "slot {slot} freed twice");
        state.free_slots.push(slot);
    }

    /// Read one slot's worth of bytes into the given frame.
    pub fn read_slot(
        &self,
        slot: usize,
        memory: &PhysicalMemory,
        frame: usize,
    ) -> Result<usize, VmError> {
        let mut state = self.state.lock();
        debug!("swap in: slot {slot} -> frame {frame}");
        state
            .file
            .seek(SeekFrom::Start((slot * PAGE_SIZE) as u64))
            .map_err(|source| VmError::SwapIo { slot, source })?;
        memory
            .with_frame(frame, |buf| state.file.read_exact(buf))
            .map_err(|source| VmError::SwapIo { slot, source })?;
        Ok(PAGE_SIZE)
    }

    /// Write one frame's bytes into the given slot.
    pub fn write_slot(
        &self,
        slot: usize,
        memory: &PhysicalMemory,
        frame: usize,
    ) -> Result<usize, VmError> {
        let mut state = self.state.lock();
        debug!("swap out: frame {frame} -> slot {slot}");
        state
            .file
            .seek(SeekFrom::Start((slot * PAGE_SIZE) as u64))
            .map_err(|source| VmError::SwapIo { slot, source })?;
        memory
            .with_frame(frame, |buf| state.file.write_all(buf))
            .map_err(|source| VmError::SwapIo { slot, source })?;
        Ok(PAGE_SIZE)
    }

    /// Total slots ever allocated (the backing store's high-water mark).
    pub fn slot_count(&self) -> usize {
        self.state.lock().slot_count
    }

    pub fn free_slot_count(&self) -> usize {
        self.state.lock().free_slots.len()
    }

    /// Current backing-file length in bytes.
    pub fn file_len(&self) -> u64 {
        let state = self.state.lock();
        state.file.metadata().map(|m| m.len()).unwrap_or(0)
    }
}

impl Drop for SwapSpace {
    fn drop(&mut self) {
        // The file carries no cross-run state; remove it at shutdown.
        if fs::remove_file(&self.path).is_ok() {
            info!("swap file removed from {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_swap() -> (tempfile::TempDir, SwapSpace) {
        let dir = tempfile::tempdir().unwrap();
        let swap = SwapSpace::create(dir.path().join("swap")).unwrap();
        (dir, swap)
    }

    #[test]
    fn test_allocation_grows_by_one() {
        let (_dir, swap) = temp_swap();
        assert_eq!(swap.allocate_slot(), 0);
        assert_eq!(swap.allocate_slot(), 1);
        assert_eq!(swap.allocate_slot(), 2);
        assert_eq!(swap.slot_count(), 3);
    }

    #[test]
    fn test_freed_slot_reused_before_growth() {
        let (_dir, swap) = temp_swap();
        let a = swap.allocate_slot();
        let b = swap.allocate_slot();
        assert_ne!(a, b);

        swap.free_slot(a);
        assert_eq!(swap.free_slot_count(), 1);
        assert_eq!(swap.allocate_slot(), a);
        assert_eq!(swap.slot_count(), 2, "free slot reuse must not grow the store");
    }

    #[test]
    fn test_slot_round_trip() {
        let (_dir, swap) = temp_swap();
        let pm = PhysicalMemory::new(2);
        let pattern: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        pm.copy_in(0, 0, &pattern);

        let slot = swap.allocate_slot();
        assert_eq!(swap.write_slot(slot, &pm, 0).unwrap(), PAGE_SIZE);
        assert_eq!(swap.read_slot(slot, &pm, 1).unwrap(), PAGE_SIZE);

        let mut back = vec![0u8; PAGE_SIZE];
        pm.copy_out(1, 0, &mut back);
        assert_eq!(back, pattern);
    }

    #[test]
    fn test_slots_do_not_overlap() {
        let (_dir, swap) = temp_swap();
        let pm = PhysicalMemory::new(3);
        pm.copy_in(0, 0, &[0xaa; PAGE_SIZE]);
        pm.copy_in(1, 0, &[0xbb; PAGE_SIZE]);

        let s0 = swap.allocate_slot();
        let s1 = swap.allocate_slot();
        swap.write_slot(s0, &pm, 0).unwrap();
        swap.write_slot(s1, &pm, 1).unwrap();

        swap.read_slot(s0, &pm, 2).unwrap();
        let mut buf = [0u8; 4];
        pm.copy_out(2, 0, &mut buf);
        assert_eq!(buf, [0xaa; 4]);

        swap.read_slot(s1, &pm, 2).unwrap();
        pm.copy_out(2, 0, &mut buf);
        assert_eq!(buf, [0xbb; 4]);
    }

    #[test]
    fn test_file_length_tracks_written_slots() {
        let (_dir, swap) = temp_swap();
        let pm = PhysicalMemory::new(1);
        assert_eq!(swap.file_len(), 0);

        let s0 = swap.allocate_slot();
        swap.write_slot(s0, &pm, 0).unwrap();
        assert_eq!(swap.file_len(), PAGE_SIZE as u64);

        let s1 = swap.allocate_slot();
        swap.write_slot(s1, &pm, 0).unwrap();
        assert_eq!(swap.file_len(), 2 * PAGE_SIZE as u64);

        // Rewriting an existing slot does not grow the file.
        swap.write_slot(s0, &pm, 0).unwrap();
        assert_eq!(swap.file_len(), 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_backing_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swap");
        let swap = SwapSpace::create(&path).unwrap();
        assert!(path.exists());
        drop(swap);
        assert!(!path.exists());
    }
}
