use parking_lot::Mutex;

use crate::constants::*;

/// Simulated physical memory: a flat run of fixed-size frames.
///
/// Each frame carries its own lock so copies targeting different frames can
/// proceed concurrently. Callers must hold the frame pinned (see `Ipt`) for
/// the duration of any access, which keeps eviction from racing a live copy.
pub struct PhysicalMemory {
    frames: Vec<Mutex<Box<[u8]>>>,
}

impl PhysicalMemory {
    /// Create `num_frames` zero-filled frames.
    pub fn new(num_frames: usize) -> Self {
        let frames = (0..num_frames)
            .map(|_| Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
            .collect();
        PhysicalMemory { frames }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Copy bytes out of a frame, starting at `offset`.
    pub fn copy_out(&self, frame: usize, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= PAGE_SIZE, "read past frame end");
        let data = self.frames[frame].lock();
        dst.copy_from_slice(&data[offset..offset + dst.len()]);
    }

    /// Copy bytes into a frame, starting at `offset`.
    pub fn copy_in(&self, frame: usize, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= PAGE_SIZE, "write past frame end");
        let mut data = self.frames[frame].lock();
        data[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Zero-fill an entire frame.
    pub fn zero_frame(&self, frame: usize) {
        self.frames[frame].lock().fill(0);
    }

    /// Run `f` with exclusive access to a frame's bytes. Used by the swap
    /// manager and segment loaders for whole-frame transfers.
    pub(crate) fn with_frame<R>(&self, frame: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.frames[frame].lock();
        f(&mut data)
    }
}

/// The global free-frame pool. Frames start here and return here when an
/// address space is torn down.
pub struct FreeFrameList {
    free: Mutex<Vec<usize>>,
}

impl FreeFrameList {
    /// All `num_frames` frames start free.
    pub fn new(num_frames: usize) -> Self {
        FreeFrameList {
            free: Mutex::new((0..num_frames).rev().collect()),
        }
    }

    /// Take a frame from the pool, if any remain.
    pub fn acquire(&self) -> Option<usize> {
        self.free.lock().pop()
    }

    /// Return a frame to the pool.
    pub fn release(&self, frame: usize) {
        let mut free = self.free.lock();
        debug_assert!(!free.contains(&frame), "frame {frame} released twice");
        free.push(frame);
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }
}
