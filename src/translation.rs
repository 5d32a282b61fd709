use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Where a virtual page's contents currently live.
///
/// A page is either resident in a physical frame, saved in a swap slot, or
/// has no backing at all (never loaded, or discarded clean at eviction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLocation {
    Resident(usize),
    Swapped(usize),
    Unbacked,
}

/// One virtual page's mapping record plus status bits.
///
/// The location is guarded by its own lock, held across the entire
/// invalidate/swap/relabel sequence during eviction so no other thread can
/// observe a half-transitioned entry. The `used` and `dirty` bits are
/// relaxed atomics: a stale read only costs eviction fairness, never
/// correctness.
pub struct TranslationEntry {
    vpn: usize,
    location: Mutex<PageLocation>,
    read_only: AtomicBool,
    used: AtomicBool,
    dirty: AtomicBool,
}

impl TranslationEntry {
    /// A fresh entry: unbacked, writable, untouched.
    pub fn new(vpn: usize) -> Self {
        TranslationEntry {
            vpn,
            location: Mutex::new(PageLocation::Unbacked),
            read_only: AtomicBool::new(false),
            used: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn vpn(&self) -> usize {
        self.vpn
    }

    /// Snapshot of the current location.
    pub fn location(&self) -> PageLocation {
        *self.location.lock()
    }

    pub fn is_resident(&self) -> bool {
        matches!(*self.location.lock(), PageLocation::Resident(_))
    }

    pub(crate) fn lock_location(&self) -> MutexGuard<'_, PageLocation> {
        self.location.lock()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    pub(crate) fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }

    pub fn mark_used(&self) {
        self.used.store(true, Ordering::Relaxed);
    }

    /// Clear the reference bit, returning its previous value. The clock scan
    /// uses this to grant a second chance.
    pub(crate) fn take_used(&self) -> bool {
        self.used.swap(false, Ordering::Relaxed)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for TranslationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationEntry")
            .field("vpn", &self.vpn)
            .field("location", &self.location())
            .field("read_only", &self.is_read_only())
            .field("used", &self.is_used())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
