//! Demand-paged virtual memory for a simulated machine: per-process page
//! tables, a shared inverted page table, clock eviction, and a file-backed
//! swap space. Address spaces move data in and out of simulated physical
//! memory through `read_virtual_memory`/`write_virtual_memory`, faulting
//! pages in on demand and pinning frames for the duration of each copy.

#![forbid(unsafe_code)]

pub mod clock;
pub mod constants;
pub mod ipt;
pub mod memory;
pub mod paging;
pub mod segment;
pub mod space;
pub mod swap;
pub mod translation;
pub mod vm_manager;

use thiserror::Error;

/// Failures surfaced by the fault path. The memory-access gateway never
/// propagates these to its caller; they become short transfer counts at
/// that boundary.
#[derive(Debug, Error)]
pub enum VmError {
    /// A swap-file read or write failed. Fatal for the in-progress fault.
    #[error("swap i/o failed at slot {slot}: {source}")]
    SwapIo {
        slot: usize,
        #[source]
        source: std::io::Error,
    },

    /// The swap backing file could not be created.
    #[error("failed to create swap file at {path}: {source}")]
    SwapCreate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Not enough free frames to satisfy an up-front allocation.
    #[error("not enough free frames: requested {requested}, only {available} free")]
    OutOfFrames { requested: usize, available: usize },
}

// Re-export commonly used items for convenience
pub use constants::{PAGE_SIZE, page_from_address};
pub use paging::PagedSpace;
pub use segment::{ProgramImage, SegmentInfo, SegmentSource};
pub use space::{DirectMapped, TranslationStrategy};
pub use translation::{PageLocation, TranslationEntry};
pub use vm_manager::{VmManager, VmStats};
