//! Heap statistics from a counting global allocator.
//!
//! Binaries opt in with:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: telemon_collector::alloc::CountingAllocator =
//!     telemon_collector::alloc::CountingAllocator;
//! ```
//!
//! Without it every counter stays at zero.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

static HEAP_ALLOC: AtomicU64 = AtomicU64::new(0);
static PEAK_HEAP_ALLOC: AtomicU64 = AtomicU64::new(0);
static TOTAL_ALLOC: AtomicU64 = AtomicU64::new(0);
static MALLOCS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);
static REALLOCS: AtomicU64 = AtomicU64::new(0);

/// [`System`] allocator wrapper that counts allocations.
pub struct CountingAllocator;

fn record_alloc(size: usize) {
    let size = size as u64;
    let live = HEAP_ALLOC.fetch_add(size, Ordering::Relaxed) + size;
    PEAK_HEAP_ALLOC.fetch_max(live, Ordering::Relaxed);
    TOTAL_ALLOC.fetch_add(size, Ordering::Relaxed);
    MALLOCS.fetch_add(1, Ordering::Relaxed);
}

fn record_free(size: usize) {
    HEAP_ALLOC.fetch_sub(size as u64, Ordering::Relaxed);
    FREES.fetch_add(1, Ordering::Relaxed);
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            let old_size = layout.size() as u64;
            let new_size = new_size as u64;
            if new_size > old_size {
                let grown = new_size - old_size;
                let live = HEAP_ALLOC.fetch_add(grown, Ordering::Relaxed) + grown;
                PEAK_HEAP_ALLOC.fetch_max(live, Ordering::Relaxed);
                TOTAL_ALLOC.fetch_add(grown, Ordering::Relaxed);
            } else {
                HEAP_ALLOC.fetch_sub(old_size - new_size, Ordering::Relaxed);
            }
            REALLOCS.fetch_add(1, Ordering::Relaxed);
        }
        new_ptr
    }
}

/// Point-in-time copy of the allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Bytes currently allocated.
    pub heap_alloc: u64,
    pub peak_heap_alloc: u64,
    /// Cumulative bytes allocated, never decreases.
    pub total_alloc: u64,
    pub mallocs: u64,
    pub frees: u64,
    pub reallocs: u64,
}

impl AllocStats {
    /// Live allocations.
    pub fn heap_objects(&self) -> u64 {
        self.mallocs.saturating_sub(self.frees)
    }
}

pub fn stats() -> AllocStats {
    AllocStats {
        heap_alloc: HEAP_ALLOC.load(Ordering::Relaxed),
        peak_heap_alloc: PEAK_HEAP_ALLOC.load(Ordering::Relaxed),
        total_alloc: TOTAL_ALLOC.load(Ordering::Relaxed),
        mallocs: MALLOCS.load(Ordering::Relaxed),
        frees: FREES.load(Ordering::Relaxed),
        reallocs: REALLOCS.load(Ordering::Relaxed),
    }
}
