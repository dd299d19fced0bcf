//! Fallback primitives for platforms without NUMA control.
//!
//! Everything is treated as a single node 0 backed by `std::alloc`. The
//! multi-node engine still produces a contiguous region; placement is
//! simply wherever the system allocator puts it.

use std::alloc::Layout;
use std::ffi::c_void;
use std::io;
use std::ptr::NonNull;

/// Fixed alignment for fallback allocations (one cache line).
pub(crate) const FALLBACK_ALIGN: usize = 64;

fn layout_for(size: usize) -> io::Result<Layout> {
    Layout::from_size_align(size, FALLBACK_ALIGN)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))
}

/// Allocation unit. There is no OS granularity to query here; ordinary
/// pages are assumed 4 KiB and large pages 2 MiB.
pub(crate) fn granularity(large: bool) -> usize {
    if large {
        2 * 1024 * 1024
    } else {
        4096
    }
}

/// Allocate `size` bytes. The node is accepted and ignored.
pub(crate) fn alloc_on_node(size: usize, os_node: u32, _large: bool) -> io::Result<NonNull<u8>> {
    let _ = os_node;
    let layout = layout_for(size)?;

    // SAFETY: layout has non-zero size; callers reject zero-byte requests.
    let addr = unsafe { std::alloc::alloc(layout) };
    NonNull::new(addr).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
}

/// Release one piece.
///
/// # Safety
///
/// `addr`/`size` must describe a live allocation produced by this module.
pub(crate) unsafe fn free_piece(addr: *mut u8, size: usize) {
    if let Ok(layout) = layout_for(size) {
        std::alloc::dealloc(addr, layout);
    }
}

/// Every address lives on the only node there is.
///
/// # Safety
///
/// Present for signature parity with the real platforms; the address is
/// never dereferenced.
pub(crate) unsafe fn node_of(_addr: *mut u8) -> io::Result<u32> {
    Ok(0)
}

/// Standard process-heap free, the fallback for pointers this library never
/// handed out.
///
/// # Safety
///
/// `ptr` must come from the process heap (`malloc` family) or be null.
pub(crate) unsafe fn heap_free(ptr: *mut c_void) {
    #[cfg(unix)]
    libc::free(ptr);
    #[cfg(not(unix))]
    let _ = ptr;
}
