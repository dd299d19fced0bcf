//! C ABI surface.
//!
//! `extern "C"` wrappers over the facade, using the classic sentinel
//! convention: null pointers for failed allocations, negative values for
//! failed node queries. [`MemorySpec`] is `repr(C)` and crosses the
//! boundary unchanged.

use std::ffi::c_void;
use std::ptr;

use crate::alloc;
use crate::multinode::MemorySpec;

/// Library version, `0x00000001` for the initial release.
#[no_mangle]
pub extern "C" fn tessera_version() -> u32 {
    alloc::version()
}

/// The system's ordinary-page allocation unit size.
#[no_mangle]
pub extern "C" fn tessera_allocation_unit_size() -> usize {
    alloc::allocation_unit_size()
}

/// Allocate a buffer entirely on one NUMA node.
///
/// Returns the base address, or null on a bad node or OS failure.
#[no_mangle]
pub extern "C" fn tessera_simple_alloc(size: usize, numa_node: u32) -> *mut c_void {
    match alloc::simple_alloc(size, numa_node) {
        Ok(addr) => addr.as_ptr().cast(),
        Err(err) => {
            tracing::debug!(size, numa_node, error = %err, "simple_alloc failed");
            ptr::null_mut()
        }
    }
}

/// Allocate a buffer on the calling thread's current NUMA node.
///
/// Returns the base address, or null when the current node is unknown or
/// the OS refuses.
#[no_mangle]
pub extern "C" fn tessera_simple_alloc_local(size: usize) -> *mut c_void {
    match alloc::simple_alloc_local(size) {
        Ok(addr) => addr.as_ptr().cast(),
        Err(err) => {
            tracing::debug!(size, error = %err, "simple_alloc_local failed");
            ptr::null_mut()
        }
    }
}

/// Allocate a multi-node array described piecewise by `specs`.
///
/// Returns the base of the virtually-contiguous range, or null on any
/// failure. Caller specs are read, never written.
///
/// # Safety
///
/// `specs` must point to `count` readable [`MemorySpec`] values.
#[no_mangle]
pub unsafe extern "C" fn tessera_multinode_alloc(
    count: u32,
    specs: *const MemorySpec,
) -> *mut c_void {
    if count == 0 || specs.is_null() {
        return ptr::null_mut();
    }

    let specs = std::slice::from_raw_parts(specs, count as usize);
    match alloc::multinode_alloc(specs) {
        Ok(addr) => addr.as_ptr().cast(),
        Err(err) => {
            tracing::debug!(count, error = %err, "multinode_alloc failed");
            ptr::null_mut()
        }
    }
}

/// Free an allocation made by this library. Null is a safe no-op.
///
/// # Safety
///
/// `ptr` must be null, a base address returned by this library, or a live
/// process-heap pointer; anything else is undefined behavior.
#[no_mangle]
pub unsafe extern "C" fn tessera_free(ptr: *mut c_void) {
    alloc::free(ptr.cast());
}

/// OS identifier of the NUMA node backing `addr`, or negative on error.
///
/// An unresident page is faulted in once and re-queried before the call
/// reports failure.
///
/// # Safety
///
/// `addr` must point into a live, writable allocation.
#[no_mangle]
pub unsafe extern "C" fn tessera_node_of(addr: *const c_void) -> i32 {
    if addr.is_null() {
        return -1;
    }
    match alloc::node_of(addr.cast()) {
        Ok(node) => i32::try_from(node).unwrap_or(-1),
        Err(err) => {
            tracing::debug!(error = %err, "node_of failed");
            -1
        }
    }
}
