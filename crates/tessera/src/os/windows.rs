//! Windows memory primitives: the reserve-then-place family.
//!
//! `VirtualAllocExNuma` accepts both a hint address and a target node, so a
//! contiguous multi-node range is built by reserving once for the base
//! address, releasing, and committing each piece at its predetermined
//! offset.

use std::ffi::c_void;
use std::io;
use std::ptr::{self, NonNull};

use ::windows::Win32::System::Memory::{
    GetLargePageMinimum, GetProcessHeap, HeapFree, VirtualAllocExNuma, VirtualFreeEx, HEAP_FLAGS,
    MEM_COMMIT, MEM_LARGE_PAGES, MEM_RELEASE, MEM_RESERVE,
    PAGE_READWRITE,
};
use ::windows::Win32::System::ProcessStatus::{
    QueryWorkingSetEx, PSAPI_WORKING_SET_EX_INFORMATION,
};
use ::windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use ::windows::Win32::System::Threading::GetCurrentProcess;

use crate::consume;

// PSAPI_WORKING_SET_EX_BLOCK bitfield layout.
const WS_VALID_BIT: usize = 1;
const WS_NODE_SHIFT: usize = 16;
const WS_NODE_MASK: usize = 0x3F;

/// Allocation unit: the largest of the virtual-allocation granularity, the
/// page size, and (in large mode) the large-page minimum.
pub(crate) fn granularity(large: bool) -> usize {
    let mut info = SYSTEM_INFO::default();
    // SAFETY: out-pointer call with a valid local.
    unsafe { GetSystemInfo(&mut info) };

    let mut unit = info.dwAllocationGranularity.max(info.dwPageSize) as usize;
    if large {
        // SAFETY: no preconditions; returns 0 when large pages are
        // unavailable.
        let minimum = unsafe { GetLargePageMinimum() };
        unit = unit.max(minimum);
    }
    unit
}

/// Allocate at a caller-chosen address.
///
/// `hint` may be null for an OS-chosen address. `commit = false` only
/// reserves address space, which is how the multi-node engine probes for a
/// viable base.
pub(crate) fn vm_alloc_at(
    size: usize,
    os_node: u32,
    hint: *mut u8,
    commit: bool,
    large: bool,
) -> io::Result<NonNull<u8>> {
    let mut flags = MEM_RESERVE;
    if commit {
        flags |= MEM_COMMIT;
    }
    if large {
        flags |= MEM_LARGE_PAGES;
    }

    let hint = if hint.is_null() {
        None
    } else {
        Some(hint.cast::<c_void>().cast_const())
    };

    // SAFETY: allocation in our own process; the OS validates the hint.
    let addr = unsafe {
        VirtualAllocExNuma(GetCurrentProcess(), hint, size, flags, PAGE_READWRITE, os_node)
    };

    NonNull::new(addr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
}

/// Allocate `size` committed bytes on `os_node` at an OS-chosen address.
pub(crate) fn alloc_on_node(size: usize, os_node: u32, large: bool) -> io::Result<NonNull<u8>> {
    vm_alloc_at(size, os_node, ptr::null_mut(), true, large)
}

/// Release one piece. `MEM_RELEASE` requires size zero.
///
/// # Safety
///
/// `addr` must be the base of a live region produced by this module.
pub(crate) unsafe fn free_piece(addr: *mut u8, _size: usize) {
    let _ = VirtualFreeEx(GetCurrentProcess(), addr.cast(), 0, MEM_RELEASE);
}

/// OS node currently backing `addr`.
///
/// A never-faulted page reports "not resident"; one forced-fault retry
/// pages it in before giving up.
///
/// # Safety
///
/// `addr` must point into a live, writable allocation.
pub(crate) unsafe fn node_of(addr: *mut u8) -> io::Result<u32> {
    if let Some(node) = query_node(addr)? {
        return Ok(node);
    }

    consume::fault_in(addr);
    query_node(addr)?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "page not resident after forced fault")
    })
}

/// Working-set query; `None` means the page is not resident.
fn query_node(addr: *mut u8) -> io::Result<Option<u32>> {
    let mut info = PSAPI_WORKING_SET_EX_INFORMATION {
        VirtualAddress: addr.cast(),
        ..Default::default()
    };

    // SAFETY: single-element query against our own process.
    unsafe {
        QueryWorkingSetEx(
            GetCurrentProcess(),
            (&raw mut info).cast(),
            std::mem::size_of::<PSAPI_WORKING_SET_EX_INFORMATION>() as u32,
        )
        .map_err(io::Error::other)?;
    }

    // SAFETY: Flags is the raw view of the attribute union.
    let flags = unsafe { info.VirtualAttributes.Flags };
    if flags & WS_VALID_BIT == 0 {
        return Ok(None);
    }

    #[allow(clippy::cast_possible_truncation)]
    Ok(Some(((flags >> WS_NODE_SHIFT) & WS_NODE_MASK) as u32))
}

/// Standard process-heap free, the fallback for pointers this library never
/// handed out.
///
/// # Safety
///
/// `ptr` must come from the process heap or be null.
pub(crate) unsafe fn heap_free(ptr: *mut c_void) {
    if let Ok(heap) = GetProcessHeap() {
        let _ = HeapFree(heap, HEAP_FLAGS(0), Some(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granularity_is_positive() {
        assert!(granularity(false) >= 4096);
        assert!(granularity(true) >= granularity(false));
    }

    #[test]
    fn alloc_write_query_free() {
        let addr = alloc_on_node(8192, 0, false).unwrap();
        unsafe {
            addr.as_ptr().write(0x5A);
            let _ = node_of(addr.as_ptr()).unwrap();
            free_piece(addr.as_ptr(), 8192);
        }
    }

    #[test]
    fn reserve_then_commit_at_hint() {
        let total = granularity(false) * 2;
        let probe = vm_alloc_at(total, 0, ptr::null_mut(), false, false).unwrap();
        unsafe { free_piece(probe.as_ptr(), total) };

        let committed = vm_alloc_at(total, 0, probe.as_ptr(), true, false).unwrap();
        assert_eq!(committed.as_ptr(), probe.as_ptr());
        unsafe { free_piece(committed.as_ptr(), total) };
    }
}
