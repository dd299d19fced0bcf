//! Linux memory primitives: the allocate-then-migrate family.
//!
//! Uses raw `mmap` + `mbind`/`move_pages` syscalls directly instead of
//! depending on libnuma. Node binding is best-effort at this layer; callers
//! that need strict placement check [`move_range_to_node`] themselves.

use std::io;
use std::ptr::{self, NonNull};

use crate::consume;

// Memory policy constants from <numaif.h>.
const MPOL_BIND: i32 = 2;
const MPOL_MF_MOVE: u32 = 2;
// Width of the nodemask passed to mbind; node ids above this are rejected.
const MAX_NODES: usize = 64;

/// Allocation unit: the page size, or the huge-page size in large mode.
pub(crate) fn granularity(large: bool) -> usize {
    // SAFETY: sysconf has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    #[allow(clippy::cast_sign_loss)]
    let page = if page > 0 { page as usize } else { 4096 };

    if large {
        page.max(huge_page_size())
    } else {
        page
    }
}

/// Transparent-hugepage promotion size, with /proc/meminfo and a 2 MiB
/// constant as fallbacks.
fn huge_page_size() -> usize {
    if let Ok(s) = std::fs::read_to_string("/sys/kernel/mm/transparent_hugepage/hpage_pmd_size") {
        if let Ok(bytes) = s.trim().parse::<usize>() {
            if bytes > 0 {
                return bytes;
            }
        }
    }

    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("Hugepagesize:") {
                let kb = rest.trim().trim_end_matches("kB").trim();
                if let Ok(kb) = kb.parse::<usize>() {
                    if kb > 0 {
                        return kb * 1024;
                    }
                }
            }
        }
    }

    2 * 1024 * 1024
}

/// Allocate `size` bytes bound to `os_node`.
///
/// Binding failure is non-fatal: on kernels without NUMA support the region
/// stays wherever the first fault lands, which is the only node there is.
pub(crate) fn alloc_on_node(size: usize, os_node: u32, large: bool) -> io::Result<NonNull<u8>> {
    // SAFETY: anonymous private mapping with no fixed address.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    let addr = addr.cast::<u8>();

    if large {
        advise_hugepage(addr, size);
    }

    if let Err(err) = move_range_to_node(addr, size, os_node) {
        if err.raw_os_error() != Some(libc::ENOSYS) {
            tracing::warn!(node = os_node, error = %err, "mbind failed (non-fatal)");
        }
    }

    NonNull::new(addr).ok_or_else(io::Error::last_os_error)
}

/// Bind `[addr, addr + size)` to `os_node`, migrating already-faulted pages.
pub(crate) fn move_range_to_node(addr: *mut u8, size: usize, os_node: u32) -> io::Result<()> {
    if os_node as usize >= MAX_NODES {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    let nodemask: u64 = 1u64 << os_node;

    // SAFETY: mbind on a range this process mapped, with a valid nodemask.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            addr,
            size,
            MPOL_BIND,
            &raw const nodemask,
            MAX_NODES,
            MPOL_MF_MOVE,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Request transparent huge-page backing for a range. Advisory only.
pub(crate) fn advise_hugepage(addr: *mut u8, size: usize) {
    // SAFETY: MADV_HUGEPAGE is a hint on a range this process mapped.
    unsafe {
        libc::madvise(addr.cast(), size, libc::MADV_HUGEPAGE);
    }
}

/// Release one piece.
///
/// # Safety
///
/// `addr`/`size` must describe a live mapping produced by this module.
pub(crate) unsafe fn free_piece(addr: *mut u8, size: usize) {
    libc::munmap(addr.cast(), size);
}

/// OS node currently backing `addr`.
///
/// A page that has never been faulted reports `-ENOENT` (older kernels:
/// `-EFAULT`); one forced-fault retry pages it in before giving up.
///
/// # Safety
///
/// `addr` must point into a live, writable allocation.
pub(crate) unsafe fn node_of(addr: *mut u8) -> io::Result<u32> {
    let status = query_node(addr)?;
    if status >= 0 {
        #[allow(clippy::cast_sign_loss)]
        return Ok(status as u32);
    }

    if status == -libc::ENOENT || status == -libc::EFAULT {
        consume::fault_in(addr);
        let status = query_node(addr)?;
        if status >= 0 {
            #[allow(clippy::cast_sign_loss)]
            return Ok(status as u32);
        }
        return Err(io::Error::from_raw_os_error(-status));
    }

    Err(io::Error::from_raw_os_error(-status))
}

/// `move_pages` in query mode: null target array, per-page status out.
fn query_node(addr: *mut u8) -> io::Result<i32> {
    let mut status: i32 = -1;
    let page: *mut libc::c_void = addr.cast();

    // SAFETY: single-page query against this process, status is a valid out
    // pointer.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_move_pages,
            0i32,
            1usize,
            &raw const page,
            ptr::null::<i32>(),
            &raw mut status,
            0i32,
        )
    };

    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(status)
}

/// Standard process-heap free, the fallback for pointers this library never
/// handed out.
///
/// # Safety
///
/// `ptr` must come from the process heap (`malloc` family) or be null.
pub(crate) unsafe fn heap_free(ptr: *mut libc::c_void) {
    libc::free(ptr);
}
