//! Public allocator facade.
//!
//! Thin orchestration over the topology oracle, the OS primitives, and the
//! allocation registry. All operations may be called from parallel threads;
//! the registry mutex is the only library-held lock and is never held
//! across an OS call.

use std::ptr::NonNull;

use smallvec::smallvec;

use crate::error::AllocError;
use crate::layout;
use crate::multinode::{self, MemorySpec, MigrationPolicy};
use crate::os;
use crate::registry::{self, AllocationRecord, PieceDescriptor};
use crate::topology::{self, TopologyOracle};
use crate::Result;

/// Library version constant, `0x0000_0001` for the initial release.
#[must_use]
pub fn version() -> u32 {
    crate::LIBRARY_VERSION
}

/// The system's ordinary-page allocation unit size.
#[must_use]
pub fn allocation_unit_size() -> usize {
    layout::granularity(false)
}

/// Allocate a buffer entirely on one NUMA node.
///
/// The size is passed to the OS as-is; the physical extent is still at
/// least a page. The node index is the application-visible one, resolved
/// through the system topology.
///
/// # Errors
///
/// Fails on a zero size, an unresolvable node, or OS refusal.
pub fn simple_alloc(size: usize, node: u32) -> Result<NonNull<u8>> {
    simple_alloc_on(topology::system(), size, node)
}

/// Allocate a buffer on the calling thread's current NUMA node.
///
/// # Errors
///
/// Fails on a zero size, an undeterminable current node, or OS refusal.
pub fn simple_alloc_local(size: usize) -> Result<NonNull<u8>> {
    simple_alloc_local_on(topology::system(), size)
}

/// Allocate a multi-node array with the default best-effort migration
/// policy.
///
/// On success the returned pointer addresses a virtually-contiguous range
/// whose pieces are bound to the nodes named in `specs`, in order. Caller
/// specs are never mutated; rounded piece sizes are inspectable through
/// [`pieces`].
///
/// # Errors
///
/// Fails per the multi-node contract: empty spec list, unresolvable node
/// (before any OS call), every piece rounding to zero, or OS refusal.
pub fn multinode_alloc(specs: &[MemorySpec]) -> Result<NonNull<u8>> {
    multinode_alloc_with(specs, MigrationPolicy::default())
}

/// [`multinode_alloc`] with an explicit migration policy.
///
/// # Errors
///
/// As [`multinode_alloc`]; additionally, under
/// [`MigrationPolicy::Strict`] an interior migration failure releases the
/// region and fails the call.
pub fn multinode_alloc_with(
    specs: &[MemorySpec],
    policy: MigrationPolicy,
) -> Result<NonNull<u8>> {
    multinode::alloc_impl(specs, topology::system(), policy)
}

/// Free an allocation made by this library.
///
/// Null is a safe no-op. A pointer this library never handed out falls
/// through to the standard process-heap free.
///
/// # Safety
///
/// `ptr` must be null, a live base address returned by this library, or a
/// live pointer from the process heap. Anything else is undefined
/// behavior, as is freeing the same pointer twice concurrently with its
/// reuse.
pub unsafe fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }

    match registry::global().erase(ptr as usize) {
        Some(record) => {
            for piece in &record {
                os::free_piece(piece.addr as *mut u8, piece.size);
            }
            tracing::trace!(
                base = format_args!("{:#x}", ptr as usize),
                pieces = record.len(),
                "allocation freed"
            );
        }
        None => os::heap_free(ptr.cast()),
    }
}

/// OS identifier of the NUMA node backing `addr`.
///
/// An unresident page is faulted in once and re-queried before the call
/// gives up.
///
/// # Errors
///
/// Fails when the OS cannot attribute the address to a node.
///
/// # Safety
///
/// `addr` must point into a live, writable allocation.
pub unsafe fn node_of(addr: *const u8) -> Result<u32> {
    os::node_of(addr.cast_mut()).map_err(AllocError::NodeQueryFailed)
}

/// Snapshot of the pieces backing a live allocation, for inspection.
///
/// Returns `None` for addresses this library does not track. Offsets into
/// the array are the running sums of the returned sizes.
#[must_use]
pub fn pieces(ptr: *const u8) -> Option<Vec<PieceDescriptor>> {
    registry::global()
        .retrieve(ptr as usize)
        .map(|record| record.to_vec())
}

fn register_single(addr: NonNull<u8>, size: usize) -> Result<NonNull<u8>> {
    let record: AllocationRecord =
        smallvec![PieceDescriptor { addr: addr.as_ptr() as usize, size }];

    if let Err(err) = registry::global().submit(record) {
        // SAFETY: releasing the piece allocated by our caller.
        unsafe { os::free_piece(addr.as_ptr(), size) };
        return Err(err.into());
    }

    tracing::trace!(
        base = format_args!("{:#x}", addr.as_ptr() as usize),
        size,
        "single-node buffer allocated"
    );
    Ok(addr)
}

fn alloc_on_os_node(os_node: u32, size: usize) -> Result<NonNull<u8>> {
    if size == 0 {
        return Err(AllocError::EmptyRequest);
    }
    let large = layout::auto_large_pages(size);
    let addr = os::alloc_on_node(size, os_node, large)?;
    register_single(addr, size)
}

fn simple_alloc_on(oracle: &dyn TopologyOracle, size: usize, node: u32) -> Result<NonNull<u8>> {
    let os_node = oracle
        .os_node_for(node)
        .ok_or(AllocError::InvalidNode { index: node })?;
    alloc_on_os_node(os_node, size)
}

fn simple_alloc_local_on(oracle: &dyn TopologyOracle, size: usize) -> Result<NonNull<u8>> {
    let os_node = oracle.current_os_node().ok_or(AllocError::UnknownCurrentNode)?;
    alloc_on_os_node(os_node, size)
}

/// A buffer that frees itself on drop.
///
/// Owns the base address of a single-node or multi-node allocation made
/// through the facade. `len` is the actual backed extent, which for
/// multi-node arrays includes rounding and shortfall coverage.
#[derive(Debug)]
pub struct OwnedBuffer {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer is exclusively owned plain memory.
unsafe impl Send for OwnedBuffer {}

impl OwnedBuffer {
    /// Allocate `size` bytes on `node`.
    ///
    /// # Errors
    ///
    /// As [`simple_alloc`].
    pub fn on_node(size: usize, node: u32) -> Result<Self> {
        let base = simple_alloc(size, node)?;
        Ok(Self { base, len: size })
    }

    /// Allocate `size` bytes on the calling thread's current node.
    ///
    /// # Errors
    ///
    /// As [`simple_alloc_local`].
    pub fn local(size: usize) -> Result<Self> {
        let base = simple_alloc_local(size)?;
        Ok(Self { base, len: size })
    }

    /// Allocate a multi-node array.
    ///
    /// # Errors
    ///
    /// As [`multinode_alloc`].
    pub fn multinode(specs: &[MemorySpec]) -> Result<Self> {
        let base = multinode_alloc(specs)?;
        let len = pieces(base.as_ptr())
            .map_or(0, |pieces| pieces.iter().map(|p| p.size).sum());
        Ok(Self { base, len })
    }

    /// Base address of the buffer.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Mutable base address of the buffer.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Backed extent in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer has zero length. Live buffers never do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the buffer as a byte slice.
    ///
    /// # Safety
    ///
    /// The range must have been initialized.
    #[must_use]
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.base.as_ptr(), self.len)
    }

    /// View the buffer as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The range must have been initialized.
    #[must_use]
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len)
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        // SAFETY: base came from the facade and is freed exactly once.
        unsafe { free(self.base.as_ptr()) };
    }
}
