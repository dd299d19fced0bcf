//! # Tessera
//!
//! Topology-aware memory allocation for NUMA systems.
//!
//! Tessera hands out virtually-contiguous buffers whose backing physical
//! pages are pinned to specific NUMA nodes. Two shapes are offered:
//!
//! - **Single-node buffer**: the entire range is bound to one node.
//! - **Multi-node array**: distinct byte ranges within one contiguous
//!   virtual region are each bound to a caller-specified node, so hardware
//!   address translation alone routes accesses to node-local memory with no
//!   software indirection step.
//!
//! ```text
//!  virtual address space (one contiguous range)
//!  ┌───────────────┬───────────────┬───────────────┐
//!  │    piece 0    │    piece 1    │    piece 2    │
//!  └───────┬───────┴───────┬───────┴───────┬───────┘
//!          │               │               │
//!    ┌─────▼─────┐   ┌─────▼─────┐   ┌─────▼─────┐
//!    │  node 0   │   │  node 1   │   │  node 0   │
//!    │   DRAM    │   │   DRAM    │   │   DRAM    │
//!    └───────────┘   └───────────┘   └───────────┘
//! ```
//!
//! ## Platform Support
//!
//! | Platform | Strategy |
//! |----------|----------|
//! | Linux | `mmap` + `mbind`/`move_pages` syscalls, allocate-then-migrate |
//! | Windows | `VirtualAllocExNuma` hint-address commits, reserve-then-place |
//! | Other | Degraded single-node fallback via `std::alloc` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera::{MemorySpec, OwnedBuffer};
//!
//! // One contiguous array, first half on node 0, second half on node 1.
//! let buf = OwnedBuffer::multinode(&[
//!     MemorySpec { size: 1 << 20, numa_node: 0 },
//!     MemorySpec { size: 1 << 20, numa_node: 1 },
//! ])?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Raw OS memory management is the whole point of this crate.
#![allow(unsafe_code)]

pub mod alloc;
mod consume;
pub mod error;
pub mod ffi;
pub mod layout;
pub mod multinode;
mod os;
pub mod registry;
pub mod topology;

pub use alloc::{
    allocation_unit_size, free, multinode_alloc, multinode_alloc_with, node_of, pieces,
    simple_alloc, simple_alloc_local, version, OwnedBuffer,
};
pub use error::AllocError;
pub use multinode::{MemorySpec, MigrationPolicy};
pub use registry::PieceDescriptor;
pub use topology::{SystemTopology, TopologyOracle};

/// Library version constant reported by [`version`] and the C ABI.
pub const LIBRARY_VERSION: u32 = 0x0000_0001;

/// Result type for tessera operations.
pub type Result<T> = std::result::Result<T, AllocError>;
