//! Platform memory primitives.
//!
//! Two allocation families hide behind one surface, selected at compile
//! time:
//!
//! - **Reserve-then-place** (Windows): a probe reservation secures a
//!   contiguous base address, then each piece is committed at its
//!   predetermined hint address on its target node.
//! - **Allocate-then-migrate** (Linux): one region is allocated on the
//!   first piece's node and interior ranges are rebound to their targets.
//!
//! Platforms with neither capability fall back to `std::alloc` with
//! single-node semantics.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub(crate) use linux::*;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub(crate) use windows::*;

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
mod portable;
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
pub(crate) use portable::*;
