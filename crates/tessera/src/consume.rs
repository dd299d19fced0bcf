//! Forced-fault helper.
//!
//! Querying the backing node of a page that has never been touched reports
//! "not resident" on some platforms. The volatile read-then-write here pages
//! the address in so the query can be retried; volatile keeps the compiler
//! from eliding either access.

use std::ptr;

/// Fault one byte into residency.
///
/// # Safety
///
/// `addr` must point into a live, writable allocation.
pub(crate) unsafe fn fault_in(addr: *mut u8) {
    let byte = ptr::read_volatile(addr);
    ptr::write_volatile(addr, byte);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_in_preserves_contents() {
        let mut buf = [0xA5u8; 8];
        unsafe { fault_in(buf.as_mut_ptr()) };
        assert_eq!(buf, [0xA5u8; 8]);
    }
}
