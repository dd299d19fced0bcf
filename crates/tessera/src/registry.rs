//! Allocation registry.
//!
//! Thread-safe mapping from an allocation's base address to the ordered
//! pieces that back it. Every address handed out by the facade lives here
//! until the matching free. A single mutex over a flat hash map is enough:
//! only alloc and free touch the registry, and neither is hot-path work.
//! The guard is held for map manipulation only, never across OS calls.

use std::sync::OnceLock;

use fxhash::FxHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::RegistryError;

/// One node-homogeneous piece of an allocation.
///
/// Addresses are stored as `usize` so records can cross thread boundaries;
/// they are only ever turned back into pointers by the free path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceDescriptor {
    /// Virtual address of the piece
    pub addr: usize,
    /// Size of the piece in bytes, after rounding
    pub size: usize,
}

/// Ordered pieces of one allocation. Single-node buffers hold one entry.
pub type AllocationRecord = SmallVec<[PieceDescriptor; 2]>;

/// Thread-safe base-address → piece-list mapping.
#[derive(Debug, Default)]
pub struct AllocationRegistry {
    map: Mutex<FxHashMap<usize, AllocationRecord>>,
}

impl AllocationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation keyed by its first piece's address.
    ///
    /// # Errors
    ///
    /// Rejects an empty record, and rejects a base address that is already
    /// live in the registry.
    pub fn submit(&self, record: AllocationRecord) -> Result<(), RegistryError> {
        let base = record.first().ok_or(RegistryError::EmptyRecord)?.addr;

        let mut map = self.map.lock();
        if map.contains_key(&base) {
            return Err(RegistryError::DuplicateBase { base });
        }
        map.insert(base, record);
        Ok(())
    }

    /// Look up the record for `base`, returning a snapshot copy.
    #[must_use]
    pub fn retrieve(&self, base: usize) -> Option<AllocationRecord> {
        self.map.lock().get(&base).cloned()
    }

    /// Remove and return the record for `base`.
    ///
    /// Removal is atomic with the lookup, so two racing frees of the same
    /// pointer hand the pieces to at most one caller. Absent keys are a
    /// no-op returning `None`.
    pub fn erase(&self, base: usize) -> Option<AllocationRecord> {
        self.map.lock().remove(&base)
    }

    /// Number of live allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether the registry holds no live allocations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

/// Process-wide registry instance, lazily initialized.
pub(crate) fn global() -> &'static AllocationRegistry {
    static REGISTRY: OnceLock<AllocationRegistry> = OnceLock::new();
    REGISTRY.get_or_init(AllocationRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn record(addr: usize, size: usize) -> AllocationRecord {
        smallvec![PieceDescriptor { addr, size }]
    }

    #[test]
    fn submit_retrieve_erase() {
        let registry = AllocationRegistry::new();

        registry.submit(record(0x1000, 4096)).unwrap();
        let rec = registry.retrieve(0x1000).unwrap();
        assert_eq!(rec.len(), 1);
        assert_eq!(rec[0], PieceDescriptor { addr: 0x1000, size: 4096 });

        let taken = registry.erase(0x1000).unwrap();
        assert_eq!(taken[0].addr, 0x1000);
        assert!(registry.retrieve(0x1000).is_none());
    }

    #[test]
    fn submit_rejects_empty_record() {
        let registry = AllocationRegistry::new();
        let err = registry.submit(AllocationRecord::new()).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyRecord));
    }

    #[test]
    fn submit_rejects_duplicate_base() {
        let registry = AllocationRegistry::new();
        registry.submit(record(0x2000, 4096)).unwrap();

        let err = registry.submit(record(0x2000, 8192)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateBase { base: 0x2000 }));

        // Original record is untouched.
        assert_eq!(registry.retrieve(0x2000).unwrap()[0].size, 4096);
    }

    #[test]
    fn erase_absent_is_noop() {
        let registry = AllocationRegistry::new();
        assert!(registry.erase(0xdead_0000).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn multi_piece_record_keyed_by_first() {
        let registry = AllocationRegistry::new();
        let rec: AllocationRecord = smallvec![
            PieceDescriptor { addr: 0x4000, size: 4096 },
            PieceDescriptor { addr: 0x5000, size: 4096 },
        ];
        registry.submit(rec).unwrap();

        assert!(registry.retrieve(0x4000).is_some());
        // Interior piece addresses are not keys.
        assert!(registry.retrieve(0x5000).is_none());
    }

    #[test]
    fn concurrent_submit_is_unique_per_base() {
        use std::sync::Arc;

        let registry = Arc::new(AllocationRegistry::new());
        let mut handles = Vec::new();

        for thread in 0..8usize {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for i in 0..100usize {
                    let addr = 0x10_0000 + (thread * 100 + i) * 4096;
                    registry.submit(record(addr, 4096)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 800);
    }

    #[test]
    fn concurrent_erase_hands_record_to_one_caller() {
        use std::sync::Arc;

        let registry = Arc::new(AllocationRegistry::new());
        registry.submit(record(0x8000, 4096)).unwrap();

        let winners: usize = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || usize::from(registry.erase(0x8000).is_some()))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();

        assert_eq!(winners, 1);
    }
}
