//! Multi-node array engine.
//!
//! Builds one virtually-contiguous range whose physical backing splits
//! across NUMA nodes at caller-specified boundaries. Planning (node
//! resolution, rounding, shortfall coverage) is platform-independent and
//! pure; placement is family-specific and lives behind `cfg`.

use std::ptr::NonNull;

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
use smallvec::smallvec;

use crate::error::AllocError;
use crate::layout;
use crate::os;
use crate::registry::{self, AllocationRecord, PieceDescriptor};
use crate::topology::TopologyOracle;

/// Caller description of one piece of a multi-node array.
///
/// `repr(C)` so the same type crosses the C ABI unchanged. The allocator
/// never mutates caller-owned specs; rounded sizes are internal state,
/// inspectable afterwards through [`crate::alloc::pieces`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySpec {
    /// Requested size of the piece in bytes
    pub size: usize,
    /// Zero-based application index of the target NUMA node
    pub numa_node: u32,
}

/// What to do when an interior piece cannot be migrated to its node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MigrationPolicy {
    /// Keep the allocation; the affected piece stays on the origin node.
    /// The outcome is observable through [`crate::alloc::node_of`].
    #[default]
    BestEffort,
    /// Release the whole region and fail the call.
    Strict,
}

/// One planned piece: rounded size plus its resolved OS node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlannedPiece {
    pub size: usize,
    pub os_node: u32,
}

/// A validated, rounded placement plan. No OS resources are held yet.
#[derive(Debug)]
pub(crate) struct Plan {
    pub pieces: Vec<PlannedPiece>,
    pub total: usize,
    pub unit: usize,
    pub large: bool,
}

/// Resolve, round, and extend a request into a [`Plan`].
///
/// Fails with no side effects: every node resolves through the oracle
/// before any size math, and no OS call happens here. `unit_for` maps the
/// chosen page regime to an allocation unit (production passes
/// [`layout::granularity`]; tests pass a constant).
pub(crate) fn plan(
    specs: &[MemorySpec],
    oracle: &dyn TopologyOracle,
    unit_for: impl Fn(bool) -> usize,
) -> Result<Plan, AllocError> {
    if specs.is_empty() {
        return Err(AllocError::EmptyRequest);
    }

    let mut os_nodes = Vec::with_capacity(specs.len());
    for spec in specs {
        let os_node = oracle
            .os_node_for(spec.numa_node)
            .ok_or(AllocError::InvalidNode { index: spec.numa_node })?;
        os_nodes.push(os_node);
    }

    let total_requested: usize = specs.iter().map(|s| s.size).sum();
    let large = layout::auto_large_pages(total_requested);
    let unit = unit_for(large);

    let mut pieces: Vec<PlannedPiece> = specs
        .iter()
        .zip(os_nodes)
        .map(|(spec, os_node)| PlannedPiece {
            size: layout::round_to(spec.size, unit),
            os_node,
        })
        .collect();

    let mut total_actual: usize = pieces.iter().map(|p| p.size).sum();
    if total_actual == 0 {
        return Err(AllocError::ZeroEffectiveSize);
    }

    // Rounding may have truncated below the request; the final piece
    // absorbs the slack so no requested byte is unbacked.
    while total_actual < total_requested {
        if let Some(last) = pieces.last_mut() {
            last.size += unit;
        }
        total_actual += unit;
    }

    Ok(Plan { pieces, total: total_actual, unit, large })
}

/// Reserve-then-place: probe for a contiguous base, release, then commit
/// every piece at its predetermined hint address.
#[cfg(target_os = "windows")]
fn place(plan: &Plan, _policy: MigrationPolicy) -> Result<(NonNull<u8>, AllocationRecord), AllocError> {
    let probe_node = plan.pieces.first().map_or(0, |p| p.os_node);

    // The probe only secures a base address; it says nothing about
    // commit-time success on each node.
    let base = os::vm_alloc_at(plan.total, probe_node, std::ptr::null_mut(), false, plan.large)?;
    // SAFETY: releasing the probe reservation we just made.
    unsafe { os::free_piece(base.as_ptr(), plan.total) };

    let mut record = AllocationRecord::new();
    let mut cursor = base.as_ptr();

    for piece in &plan.pieces {
        match os::vm_alloc_at(piece.size, piece.os_node, cursor, true, plan.large) {
            Ok(addr) => {
                record.push(PieceDescriptor { addr: addr.as_ptr() as usize, size: piece.size });
                // SAFETY: cursor stays within the probed range.
                cursor = unsafe { cursor.add(piece.size) };
            }
            Err(err) => {
                // Another thread may have raced us to the hint range.
                release_record(&record);
                return Err(AllocError::AllocationFailed(err));
            }
        }
    }

    Ok((base, record))
}

/// Allocate-then-migrate: one region on the first piece's node, interior
/// pieces rebound in place.
#[cfg(target_os = "linux")]
fn place(plan: &Plan, policy: MigrationPolicy) -> Result<(NonNull<u8>, AllocationRecord), AllocError> {
    let first_node = plan.pieces.first().map_or(0, |p| p.os_node);
    let base = os::alloc_on_node(plan.total, first_node, plan.large)?;

    let mut record = AllocationRecord::new();
    let mut offset = 0usize;

    for (i, piece) in plan.pieces.iter().enumerate() {
        // SAFETY: offsets stay within the region allocated above.
        let addr = unsafe { base.as_ptr().add(offset) };

        if i > 0 {
            if let Err(err) = os::move_range_to_node(addr, piece.size, piece.os_node) {
                match policy {
                    MigrationPolicy::Strict => {
                        // SAFETY: releasing the whole region allocated above.
                        unsafe { os::free_piece(base.as_ptr(), plan.total) };
                        return Err(AllocError::MigrationFailed {
                            piece: i,
                            node: piece.os_node,
                            source: err,
                        });
                    }
                    MigrationPolicy::BestEffort => {
                        tracing::warn!(
                            piece = i,
                            node = piece.os_node,
                            error = %err,
                            "piece migration failed; memory stays on its origin node"
                        );
                    }
                }
            }
        }

        record.push(PieceDescriptor { addr: addr as usize, size: piece.size });
        offset += piece.size;
    }

    Ok((base, record))
}

/// Degraded placement: one region, no migration, recorded as a single
/// piece so the fallback allocator can release it whole.
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn place(plan: &Plan, _policy: MigrationPolicy) -> Result<(NonNull<u8>, AllocationRecord), AllocError> {
    let first_node = plan.pieces.first().map_or(0, |p| p.os_node);
    let base = os::alloc_on_node(plan.total, first_node, plan.large)?;

    let record: AllocationRecord =
        smallvec![PieceDescriptor { addr: base.as_ptr() as usize, size: plan.total }];
    Ok((base, record))
}

/// Release every piece of a partially- or fully-placed record.
pub(crate) fn release_record(record: &AllocationRecord) {
    for piece in record {
        // SAFETY: the record holds exactly the pieces the OS handed out.
        unsafe { os::free_piece(piece.addr as *mut u8, piece.size) };
    }
}

/// Full multi-node allocation: plan, place, register.
pub(crate) fn alloc_impl(
    specs: &[MemorySpec],
    oracle: &dyn TopologyOracle,
    policy: MigrationPolicy,
) -> Result<NonNull<u8>, AllocError> {
    let plan = plan(specs, oracle, layout::granularity)?;
    let (base, record) = place(&plan, policy)?;

    if let Err(err) = registry::global().submit(record.clone()) {
        // Unreachable while the OS hands out fresh ranges; unwind anyway.
        release_record(&record);
        return Err(err.into());
    }

    tracing::trace!(
        base = format_args!("{:#x}", base.as_ptr() as usize),
        pieces = record.len(),
        total = plan.total,
        large = plan.large,
        "multi-node array allocated"
    );
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: usize = 4096;
    const LARGE_UNIT: usize = 2 * 1024 * 1024;

    /// Oracle with `count` nodes, mapping application index `i` to the
    /// sparse OS id `10 + i`.
    struct SparseOracle {
        count: u32,
    }

    impl TopologyOracle for SparseOracle {
        fn os_node_for(&self, index: u32) -> Option<u32> {
            (index < self.count).then_some(10 + index)
        }

        fn current_os_node(&self) -> Option<u32> {
            Some(10)
        }

        fn num_nodes(&self) -> usize {
            self.count as usize
        }
    }

    fn units(large: bool) -> usize {
        if large {
            LARGE_UNIT
        } else {
            UNIT
        }
    }

    fn spec(size: usize, numa_node: u32) -> MemorySpec {
        MemorySpec { size, numa_node }
    }

    #[test]
    fn empty_request_is_rejected() {
        let oracle = SparseOracle { count: 2 };
        assert!(matches!(
            plan(&[], &oracle, units),
            Err(AllocError::EmptyRequest)
        ));
    }

    #[test]
    fn invalid_node_is_rejected_before_any_math() {
        let oracle = SparseOracle { count: 2 };
        let specs = [spec(4096, 0), spec(4096, 999)];
        assert!(matches!(
            plan(&specs, &oracle, units),
            Err(AllocError::InvalidNode { index: 999 })
        ));
    }

    #[test]
    fn all_pieces_rounding_to_zero_is_rejected() {
        let oracle = SparseOracle { count: 3 };
        let specs = [spec(1000, 0), spec(1000, 1), spec(1000, 2)];
        assert!(matches!(
            plan(&specs, &oracle, units),
            Err(AllocError::ZeroEffectiveSize)
        ));
    }

    #[test]
    fn half_unit_tie_rounds_up_with_no_extension() {
        let oracle = SparseOracle { count: 2 };
        // 2048 is exactly half the unit: rounds up to 4096. Total actual
        // 8192 already covers the 6144 requested, so no extension.
        let specs = [spec(4096, 0), spec(2048, 1)];
        let plan = plan(&specs, &oracle, units).unwrap();

        assert_eq!(plan.pieces[0], PlannedPiece { size: 4096, os_node: 10 });
        assert_eq!(plan.pieces[1], PlannedPiece { size: 4096, os_node: 11 });
        assert_eq!(plan.total, 8192);
        assert!(!plan.large);
    }

    #[test]
    fn final_piece_absorbs_rounding_shortfall() {
        let oracle = SparseOracle { count: 2 };
        // 6000 rounds down to 4096 and 100 rounds to zero; the final piece
        // is extended until the 6100 requested bytes are covered.
        let specs = [spec(6000, 0), spec(100, 1)];
        let plan = plan(&specs, &oracle, units).unwrap();

        assert_eq!(plan.pieces[0].size, 4096);
        assert_eq!(plan.pieces[1].size, 4096);
        assert_eq!(plan.total, 8192);
    }

    #[test]
    fn planned_total_covers_request() {
        let oracle = SparseOracle { count: 4 };
        let cases: &[&[MemorySpec]] = &[
            &[spec(1, 0)],
            &[spec(4096, 0), spec(2048, 1)],
            &[spec(6000, 0), spec(100, 1), spec(9000, 2)],
            &[spec(123_456, 3)],
        ];

        for specs in cases {
            let plan = plan(specs, &oracle, units).unwrap();
            let requested: usize = specs.iter().map(|s| s.size).sum();
            assert!(plan.total >= requested, "{specs:?}");
            assert_eq!(plan.total, plan.pieces.iter().map(|p| p.size).sum::<usize>());
            for piece in &plan.pieces {
                assert_eq!(piece.size % plan.unit, 0);
            }
        }
    }

    #[test]
    fn aggregate_request_switches_to_large_pages() {
        let oracle = SparseOracle { count: 2 };
        // Each spec is below the threshold; the aggregate crosses it.
        let specs = [spec(1_000_000, 0), spec(1_000_000, 1)];
        let plan = plan(&specs, &oracle, units).unwrap();

        assert!(plan.large);
        assert_eq!(plan.unit, LARGE_UNIT);
        for piece in &plan.pieces {
            assert_eq!(piece.size % LARGE_UNIT, 0);
        }
        assert!(plan.total >= 2_000_000);
    }

    #[test]
    fn resolved_os_nodes_follow_the_oracle() {
        let oracle = SparseOracle { count: 3 };
        let specs = [spec(4096, 2), spec(4096, 0)];
        let plan = plan(&specs, &oracle, units).unwrap();

        assert_eq!(plan.pieces[0].os_node, 12);
        assert_eq!(plan.pieces[1].os_node, 10);
    }

    #[test]
    fn alloc_impl_places_adjacent_registered_pieces() {
        struct LocalOracle;
        impl TopologyOracle for LocalOracle {
            fn os_node_for(&self, index: u32) -> Option<u32> {
                (index == 0).then_some(0)
            }
            fn current_os_node(&self) -> Option<u32> {
                Some(0)
            }
            fn num_nodes(&self) -> usize {
                1
            }
        }

        let specs = [spec(4096, 0), spec(4096, 0)];
        let base = alloc_impl(&specs, &LocalOracle, MigrationPolicy::BestEffort).unwrap();

        let record = registry::global().retrieve(base.as_ptr() as usize).unwrap();
        let mut expected = record[0].addr;
        for piece in &record {
            assert_eq!(piece.addr, expected);
            expected += piece.size;
        }
        assert!(record.iter().map(|p| p.size).sum::<usize>() >= 8192);

        // SAFETY: freeing the allocation made above.
        unsafe { crate::alloc::free(base.as_ptr()) };
        assert!(registry::global().retrieve(base.as_ptr() as usize).is_none());
    }
}
