//! Error types for allocation and registry operations.

/// Errors that can occur during topology-aware allocation.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// The caller supplied a NUMA node index the topology cannot resolve.
    #[error("invalid NUMA node index {index}")]
    InvalidNode {
        /// The application-visible node index that failed to resolve
        index: u32,
    },

    /// The calling thread's current NUMA node could not be determined.
    #[error("current NUMA node could not be determined")]
    UnknownCurrentNode,

    /// Zero bytes or zero pieces were requested.
    #[error("empty allocation request")]
    EmptyRequest,

    /// Every piece of a multi-node request rounded down to zero bytes.
    #[error("every piece rounded to zero bytes at the current granularity")]
    ZeroEffectiveSize,

    /// The operating system refused an allocation.
    #[error("OS allocation failed: {0}")]
    AllocationFailed(#[from] std::io::Error),

    /// Migrating a piece to its target node failed under strict policy.
    #[error("migration of piece {piece} to OS node {node} failed: {source}")]
    MigrationFailed {
        /// Index of the piece whose migration failed
        piece: usize,
        /// OS node the piece was being moved to
        node: u32,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// The registry already holds a live allocation at this base address.
    #[error("allocation base {base:#x} already registered")]
    DuplicateBase {
        /// The colliding base address
        base: usize,
    },

    /// The OS could not report a NUMA node for the queried address.
    #[error("NUMA node query failed: {0}")]
    NodeQueryFailed(std::io::Error),
}

/// Errors returned by the allocation registry itself.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A record with no pieces was submitted.
    #[error("allocation record has no pieces")]
    EmptyRecord,

    /// The base address is already present in the registry.
    #[error("allocation base {base:#x} already registered")]
    DuplicateBase {
        /// The colliding base address
        base: usize,
    },
}

impl From<RegistryError> for AllocError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::EmptyRecord => AllocError::EmptyRequest,
            RegistryError::DuplicateBase { base } => AllocError::DuplicateBase { base },
        }
    }
}
