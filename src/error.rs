//! Error types for the communication layer and the sorter.

use crate::comm::Tag;

/// Failures of a collective or point-to-point operation.
///
/// `ScatterOverflow`, `CountMismatch` and `TypeMismatch` are protocol
/// violations: the rank that detects one aborts the whole group before
/// returning it, and the remaining ranks observe `Aborted`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CommError {
    /// The root was asked to scatter more elements than it holds.
    #[error("values array has {available} items but {requested} were requested")]
    ScatterOverflow { requested: usize, available: usize },

    /// A rank received a different element count than the collective announced.
    #[error("expected {expected} elements, received {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// A message matched on (source, tag) carried a payload of another type.
    #[error("payload from rank {sender} with tag {tag} has an unexpected type")]
    TypeMismatch { sender: usize, tag: Tag },

    /// A rank outside the communicator was addressed.
    #[error("rank {rank} is outside a communicator of size {size}")]
    InvalidRank { rank: usize, size: usize },

    /// The peer's mailbox is gone; it left the run early.
    #[error("rank {rank} is no longer reachable")]
    Disconnected { rank: usize },

    /// The group was terminated by `abort` on some rank.
    #[error("process group aborted by rank {origin} with code {code}")]
    Aborted { origin: usize, code: i32 },

    #[error("a process group needs at least one rank")]
    EmptyGroup,

    #[error("failed to start process group: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Failures of a distributed sort.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SortError {
    /// The hypercube needs `2^d` processes.
    #[error("process count {0} is not a power of two")]
    NotPowerOfTwo(usize),

    /// Negative tags belong to the collectives.
    #[error("tag {0} is reserved for collective operations")]
    ReservedTag(Tag),

    #[error(transparent)]
    Comm(#[from] CommError),
}
