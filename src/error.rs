//! The recoverable failure kinds shared by every allocator layer.
use thiserror::Error;

/// A recoverable failure reported by an allocator, container, or pointer
/// conversion.
///
/// Everything here is a condition a caller may legitimately react to; for
/// example, a growing pool reacts to an exhausted segment by opening a new
/// one, and [`NotOwned`](PoolError::NotOwned) is how two sibling pools
/// distinguish each other's pointers. Contract violations that cannot occur
/// in a correct program panic instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No block is available at any layer reachable from the request.
    #[error("out of memory")]
    OutOfMemory,
    /// A freelist already holds every block it was created with.
    #[error("list is full")]
    ListFull,
    /// A freelist has no block to hand out.
    #[error("list is empty")]
    ListEmpty,
    /// A pointer was null, unaligned, or outside the expected storage range.
    #[error("invalid pointer")]
    InvalidPointer,
    /// A raw pointer does not belong to the queried allocator.
    #[error("pointer not owned")]
    NotOwned,
    /// Every segment slot of a manager is occupied and none has capacity.
    #[error("all segment slots occupied")]
    SegmentExhausted,
    /// A segment id is out of range or names a released segment.
    #[error("invalid segment id")]
    InvalidSegmentId,
    /// A growing pool already reached its manager limit.
    #[error("manager limit reached")]
    ManagerLimit,
    /// A manager id is out of range for the pool that received it.
    #[error("invalid manager id")]
    InvalidManagerId,
    /// The registry cell for the tag is empty.
    #[error("no pool registered for this tag")]
    NotRegistered,
    /// The registry cell for the tag is already occupied.
    #[error("a pool is already registered for this tag")]
    AlreadyRegistered,
}

/// The result type used throughout this crate.
pub type PoolResult<T = ()> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn display_messages() {
        assert_eq!(PoolError::OutOfMemory.to_string(), "out of memory");
        assert_eq!(PoolError::ListEmpty.to_string(), "list is empty");
        assert_eq!(PoolError::NotOwned.to_string(), "pointer not owned");
        assert_eq!(
            PoolError::AlreadyRegistered.to_string(),
            "a pool is already registered for this tag"
        );
    }
}
