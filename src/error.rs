//! Error type surfaced at arena construction.
//!
//! `allocate`/`free` never return an error (see the crate-level docs),
//! so this is the only `Result`-producing path in the crate.

use thiserror::Error;

/// Failure constructing an [`Arena`](crate::Arena).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// `Arena::new(0)` was requested; zero-size arenas are not supported.
    #[error("cannot construct an arena of size zero")]
    ZeroSize,

    /// The reserved-region `Layout` (`2^max_exp + page alignment` bytes,
    /// aligned to the page alignment) could not be represented.
    #[error("requested arena size overflows the allocator's layout math")]
    LayoutOverflow,

    /// The host global allocator returned null for the computed layout.
    #[error("host allocator failed to reserve the backing region")]
    HostAllocationFailed,
}
