//! A user-space buddy memory allocator.
//!
//! [`Arena`] owns one contiguous, power-of-two-sized region of host
//! memory and services variable-size allocation requests with the
//! classical binary buddy algorithm: requests are rounded up to a size
//! class, larger free blocks are split to satisfy smaller ones, and
//! adjacent free buddies are coalesced back together on release.
//!
//! This crate is deliberately narrow. It does not implement
//! [`core::alloc::GlobalAlloc`], an `Allocator`-trait facade, or a CLI;
//! those are external collaborators a caller builds on top, not part of
//! the buddy algorithm itself. It is also single-threaded: wrap an
//! [`Arena`] in a `Mutex` if you need to share it across threads.
//!
//! ```
//! use buddy_arena::Arena;
//!
//! let mut arena = Arena::new(1024).unwrap();
//! let p = arena.allocate(223).unwrap();
//! assert_eq!(arena.page_size(p), 256);
//! arena.free(Some(p));
//! ```

mod arena;
mod error;
mod free_list;
mod header;
mod region;
mod size_class;

pub use arena::Arena;
pub use error::AllocError;
pub use size_class::MIN_EXP;
