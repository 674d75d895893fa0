//! The one-word page header.
//!
//! Every page's first machine word does double duty: while free it is
//! the free-list next-pointer (see [`crate::free_list`]); while
//! allocated the same bytes hold the size-class index as a plain
//! integer.
//!
//! The two views are never live on the same page at the same time:
//! `Arena::allocate` overwrites the free-list encoding with the index
//! encoding immediately after popping a page, and `Arena::free` reads the
//! index encoding before the page is pushed back onto a free list.

use core::ptr::NonNull;

/// Writes the size-class index into `page`'s header word.
///
/// # Safety
/// `page` must point to at least `size_of::<usize>()` writable,
/// word-aligned bytes belonging to the arena.
pub unsafe fn write_index(page: NonNull<()>, index: usize) {
    unsafe {
        page.cast::<usize>().write(index);
    }
}

/// Reads the size-class index previously written by [`write_index`].
///
/// # Safety
/// `page` must point to at least `size_of::<usize>()` readable,
/// word-aligned bytes previously written by [`write_index`].
pub unsafe fn read_index(page: NonNull<()>) -> usize {
    unsafe { page.cast::<usize>().read() }
}
