//! The buddy arena itself: construction, allocation, release, and
//! introspection. Free blocks are found by walking the size-class free
//! lists upward from the requested class, splitting the first hit down
//! to size on allocation and coalescing upward with the buddy on
//! release, with a page header carrying the size-class tag and pointer
//! validation guarding every release.

use std::fmt;
use std::ptr::NonNull;

use log::{debug, trace, warn};

use crate::error::AllocError;
use crate::free_list::FreeList;
use crate::header;
use crate::region::Region;
use crate::size_class::{MIN_EXP, WORD_SIZE, exp_for_size};


/// A single contiguous arena of host memory managed by the binary buddy
/// algorithm.
///
/// Single-threaded: every method takes `&mut self`. Wrap in an external
/// `Mutex` for concurrent use; this crate does not do it for you.
#[derive(Debug)]
pub struct Arena {
    region: Region,
    max_exp: u32,
    free_lists: Vec<FreeList>,
}

impl Arena {
    /// Constructs an arena managing at least `s` bytes.
    ///
    /// `max_exp` is the smallest exponent with `2^max_exp >= s` and
    /// `2^max_exp >= 2^MIN_EXP`; the arena reserves `2^max_exp +
    /// PAGE_ALIGNMENT` bytes from the host allocator and seeds the
    /// top-most free list with a single page spanning the whole region.
    pub fn new(s: usize) -> Result<Self, AllocError> {
        if s == 0 {
            return Err(AllocError::ZeroSize);
        }

        let max_exp = exp_for_size(s);
        let region = Region::acquire(max_exp)?;
        let num_classes = (max_exp - MIN_EXP + 1) as usize;

        let mut free_lists = vec![FreeList::new(); num_classes];
        // Safety: `region.base()` is a freshly reserved, word-aligned page
        // spanning the whole managed region; nothing else references it yet.
        unsafe {
            free_lists[num_classes - 1].push(region.base());
        }

        debug!(
            "arena constructed: max_exp={max_exp} managed={} reserved={}",
            1usize << max_exp,
            region.reserved_size()
        );

        Ok(Arena {
            region,
            max_exp,
            free_lists,
        })
    }

    fn top(&self) -> usize {
        self.free_lists.len() - 1
    }

    fn base_addr(&self) -> usize {
        self.region.base().as_ptr() as usize
    }

    fn class_size(&self, list_index: usize) -> usize {
        1usize << (list_index as u32 + MIN_EXP)
    }

    /// Rounds `n` up to a size class and returns a 64-byte-aligned
    /// pointer to that many (or more) usable bytes, or `None` if `n` is
    /// zero or exceeds the arena's maximum page size.
    pub fn allocate(&mut self, n: usize) -> Option<NonNull<u8>> {
        if n == 0 {
            return None;
        }
        let need = n.checked_add(WORD_SIZE)?;
        let e = exp_for_size(need);
        if e > self.max_exp {
            warn!("allocate({n}): oversize request (needs class {e}, max {})", self.max_exp);
            return None;
        }
        let i = (e - MIN_EXP) as usize;

        let mut s = i;
        while s < self.free_lists.len() && self.free_lists[s].is_empty() {
            s += 1;
        }
        if s >= self.free_lists.len() {
            warn!("allocate({n}): out of memory at class {e}");
            return None;
        }

        let page = self.free_lists[s]
            .pop()
            .expect("search found a non-empty list");

        for j in (i..s).rev() {
            let block_size = self.class_size(j);
            let buddy_addr = page.as_ptr() as usize + block_size;
            // Safety: buddy_addr lies within the page just popped from
            // list `s`, which is entirely owned by this arena.
            let buddy = unsafe { NonNull::new_unchecked(buddy_addr as *mut ()) };
            trace!("split: class {} yields free buddy at {:#x}", j + MIN_EXP as usize, buddy_addr - self.base_addr());
            unsafe {
                self.free_lists[j].push(buddy);
            }
        }

        // Safety: `page` was just popped off a free list; its header word
        // is ours to repurpose as the size-class tag.
        unsafe {
            header::write_index(page, i);
        }

        let user_ptr = (page.as_ptr() as usize + WORD_SIZE) as *mut u8;
        // Safety: user_ptr is non-null because page is non-null and the
        // offset is positive.
        Some(unsafe { NonNull::new_unchecked(user_ptr) })
    }

    /// Releases a pointer previously returned by [`Arena::allocate`].
    ///
    /// `None` (the null pointer) is a silent no-op, as is any pointer that
    /// does not currently belong to this arena. Foreign pointers,
    /// corrupt headers, misaligned offsets, and double frees are all
    /// detected and ignored rather than trusted.
    pub fn free(&mut self, user_ptr: Option<NonNull<u8>>) {
        let Some(user_ptr) = user_ptr else {
            return;
        };

        let page_addr = user_ptr.as_ptr() as usize - WORD_SIZE;
        let base_addr = self.base_addr();
        let memory_index = page_addr.wrapping_sub(base_addr);
        let managed_size = 1usize << self.max_exp;
        if memory_index >= managed_size {
            warn!("free: pointer {user_ptr:p} is outside the managed region");
            return;
        }

        // Safety: memory_index < managed_size, so page_addr points into
        // this arena's reserved region.
        let page = unsafe { NonNull::new_unchecked(page_addr as *mut ()) };
        let mut i = unsafe { header::read_index(page) };
        if i >= self.free_lists.len() {
            warn!("free: pointer {user_ptr:p} carries a corrupt size-class index {i}");
            return;
        }

        let class_size = self.class_size(i);
        if memory_index % class_size != 0 {
            warn!("free: pointer {user_ptr:p} is misaligned for its claimed size class");
            return;
        }

        if self.free_lists[i].contains(page) {
            warn!("free: pointer {user_ptr:p} is already free (double free)");
            return;
        }

        let mut current = page;
        let top = self.top();
        loop {
            if i == top {
                unsafe {
                    self.free_lists[i].push(current);
                }
                break;
            }

            let mask = !(1usize << (i as u32 + MIN_EXP));
            let current_offset = current.as_ptr() as usize - base_addr;
            let target = current_offset & mask;

            let buddy = self.free_lists[i]
                .find_by_masked_offset(self.region.base(), mask, target)
                .filter(|&q| q != current);

            match buddy {
                Some(buddy) => {
                    self.free_lists[i].remove(buddy);
                    trace!(
                        "coalesce: classes {} merge into class {} at offset {:#x}",
                        i + MIN_EXP as usize,
                        i + 1 + MIN_EXP as usize,
                        target
                    );
                    // Safety: `target` is the byte offset of the left half
                    // of a pair this arena owns.
                    current = unsafe { NonNull::new_unchecked((base_addr + target) as *mut ()) };
                    i += 1;
                }
                None => {
                    unsafe {
                        self.free_lists[i].push(current);
                    }
                    break;
                }
            }
        }
    }

    /// Size in bytes (including header) of the live allocation at
    /// `user_ptr`. The caller must pass a pointer currently owned by this
    /// arena; unlike `free`, this is not validated.
    pub fn page_size(&self, user_ptr: NonNull<u8>) -> usize {
        let page_addr = user_ptr.as_ptr() as usize - WORD_SIZE;
        // Safety: caller contract requires `user_ptr` to be a live
        // allocation from this arena.
        let page = unsafe { NonNull::new_unchecked(page_addr as *mut ()) };
        let i = unsafe { header::read_index(page) };
        self.class_size(i)
    }

    pub fn managed_memory_size(&self) -> usize {
        1usize << self.max_exp
    }

    pub fn reserved_memory_size(&self) -> usize {
        self.region.reserved_size()
    }

    pub fn available_memory_size(&self) -> usize {
        self.free_lists
            .iter()
            .enumerate()
            .map(|(i, list)| self.class_size(i) * list.len())
            .sum()
    }

    pub fn max_available_page_size(&self) -> usize {
        self.free_lists
            .iter()
            .enumerate()
            .rev()
            .find(|(_, list)| !list.is_empty())
            .map(|(i, _)| self.class_size(i))
            .unwrap_or(0)
    }

    /// A fixed-width ASCII sketch of which spans of the managed region are
    /// free, one character per `2^(max_exp - scheme_exp)` bytes.
    fn layout_scheme(&self) -> (usize, String) {
        let scheme_exp = MIN_EXP.min(self.max_exp);
        let scheme_len = 1usize << scheme_exp;
        let mut scheme = vec![b'.'; scheme_len];
        let shift = self.max_exp - scheme_exp;

        for (i, list) in self.free_lists.iter().enumerate() {
            let class_size = self.class_size(i);
            for offset in list.offsets_from(self.region.base()) {
                let start = offset >> shift;
                let len = (class_size >> shift).max(1);
                if len == 1 {
                    scheme[start] = b'|';
                } else {
                    scheme[start] = b'[';
                    for c in scheme.iter_mut().take(start + len - 1).skip(start + 1) {
                        *c = b'-';
                    }
                    scheme[start + len - 1] = b']';
                }
            }
        }

        (1usize << shift, String::from_utf8(scheme).expect("ascii only"))
    }

    /// Snapshot of every free list's member offsets from base, indexed by
    /// size-class exponent. Test-only: production code introspects the
    /// arena only through the public accessors above.
    #[cfg(test)]
    pub(crate) fn free_list_snapshot(&self) -> std::collections::BTreeMap<u32, Vec<usize>> {
        self.free_lists
            .iter()
            .enumerate()
            .map(|(i, list)| {
                let mut offsets: Vec<usize> = list.offsets_from(self.region.base()).collect();
                offsets.sort_unstable();
                (i as u32 + MIN_EXP, offsets)
            })
            .collect()
    }
}

impl fmt::Display for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-<60}", "")?;
        writeln!(f, "arena struct size     = {} B", size_of::<Arena>())?;
        writeln!(f)?;
        writeln!(f, "raw region base       = {:p}", self.region.raw_ptr())?;
        writeln!(f, "raw region size       = {} B", self.region.reserved_size())?;
        writeln!(f, "raw region alignment  = {} B", self.region.alignment())?;
        writeln!(f, "logical base          = {:p}", self.region.base())?;
        writeln!(f)?;
        writeln!(f, "page header size      = {WORD_SIZE} B")?;
        writeln!(f, "page alignment        = {} B", self.region.alignment())?;
        writeln!(f, "max size class        = {} B (2^{})", self.managed_memory_size(), self.max_exp)?;
        writeln!(f, "min size class        = {} B (2^{MIN_EXP})", 1usize << MIN_EXP)?;
        writeln!(f)?;
        writeln!(f, "available memory      = {} B", self.available_memory_size())?;
        writeln!(f, "max available page    = {} B", self.max_available_page_size())?;
        writeln!(f)?;
        writeln!(f, "free lists:")?;
        for (i, list) in self.free_lists.iter().enumerate().rev() {
            write!(f, "  2^{:<2} B = {:>10} B, {:>4} free:", i as u32 + MIN_EXP, self.class_size(i), list.len())?;
            for offset in list.offsets_from(self.region.base()) {
                write!(f, " {offset:#x}")?;
            }
            writeln!(f)?;
        }
        writeln!(f)?;
        let (bytes_per_char, scheme) = self.layout_scheme();
        writeln!(f, "free-page layout ({bytes_per_char} B/char): {scheme}")?;
        writeln!(f, "{:-<60}", "")
    }
}
