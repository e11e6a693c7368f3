//! Typed bump arena with checkpoint/rewind.
//!
//! Memory is handed out from a list of blocks. A block is reserved once with a
//! fixed capacity and never grows past it, so nothing stored in the arena ever
//! moves. There is no per-object free: the only way to give memory back is
//! [`Arena::reset_to`], which rewinds the bump pointer to an earlier
//! [`Checkpoint`] and releases trailing blocks above a retained minimum.
//!
//! The tape keeps the variable-length payloads of n-ary nodes (operand index
//! arrays, constant and partial arrays) here.

/// Largest block size (in elements) the arena grows to on its own.
const MAX_BLOCK_LEN: usize = 1 << 20;

/// Contiguous run of elements inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    block: u32,
    start: u32,
    len: u32,
}

impl Span {
    /// The zero-length span. Reading it never touches arena memory.
    pub const EMPTY: Span = Span { block: 0, start: 0, len: 0 };

    /// Number of elements covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the span covers no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Saved bump-pointer position.
///
/// Checkpoints order by allocation position, so a checkpoint taken later never
/// compares less than one taken earlier (until a reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint {
    block: usize,
    offset: usize,
    len: usize,
}

impl Checkpoint {
    /// Checkpoint of an arena with nothing allocated.
    pub const START: Checkpoint = Checkpoint { block: 0, offset: 0, len: 0 };

    /// Number of live elements at this checkpoint.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was allocated at this checkpoint.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Block bump allocator for `Copy` values.
#[derive(Debug)]
pub struct Arena<T> {
    /// Blocks `0..=active` hold live data; blocks after `active` are empty spares.
    blocks: Vec<Vec<T>>,
    active: usize,
    next_block_len: usize,
    retained: usize,
    len: usize,
}

impl<T: Copy> Arena<T> {
    /// Create an empty arena. No memory is reserved until the first allocation.
    ///
    /// `block_len` is the capacity (in elements) of the first block; later blocks
    /// double up to an internal cap. `retained` is the number of blocks kept
    /// reserved across a reset.
    pub fn new(block_len: usize, retained: usize) -> Self {
        Self {
            blocks: Vec::new(),
            active: 0,
            next_block_len: block_len.max(1),
            retained: retained.max(1),
            len: 0,
        }
    }

    /// Number of live elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of reserved blocks (live and spare).
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes currently reserved by all blocks.
    pub fn bytes_reserved(&self) -> usize {
        self.blocks.iter().map(|b| b.capacity()).sum::<usize>() * std::mem::size_of::<T>()
    }

    /// Store a single value.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Span {
        self.alloc_slice(std::slice::from_ref(&item))
    }

    /// Copy `items` into one contiguous run.
    pub fn alloc_slice(&mut self, items: &[T]) -> Span {
        self.alloc_iter(items.iter().copied())
    }

    /// Store the items of an exact-size iterator contiguously.
    pub fn alloc_iter<I>(&mut self, items: I) -> Span
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        let items = items.into_iter();
        let n = items.len();
        if n == 0 {
            return Span::EMPTY;
        }
        let block = self.reserve(n);
        let buf = &mut self.blocks[block];
        let start = buf.len();
        buf.extend(items);
        debug_assert_eq!(buf.len(), start + n, "ExactSizeIterator reported a wrong length");
        self.len += n;
        Span { block: block as u32, start: start as u32, len: n as u32 }
    }

    /// Borrow the elements of `span`.
    #[inline]
    pub fn get(&self, span: Span) -> &[T] {
        if span.len == 0 {
            return &[];
        }
        let start = span.start as usize;
        &self.blocks[span.block as usize][start..start + span.len as usize]
    }

    /// Current bump-pointer position.
    pub fn checkpoint(&self) -> Checkpoint {
        match self.blocks.get(self.active) {
            Some(buf) => Checkpoint { block: self.active, offset: buf.len(), len: self.len },
            None => Checkpoint::START,
        }
    }

    /// Discard everything allocated after `cp`.
    ///
    /// Blocks emptied by the rewind stay reserved up to the retained minimum;
    /// the rest are released.
    ///
    /// # Panics
    ///
    /// If `cp` lies above the current bump pointer (it was taken after a
    /// reset that already discarded it).
    pub fn reset_to(&mut self, cp: Checkpoint) {
        assert!(
            cp <= self.checkpoint(),
            "arena rewind to {cp:?} lies above the bump pointer {:?}",
            self.checkpoint()
        );
        if self.blocks.is_empty() {
            return;
        }
        for buf in &mut self.blocks[cp.block + 1..=self.active] {
            buf.clear();
        }
        self.blocks[cp.block].truncate(cp.offset);
        self.active = cp.block;
        self.len = cp.len;

        let keep = (self.active + 1).max(self.retained);
        self.blocks.truncate(keep);
    }

    /// Discard everything.
    pub fn reset(&mut self) {
        self.reset_to(Checkpoint::START);
    }

    /// Index of a block with room for `n` more elements, advancing the bump
    /// pointer to a spare or fresh block when the active one is full.
    fn reserve(&mut self, n: usize) -> usize {
        if let Some(buf) = self.blocks.get(self.active)
            && buf.capacity() - buf.len() >= n
        {
            return self.active;
        }

        let next = if self.blocks.is_empty() { 0 } else { self.active + 1 };
        let spare_fits = self.blocks.get(next).is_some_and(|b| b.capacity() >= n);
        if !spare_fits {
            let cap = n.max(self.next_block_len);
            let mut buf = Vec::new();
            if buf.try_reserve_exact(cap).is_err() {
                exhausted(cap * std::mem::size_of::<T>());
            }
            if next < self.blocks.len() {
                self.blocks[next] = buf;
            } else {
                self.blocks.push(buf);
            }
            self.next_block_len = (self.next_block_len * 2).min(MAX_BLOCK_LEN);
        }
        self.active = next;
        next
    }
}

#[cold]
#[inline(never)]
fn exhausted(bytes: usize) -> ! {
    log::error!("arena exhausted: cannot reserve a block of {bytes} bytes");
    panic!("arena exhausted: cannot reserve a block of {bytes} bytes");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_read_back() {
        let mut a = Arena::new(8, 1);
        let s1 = a.alloc_slice(&[1.0, 2.0, 3.0]);
        let s2 = a.alloc(4.0);
        assert_eq!(a.get(s1), &[1.0, 2.0, 3.0]);
        assert_eq!(a.get(s2), &[4.0]);
        assert_eq!(a.len(), 4);
        assert_eq!(a.block_count(), 1);
    }

    #[test]
    fn test_empty_span_needs_no_block() {
        let mut a: Arena<u32> = Arena::new(4, 1);
        let s = a.alloc_slice(&[]);
        assert!(s.is_empty());
        assert!(a.get(s).is_empty());
        assert_eq!(a.block_count(), 0);
    }

    #[test]
    fn test_spill_into_new_block_keeps_old_memory_in_place() {
        let mut a = Arena::new(4, 1);
        let s1 = a.alloc_slice(&[1u32, 2, 3]);
        let p1 = a.get(s1).as_ptr();
        let s2 = a.alloc_slice(&[4u32, 5, 6]);
        assert_eq!(a.block_count(), 2);
        assert_eq!(a.get(s1).as_ptr(), p1);
        assert_eq!(a.get(s2), &[4, 5, 6]);
    }

    #[test]
    fn test_oversized_slice_gets_its_own_block() {
        let mut a = Arena::new(2, 1);
        let data: Vec<u32> = (0..10).collect();
        let s = a.alloc_slice(&data);
        assert_eq!(a.get(s), data.as_slice());
    }

    #[test]
    fn test_reset_to_checkpoint_round_trip() {
        let mut a = Arena::new(4, 1);
        a.alloc_slice(&[1u32, 2]);
        let cp = a.checkpoint();
        for i in 0..20 {
            a.alloc_slice(&[i, i + 1, i + 2]);
        }
        assert!(a.block_count() > 1);
        a.reset_to(cp);
        assert_eq!(a.checkpoint(), cp);
        assert_eq!(a.len(), 2);
        assert_eq!(a.block_count(), 1);
    }

    #[test]
    fn test_retained_blocks_survive_reset() {
        let mut a = Arena::new(2, 3);
        for i in 0..10u32 {
            a.alloc_slice(&[i, i]);
        }
        let before = a.block_count();
        assert!(before >= 3);
        a.reset();
        assert!(a.is_empty());
        assert_eq!(a.block_count(), 3);

        // Reuse a spare block instead of reserving a new one.
        let s = a.alloc_slice(&[7u32, 8]);
        assert_eq!(a.get(s), &[7, 8]);
        assert_eq!(a.block_count(), 3);
    }

    #[test]
    fn test_checkpoints_are_monotonic() {
        let mut a = Arena::new(2, 1);
        let mut last = a.checkpoint();
        for i in 0..9u32 {
            a.alloc(i);
            let cp = a.checkpoint();
            assert!(cp > last);
            last = cp;
        }
    }

    #[test]
    #[should_panic(expected = "lies above the bump pointer")]
    fn test_reset_to_stale_checkpoint_panics() {
        let mut a = Arena::new(4, 1);
        a.alloc_slice(&[1u32, 2, 3]);
        let cp = a.checkpoint();
        a.reset();
        a.reset_to(cp);
    }
}
