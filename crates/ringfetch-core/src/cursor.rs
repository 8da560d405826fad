//! Page/offset arithmetic for ring cursors.
//!
//! A ring of capacity `C` bound at absolute position `base` maps every
//! absolute position `p >= base` to a slot `(page, offset)` where
//! `page = (p - base) / C` and `offset = (p - base) % C`. Cursors carry the
//! page they sit on, so a read and a write cursor at the same raw offset but
//! on different laps stay distinguishable.
//!
//! # Invariants
//! - `offset < capacity` for every cursor of a non-empty ring.
//! - `read <= write` in linear order, and `write - read <= capacity`.

/// A position inside the ring, qualified by the lap it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    /// Number of times the cursor has wrapped past offset zero.
    pub page: u64,
    /// Raw offset into the storage.
    pub offset: usize,
}

impl Cursor {
    /// Cursor at the very beginning of page 0.
    pub const ZERO: Cursor = Cursor { page: 0, offset: 0 };

    /// Create a cursor.
    pub const fn new(page: u64, offset: usize) -> Self {
        Self { page, offset }
    }

    /// Resolve an absolute position to its slot in a ring bound at `base`.
    ///
    /// Returns `None` for positions before `base` and for zero-capacity rings.
    pub fn locate(position: u64, base: u64, capacity: usize) -> Option<Self> {
        if capacity == 0 || position < base {
            return None;
        }
        let rel = position - base;
        let cap = capacity as u64;
        Some(Self {
            page: rel / cap,
            offset: (rel % cap) as usize,
        })
    }

    /// Move forward by `n` bytes, bumping the page on every wrap.
    pub fn advance(self, n: usize, capacity: usize) -> Self {
        if capacity == 0 {
            return self;
        }
        let total = self.offset as u64 + n as u64;
        let cap = capacity as u64;
        Self {
            page: self.page + total / cap,
            offset: (total % cap) as usize,
        }
    }

    /// Distance in bytes from offset zero of page zero.
    #[inline]
    pub fn linear(self, capacity: usize) -> u64 {
        self.page * capacity as u64 + self.offset as u64
    }

    /// Bytes from `self` forward to `later`, or zero if `later` is not ahead.
    #[inline]
    pub fn distance_to(self, later: Cursor, capacity: usize) -> u64 {
        later
            .linear(capacity)
            .saturating_sub(self.linear(capacity))
    }
}

/// Where a page sits relative to the read and write pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRelation {
    /// Earlier than the read page: already consumed.
    Before,
    /// Read and write cursors share this page.
    Shared,
    /// The read page, with the write cursor on a later page.
    Read,
    /// Strictly between the read and write pages.
    Between,
    /// The write page, with the read cursor on an earlier page.
    Write,
    /// Later than the write page: not yet produced.
    After,
}

/// Classify `page` against the pages of the read and write cursors.
pub fn page_relation(page: u64, read_page: u64, write_page: u64) -> PageRelation {
    if page < read_page {
        PageRelation::Before
    } else if page > write_page {
        PageRelation::After
    } else if read_page == write_page {
        PageRelation::Shared
    } else if page == read_page {
        PageRelation::Read
    } else if page == write_page {
        PageRelation::Write
    } else {
        PageRelation::Between
    }
}

/// Whether `slot` lies in the readable window `[read, write)`.
pub fn is_within(slot: Cursor, read: Cursor, write: Cursor) -> bool {
    match page_relation(slot.page, read.page, write.page) {
        PageRelation::Shared => slot.offset >= read.offset && slot.offset < write.offset,
        PageRelation::Read => slot.offset >= read.offset,
        PageRelation::Write => slot.offset < write.offset,
        PageRelation::Between => true,
        PageRelation::Before | PageRelation::After => false,
    }
}
