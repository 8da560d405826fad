//! Wrap-around byte buffer addressed by absolute file position.
//!
//! One producer appends with [`RingBuffer::write`]; one reader consumes with
//! [`RingBuffer::read_at`], naming the absolute position it wants. Reading at
//! a position discards every buffered byte before it, so the readable window
//! always starts at the read cursor.
//!
//! # Invariants
//! - `len == write.linear - read.linear` and `len <= capacity`.
//! - The absolute position of the read cursor is `base + read.linear`.
//! - Residency of a position is decided on its `(page, offset)` slot against
//!   both cursors, never on the raw offset alone.
//! - Once closed, storage is gone and every operation fails with
//!   [`BufferError::Closed`].

use std::fmt;
use std::ops::Range;

use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::cursor::{is_within, Cursor};
use crate::pool::{pool_for, PooledBuffer};
use crate::{BufferError, Result};

/// What a waiter can expect at a given position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// The byte is buffered and readable now.
    Resident,
    /// Not buffered yet; the producer may still deliver it.
    Pending,
    /// The producer finished at `at` without reaching the position.
    Ended { at: u64 },
}

struct RingState {
    /// `None` once the ring is closed.
    storage: Option<PooledBuffer>,
    /// Absolute position of page 0, offset 0.
    base: u64,
    read: Cursor,
    write: Cursor,
    len: usize,
    /// Absolute position where the producer stopped, if it has.
    end: Option<u64>,
}

impl RingState {
    fn read_position(&self, capacity: usize) -> u64 {
        self.base + self.read.linear(capacity)
    }

    fn write_position(&self, capacity: usize) -> u64 {
        self.base + self.write.linear(capacity)
    }

    fn slot(&self, position: u64, capacity: usize) -> Option<Cursor> {
        self.storage.as_ref()?;
        Cursor::locate(position, self.base, capacity)
            .filter(|slot| is_within(*slot, self.read, self.write))
    }

    fn rebind(&mut self, start: u64) {
        self.base = start;
        self.read = Cursor::ZERO;
        self.write = Cursor::ZERO;
        self.len = 0;
        self.end = None;
    }
}

/// Fixed-capacity circular byte store with a position-indexed reader.
pub struct RingBuffer {
    capacity: usize,
    state: Mutex<RingState>,
    changed: Notify,
}

impl RingBuffer {
    /// Create a ring whose first byte is absolute position 0.
    pub fn new(capacity: usize) -> Self {
        Self::with_start(capacity, 0)
    }

    /// Create a ring whose first byte is absolute position `start`.
    ///
    /// Storage comes from the shared pool for `capacity`-sized buffers.
    pub fn with_start(capacity: usize, start: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(RingState {
                storage: Some(pool_for(capacity).acquire()),
                base: start,
                read: Cursor::ZERO,
                write: Cursor::ZERO,
                len: 0,
                end: None,
            }),
            changed: Notify::new(),
        }
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can be written right now. Zero once closed.
    pub fn free(&self) -> usize {
        let state = self.state.lock();
        if state.storage.is_none() {
            return 0;
        }
        self.capacity - state.len
    }

    /// Absolute position of the read cursor.
    pub fn start(&self) -> u64 {
        self.state.lock().read_position(self.capacity)
    }

    /// Absolute position the next write lands on.
    pub fn write_position(&self) -> u64 {
        self.state.lock().write_position(self.capacity)
    }

    /// Absolute positions currently readable.
    pub fn buffered_range(&self) -> Range<u64> {
        let state = self.state.lock();
        state.read_position(self.capacity)..state.write_position(self.capacity)
    }

    /// Where the producer stopped, if [`finish`](Self::finish) was called since the last reset.
    pub fn end(&self) -> Option<u64> {
        self.state.lock().end
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().storage.is_none()
    }

    /// Append `data` at the write cursor, wrapping as needed.
    ///
    /// The whole slice is written or nothing is.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let capacity = self.capacity;
        let mut guard = self.state.lock();
        let RingState {
            storage,
            write,
            len,
            ..
        } = &mut *guard;

        let Some(storage) = storage.as_mut() else {
            return Err(BufferError::Closed);
        };
        if data.len() > capacity {
            return Err(BufferError::ExceedsCapacity {
                len: data.len(),
                capacity,
            });
        }
        let free = capacity - *len;
        if data.len() > free {
            return Err(BufferError::InsufficientSpace {
                len: data.len(),
                free,
            });
        }
        if data.is_empty() {
            return Ok(0);
        }

        let offset = write.offset;
        let first = (capacity - offset).min(data.len());
        storage[offset..offset + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            storage[..data.len() - first].copy_from_slice(&data[first..]);
        }

        *write = write.advance(data.len(), capacity);
        *len += data.len();
        drop(guard);

        self.changed.notify_waiters();
        Ok(data.len())
    }

    /// Copy bytes starting at absolute `position` into `dst`.
    ///
    /// Copies `min(dst.len(), buffered bytes from position)`, in two segments
    /// when the span wraps. Everything before `position` plus the copied
    /// bytes is consumed. Never blocks.
    pub fn read_at(&self, dst: &mut [u8], position: u64) -> Result<usize> {
        let capacity = self.capacity;
        let mut guard = self.state.lock();
        if guard.storage.is_none() {
            return Err(BufferError::Closed);
        }
        if guard.len == 0 {
            return Err(BufferError::Empty);
        }
        let slot = guard
            .slot(position, capacity)
            .ok_or(BufferError::NotResident { position })?;

        let RingState {
            storage,
            read,
            write,
            len,
            ..
        } = &mut *guard;
        let Some(storage) = storage.as_ref() else {
            return Err(BufferError::Closed);
        };

        let available = slot.distance_to(*write, capacity) as usize;
        let n = dst.len().min(available);
        let first = (capacity - slot.offset).min(n);
        dst[..first].copy_from_slice(&storage[slot.offset..slot.offset + first]);
        if first < n {
            dst[first..n].copy_from_slice(&storage[..n - first]);
        }

        *read = slot.advance(n, capacity);
        *len = read.distance_to(*write, capacity) as usize;
        drop(guard);

        self.changed.notify_waiters();
        Ok(n)
    }

    /// Whether the byte at absolute `position` is buffered.
    pub fn is_position_resident(&self, position: u64) -> bool {
        self.state.lock().slot(position, self.capacity).is_some()
    }

    /// Residency of `position`, distinguishing "not yet" from "never".
    pub fn availability(&self, position: u64) -> Result<Availability> {
        let state = self.state.lock();
        if state.storage.is_none() {
            return Err(BufferError::Closed);
        }
        if state.slot(position, self.capacity).is_some() {
            return Ok(Availability::Resident);
        }
        match state.end {
            Some(at) if position >= at => Ok(Availability::Ended { at }),
            _ => Ok(Availability::Pending),
        }
    }

    /// Empty the ring and rebind it so its next byte is absolute `start`.
    pub fn reset(&self, start: u64) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.storage.is_none() {
                return Err(BufferError::Closed);
            }
            state.rebind(start);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Record that the producer has stopped at the current write position.
    ///
    /// Waiters for anything at or past that position observe
    /// [`Availability::Ended`] instead of waiting forever. No-op once closed.
    pub fn finish(&self) {
        {
            let mut state = self.state.lock();
            if state.storage.is_none() {
                return;
            }
            let at = state.write_position(self.capacity);
            state.end = Some(at);
        }
        self.changed.notify_waiters();
    }

    /// Release storage back to its pool. Idempotent.
    pub fn close(&self) {
        let storage = self.state.lock().storage.take();
        if storage.is_some() {
            drop(storage);
            self.changed.notify_waiters();
        }
    }

    /// A future resolving on the next write, read, reset, finish or close.
    ///
    /// Enable (or poll) it before re-checking state, or a change made in
    /// between can be missed.
    pub fn notified(&self) -> Notified<'_> {
        self.changed.notified()
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("read", &state.read)
            .field("write", &state.write)
            .field("len", &state.len)
            .field("base", &state.base)
            .field("end", &state.end)
            .field("closed", &state.storage.is_none())
            .finish()
    }
}
