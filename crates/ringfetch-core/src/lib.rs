//! # Ringfetch Core
//!
//! Bounded byte storage for random-access reads over remote byte ranges.
//!
//! A remote file far larger than memory is exposed through a fixed-capacity
//! [`RingBuffer`] that a single producer keeps filling from the network while
//! a reader consumes it by absolute file position.
//!
//! ## Features
//!
//! - **Wrap-aware cursors**: read/write cursors carry a page (lap) counter so
//!   residency never depends on the raw offset alone
//! - **Size tiers**: [`BufferSizePolicy`] maps a file size to a ring capacity
//!   and a preload margin
//! - **Buffer pools**: process-wide pools keyed by buffer length recycle ring
//!   storage and transfer scratch space
//!
//! ## Example
//!
//! ```ignore
//! use ringfetch_core::RingBuffer;
//!
//! let ring = RingBuffer::with_start(1024, 4096);
//! ring.write(b"hello")?;
//! assert!(ring.is_position_resident(4096));
//!
//! let mut out = [0u8; 5];
//! ring.read_at(&mut out, 4096)?;
//! assert_eq!(&out, b"hello");
//! ```

mod cursor;
mod error;
mod policy;
pub mod pool;
mod ring;

pub use cursor::{is_within, page_relation, Cursor, PageRelation};
pub use error::{BufferError, Result};
pub use policy::{BufferSizePolicy, BufferTier, TierRule};
pub use pool::{pool_for, BufferPool, PooledBuffer};
pub use ring::{Availability, RingBuffer};
