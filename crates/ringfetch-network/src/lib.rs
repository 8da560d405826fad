//! Seekable Streams over HTTP Range Requests
//!
//! Exposes a remote file, possibly far larger than memory, as a random-access
//! byte stream with bounded memory:
//!
//! - **Range Connections**: one `GET` with `Range: bytes=<start>-` per
//!   connection, HTTP/1.1 only, nothing pooled between connections
//! - **Background Transfers**: a producer task per stream copies the body into
//!   a fixed-capacity ring buffer, waiting for the reader when it is full
//! - **Seek by Reconnect**: reads outside the window the current transfer can
//!   reach start a new transfer slightly behind the target
//! - **Cached URL Resolution**: streamable URLs are resolved once per node and
//!   reused until they expire
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       StreamFactory                          │
//! │   UrlResolver ──▶ URL cache (TTL) ──▶ BufferSizePolicy       │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ new_stream(node, size)
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Stream                              │
//! │                                                              │
//! │  read_at(buf, pos) ──▶ RingBuffer ◀── Transfer ◀── Connector │
//! │          │                 ▲              │                  │
//! │          └─ out of window ─┴── restart ───┘                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod connection;
mod error;
mod factory;
mod stream;
mod transfer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConnectionConfig, FactoryConfig, StreamConfig};
pub use connection::{ByteSource, Connection, Connector, HttpConnector};
pub use error::{Result, StreamError};
pub use factory::{NodeId, StreamFactory, UrlResolver};
pub use stream::{ReadOutcome, SeekableStream, Stream, StreamState};
pub use transfer::Transfer;

pub use ringfetch_core::{BufferSizePolicy, BufferTier};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        FactoryConfig, NodeId, ReadOutcome, Result, SeekableStream, Stream, StreamConfig,
        StreamError, StreamFactory, UrlResolver,
    };
}
