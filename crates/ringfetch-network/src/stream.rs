//! Seekable stream over a remote file
//!
//! A [`Stream`] owns one ring buffer and at most one [`Transfer`] filling it.
//! Reads are served from the ring; a read the running transfer cannot
//! satisfy replaces it with a new one starting a little behind the target.
//!
//! ```text
//!   Idle ──read──▶ Filling ──resident──▶ Ready
//!                    ▲                     │
//!                    └──── seek outside ───┘
//!   any state ──close──▶ Closed
//! ```

use crate::{Connector, NodeId, Result, StreamConfig, StreamError, Transfer};
use async_trait::async_trait;
use parking_lot::Mutex;
use ringfetch_core::{Availability, BufferError, BufferTier, RingBuffer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of a [`Stream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// No transfer started yet
    Idle,
    /// A transfer is running toward the last requested position
    Filling,
    /// The last requested position was resident and served
    Ready,
    /// Closed; every read fails
    Closed,
}

/// Result of a positional read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes copied into the caller's buffer
    pub bytes_read: usize,
    /// Whether the read reached the end of the file
    pub eof: bool,
}

impl ReadOutcome {
    fn eof() -> Self {
        Self {
            bytes_read: 0,
            eof: true,
        }
    }
}

/// Random-access reads over a remote file.
#[async_trait]
pub trait SeekableStream: Send + Sync {
    /// Read into `buf` starting at absolute `position`.
    async fn read_at(&self, buf: &mut [u8], position: u64) -> Result<ReadOutcome>;

    /// Release the stream. Safe to call more than once.
    async fn close(&self) -> Result<()>;

    /// Node this stream reads
    fn id(&self) -> NodeId;

    /// File size in bytes
    fn size(&self) -> u64;

    /// Source URL
    fn url(&self) -> &str;
}

/// Ring-buffered stream fed by one replaceable transfer.
pub struct Stream {
    id: NodeId,
    url: String,
    size: u64,
    tier: BufferTier,
    config: StreamConfig,
    ring: Arc<RingBuffer>,
    connector: Arc<dyn Connector>,
    /// Serializes reads; held across the wait.
    transfer: tokio::sync::Mutex<Option<Transfer>>,
    state: Mutex<StreamState>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Stream {
    /// Create an idle stream. No connection is made until the first read.
    pub fn new(
        id: NodeId,
        url: impl Into<String>,
        size: u64,
        tier: BufferTier,
        connector: Arc<dyn Connector>,
        config: StreamConfig,
    ) -> Self {
        let tier = BufferTier::new(tier.capacity.max(1), tier.preload_margin);
        Self {
            id,
            url: url.into(),
            size,
            tier,
            config,
            ring: Arc::new(RingBuffer::new(tier.capacity)),
            connector,
            transfer: tokio::sync::Mutex::new(None),
            state: Mutex::new(StreamState::Idle),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Read using the configured default wait.
    pub async fn read_at(&self, buf: &mut [u8], position: u64) -> Result<ReadOutcome> {
        self.read_at_timeout(buf, position, self.config.read_timeout)
            .await
    }

    /// Read into `buf` from absolute `position`, waiting at most `timeout`
    /// (capped by the configured ceiling) for the bytes to arrive.
    ///
    /// Returns fewer bytes than requested at end of file, when the request is
    /// larger than the ring can hold, or when the transfer stopped part way.
    /// `eof` is set once `position + bytes_read` reaches the file size.
    pub async fn read_at_timeout(
        &self,
        buf: &mut [u8],
        position: u64,
        timeout: Duration,
    ) -> Result<ReadOutcome> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        if position >= self.size {
            return Ok(ReadOutcome::eof());
        }
        if buf.is_empty() {
            return Ok(ReadOutcome {
                bytes_read: 0,
                eof: false,
            });
        }

        let wait = self.config.effective_timeout(timeout);
        let deadline = Instant::now() + wait;

        let mut transfer = self.transfer.lock().await;
        if self.is_closed() {
            return Err(StreamError::Closed);
        }

        let wanted_end = (position + buf.len() as u64).min(self.size);
        if self.is_stale(transfer.as_ref(), position, wanted_end) {
            self.restart(&mut transfer, position).await?;
        }

        let wait_end = wanted_end.min(self.ring.start() + self.ring.capacity() as u64);
        self.wait_until_resident(transfer.as_ref(), position, wait_end, deadline, wait)
            .await?;

        let n = self
            .ring
            .read_at(buf, position)
            .map_err(|e| self.buffer_error(e))?;
        self.set_state(StreamState::Ready);

        Ok(ReadOutcome {
            bytes_read: n,
            eof: position + n as u64 >= self.size,
        })
    }

    /// Whether the current transfer cannot serve `[position, wanted_end)`.
    fn is_stale(&self, transfer: Option<&Transfer>, position: u64, wanted_end: u64) -> bool {
        if transfer.is_none() {
            return true;
        }

        let start = self.ring.start();
        let reachable = start + self.ring.capacity() as u64;
        if position < start || position >= reachable {
            return true;
        }

        match self.ring.end() {
            Some(at) => at < wanted_end.min(reachable),
            None => false,
        }
    }

    async fn restart(&self, slot: &mut Option<Transfer>, position: u64) -> Result<()> {
        if let Some(mut old) = slot.take() {
            old.close().await;
        }

        let previous = self.ring.buffered_range();
        let start = position.saturating_sub(self.tier.preload_margin);
        self.ring.reset(start).map_err(|e| self.buffer_error(e))?;

        let cancel = self.cancel.child_token();
        let source = match self.connector.connect(&self.url, start, cancel.clone()) {
            Ok(source) => source,
            Err(e) => {
                self.set_state(StreamState::Idle);
                return Err(e);
            }
        };

        debug!(
            "Stream {} restarting at {} for position {} (window was {:?})",
            self.id, start, position, previous
        );
        *slot = Some(Transfer::start(
            Arc::clone(&self.ring),
            source,
            self.config.scratch_size,
            cancel,
        ));
        self.set_state(StreamState::Filling);
        Ok(())
    }

    /// Wait until every byte in `[position, end)` is resident, or the
    /// transfer has stopped with at least `position` resident.
    ///
    /// A transfer that stopped short on a non-transient error reports that
    /// error; otherwise the read fails with `TransferEnded`.
    async fn wait_until_resident(
        &self,
        transfer: Option<&Transfer>,
        position: u64,
        end: u64,
        deadline: Instant,
        wait: Duration,
    ) -> Result<()> {
        let last = end.saturating_sub(1).max(position);

        loop {
            let notified = self.ring.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(StreamError::Closed);
            }

            let availability = self
                .ring
                .availability(last)
                .map_err(|e| self.buffer_error(e))?;
            match availability {
                Availability::Resident => return Ok(()),
                Availability::Pending => {}
                Availability::Ended { at } => {
                    if at > position && self.ring.is_position_resident(position) {
                        return Ok(());
                    }
                    return Err(match transfer.and_then(Transfer::failure) {
                        Some(e) if !e.is_transient() => e,
                        _ => StreamError::TransferEnded { position: at },
                    });
                }
            }

            self.set_state(StreamState::Filling);
            if tokio::time::timeout_at(deadline, notified.as_mut())
                .await
                .is_err()
            {
                if self.is_closed() {
                    return Err(StreamError::Closed);
                }
                return Err(StreamError::Timeout {
                    position,
                    duration_ms: wait.as_millis().try_into().unwrap_or(u64::MAX),
                });
            }
        }
    }

    /// Close the ring, then the transfer. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.set_state(StreamState::Closed);

        // Waiters hold the transfer lock; closing the ring first wakes them.
        self.ring.close();
        self.cancel.cancel();

        let mut transfer = self.transfer.lock().await;
        if let Some(mut transfer) = transfer.take() {
            transfer.close().await;
        }

        debug!("Stream {} closed", self.id);
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        if self.is_closed() {
            return StreamState::Closed;
        }
        *self.state.lock()
    }

    /// Buffer tier chosen for this file
    pub fn tier(&self) -> BufferTier {
        self.tier
    }

    /// Absolute positions currently buffered
    pub fn buffered_range(&self) -> Range<u64> {
        self.ring.buffered_range()
    }

    /// Node this stream reads
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// File size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Source URL
    pub fn url(&self) -> &str {
        &self.url
    }

    fn set_state(&self, state: StreamState) {
        if !self.is_closed() {
            *self.state.lock() = state;
        }
    }

    fn buffer_error(&self, e: BufferError) -> StreamError {
        if self.is_closed() {
            StreamError::Closed
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl SeekableStream for Stream {
    async fn read_at(&self, buf: &mut [u8], position: u64) -> Result<ReadOutcome> {
        Stream::read_at(self, buf, position).await
    }

    async fn close(&self) -> Result<()> {
        Stream::close(self).await
    }

    fn id(&self) -> NodeId {
        self.id
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.ring.close();
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("size", &self.size)
            .field("tier", &self.tier)
            .field("state", &self.state())
            .field("buffered", &self.ring.buffered_range())
            .finish()
    }
}
