//! Background copy from a byte source into a ring buffer

use crate::{ByteSource, Result, StreamError};
use parking_lot::Mutex;
use ringfetch_core::{pool_for, BufferError, RingBuffer};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Progress {
    bytes_copied: AtomicU64,
    finished: AtomicBool,
    failure: Mutex<Option<StreamError>>,
}

/// One producer task keeping a ring buffer filled from one source.
///
/// The task stops on source EOF, cancellation, or the first error. Whatever
/// the reason, it marks the ring finished and closes the source exactly once.
/// A transfer is never restarted; a new position means a new transfer.
pub struct Transfer {
    start: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    progress: Arc<Progress>,
}

impl Transfer {
    /// Spawn the copy loop. Must be called within a tokio runtime.
    pub fn start(
        ring: Arc<RingBuffer>,
        source: Box<dyn ByteSource>,
        scratch_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        let start = source.start();
        let progress = Arc::new(Progress::default());

        debug!("Starting transfer at {}", start);
        let task = tokio::spawn(run(
            ring,
            source,
            scratch_size,
            cancel.clone(),
            Arc::clone(&progress),
        ));

        Self {
            start,
            cancel,
            task: Some(task),
            progress,
        }
    }

    /// Absolute position the source started at
    pub fn start_position(&self) -> u64 {
        self.start
    }

    /// Bytes written into the ring so far
    pub fn bytes_copied(&self) -> u64 {
        self.progress.bytes_copied.load(Ordering::Acquire)
    }

    /// Whether the copy loop has exited
    pub fn is_finished(&self) -> bool {
        self.progress.finished.load(Ordering::Acquire)
    }

    /// Error the copy loop stopped on. `None` after EOF or cancellation.
    pub fn failure(&self) -> Option<StreamError> {
        self.progress.failure.lock().clone()
    }

    /// Cancel the copy loop and wait for the task to exit. Idempotent.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("Transfer from {} panicked: {}", self.start, e);
                }
            }
        }
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("start", &self.start)
            .field("bytes_copied", &self.bytes_copied())
            .field("finished", &self.is_finished())
            .finish()
    }
}

async fn run(
    ring: Arc<RingBuffer>,
    mut source: Box<dyn ByteSource>,
    scratch_size: usize,
    cancel: CancellationToken,
    progress: Arc<Progress>,
) {
    let start = source.start();
    let outcome = copy(&ring, source.as_mut(), scratch_size, &cancel, &progress).await;
    let copied = progress.bytes_copied.load(Ordering::Acquire);

    match outcome {
        Ok(()) => debug!("Transfer from {} reached end of data after {} bytes", start, copied),
        Err(e) if e.is_shutdown() => {
            debug!("Transfer from {} stopped after {} bytes", start, copied)
        }
        Err(e) => {
            warn!("Transfer from {} failed after {} bytes: {}", start, copied, e);
            *progress.failure.lock() = Some(e);
        }
    }

    ring.finish();
    source.close();
    progress.finished.store(true, Ordering::Release);
}

async fn copy(
    ring: &RingBuffer,
    source: &mut dyn ByteSource,
    scratch_size: usize,
    cancel: &CancellationToken,
    progress: &Progress,
) -> Result<()> {
    let mut scratch = pool_for(scratch_size).acquire();
    let chunk = scratch.len().min(ring.capacity());

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            n = source.read(&mut scratch[..chunk]) => n?,
        };
        if n == 0 {
            return Ok(());
        }

        // A chunk may land in several writes; only a full ring blocks.
        let mut written = 0;
        while written < n {
            let free = wait_for_space(ring, cancel).await?;
            let len = free.min(n - written);
            ring.write(&scratch[written..written + len])?;
            written += len;
            progress.bytes_copied.fetch_add(len as u64, Ordering::AcqRel);
        }
    }
}

/// Wait until the reader has freed some space. Returns the free byte count.
async fn wait_for_space(ring: &RingBuffer, cancel: &CancellationToken) -> Result<usize> {
    loop {
        let notified = ring.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if ring.is_closed() {
            return Err(BufferError::Closed.into());
        }
        let free = ring.free();
        if free > 0 {
            return Ok(free);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            _ = &mut notified => {}
        }
    }
}
