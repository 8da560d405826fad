//! In-memory byte sources and URL resolvers
//!
//! Deterministic stand-ins for the HTTP origin and the filesystem client,
//! usable from unit and integration tests without any network.

use crate::{ByteSource, Connector, NodeId, Result, StreamError, UrlResolver};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Reference byte at absolute `position`.
#[inline]
pub fn pattern_byte(position: u64) -> u8 {
    (position % 251) as u8
}

/// Reference bytes for `[start, start + len)`.
pub fn pattern(start: u64, len: usize) -> Vec<u8> {
    (start..start + len as u64).map(pattern_byte).collect()
}

/// Connector serving [`pattern`] bytes for a file of fixed size.
#[derive(Debug, Clone)]
pub struct PatternConnector {
    size: u64,
    chunk: usize,
    delay: Duration,
    fail_at: Option<u64>,
    connections: Arc<Mutex<Vec<u64>>>,
}

impl PatternConnector {
    /// Serve a file of `size` bytes
    pub fn new(size: u64) -> Self {
        Self {
            size,
            chunk: 4096,
            delay: Duration::ZERO,
            fail_at: None,
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Largest read a source returns at once
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Sleep before every read
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every source once it reaches absolute position `at`
    pub fn with_fail_at(mut self, at: u64) -> Self {
        self.fail_at = Some(at);
        self
    }

    /// File size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Start offsets of every source opened so far, in order
    pub fn connections(&self) -> Vec<u64> {
        self.connections.lock().clone()
    }
}

impl Connector for PatternConnector {
    fn connect(
        &self,
        url: &str,
        start: u64,
        cancel: CancellationToken,
    ) -> Result<Box<dyn ByteSource>> {
        Url::parse(url)?;
        self.connections.lock().push(start);

        Ok(Box::new(PatternSource {
            start,
            position: start,
            size: self.size,
            chunk: self.chunk,
            delay: self.delay,
            fail_at: self.fail_at,
            cancel: cancel.child_token(),
            closed: false,
        }))
    }
}

/// Source produced by [`PatternConnector`]
#[derive(Debug)]
pub struct PatternSource {
    start: u64,
    position: u64,
    size: u64,
    chunk: usize,
    delay: Duration,
    fail_at: Option<u64>,
    cancel: CancellationToken,
    closed: bool,
}

#[async_trait]
impl ByteSource for PatternSource {
    fn start(&self) -> u64 {
        self.start
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        if self.position >= self.size {
            return Ok(0);
        }
        let limit = match self.fail_at {
            Some(at) if self.position >= at => {
                return Err(StreamError::Network(format!("connection reset at {at}")));
            }
            Some(at) => at.min(self.size),
            None => self.size,
        };

        let n = (buf.len().min(self.chunk) as u64).min(limit - self.position) as usize;
        for (i, byte) in buf[..n].iter_mut().enumerate() {
            *byte = pattern_byte(self.position + i as u64);
        }
        self.position += n as u64;
        Ok(n)
    }

    fn close(&mut self) {
        self.closed = true;
        self.cancel.cancel();
    }
}

/// Resolver answering from a fixed table
#[derive(Debug, Default)]
pub struct StaticResolver {
    urls: Mutex<HashMap<NodeId, String>>,
    calls: AtomicUsize,
}

impl StaticResolver {
    /// Empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    pub fn with_url(self, node: NodeId, url: impl Into<String>) -> Self {
        self.set_url(node, url);
        self
    }

    /// Replace the URL served for a node
    pub fn set_url(&self, node: NodeId, url: impl Into<String>) {
        self.urls.lock().insert(node, url.into());
    }

    /// Number of resolutions performed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UrlResolver for StaticResolver {
    async fn stream_url(&self, node: NodeId) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.urls
            .lock()
            .get(&node)
            .cloned()
            .ok_or_else(|| StreamError::Resolve {
                node: node.to_string(),
                message: "unknown node".into(),
            })
    }
}
