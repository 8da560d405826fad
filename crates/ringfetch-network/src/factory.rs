//! Stream construction with cached URL resolution

use crate::{Connector, FactoryConfig, HttpConnector, Result, Stream, StreamError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Identifier of a file node in the remote filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

/// Supplies streamable URLs for nodes.
///
/// Implementations must be idempotent: the factory caches answers.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    /// URL serving the node's bytes with range support
    async fn stream_url(&self, node: NodeId) -> Result<String>;
}

#[derive(Debug, Clone)]
struct CachedUrl {
    url: String,
    expires_at: Instant,
}

impl CachedUrl {
    fn new(url: String, ttl: Duration) -> Self {
        Self {
            url,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Creates [`Stream`]s for nodes, caching resolved URLs per node.
pub struct StreamFactory {
    resolver: Arc<dyn UrlResolver>,
    connector: Arc<dyn Connector>,
    config: FactoryConfig,
    urls: DashMap<NodeId, CachedUrl>,
    closed: AtomicBool,
}

impl StreamFactory {
    /// Factory fetching over HTTP with the configured connection settings
    pub fn new(resolver: Arc<dyn UrlResolver>, config: FactoryConfig) -> Self {
        let connector = Arc::new(HttpConnector::new(config.stream.connection.clone()));
        Self::with_connector(resolver, connector, config)
    }

    /// Factory using a custom transport
    pub fn with_connector(
        resolver: Arc<dyn UrlResolver>,
        connector: Arc<dyn Connector>,
        config: FactoryConfig,
    ) -> Self {
        Self {
            resolver,
            connector,
            config,
            urls: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Build a stream for `node`, whose file is `size` bytes.
    ///
    /// The ring size comes from the size policy. No connection is made
    /// until the stream is first read.
    pub async fn new_stream(&self, node: NodeId, size: u64) -> Result<Stream> {
        self.ensure_open()?;
        let url = self.resolve(node).await?;
        let tier = self.config.stream.policy.tier_for(size);

        debug!(
            "New stream for node {} ({} bytes, {} byte ring)",
            node, size, tier.capacity
        );
        Ok(Stream::new(
            node,
            url,
            size,
            tier,
            Arc::clone(&self.connector),
            self.config.stream.clone(),
        ))
    }

    /// Stream URL for `node`, from cache while fresh.
    pub async fn resolve(&self, node: NodeId) -> Result<String> {
        self.ensure_open()?;

        if let Some(url) = self.cached(node) {
            debug!("URL cache hit for node {}", node);
            return Ok(url);
        }

        debug!("URL cache miss for node {}", node);
        let url = self.resolver.stream_url(node).await?;

        // Closed while resolving: hand nothing back.
        self.ensure_open()?;
        self.urls
            .insert(node, CachedUrl::new(url.clone(), self.config.url_ttl));
        Ok(url)
    }

    fn cached(&self, node: NodeId) -> Option<String> {
        let url = self
            .urls
            .get(&node)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.url.clone());

        if url.is_none() {
            self.urls.remove_if(&node, |_, entry| entry.is_expired());
        }
        url
    }

    /// Drop the cached URL for `node`. Returns whether one was cached.
    pub fn invalidate(&self, node: NodeId) -> bool {
        self.urls.remove(&node).is_some()
    }

    /// Drop every cached URL and refuse further streams. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self.urls.len();
        self.urls.clear();
        info!("Stream factory closed, dropped {} cached URLs", dropped);
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of cached URLs, expired ones included
    pub fn cached_urls(&self) -> usize {
        self.urls.len()
    }

    /// Factory configuration
    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(StreamError::Closed)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for StreamFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFactory")
            .field("config", &self.config)
            .field("cached_urls", &self.urls.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
