//! Stream and connection configuration

use ringfetch_core::BufferSizePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single range connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Whole-request timeout. A body may stream for hours.
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Extra request headers (e.g. authorization)
    pub headers: Vec<(String, String)>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(6 * 60 * 60),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("ringfetch/{}", env!("CARGO_PKG_VERSION")),
            headers: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Bearer token authentication
    pub fn with_bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.with_header("Authorization", value)
    }
}

/// Configuration shared by every stream a factory creates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Default wait for a position to become resident
    pub read_timeout: Duration,
    /// Hard ceiling on any wait, whatever the caller asks for
    pub max_read_timeout: Duration,
    /// Scratch size for a transfer's copy loop
    pub scratch_size: usize,
    /// File size to buffer tier mapping
    pub policy: BufferSizePolicy,
    /// Connection settings
    pub connection: ConnectionConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_read_timeout: Duration::from_secs(120),
            scratch_size: Self::DEFAULT_SCRATCH_SIZE,
            policy: BufferSizePolicy::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Copy-loop scratch used unless configured (32 KB)
    pub const DEFAULT_SCRATCH_SIZE: usize = 32 * 1024;
    pub const MIN_SCRATCH_SIZE: usize = 4 * 1024;
    pub const MAX_SCRATCH_SIZE: usize = 1024 * 1024;

    /// Set default read wait
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the wait ceiling
    pub fn with_max_read_timeout(mut self, timeout: Duration) -> Self {
        self.max_read_timeout = timeout;
        self
    }

    /// Set scratch size (clamped to the supported range)
    pub fn with_scratch_size(mut self, size: usize) -> Self {
        self.scratch_size = size.clamp(Self::MIN_SCRATCH_SIZE, Self::MAX_SCRATCH_SIZE);
        self
    }

    /// Set size policy
    pub fn with_policy(mut self, policy: BufferSizePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set connection settings
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Wait actually applied for a caller-supplied timeout
    pub fn effective_timeout(&self, requested: Duration) -> Duration {
        requested.min(self.max_read_timeout)
    }
}

/// Stream factory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// How long a resolved stream URL stays valid
    pub url_ttl: Duration,
    /// Settings for every stream created
    pub stream: StreamConfig,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            url_ttl: Duration::from_secs(15 * 60),
            stream: StreamConfig::default(),
        }
    }
}

impl FactoryConfig {
    /// Set URL cache TTL
    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    /// Set stream settings
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }
}
