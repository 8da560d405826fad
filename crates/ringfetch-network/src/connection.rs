//! HTTP range connection
//!
//! A [`Connection`] is one logical range fetch: `GET` with
//! `Range: bytes=<start>-`, issued lazily on the first read and consumed as a
//! byte stream until end of body. It is never reused; reconnecting means a
//! new connection at a new offset.

use crate::{ConnectionConfig, Result, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// A forward-only byte source bound to one start offset.
#[async_trait]
pub trait ByteSource: Send {
    /// Absolute offset of the first byte this source yields.
    fn start(&self) -> u64;

    /// Read the next bytes into `buf`. `Ok(0)` means end of data.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the source. Idempotent.
    fn close(&mut self);
}

/// Opens byte sources for a URL at an absolute offset.
pub trait Connector: Send + Sync {
    /// Create a source starting at `start`. Must not perform I/O; the source
    /// opens itself on first read. `cancel` aborts any in-flight I/O.
    fn connect(
        &self,
        url: &str,
        start: u64,
        cancel: CancellationToken,
    ) -> Result<Box<dyn ByteSource>>;
}

/// Connector producing HTTP range [`Connection`]s
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    config: ConnectionConfig,
}

impl HttpConnector {
    /// Create a connector
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Connection settings
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl Connector for HttpConnector {
    fn connect(
        &self,
        url: &str,
        start: u64,
        cancel: CancellationToken,
    ) -> Result<Box<dyn ByteSource>> {
        let connection = Connection::new(url, start, self.config.clone(), cancel)?;
        Ok(Box::new(connection))
    }
}

enum ConnState {
    /// Request not issued yet
    Idle,
    /// Body streaming
    Open(Response),
    /// Body fully consumed
    Finished,
    /// Request or body failed
    Failed,
    /// Closed by the owner
    Closed,
}

/// Single-use HTTP range request
pub struct Connection {
    url: Url,
    start: u64,
    config: ConnectionConfig,
    cancel: CancellationToken,
    state: ConnState,
    pending: Bytes,
}

impl Connection {
    /// Create a connection for `url` starting at `start`.
    ///
    /// Fails synchronously on a malformed URL; nothing is sent until the
    /// first read.
    pub fn new(
        url: &str,
        start: u64,
        config: ConnectionConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(StreamError::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        Ok(Self {
            url,
            start,
            config,
            cancel: cancel.child_token(),
            state: ConnState::Idle,
            pending: Bytes::new(),
        })
    }

    /// Get the range header value
    pub fn range_header(&self) -> String {
        format!("bytes={}-", self.start)
    }

    /// Target URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the request has been issued
    pub fn is_opened(&self) -> bool {
        !matches!(self.state, ConnState::Idle)
    }

    /// Whether [`close`](ByteSource::close) has been called
    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnState::Closed)
    }

    /// Dedicated transport: HTTP/1.1, nothing pooled across connections.
    fn build_client(&self) -> Result<Client> {
        Client::builder()
            .http1_only()
            .pool_max_idle_per_host(0)
            .timeout(self.config.timeout)
            .connect_timeout(self.config.connect_timeout)
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| StreamError::Configuration(e.to_string()))
    }

    fn request(&self) -> Result<RequestBuilder> {
        let client = self.build_client()?;
        let mut request = client
            .get(self.url.clone())
            .header(header::RANGE, self.range_header());

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        Ok(request)
    }

    async fn open(&mut self) -> Result<()> {
        debug!("Requesting {} from offset {}", self.url, self.start);
        let sent = match self.request() {
            Ok(request) => send(request, &self.cancel, self.timeout_ms()).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(response) => {
                self.state = ConnState::Open(response);
                Ok(())
            }
            Err(e) => {
                self.state = ConnState::Failed;
                Err(e)
            }
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout.as_millis().try_into().unwrap_or(u64::MAX)
    }
}

async fn send(
    request: RequestBuilder,
    cancel: &CancellationToken,
    timeout_ms: u64,
) -> Result<Response> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StreamError::Cancelled),
        response = request.send() => response.map_err(|e| request_error(e, timeout_ms))?,
    };

    match response.status() {
        StatusCode::PARTIAL_CONTENT => Ok(response),
        status => Err(StreamError::UnexpectedStatus {
            status: status.as_u16(),
        }),
    }
}

fn request_error(e: reqwest::Error, timeout_ms: u64) -> StreamError {
    if e.is_timeout() {
        StreamError::RequestTimeout(timeout_ms)
    } else {
        e.into()
    }
}

#[async_trait]
impl ByteSource for Connection {
    fn start(&self) -> u64 {
        self.start
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if matches!(self.state, ConnState::Idle) {
            self.open().await?;
        }

        let timeout_ms = self.timeout_ms();
        loop {
            if !self.pending.is_empty() {
                let n = buf.len().min(self.pending.len());
                buf[..n].copy_from_slice(&self.pending.split_to(n));
                return Ok(n);
            }

            let next = match &mut self.state {
                ConnState::Open(response) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
                        chunk = response.chunk() => chunk,
                    }
                }
                ConnState::Finished => return Ok(0),
                ConnState::Closed => return Err(StreamError::Closed),
                ConnState::Idle | ConnState::Failed => {
                    return Err(StreamError::Network("range request failed".into()))
                }
            };

            match next {
                Ok(Some(chunk)) => self.pending = chunk,
                Ok(None) => {
                    debug!("Range body from {} complete: {}", self.start, self.url);
                    self.state = ConnState::Finished;
                    return Ok(0);
                }
                Err(e) => {
                    self.state = ConnState::Failed;
                    return Err(request_error(e, timeout_ms));
                }
            }
        }
    }

    fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.cancel.cancel();
        self.state = ConnState::Closed;
        self.pending = Bytes::new();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url.as_str())
            .field("start", &self.start)
            .field("opened", &self.is_opened())
            .field("closed", &self.is_closed())
            .finish()
    }
}
