//! Integration tests for seekable range streams.
//!
//! `stream` drives streams against deterministic in-memory sources;
//! `http` checks the wire contract against a local HTTP/1.1 server.

mod http;
mod stream;
