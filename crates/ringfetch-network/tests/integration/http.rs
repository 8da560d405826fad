//! Wire contract against a local origin.

use crate::range_server::{Mode, RangeServer};
use ringfetch_network::testing::{pattern, StaticResolver};
use ringfetch_network::{
    BufferTier, ByteSource, Connection, ConnectionConfig, FactoryConfig, HttpConnector, NodeId,
    Stream, StreamConfig, StreamError, StreamFactory, UrlResolver,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn read_to_end(source: &mut dyn ByteSource) -> Result<Vec<u8>, StreamError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn test_connection_streams_suffix() {
    let server = RangeServer::start(10_000, Mode::Partial).await;
    let mut conn = Connection::new(
        &server.url(),
        2500,
        ConnectionConfig::default(),
        CancellationToken::new(),
    )
    .unwrap();

    let body = read_to_end(&mut conn).await.unwrap();
    assert_eq!(body, pattern(2500, 7500));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /file HTTP/1.1"));
    assert_eq!(server.ranges(), vec!["bytes=2500-".to_string()]);
    assert!(requests[0].contains("user-agent: ringfetch/"));

    conn.close();
    conn.close();
}

#[tokio::test]
async fn test_connection_rejects_full_response() {
    let server = RangeServer::start(1000, Mode::IgnoreRange).await;
    let mut conn = Connection::new(
        &server.url(),
        100,
        ConnectionConfig::default(),
        CancellationToken::new(),
    )
    .unwrap();

    let mut buf = [0u8; 64];
    assert!(matches!(
        conn.read(&mut buf).await,
        Err(StreamError::UnexpectedStatus { status: 200 })
    ));
    // A failed connection is not retried.
    assert!(conn.read(&mut buf).await.is_err());
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_connection_sends_configured_headers() {
    let server = RangeServer::start(100, Mode::Partial).await;
    let config = ConnectionConfig::default().with_bearer_token("secret");
    let mut conn =
        Connection::new(&server.url(), 0, config, CancellationToken::new()).unwrap();

    let body = read_to_end(&mut conn).await.unwrap();
    assert_eq!(body.len(), 100);
    assert!(server.requests()[0].contains("authorization: Bearer secret"));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/file", listener.local_addr().unwrap());
    drop(listener);

    let mut conn =
        Connection::new(&url, 0, ConnectionConfig::default(), CancellationToken::new()).unwrap();
    let mut buf = [0u8; 8];
    let err = conn.read(&mut buf).await.unwrap_err();
    assert!(matches!(err, StreamError::Network(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_stream_seeks_with_new_range_requests() {
    let server = RangeServer::start(100_000, Mode::Partial).await;
    let stream = Stream::new(
        NodeId(1),
        server.url(),
        100_000,
        BufferTier::new(4096, 256),
        Arc::new(HttpConnector::default()),
        StreamConfig::default(),
    );

    let mut buf = [0u8; 100];
    let outcome = stream.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(outcome.bytes_read, 100);
    assert_eq!(&buf[..], pattern(0, 100).as_slice());

    let outcome = stream.read_at(&mut buf, 50_000).await.unwrap();
    assert_eq!(outcome.bytes_read, 100);
    assert_eq!(&buf[..], pattern(50_000, 100).as_slice());

    assert_eq!(
        server.ranges(),
        vec!["bytes=0-".to_string(), "bytes=49744-".to_string()]
    );

    stream.close().await.unwrap();
    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_reports_origin_ignoring_range() {
    let server = RangeServer::start(10_000, Mode::IgnoreRange).await;
    let stream = Stream::new(
        NodeId(2),
        server.url(),
        10_000,
        BufferTier::new(4096, 256),
        Arc::new(HttpConnector::default()),
        StreamConfig::default(),
    );

    let mut buf = [0u8; 100];
    let err = stream.read_at(&mut buf, 5000).await.unwrap_err();
    assert!(matches!(err, StreamError::UnexpectedStatus { status: 200 }));
    assert!(!err.is_transient());

    // Every retry issues a fresh request and fails the same way.
    let err = stream.read_at(&mut buf, 5000).await.unwrap_err();
    assert!(matches!(err, StreamError::UnexpectedStatus { status: 200 }));
    assert_eq!(
        server.ranges(),
        vec!["bytes=4744-".to_string(), "bytes=4744-".to_string()]
    );

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_factory_stream_reads_tail() {
    let server = RangeServer::start(1000, Mode::Partial).await;
    let resolver: Arc<dyn UrlResolver> =
        Arc::new(StaticResolver::new().with_url(NodeId(3), server.url()));
    let factory = StreamFactory::new(resolver, FactoryConfig::default());

    let stream = factory.new_stream(NodeId(3), 1000).await.unwrap();
    let mut buf = [0u8; 100];
    let outcome = stream.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(&buf[..outcome.bytes_read], pattern(0, 100).as_slice());

    let outcome = stream.read_at(&mut buf, 950).await.unwrap();
    assert_eq!(outcome.bytes_read, 50);
    assert!(outcome.eof);
    assert_eq!(&buf[..50], pattern(950, 50).as_slice());

    // The whole file fits the ring, so the tail needed no new request.
    assert_eq!(server.ranges().len(), 1);
    stream.close().await.unwrap();
    factory.close();
}
