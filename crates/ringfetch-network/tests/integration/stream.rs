//! Stream behaviour over deterministic in-memory sources.

use ringfetch_network::testing::{pattern, PatternConnector, StaticResolver};
use ringfetch_network::{
    BufferTier, FactoryConfig, NodeId, SeekableStream, Stream, StreamConfig, StreamError,
    StreamFactory, StreamState,
};
use std::sync::Arc;
use std::time::Duration;

fn stream_with(connector: &PatternConnector, tier: BufferTier, config: StreamConfig) -> Stream {
    Stream::new(
        NodeId(42),
        "http://origin/file",
        connector.size(),
        tier,
        Arc::new(connector.clone()),
        config,
    )
}

fn stream(connector: &PatternConnector, capacity: usize, margin: u64) -> Stream {
    stream_with(
        connector,
        BufferTier::new(capacity, margin),
        StreamConfig::default().with_read_timeout(Duration::from_secs(10)),
    )
}

#[tokio::test]
async fn test_seek_outside_window_replaces_transfer() {
    let connector = PatternConnector::new(1000);
    let stream = stream(&connector, 100, 10);

    let mut buf = [0u8; 20];
    let outcome = stream.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(outcome.bytes_read, 20);
    assert_eq!(&buf[..], pattern(0, 20).as_slice());
    assert_eq!(connector.connections(), vec![0]);

    let outcome = stream.read_at(&mut buf, 500).await.unwrap();
    assert_eq!(outcome.bytes_read, 20);
    assert_eq!(&buf[..], pattern(500, 20).as_slice());
    assert_eq!(connector.connections(), vec![0, 490]);
    assert_eq!(stream.buffered_range().start, 520);
}

#[tokio::test]
async fn test_reconnect_starts_margin_behind() {
    let connector = PatternConnector::new(1000);
    let stream = stream(&connector, 10, 3);

    let mut buf = [0u8; 10];
    stream.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(&buf[..], pattern(0, 10).as_slice());

    let mut buf = [0u8; 4];
    stream.read_at(&mut buf, 50).await.unwrap();
    assert_eq!(&buf[..], pattern(50, 4).as_slice());
    assert_eq!(connector.connections(), vec![0, 47]);
}

#[tokio::test]
async fn test_sequential_read_of_whole_file() {
    let connector = PatternConnector::new(10_000).with_chunk(333);
    let stream = stream(&connector, 1024, 64);

    let mut out = Vec::new();
    let mut buf = [0u8; 700];
    loop {
        let outcome = stream.read_at(&mut buf, out.len() as u64).await.unwrap();
        out.extend_from_slice(&buf[..outcome.bytes_read]);
        if outcome.eof {
            break;
        }
    }

    assert_eq!(out, pattern(0, 10_000));
    assert_eq!(connector.connections(), vec![0]);
}

#[tokio::test]
async fn test_read_ahead_of_full_ring_after_small_consume() {
    let connector = PatternConnector::new(1000);
    let stream = stream(&connector, 100, 10);

    let mut buf = [0u8; 20];
    stream.read_at(&mut buf, 0).await.unwrap();

    let outcome = stream
        .read_at_timeout(&mut buf, 90, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(outcome.bytes_read, 20);
    assert_eq!(&buf[..], pattern(90, 20).as_slice());
    assert_eq!(connector.connections(), vec![0]);
}

#[tokio::test]
async fn test_read_past_write_cursor_of_full_ring() {
    let connector = PatternConnector::new(1000).with_chunk(64);
    let stream = stream(&connector, 100, 10);

    let mut buf = [0u8; 4];
    stream.read_at(&mut buf, 0).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while stream.buffered_range() != (4..104) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("ring never filled");

    // The window ends at 104: the read comes back short instead of stalling.
    let mut buf = [0u8; 16];
    let outcome = stream
        .read_at_timeout(&mut buf, 102, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(outcome.bytes_read, 2);
    assert_eq!(&buf[..2], pattern(102, 2).as_slice());
    assert_eq!(connector.connections(), vec![0]);
}

#[tokio::test]
async fn test_tail_read_reports_eof() {
    let connector = PatternConnector::new(1000);
    let stream = stream(&connector, 100, 10);

    let mut buf = [0u8; 50];
    let outcome = stream.read_at(&mut buf, 980).await.unwrap();
    assert_eq!(outcome.bytes_read, 20);
    assert!(outcome.eof);
    assert_eq!(&buf[..20], pattern(980, 20).as_slice());

    let outcome = stream.read_at(&mut buf, 1000).await.unwrap();
    assert_eq!(outcome.bytes_read, 0);
    assert!(outcome.eof);
    assert_eq!(connector.connections(), vec![970]);
}

#[tokio::test]
async fn test_timeout_leaves_stream_usable() {
    let connector = PatternConnector::new(1000).with_delay(Duration::from_millis(300));
    let stream = stream(&connector, 100, 10);

    let mut buf = [0u8; 10];
    let err = stream
        .read_at_timeout(&mut buf, 0, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Timeout { position: 0, .. }));
    assert!(err.is_transient());
    assert_eq!(stream.state(), StreamState::Filling);

    let outcome = stream.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(&buf[..outcome.bytes_read], pattern(0, 10).as_slice());
    assert_eq!(connector.connections(), vec![0]);
}

#[tokio::test]
async fn test_wait_is_capped_by_ceiling() {
    let connector = PatternConnector::new(1000).with_delay(Duration::from_secs(30));
    let config = StreamConfig::default().with_max_read_timeout(Duration::from_millis(50));
    let stream = stream_with(&connector, BufferTier::new(100, 10), config);

    let mut buf = [0u8; 10];
    let err = stream
        .read_at_timeout(&mut buf, 0, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StreamError::Timeout {
            duration_ms: 50,
            ..
        }
    ));
    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_transfer_replaced_on_next_read() {
    let connector = PatternConnector::new(1000).with_fail_at(300);
    let stream = stream(&connector, 100, 10);

    let mut buf = [0u8; 20];
    stream.read_at(&mut buf, 0).await.unwrap();

    // The transfer from 280 stops at 300: the resident part is delivered.
    let outcome = stream.read_at(&mut buf, 290).await.unwrap();
    assert_eq!(outcome.bytes_read, 10);
    assert!(!outcome.eof);
    assert_eq!(&buf[..10], pattern(290, 10).as_slice());
    assert_eq!(connector.connections(), vec![0, 280]);

    let mut buf = [0u8; 10];
    let err = stream.read_at(&mut buf, 300).await.unwrap_err();
    assert!(matches!(err, StreamError::TransferEnded { position: 300 }));
    assert!(err.is_transient());
    assert_eq!(connector.connections(), vec![0, 280, 290]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_are_serialized() {
    let connector = PatternConnector::new(100_000).with_chunk(512);
    let stream = Arc::new(stream(&connector, 4096, 128));

    let mut tasks = Vec::new();
    for i in 0..8u64 {
        let stream = Arc::clone(&stream);
        tasks.push(tokio::spawn(async move {
            for j in 0..5u64 {
                let position = (i * 12_000 + j * 1_000) % 99_000;
                let mut buf = [0u8; 200];
                let outcome = stream.read_at(&mut buf, position).await.unwrap();
                assert_eq!(outcome.bytes_read, 200);
                assert_eq!(&buf[..], pattern(position, 200).as_slice());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_close_unblocks_waiting_read() {
    let connector = PatternConnector::new(1000).with_delay(Duration::from_secs(60));
    let stream = Arc::new(stream(&connector, 100, 10));

    let reader = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move {
            let mut buf = [0u8; 10];
            stream.read_at(&mut buf, 0).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(5), stream.close())
        .await
        .expect("close blocked")
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader blocked")
        .unwrap();
    assert!(matches!(result, Err(StreamError::Closed)));
    assert_eq!(stream.state(), StreamState::Closed);

    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_behind_trait_object() {
    let connector = PatternConnector::new(5000);
    let stream: Box<dyn SeekableStream> = Box::new(stream(&connector, 256, 16));

    assert_eq!(stream.id(), NodeId(42));
    assert_eq!(stream.size(), 5000);
    assert_eq!(stream.url(), "http://origin/file");

    let mut buf = [0u8; 64];
    let outcome = stream.read_at(&mut buf, 4000).await.unwrap();
    assert_eq!(&buf[..outcome.bytes_read], pattern(4000, 64).as_slice());

    stream.close().await.unwrap();
    assert!(matches!(
        stream.read_at(&mut buf, 0).await,
        Err(StreamError::Closed)
    ));
}

#[tokio::test]
async fn test_factory_streams_share_resolution() {
    let connector = Arc::new(PatternConnector::new(2000));
    let resolver = Arc::new(StaticResolver::new().with_url(NodeId(5), "http://origin/5"));
    let factory = StreamFactory::with_connector(
        Arc::clone(&resolver) as _,
        Arc::clone(&connector) as _,
        FactoryConfig::default(),
    );

    let first = factory.new_stream(NodeId(5), 2000).await.unwrap();
    let second = factory.new_stream(NodeId(5), 2000).await.unwrap();
    assert_eq!(resolver.calls(), 1);

    let mut buf = [0u8; 32];
    first.read_at(&mut buf, 100).await.unwrap();
    assert_eq!(&buf[..], pattern(100, 32).as_slice());
    second.read_at(&mut buf, 1500).await.unwrap();
    assert_eq!(&buf[..], pattern(1500, 32).as_slice());

    first.close().await.unwrap();
    second.close().await.unwrap();
}
