//! Channel behaviour against scripted connections.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use relaygate_core::{Channel, ChannelConfig, ChannelError, ChannelMeta, Conn, TransportError, WorkerPool};
use relaygate_harness::{CollectingWriter, RecordingListener, ScriptedReader, wait_until};
use relaygate_proto::{Frame, OpCode};

fn channel(reader: ScriptedReader, writer: &CollectingWriter, config: &ChannelConfig) -> Arc<Channel> {
    Channel::new("c1", Conn::new(reader, writer.clone()), ChannelMeta::new(), config)
}

fn binary(payload: &'static [u8]) -> Frame {
    Frame::new(OpCode::Binary, Bytes::from_static(payload))
}

#[tokio::test]
async fn pushes_are_written_in_order() {
    let writer = CollectingWriter::new();
    let ch = channel(ScriptedReader::hanging([]), &writer, &ChannelConfig::default());

    for i in 0..50u32 {
        ch.push(Bytes::from(i.to_be_bytes().to_vec())).await.unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || writer.payloads().len() == 50).await);

    let order: Vec<u32> =
        writer.payloads().iter().map(|p| u32::from_be_bytes([p[0], p[1], p[2], p[3]])).collect();
    assert_eq!(order, (0..50).collect::<Vec<_>>());
    assert!(writer.flushes() <= 50);
}

#[tokio::test]
async fn push_after_close_fails() {
    let writer = CollectingWriter::new();
    let ch = channel(ScriptedReader::hanging([]), &writer, &ChannelConfig::default());
    ch.close();

    let err = ch.push(Bytes::from_static(b"late")).await.unwrap_err();
    assert!(matches!(err, ChannelError::Closed(id) if id == "c1"));
}

#[tokio::test]
async fn concurrent_close_is_safe() {
    let writer = CollectingWriter::new();
    let ch = channel(ScriptedReader::hanging([]), &writer, &ChannelConfig::default());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let ch = Arc::clone(&ch);
            tokio::spawn(async move { ch.close() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert!(ch.is_closed());
    assert!(ch.closed().is_cancelled());
    assert!(ch.push(Bytes::from_static(b"x")).await.is_err());
}

#[tokio::test]
async fn ping_gets_pong_and_payloads_are_dispatched() {
    let writer = CollectingWriter::new();
    let reader = ScriptedReader::new([
        Frame::new(OpCode::Ping, Bytes::new()),
        binary(b""),
        binary(b"hello"),
    ]);
    let ch = channel(reader, &writer, &ChannelConfig::default());
    let listener = RecordingListener::new();
    let pool = WorkerPool::new(2, 8);

    let reason = ch.read_loop(listener.clone(), &pool).await.unwrap_err();
    assert!(matches!(reason, ChannelError::Transport(TransportError::Closed)));

    assert!(wait_until(Duration::from_secs(1), || listener.count() == 1).await);
    assert_eq!(listener.received()[0], ("c1".to_owned(), Bytes::from_static(b"hello")));
    assert!(writer.frames().iter().any(|(op, _)| *op == OpCode::Pong));
    pool.shutdown().await;
}

#[tokio::test]
async fn close_frame_ends_read_loop() {
    let writer = CollectingWriter::new();
    let reader = ScriptedReader::hanging([Frame::new(OpCode::Close, Bytes::new()), binary(b"never")]);
    let ch = channel(reader, &writer, &ChannelConfig::default());
    let listener = RecordingListener::new();
    let pool = WorkerPool::new(1, 1);

    let reason = ch.read_loop(listener.clone(), &pool).await.unwrap_err();
    assert!(matches!(reason, ChannelError::RemoteClosed));
    assert_eq!(listener.count(), 0);
}

#[tokio::test]
async fn idle_channel_hits_read_deadline() {
    let writer = CollectingWriter::new();
    let config = ChannelConfig { read_wait: Duration::from_millis(50), ..ChannelConfig::default() };
    let ch = channel(ScriptedReader::hanging([]), &writer, &config);
    let pool = WorkerPool::new(1, 1);

    let reason = ch.read_loop(RecordingListener::new(), &pool).await.unwrap_err();
    assert!(matches!(reason, ChannelError::DeadlineExceeded));
}

#[tokio::test]
async fn local_close_stops_read_loop() {
    let writer = CollectingWriter::new();
    let ch = channel(ScriptedReader::hanging([]), &writer, &ChannelConfig::default());
    let pool = Arc::new(WorkerPool::new(1, 1));

    let looping = Arc::clone(&ch);
    let loop_pool = Arc::clone(&pool);
    let handle = tokio::spawn(async move { looping.read_loop(RecordingListener::new(), &loop_pool).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    ch.close();

    let reason = handle.await.unwrap().unwrap_err();
    assert!(matches!(reason, ChannelError::Closed(_)));
}
