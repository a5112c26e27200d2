//! In-memory connections.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use relaygate_core::{Conn, FrameReader, FrameWriter, TransportError};
use relaygate_proto::{Frame, OpCode};

/// Buffer size of each direction of a [`memory_pair`].
const PIPE_CAPACITY: usize = 64 * 1024;

/// Two connected [`Conn`]s speaking the TCP framing over an in-memory pipe.
pub fn memory_pair() -> (Conn, Conn) {
    let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
    (relaygate_transport::tcp::wrap_stream(a), relaygate_transport::tcp::wrap_stream(b))
}

/// Reader that replays a fixed list of frames.
///
/// Once the script runs out it either reports the connection closed or
/// blocks forever, which lets tests exercise read timeouts.
#[derive(Debug)]
pub struct ScriptedReader {
    frames: VecDeque<Frame>,
    hang_when_done: bool,
}

impl ScriptedReader {
    /// Replay `frames`, then report the connection closed.
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self { frames: frames.into_iter().collect(), hang_when_done: false }
    }

    /// Replay `frames`, then never return.
    pub fn hanging(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self { frames: frames.into_iter().collect(), hang_when_done: true }
    }
}

#[async_trait]
impl FrameReader for ScriptedReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(frame),
            None if self.hang_when_done => std::future::pending().await,
            None => Err(TransportError::Closed),
        }
    }
}

/// Frames recorded by a [`CollectingWriter`].
pub type Written = Arc<Mutex<Vec<(OpCode, Vec<u8>)>>>;

/// Writer that records every frame it is given.
#[derive(Debug, Default, Clone)]
pub struct CollectingWriter {
    frames: Written,
    flushes: Arc<Mutex<usize>>,
}

impl CollectingWriter {
    /// Empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written so far, in order.
    pub fn frames(&self) -> Vec<(OpCode, Vec<u8>)> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Payloads of the binary frames written so far.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.frames().into_iter().filter(|(op, _)| *op == OpCode::Binary).map(|(_, p)| p).collect()
    }

    /// Number of flush calls.
    pub fn flushes(&self) -> usize {
        self.flushes.lock().map(|n| *n).unwrap_or_default()
    }
}

#[async_trait]
impl FrameWriter for CollectingWriter {
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), TransportError> {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push((opcode, payload.to_vec()));
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if let Ok(mut n) = self.flushes.lock() {
            *n += 1;
        }
        Ok(())
    }
}

/// A [`Conn`] that replays `reader` and records into a clone of `writer`.
pub fn scripted_conn(reader: ScriptedReader, writer: &CollectingWriter) -> Conn {
    Conn::new(reader, writer.clone())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn memory_pair_carries_frames_both_ways() {
        let (mut a, mut b) = memory_pair();
        a.write_frame(OpCode::Binary, b"ping").await.unwrap();
        a.flush().await.unwrap();
        let frame = b.read_frame().await.unwrap();
        assert_eq!(frame.opcode(), OpCode::Binary);
        assert_eq!(frame.into_payload(), Bytes::from_static(b"ping"));

        b.write_frame(OpCode::Close, b"bye").await.unwrap();
        b.flush().await.unwrap();
        assert_eq!(a.read_frame().await.unwrap().opcode(), OpCode::Close);
    }

    #[tokio::test]
    async fn scripted_reader_reports_close_when_done() {
        let mut reader = ScriptedReader::new([Frame::new(OpCode::Binary, Bytes::from_static(b"x"))]);
        assert!(reader.read_frame().await.is_ok());
        assert!(matches!(reader.read_frame().await, Err(TransportError::Closed)));
    }
}
