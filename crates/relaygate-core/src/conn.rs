//! Frame-level connection interface.
//!
//! Transports expose a connection as a [`FrameReader`] and a [`FrameWriter`];
//! nothing above this layer sees the socket itself. Splitting the halves lets
//! a channel read and write concurrently without sharing a lock.

use std::net::SocketAddr;

use async_trait::async_trait;
use relaygate_proto::{Frame, OpCode};

use crate::error::TransportError;

/// Reading half of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Read the next complete frame.
    ///
    /// Implementations must be cancel safe: dropping the future between
    /// frames must not lose buffered bytes.
    async fn read_frame(&mut self) -> Result<Frame, TransportError>;
}

/// Writing half of a connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Write one frame. May buffer until [`FrameWriter::flush`].
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), TransportError>;

    /// Flush buffered frames to the peer.
    async fn flush(&mut self) -> Result<(), TransportError>;
}

/// A framed connection: one reader, one writer and the peer address.
pub struct Conn {
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
    remote_addr: Option<SocketAddr>,
}

impl Conn {
    /// Build a connection from its halves.
    pub fn new(reader: impl FrameReader, writer: impl FrameWriter) -> Self {
        Self { reader: Box::new(reader), writer: Box::new(writer), remote_addr: None }
    }

    /// Attach the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Peer address, when the transport knows it.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Read the next frame.
    pub async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        self.reader.read_frame().await
    }

    /// Write one frame.
    pub async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), TransportError> {
        self.writer.write_frame(opcode, payload).await
    }

    /// Flush buffered frames.
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.writer.flush().await
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn").field("remote_addr", &self.remote_addr).finish_non_exhaustive()
    }
}
