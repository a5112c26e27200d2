//! Custom-framed TCP binding.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use relaygate_core::{Conn, DialError, FrameReader, FrameWriter, TransportError, Upgrader};
use relaygate_proto::{
    Frame, OpCode, ProtocolError,
    frame::{FrameHead, MAX_PAYLOAD_SIZE},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

/// Read buffer size.
pub const READ_BUFFER: usize = 4096;

/// Write buffer size.
pub const WRITE_BUFFER: usize = 1024;

/// Frame reader over any async byte stream.
///
/// Bytes are accumulated in an internal buffer and frames are cut from it,
/// so cancelling a read never loses a partially received frame.
#[derive(Debug)]
pub struct TcpReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin + Send + 'static> TcpReader<R> {
    /// Wrap a read half.
    pub fn new(inner: R) -> Self {
        Self { inner, buf: BytesMut::with_capacity(READ_BUFFER) }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> FrameReader for TcpReader<R> {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            if let Some((frame, used)) = Frame::decode(&self.buf)? {
                self.buf.advance(used);
                return Ok(frame);
            }
            if self.buf.capacity() - self.buf.len() < FrameHead::SIZE {
                self.buf.reserve(READ_BUFFER);
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Err(TransportError::Closed);
            }
        }
    }
}

/// Buffered frame writer over any async byte stream.
#[derive(Debug)]
pub struct TcpWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> TcpWriter<W> {
    /// Wrap a write half.
    pub fn new(inner: W) -> Self {
        Self { inner: BufWriter::with_capacity(WRITE_BUFFER, inner) }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> FrameWriter for TcpWriter<W> {
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: payload.len(), max: MAX_PAYLOAD_SIZE }.into());
        }
        let head = FrameHead::new(opcode, payload.len() as u32);
        self.inner.write_all(head.as_wire()).await?;
        self.inner.write_all(payload).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.inner.flush().await?;
        Ok(())
    }
}

/// Wrap a connected TCP stream.
pub fn wrap(stream: TcpStream) -> Conn {
    let peer = stream.peer_addr().ok();
    if let Err(e) = stream.set_nodelay(true) {
        debug!(?peer, error = %e, "set nodelay failed");
    }
    let (rd, wr) = stream.into_split();
    let conn = Conn::new(TcpReader::new(rd), TcpWriter::new(wr));
    match peer {
        Some(addr) => conn.with_remote_addr(addr),
        None => conn,
    }
}

/// Wrap any duplex byte stream, e.g. `tokio::io::duplex` in tests.
pub fn wrap_stream<S>(stream: S) -> Conn
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (rd, wr) = tokio::io::split(stream);
    Conn::new(TcpReader::new(rd), TcpWriter::new(wr))
}

/// Dial `addr` within `wait`.
pub async fn connect(addr: &str, wait: Duration) -> Result<Conn, DialError> {
    let stream = timeout(wait, TcpStream::connect(addr))
        .await
        .map_err(|_| DialError::Timeout(addr.to_owned()))?
        .map_err(|source| DialError::Connect { addr: addr.to_owned(), source })?;
    Ok(wrap(stream))
}

/// Accepts plain TCP connections without negotiation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpUpgrader;

#[async_trait]
impl Upgrader for TcpUpgrader {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn upgrade(&self, stream: TcpStream) -> Result<Conn, TransportError> {
        Ok(wrap(stream))
    }
}
