//! WebSocket binding.
//!
//! Native WebSocket framing is used on the wire; this module only maps
//! between tungstenite messages and [`Frame`]s. Client-to-server masking is
//! removed by tungstenite, so payloads reach the core in plaintext.
//!
//! tungstenite answers every ping it reads. Pings still surface as frames so
//! the core refreshes its read deadline, but pongs the core writes back are
//! dropped so the peer sees exactly one.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use relaygate_core::{Conn, DialError, FrameReader, FrameWriter, TransportError, Upgrader};
use relaygate_proto::{Frame, OpCode};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tokio_tungstenite::{
    WebSocketStream, accept_async, connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, trace};

/// Longest close reason that fits a control frame with its status code.
const MAX_CLOSE_REASON: usize = 123;

fn ws_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::WebSocket(e.to_string())
}

/// Reading half of a WebSocket connection.
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let message = match self.stream.next().await {
                Some(message) => message.map_err(ws_error)?,
                None => return Err(TransportError::Closed),
            };
            let frame = match message {
                Message::Binary(data) => Frame::new(OpCode::Binary, data),
                Message::Text(text) => Frame::new(OpCode::Text, Bytes::copy_from_slice(text.as_str().as_bytes())),
                Message::Ping(data) => Frame::new(OpCode::Ping, data),
                Message::Pong(data) => Frame::new(OpCode::Pong, data),
                Message::Close(close) => {
                    let reason = close.map(|c| Bytes::copy_from_slice(c.reason.as_str().as_bytes())).unwrap_or_default();
                    Frame::new(OpCode::Close, reason)
                },
                Message::Frame(_) => {
                    trace!("skipping raw websocket frame");
                    continue;
                },
            };
            return Ok(frame);
        }
    }
}

/// Writing half of a WebSocket connection. Frames are fed to the sink and
/// only sent on flush.
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

fn close_reason(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut end = text.len().min(MAX_CLOSE_REASON);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

fn to_message(opcode: OpCode, payload: &[u8]) -> Result<Message, TransportError> {
    let data = Bytes::copy_from_slice(payload);
    Ok(match opcode {
        OpCode::Binary => Message::Binary(data),
        OpCode::Text => {
            let text = String::from_utf8(payload.to_vec()).map_err(ws_error)?;
            Message::text(text)
        },
        OpCode::Ping => Message::Ping(data),
        OpCode::Pong => Message::Pong(data),
        OpCode::Close => Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: close_reason(payload).into(),
        })),
        OpCode::Continuation => return Err(ws_error("continuation frames are not supported")),
    })
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), TransportError> {
        if opcode == OpCode::Pong {
            trace!("pong already queued by tungstenite");
            return Ok(());
        }
        let message = to_message(opcode, payload)?;
        self.sink.feed(message).await.map_err(ws_error)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.sink.flush().await.map_err(ws_error)
    }
}

/// Wrap an established WebSocket stream.
pub fn wrap<S>(ws: WebSocketStream<S>) -> Conn
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    Conn::new(WsReader { stream }, WsWriter { sink })
}

/// Open a client connection to `url` (e.g. `ws://host:port`) within `wait`.
pub async fn connect(url: &str, wait: Duration) -> Result<Conn, DialError> {
    let (ws, _response) = timeout(wait, connect_async(url))
        .await
        .map_err(|_| DialError::Timeout(url.to_owned()))?
        .map_err(|e| DialError::Transport(ws_error(e)))?;
    Ok(wrap(ws))
}

/// Performs the HTTP upgrade on accepted streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsUpgrader;

#[async_trait]
impl Upgrader for WsUpgrader {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn upgrade(&self, stream: TcpStream) -> Result<Conn, TransportError> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set nodelay failed");
        }
        let ws = accept_async(stream).await.map_err(ws_error)?;
        Ok(wrap(ws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_truncates_on_char_boundary() {
        let long = "é".repeat(100);
        let reason = close_reason(long.as_bytes());
        assert!(reason.len() <= MAX_CLOSE_REASON);
        assert!(reason.chars().all(|c| c == 'é'));
    }

    #[test]
    fn invalid_text_rejected() {
        assert!(to_message(OpCode::Text, &[0xff]).is_err());
        assert!(to_message(OpCode::Continuation, &[]).is_err());
    }

    #[tokio::test]
    async fn upgrade_and_exchange_frames() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = WsUpgrader.upgrade(stream).await.unwrap();
            let frame = conn.read_frame().await.unwrap();
            conn.write_frame(OpCode::Binary, &frame.into_payload()).await.unwrap();
            conn.flush().await.unwrap();
            conn
        });

        let mut client = connect(&format!("ws://{addr}"), Duration::from_secs(5)).await.unwrap();
        client.write_frame(OpCode::Binary, b"echo").await.unwrap();
        client.flush().await.unwrap();

        let reply = client.read_frame().await.unwrap();
        assert_eq!(reply.opcode(), OpCode::Binary);
        assert_eq!(reply.into_payload().as_ref(), b"echo");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn ping_gets_a_single_pong() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = WsUpgrader.upgrade(stream).await.unwrap();
            assert_eq!(conn.read_frame().await.unwrap().opcode(), OpCode::Ping);
            conn.write_frame(OpCode::Pong, &[]).await.unwrap();
            conn.write_frame(OpCode::Binary, b"after").await.unwrap();
            conn.flush().await.unwrap();
            conn
        });

        let mut client = connect(&format!("ws://{addr}"), Duration::from_secs(5)).await.unwrap();
        client.write_frame(OpCode::Ping, &[]).await.unwrap();
        client.flush().await.unwrap();

        assert_eq!(client.read_frame().await.unwrap().opcode(), OpCode::Pong);
        let next = client.read_frame().await.unwrap();
        assert_eq!(next.opcode(), OpCode::Binary);
        assert_eq!(next.into_payload().as_ref(), b"after");
        server.await.unwrap();
    }
}
