//! Transport bindings for relaygate.
//!
//! Both bindings present the same [`Conn`](relaygate_core::Conn) frame
//! interface to the core:
//!
//! - [`tcp`]: custom framing, `[u8 opcode][u32 LE length][payload]`, over
//!   buffered stream halves. No negotiation on accept.
//! - [`websocket`]: RFC 6455 via `tokio-tungstenite`. Accept performs the
//!   HTTP upgrade; masking is removed before payloads reach the core.
//!
//! [`ServiceDialer`] is the inter-service dialer: TCP plus an
//! `InnerHandshakeRequest` announcing the dialing service.

pub mod dialer;
pub mod tcp;
pub mod websocket;

pub use dialer::ServiceDialer;
pub use tcp::{TcpReader, TcpUpgrader, TcpWriter};
pub use websocket::{WsReader, WsUpgrader, WsWriter};
