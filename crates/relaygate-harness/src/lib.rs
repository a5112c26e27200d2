//! Test doubles and loopback fixtures for relaygate.
//!
//! Nothing here is used in production. The pieces fall into three groups:
//!
//! - [`pipe`]: in-memory [`Conn`](relaygate_core::Conn) pairs and scripted
//!   frame streams for driving a channel without sockets.
//! - [`listeners`]: recording implementations of the listener traits.
//! - [`net`]: loopback servers bound to ephemeral ports.

#![forbid(unsafe_code)]

pub mod listeners;
pub mod net;
pub mod pipe;

use std::time::Duration;

pub use listeners::{PeerAcceptor, RecordingListener, RecordingStateListener, StaticAcceptor};
pub use net::{free_addr, spawn_server};
pub use pipe::{CollectingWriter, ScriptedReader, memory_pair, scripted_conn};

/// Poll `condition` every few milliseconds until it holds or `within`
/// elapses. Returns the final value of the condition.
pub async fn wait_until(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return condition();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
