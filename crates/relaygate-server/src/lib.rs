//! Relaygate application services.
//!
//! Two roles are built from the same core:
//!
//! - **Gateway** ([`gateway`]): terminates client connections, verifies the
//!   login [`token`], and forwards packets to backend services by command
//!   prefix.
//! - **Chat** ([`service`], [`handler`]): receives forwarded packets from
//!   gateways, resolves the sender's session and runs the command through
//!   the [`Router`].
//!
//! # Architecture
//!
//! ```text
//!   client ──> gateway ──Container::forward──> chat ──Router──> LoginHandler
//!     ▲           │                              │          ├─> ChatHandler
//!     │           │                              │          ├─> GroupHandler
//!     │           │                              │          └─> OfflineHandler
//!     └───push────┴──Container::push_message <───┘  (dest.server, dest.channels)
//! ```
//!
//! [`app`] wires either role into a ready-to-run
//! [`Container`](relaygate_container::Container).

pub mod app;
pub mod context;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod message;
pub mod router;
pub mod service;
pub mod token;

pub use app::{ChatOptions, GatewayOptions, build_chat, build_gateway, parse_peer};
pub use context::{Context, Dispatcher};
pub use error::ServiceError;
pub use gateway::GatewayHandler;
pub use message::{GroupInfo, InsertMessage, MemoryMessageService, MessageService, NewGroup};
pub use router::{Handler, Router};
pub use service::{ServerDispatcher, ServiceHandler};
