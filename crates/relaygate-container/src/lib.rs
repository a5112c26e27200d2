//! Service container for relaygate.
//!
//! A [`Container`] hosts one local [`Server`](relaygate_core::Server) and
//! keeps outbound [`Client`](relaygate_core::Client) links to every instance
//! of the services it depends on. Packets flow through it in two
//! directions:
//!
//! - **Forward**: an inbound packet is routed to one instance of a named
//!   service, picked by a [`Selector`], and sent over that instance's link.
//! - **Push**: a packet coming back over a dependency link is fanned out to
//!   the local channels listed in its `dest.channels` metadata.
//!
//! Newly discovered instances start `young` and only become eligible for
//! routing once promoted to `adult` after a warm-up delay.

pub mod clients;
pub mod container;
pub mod error;
pub mod route;
pub mod selector;

pub use clients::ClientMap;
pub use container::{Container, ContainerConfig, ContainerState, KEY_SERVICE_STATE, STATE_ADULT, STATE_YOUNG};
pub use error::{ContainerError, RouteError};
pub use route::{RouteConfig, RouteSelector, Zone};
pub use selector::{HashSelector, Selector, hash_code};
