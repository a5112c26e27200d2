//! Command handlers of the chat service.

mod chat;
mod group;
mod login;
mod offline;

pub use chat::ChatHandler;
pub use group::GroupHandler;
pub use login::LoginHandler;
pub use offline::OfflineHandler;
