//! Session and location storage.

use async_trait::async_trait;
use dashmap::DashMap;
use relaygate_proto::{Location, messages::Session};

use crate::error::StorageError;

/// Where login sessions and account locations live.
#[async_trait]
pub trait SessionStorage: Send + Sync + 'static {
    /// Store a session and point its account's location at it.
    async fn add(&self, session: &Session) -> Result<(), StorageError>;

    /// Remove a session and its account's location.
    async fn delete(&self, account: &str, channel_id: &str) -> Result<(), StorageError>;

    /// Session for a channel.
    async fn get(&self, channel_id: &str) -> Result<Session, StorageError>;

    /// Location of an account on a device. An empty device means the default.
    async fn get_location(&self, account: &str, device: &str) -> Result<Location, StorageError>;

    /// Locations of every online account in `accounts`. Offline accounts are
    /// skipped; `NotFound` when none is online.
    async fn get_locations(&self, accounts: &[String]) -> Result<Vec<Location>, StorageError>;
}

fn location_key(account: &str, device: &str) -> String {
    if device.is_empty() { account.to_owned() } else { format!("{account}:{device}") }
}

/// In-memory storage.
///
/// Locations are kept in their wire encoding, the same bytes a shared
/// key/value backend would hold.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sessions: DashMap<String, Session>,
    locations: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn add(&self, session: &Session) -> Result<(), StorageError> {
        let loc = Location::new(&session.channel_id, &session.gate_id);
        self.locations.insert(location_key(&session.account, &session.device), loc.to_bytes()?.to_vec());
        self.sessions.insert(session.channel_id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, account: &str, channel_id: &str) -> Result<(), StorageError> {
        let removed = self.sessions.remove(channel_id).map(|(_, s)| s);
        let device = removed.as_ref().map(|s| s.device.as_str()).unwrap_or_default();
        // Only drop the location if it still points at this channel; a newer
        // login may already own it.
        let key = location_key(account, device);
        let stale = self
            .locations
            .get(&key)
            .and_then(|raw| Location::from_bytes(raw.value()).ok())
            .is_some_and(|loc| loc.channel_id == channel_id);
        if stale {
            self.locations.remove(&key);
        }
        Ok(())
    }

    async fn get(&self, channel_id: &str) -> Result<Session, StorageError> {
        self.sessions.get(channel_id).map(|s| s.value().clone()).ok_or(StorageError::NotFound)
    }

    async fn get_location(&self, account: &str, device: &str) -> Result<Location, StorageError> {
        let raw = self.locations.get(&location_key(account, device)).ok_or(StorageError::NotFound)?;
        Ok(Location::from_bytes(raw.value())?)
    }

    async fn get_locations(&self, accounts: &[String]) -> Result<Vec<Location>, StorageError> {
        let mut out = Vec::with_capacity(accounts.len());
        for account in accounts {
            if let Some(raw) = self.locations.get(account.as_str()) {
                out.push(Location::from_bytes(raw.value())?);
            }
        }
        if out.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(account: &str, channel: &str) -> Session {
        Session {
            channel_id: channel.into(),
            gate_id: "gate-1".into(),
            account: account.into(),
            app: "demo".into(),
            ..Session::default()
        }
    }

    #[tokio::test]
    async fn add_then_locate() {
        let storage = MemoryStorage::new();
        storage.add(&session("alice", "gate-1_alice_1")).await.unwrap();

        let loc = storage.get_location("alice", "").await.unwrap();
        assert_eq!(loc, Location::new("gate-1_alice_1", "gate-1"));
        assert_eq!(storage.get("gate-1_alice_1").await.unwrap().account, "alice");
    }

    #[tokio::test]
    async fn missing_is_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(storage.get("x").await, Err(StorageError::NotFound)));
        assert!(matches!(storage.get_location("x", "").await, Err(StorageError::NotFound)));
        assert!(matches!(storage.get_locations(&["x".into()]).await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn delete_keeps_newer_location() {
        let storage = MemoryStorage::new();
        storage.add(&session("alice", "old")).await.unwrap();
        storage.add(&session("alice", "new")).await.unwrap();

        storage.delete("alice", "old").await.unwrap();
        assert_eq!(storage.get_location("alice", "").await.unwrap().channel_id, "new");

        storage.delete("alice", "new").await.unwrap();
        assert!(storage.get_location("alice", "").await.is_err());
    }

    #[tokio::test]
    async fn get_locations_skips_offline() {
        let storage = MemoryStorage::new();
        storage.add(&session("alice", "c1")).await.unwrap();
        storage.add(&session("bob", "c2")).await.unwrap();

        let locs = storage.get_locations(&["alice".into(), "carol".into(), "bob".into()]).await.unwrap();
        let ids: Vec<_> = locs.iter().map(|l| l.channel_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2"]);
    }
}
