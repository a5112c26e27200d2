//! Concurrent registry of live channels.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::channel::Channel;

/// Channels keyed by id.
#[derive(Debug, Default)]
pub struct ChannelMap {
    channels: DashMap<String, Arc<Channel>>,
}

impl ChannelMap {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. Returns `false` and leaves the registry unchanged
    /// when the id is already taken.
    pub fn add(&self, channel: Arc<Channel>) -> bool {
        match self.channels.entry(channel.id().to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(channel);
                true
            },
        }
    }

    /// Deregister a channel.
    pub fn remove(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.remove(id).map(|(_, ch)| ch)
    }

    /// Look up a channel.
    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.get(id).map(|ch| Arc::clone(ch.value()))
    }

    /// Whether a channel is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    /// Snapshot of every registered channel.
    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|ch| Arc::clone(ch.value())).collect()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
