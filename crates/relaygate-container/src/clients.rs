//! Links to the instances of one dependency service.

use std::sync::Arc;

use dashmap::DashMap;
use relaygate_core::{Client, ServiceRegistration};

/// Client links keyed by instance id.
#[derive(Debug, Default)]
pub struct ClientMap {
    clients: DashMap<String, Arc<Client>>,
}

impl ClientMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a link.
    pub fn add(&self, client: Arc<Client>) {
        self.clients.insert(client.id().to_owned(), client);
    }

    /// Drop a link.
    pub fn remove(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.remove(id).map(|(_, c)| c)
    }

    /// Drop `client` only if it is still the link registered under its id,
    /// leaving a newer link for the same instance in place.
    pub fn remove_link(&self, client: &Arc<Client>) -> bool {
        self.clients.remove_if(client.id(), |_, current| Arc::ptr_eq(current, client)).is_some()
    }

    /// Link for an instance.
    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Whether an instance has a link.
    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Registrations of the linked instances, optionally only those whose
    /// metadata has `key == value`. Sorted by id so selection is stable.
    pub fn services(&self, filter: Option<(&str, &str)>) -> Vec<ServiceRegistration> {
        let mut out: Vec<_> = self
            .clients
            .iter()
            .map(|c| c.service())
            .filter(|s| filter.is_none_or(|(k, v)| s.meta_value(k) == Some(v)))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Every link.
    pub fn all(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|c| Arc::clone(c.value())).collect()
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no links.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use relaygate_core::ClientConfig;

    use super::*;

    #[test]
    fn services_filter_by_meta() {
        let map = ClientMap::new();
        let a = ServiceRegistration::new("b", "chat", "tcp", "h", 1).with_meta("service_state", "adult");
        let b = ServiceRegistration::new("a", "chat", "tcp", "h", 2).with_meta("service_state", "young");
        map.add(Arc::new(Client::new(a, ClientConfig::default())));
        map.add(Arc::new(Client::new(b, ClientConfig::default())));

        let all: Vec<_> = map.services(None).into_iter().map(|s| s.id).collect();
        assert_eq!(all, ["a", "b"]);
        let adult = map.services(Some(("service_state", "adult")));
        assert_eq!(adult.len(), 1);
        assert_eq!(adult[0].id, "b");
    }

    #[test]
    fn stale_link_does_not_evict_replacement() {
        let map = ClientMap::new();
        let reg = ServiceRegistration::new("chat01", "chat", "tcp", "h", 1);
        let old = Arc::new(Client::new(reg.clone(), ClientConfig::default()));
        let new = Arc::new(Client::new(reg, ClientConfig::default()));
        map.add(Arc::clone(&old));
        map.add(Arc::clone(&new));

        assert!(!map.remove_link(&old));
        assert!(Arc::ptr_eq(&map.get("chat01").unwrap(), &new));
        assert!(map.remove_link(&new));
        assert!(map.is_empty());
    }
}
