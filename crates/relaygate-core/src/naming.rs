//! Service registry contract.
//!
//! Instances announce themselves with a [`ServiceRegistration`]; peers find
//! them by name and subscribe to membership changes. [`MemoryNaming`] is an
//! in-process registry for single-host deployments and tests.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NamingError;

/// One running service instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Unique instance id
    pub id: String,
    /// Service name shared by all instances of the service
    pub name: String,
    /// Public address
    pub address: String,
    /// Public port
    pub port: u16,
    /// Transport protocol (`tcp`, `websocket`)
    pub protocol: String,
    /// Registry namespace
    pub namespace: String,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Key/value metadata, e.g. `zone`
    pub meta: HashMap<String, String>,
}

impl ServiceRegistration {
    /// Registration without tags or metadata.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        protocol: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            protocol: protocol.into(),
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Metadata value for `key`.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    /// Address peers dial: `host:port` for tcp, `proto://host:port` otherwise.
    pub fn dial_url(&self) -> String {
        if self.protocol == "tcp" {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("{}://{}:{}", self.protocol, self.address, self.port)
        }
    }

    /// Whether the instance advertises a reachable address.
    pub fn is_public(&self) -> bool {
        !self.address.is_empty() && self.port != 0
    }
}

impl fmt::Display for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) {}", self.id, self.name, self.dial_url())
    }
}

/// Callback invoked with the full instance list whenever it changes.
pub type ServiceCallback = Arc<dyn Fn(Vec<ServiceRegistration>) + Send + Sync>;

/// Service discovery.
#[async_trait]
pub trait Naming: Send + Sync + 'static {
    /// Instances of `name` carrying every tag in `tags`.
    async fn find(&self, name: &str, tags: &[String]) -> Result<Vec<ServiceRegistration>, NamingError>;

    /// Watch `name`. Replaces any previous subscription for it.
    async fn subscribe(&self, name: &str, callback: ServiceCallback) -> Result<(), NamingError>;

    /// Stop watching `name`.
    async fn unsubscribe(&self, name: &str) -> Result<(), NamingError>;

    /// Announce an instance.
    async fn register(&self, service: &ServiceRegistration) -> Result<(), NamingError>;

    /// Withdraw an instance.
    async fn deregister(&self, id: &str) -> Result<(), NamingError>;
}

/// In-process registry.
#[derive(Default)]
pub struct MemoryNaming {
    services: DashMap<String, ServiceRegistration>,
    watchers: DashMap<String, ServiceCallback>,
}

impl MemoryNaming {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn instances(&self, name: &str) -> Vec<ServiceRegistration> {
        let mut found: Vec<_> =
            self.services.iter().filter(|s| s.name == name).map(|s| s.value().clone()).collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    fn notify(&self, name: &str) {
        let callback = self.watchers.get(name).map(|cb| Arc::clone(cb.value()));
        if let Some(callback) = callback {
            let instances = self.instances(name);
            debug!(service = name, count = instances.len(), "notify watchers");
            callback(instances);
        }
    }

    /// Whether `name` has a subscriber.
    pub fn is_watched(&self, name: &str) -> bool {
        self.watchers.contains_key(name)
    }
}

impl fmt::Debug for MemoryNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNaming")
            .field("services", &self.services.len())
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

#[async_trait]
impl Naming for MemoryNaming {
    async fn find(&self, name: &str, tags: &[String]) -> Result<Vec<ServiceRegistration>, NamingError> {
        Ok(self
            .instances(name)
            .into_iter()
            .filter(|s| tags.iter().all(|t| s.tags.contains(t)))
            .collect())
    }

    async fn subscribe(&self, name: &str, callback: ServiceCallback) -> Result<(), NamingError> {
        self.watchers.insert(name.to_owned(), callback);
        Ok(())
    }

    async fn unsubscribe(&self, name: &str) -> Result<(), NamingError> {
        self.watchers.remove(name);
        Ok(())
    }

    async fn register(&self, service: &ServiceRegistration) -> Result<(), NamingError> {
        self.services.insert(service.id.clone(), service.clone());
        self.notify(&service.name);
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), NamingError> {
        let (_, removed) = self.services.remove(id).ok_or_else(|| NamingError::NotFound(id.to_owned()))?;
        self.notify(&removed.name);
        Ok(())
    }
}
