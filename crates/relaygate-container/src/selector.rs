//! Instance selection.

use relaygate_core::ServiceRegistration;
use relaygate_proto::Header;

/// Picks one instance for a packet.
pub trait Selector: Send + Sync + 'static {
    /// Id of the chosen instance, `None` when `services` is empty.
    fn lookup(&self, header: &Header, services: &[ServiceRegistration]) -> Option<String>;
}

/// CRC32 (IEEE) of `key`.
pub fn hash_code(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

/// Sticky selection by channel id: the same channel always lands on the same
/// instance while the instance list is unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashSelector;

impl Selector for HashSelector {
    fn lookup(&self, header: &Header, services: &[ServiceRegistration]) -> Option<String> {
        if services.is_empty() {
            return None;
        }
        let idx = hash_code(&header.channel_id) as usize % services.len();
        Some(services[idx].id.clone())
    }
}
