//! Zone-aware weighted routing.
//!
//! Gateways use a [`RouteSelector`] to keep every account of an application
//! (or every account, depending on `route_by`) in one zone:
//!
//! 1. Packets without `app` and `account` metadata go to a random instance.
//! 2. A whitelisted app goes to its pinned zone.
//! 3. Otherwise the route key is hashed into a slot table where each zone
//!    owns `weight` slots.
//! 4. Instances are filtered by their `zone` metadata. An empty zone falls
//!    back to a random instance and bumps `relaygate_no_server_found_total`
//!    for that zone.
//! 5. Within the zone each instance owns [`SLOTS_PER_SERVICE`] slots and the
//!    account hash picks one.

use std::{collections::HashMap, path::Path};

use metrics::counter;
use rand::Rng;
use relaygate_core::ServiceRegistration;
use relaygate_proto::{
    Header,
    commands::{META_ACCOUNT, META_APP},
    packet::find_meta,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{error::RouteError, selector::{Selector, hash_code}};

/// Slots each instance owns inside a zone.
pub const SLOTS_PER_SERVICE: usize = 10;

/// Registration metadata key naming an instance's zone.
pub const META_ZONE: &str = "zone";

/// A routing zone and its share of traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone id, matched against instance `zone` metadata
    pub id: String,
    /// Relative weight
    pub weight: u32,
}

/// Route table, loaded from JSON.
///
/// ```json
/// {
///   "route_by": "account",
///   "zones": [{ "id": "zone_a", "weight": 80 }, { "id": "zone_b", "weight": 20 }],
///   "whitelist": { "vip_app": "zone_b" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Metadata key hashed to pick a zone: `app` or `account` (default)
    #[serde(default)]
    pub route_by: String,
    /// Zones and weights
    pub zones: Vec<Zone>,
    /// Apps pinned to a zone
    #[serde(default)]
    pub whitelist: HashMap<String, String>,
}

/// Weighted zone selector.
#[derive(Debug)]
pub struct RouteSelector {
    config: RouteConfig,
    slots: Vec<usize>,
}

impl RouteSelector {
    /// Build from a route table. Fails when no zone has weight.
    pub fn new(config: RouteConfig) -> Result<Self, RouteError> {
        let slots: Vec<usize> = config
            .zones
            .iter()
            .enumerate()
            .flat_map(|(i, zone)| std::iter::repeat_n(i, zone.weight as usize))
            .collect();
        if slots.is_empty() {
            return Err(RouteError::NoZones);
        }
        info!(zones = config.zones.len(), slots = slots.len(), route_by = %config.route_by, "route table loaded");
        Ok(Self { config, slots })
    }

    /// Load a JSON route table from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RouteError> {
        let raw = std::fs::read_to_string(path)?;
        Self::new(serde_json::from_str(&raw)?)
    }

    /// Zone for an app/account pair.
    pub fn zone_for(&self, app: &str, account: &str) -> &str {
        if let Some(zone) = self.config.whitelist.get(app) {
            info!(app, zone = %zone, "hit a zone in whitelist");
            return zone;
        }
        let key = if self.config.route_by == META_APP { app } else { account };
        let slot = hash_code(key) as usize % self.slots.len();
        &self.config.zones[self.slots[slot]].id
    }

    fn random(services: &[ServiceRegistration]) -> String {
        let idx = rand::thread_rng().gen_range(0..services.len());
        services[idx].id.clone()
    }
}

/// Pick among `services` with [`SLOTS_PER_SERVICE`] slots each.
fn select_in_zone<'a>(services: &[&'a ServiceRegistration], account: &str) -> &'a ServiceRegistration {
    let total = services.len() * SLOTS_PER_SERVICE;
    let slot = hash_code(account) as usize % total;
    services[slot / SLOTS_PER_SERVICE]
}

impl Selector for RouteSelector {
    fn lookup(&self, header: &Header, services: &[ServiceRegistration]) -> Option<String> {
        if services.is_empty() {
            return None;
        }
        let app = find_meta(&header.meta, META_APP).and_then(|v| v.into_string());
        let account = find_meta(&header.meta, META_ACCOUNT).and_then(|v| v.into_string());
        let (Some(app), Some(account)) = (app, account) else {
            return Some(Self::random(services));
        };

        let zone = self.zone_for(&app, &account);
        let in_zone: Vec<&ServiceRegistration> =
            services.iter().filter(|s| s.meta_value(META_ZONE) == Some(zone)).collect();

        if in_zone.is_empty() {
            counter!("relaygate_no_server_found_total", "zone" => zone.to_owned()).increment(1);
            warn!(%app, %account, zone, "no service in zone, selecting at random");
            return Some(Self::random(services));
        }
        Some(select_in_zone(&in_zone, &account).id.clone())
    }
}

#[cfg(test)]
mod tests {
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use relaygate_proto::Meta;

    use super::*;

    /// `relaygate_no_server_found_total` per zone recorded while `f` runs.
    fn no_server_counts(f: impl FnOnce()) -> HashMap<String, u64> {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, f);
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, ..)| key.key().name() == "relaygate_no_server_found_total")
            .filter_map(|(key, _, _, value)| {
                let zone = key.key().labels().find(|l| l.key() == "zone")?.value().to_owned();
                match value {
                    DebugValue::Counter(n) => Some((zone, n)),
                    _ => None,
                }
            })
            .collect()
    }

    fn table() -> RouteConfig {
        RouteConfig {
            route_by: "account".into(),
            zones: vec![Zone { id: "zone_a".into(), weight: 80 }, Zone { id: "zone_b".into(), weight: 20 }],
            whitelist: HashMap::from([("vip".to_owned(), "zone_b".to_owned())]),
        }
    }

    fn header(app: &str, account: &str) -> Header {
        Header { meta: vec![Meta::string(META_APP, app), Meta::string(META_ACCOUNT, account)], ..Header::default() }
    }

    fn instance(id: &str, zone: &str) -> ServiceRegistration {
        ServiceRegistration::new(id, "chat", "tcp", "h", 1).with_meta(META_ZONE, zone)
    }

    #[test]
    fn slots_follow_weights() {
        let selector = RouteSelector::new(table()).unwrap();
        assert_eq!(selector.slots.len(), 100);
        assert_eq!(selector.slots.iter().filter(|&&z| z == 1).count(), 20);
    }

    #[test]
    fn loads_json_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"zones":[{"id":"zone_a","weight":3}],"whitelist":{"vip":"zone_a"}}"#,
        )
        .unwrap();

        let selector = RouteSelector::from_file(file.path()).unwrap();
        assert_eq!(selector.slots.len(), 3);
        assert_eq!(selector.config.route_by, "");
        assert_eq!(selector.zone_for("vip", "anyone"), "zone_a");

        std::io::Write::write_all(&mut file, b"garbage").unwrap();
        assert!(RouteSelector::from_file(file.path()).is_err());
        assert!(RouteSelector::from_file(file.path().with_extension("missing")).is_err());
    }

    #[test]
    fn zero_weight_table_rejected() {
        let config = RouteConfig { zones: vec![Zone { id: "z".into(), weight: 0 }], ..RouteConfig::default() };
        assert!(matches!(RouteSelector::new(config), Err(RouteError::NoZones)));
    }

    #[test]
    fn whitelist_pins_zone() {
        let selector = RouteSelector::new(table()).unwrap();
        let services = vec![instance("a1", "zone_a"), instance("a2", "zone_a"), instance("b1", "zone_b")];
        let counts = no_server_counts(|| {
            for account in ["u1", "u2", "u3", "u4", "u5"] {
                assert_eq!(selector.lookup(&header("vip", account), &services).as_deref(), Some("b1"));
            }
        });
        assert!(counts.is_empty());
    }

    #[test]
    fn selection_is_sticky_per_account() {
        let selector = RouteSelector::new(table()).unwrap();
        let services: Vec<_> = (0..4)
            .map(|i| instance(&format!("a{i}"), "zone_a"))
            .chain((0..4).map(|i| instance(&format!("b{i}"), "zone_b")))
            .collect();
        let h = header("demo", "alice");
        let first = selector.lookup(&h, &services).unwrap();
        for _ in 0..10 {
            assert_eq!(selector.lookup(&h, &services).unwrap(), first);
        }

        let zone = selector.zone_for("demo", "alice").to_owned();
        let in_zone: Vec<_> = services.iter().filter(|s| s.meta_value(META_ZONE) == Some(zone.as_str())).collect();
        assert_eq!(first, select_in_zone(&in_zone, "alice").id);
    }

    #[test]
    fn empty_zone_falls_back_and_counts() {
        let config = RouteConfig {
            route_by: "app".into(),
            zones: vec![Zone { id: "zone_x".into(), weight: 1 }],
            whitelist: HashMap::new(),
        };
        let selector = RouteSelector::new(config).unwrap();
        let services = vec![instance("a1", "zone_a")];

        let counts = no_server_counts(|| {
            assert_eq!(selector.lookup(&header("demo", "alice"), &services).as_deref(), Some("a1"));
            assert_eq!(selector.lookup(&header("demo", "bob"), &services).as_deref(), Some("a1"));
        });
        assert_eq!(counts, HashMap::from([("zone_x".to_owned(), 2)]));
    }

    #[test]
    fn missing_meta_picks_any() {
        let selector = RouteSelector::new(table()).unwrap();
        let services = vec![instance("a1", "zone_a"), instance("b1", "zone_b")];
        let picked = selector.lookup(&Header::default(), &services).unwrap();
        assert!(picked == "a1" || picked == "b1");
        assert!(selector.lookup(&Header::default(), &[]).is_none());
    }

    #[test]
    fn ten_slots_per_instance() {
        let services = [instance("a", "z"), instance("b", "z"), instance("c", "z")];
        let refs: Vec<_> = services.iter().collect();
        let slot = hash_code("carol") as usize % 30;
        assert_eq!(select_in_zone(&refs, "carol").id, services[slot / 10].id);
    }
}
