//! VRF reconciliation.
//!
//! A VRF is a switch instance like a bridge, with an L3 overlay: cached
//! neighbors, routes, and an index from next-hop address to the routes
//! depending on it.

use crate::bridge::{destroy_switch_state, Bridge, ReconcileCtx};
use crate::neighbor::Neighbor;
use crate::route::Route;
use crate::schema;
use crate::state::State;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// One VRF: its datapath half plus the L3 caches layered on top.
pub struct Vrf {
    pub up: Bridge,
    pub neighbors: BTreeMap<IpAddr, Neighbor>,
    /// Programmed routes, keyed by Route row key.
    pub routes: BTreeMap<String, Route>,
    /// Next-hop address -> route row keys depending on it.
    pub nexthop_index: BTreeMap<IpAddr, BTreeSet<String>>,
}

impl Vrf {
    pub fn new(name: &str, dp_type: &str) -> Self {
        Vrf {
            up: Bridge::new(name, dp_type),
            neighbors: BTreeMap::new(),
            routes: BTreeMap::new(),
            nexthop_index: BTreeMap::new(),
        }
    }
}

/// Aligns the cached VRF set with the VRF table.
pub fn add_del_vrfs(state: &mut State, ctx: &mut ReconcileCtx<'_>) {
    let mut wanted: BTreeMap<String, String> = BTreeMap::new();
    for (name, row) in ctx.store.table(schema::VRF).rows() {
        if name.contains('/') {
            warn!("VRF name {} may not contain a slash; ignoring", name);
            continue;
        }
        if state.bridges.contains_key(name) {
            warn!("VRF {} collides with a bridge of the same name; ignoring", name);
            continue;
        }
        wanted.insert(
            name.to_string(),
            row.get_or("datapath_type", "system").to_string(),
        );
    }

    let doomed: Vec<String> = state
        .vrfs
        .iter()
        .filter(|(name, vrf)| wanted.get(*name) != Some(&vrf.up.dp_type))
        .map(|(name, _)| name.clone())
        .collect();
    for name in doomed {
        destroy_switch_state(state.vrfs.remove(&name).map(|v| v.up), ctx);
    }

    for (name, dp_type) in wanted {
        state
            .vrfs
            .entry(name.clone())
            .or_insert_with(|| Vrf::new(&name, &dp_type));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use switchd_provider::SimProvider;
    use switchd_store::Store;
    use switchd_types::MacAddress;

    fn run_add_del(state: &mut State, store: &Store, sim: &SimProvider) {
        let mut txn = store.begin();
        let mut ctx = ReconcileCtx {
            store,
            txn: &mut txn,
            provider: sim,
            since: 0,
            system_mac: MacAddress::ZERO,
        };
        add_del_vrfs(state, &mut ctx);
    }

    #[test]
    fn test_add_and_delete() {
        let sim = SimProvider::new();
        let mut store = Store::new();
        store
            .insert_row(schema::VRF, "vrf_default", [("name", "vrf_default")])
            .unwrap();
        let mut state = State::new();

        run_add_del(&mut state, &store, &sim);
        assert!(state.vrfs.contains_key("vrf_default"));
        assert_eq!(state.vrfs["vrf_default"].up.dp_type, "system");

        store.delete_row(schema::VRF, "vrf_default").unwrap();
        run_add_del(&mut state, &store, &sim);
        assert!(state.vrfs.is_empty());
    }

    #[test]
    fn test_name_collision_with_bridge() {
        let sim = SimProvider::new();
        let mut store = Store::new();
        store
            .insert_row(schema::VRF, "br0", [("name", "br0")])
            .unwrap();
        let mut state = State::new();
        state
            .bridges
            .insert("br0".to_string(), Bridge::new("br0", "system"));

        run_add_del(&mut state, &store, &sim);
        assert!(state.vrfs.is_empty());
    }
}
