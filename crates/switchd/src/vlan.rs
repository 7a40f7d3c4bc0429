//! VLAN reconciliation.
//!
//! VLANs are enabled in the forwarding plane only by their hardware
//! configuration flag; a VLAN row without it stays disabled. Each state
//! flip issues exactly one provider call.

use crate::bridge::{Bridge, ReconcileCtx};
use crate::schema;
use log::{error, warn};
use std::collections::BTreeMap;
use switchd_store::Row;
use switchd_types::VlanId;

/// One VLAN of a bridge, by configuration row name.
pub struct Vlan {
    pub vid: VlanId,
    pub enabled: bool,
}

/// Brings the bridge's VLAN set in line with its row's `vlans` list.
pub fn configure(bridge: &mut Bridge, bridge_row: &Row, ctx: &mut ReconcileCtx<'_>) {
    if !bridge.created {
        return;
    }
    let store = ctx.store;
    let mut wanted: BTreeMap<String, &Row> = BTreeMap::new();
    for name in bridge_row.get_list("vlans") {
        match store.table(schema::VLAN).get(name) {
            Some(row) => {
                wanted.insert(name.to_string(), row);
            }
            None => warn!(
                "bridge {}: VLAN {} does not exist",
                bridge.name, name
            ),
        }
    }

    let doomed: Vec<String> = bridge
        .vlans
        .keys()
        .filter(|name| !wanted.contains_key(*name))
        .cloned()
        .collect();
    for name in doomed {
        if let Some(vlan) = bridge.vlans.remove(&name) {
            if vlan.enabled {
                if let Err(err) = ctx.provider.set_vlan(&bridge.name, vlan.vid, false) {
                    error!(
                        "bridge {}: failed to disable VLAN {}: {}",
                        bridge.name, vlan.vid, err
                    );
                }
            }
        }
    }

    for (name, row) in wanted {
        let vid = match row.get_or("id", "").parse::<VlanId>() {
            Ok(vid) => vid,
            Err(err) => {
                warn!("bridge {}: ignoring VLAN {}: {}", bridge.name, name, err);
                continue;
            }
        };
        let enable = row.get_bool("hw_vlan_config:enable", false);

        // A renumbered VLAN releases its old ID first.
        if let Some(vlan) = bridge.vlans.get(&name) {
            if vlan.vid != vid && vlan.enabled {
                if let Err(err) = ctx.provider.set_vlan(&bridge.name, vlan.vid, false) {
                    error!(
                        "bridge {}: failed to disable VLAN {}: {}",
                        bridge.name, vlan.vid, err
                    );
                }
            }
            if vlan.vid != vid {
                bridge.vlans.remove(&name);
            }
        }

        let vlan = bridge.vlans.entry(name).or_insert(Vlan {
            vid,
            enabled: false,
        });
        if vlan.enabled != enable {
            match ctx.provider.set_vlan(&bridge.name, vid, enable) {
                Ok(()) => vlan.enabled = enable,
                Err(err) => error!(
                    "bridge {}: failed to {} VLAN {}: {}",
                    bridge.name,
                    if enable { "enable" } else { "disable" },
                    vid,
                    err
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use switchd_provider::{ProviderCall, SimProvider, SwitchProvider};
    use switchd_store::Store;

    fn setup() -> (SimProvider, Store, Bridge) {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();
        let mut bridge = Bridge::new("br0", "system");
        bridge.created = true;

        let mut store = Store::new();
        store
            .insert_row(schema::BRIDGE, "br0", [("name", "br0"), ("vlans", "vlan100")])
            .unwrap();
        store
            .insert_row(
                schema::VLAN,
                "vlan100",
                [("name", "vlan100"), ("id", "100")],
            )
            .unwrap();
        (sim, store, bridge)
    }

    fn run(bridge: &mut Bridge, store: &Store, sim: &SimProvider) {
        let mut txn = store.begin();
        let mut ctx = ReconcileCtx {
            store,
            txn: &mut txn,
            provider: sim,
            since: 0,
            system_mac: switchd_types::MacAddress::ZERO,
        };
        let row = store.table(schema::BRIDGE).get("br0").unwrap();
        configure(bridge, row, &mut ctx);
    }

    #[test]
    fn test_vlan_disabled_without_hw_config() {
        let (sim, store, mut bridge) = setup();
        run(&mut bridge, &store, &sim);
        assert!(sim.enabled_vlans("br0").is_empty());
        assert!(!bridge.vlans["vlan100"].enabled);
    }

    #[test]
    fn test_enable_fires_once_per_flip() {
        let (sim, mut store, mut bridge) = setup();
        store
            .set_field(schema::VLAN, "vlan100", "hw_vlan_config:enable", "true")
            .unwrap();

        run(&mut bridge, &store, &sim);
        run(&mut bridge, &store, &sim);
        let flips = sim
            .calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::SetVlan { .. }))
            .count();
        assert_eq!(flips, 1);
        assert_eq!(sim.enabled_vlans("br0").len(), 1);

        store
            .set_field(schema::VLAN, "vlan100", "hw_vlan_config:enable", "false")
            .unwrap();
        sim.take_calls();
        run(&mut bridge, &store, &sim);
        run(&mut bridge, &store, &sim);
        let flips = sim
            .calls()
            .iter()
            .filter(|c| matches!(c, ProviderCall::SetVlan { .. }))
            .count();
        assert_eq!(flips, 1);
        assert!(sim.enabled_vlans("br0").is_empty());
    }

    #[test]
    fn test_deleted_enabled_vlan_is_disabled() {
        let (sim, mut store, mut bridge) = setup();
        store
            .set_field(schema::VLAN, "vlan100", "hw_vlan_config:enable", "true")
            .unwrap();
        run(&mut bridge, &store, &sim);
        assert_eq!(sim.enabled_vlans("br0").len(), 1);

        store.set_field(schema::BRIDGE, "br0", "vlans", "").unwrap();
        run(&mut bridge, &store, &sim);
        assert!(sim.enabled_vlans("br0").is_empty());
        assert!(bridge.vlans.is_empty());
    }
}
