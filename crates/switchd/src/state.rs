//! Engine state: one owning object for everything the engine caches.

use crate::bridge::Bridge;
use crate::ecmp::EcmpConfig;
use crate::vrf::Vrf;
use std::collections::BTreeMap;
use std::fmt::Write;

/// All cached engine state, keyed by stable configuration names.
///
/// Owned exclusively by the run loop; reconciliation and the pollers
/// borrow it, nothing else holds references into it.
#[derive(Default)]
pub struct State {
    pub bridges: BTreeMap<String, Bridge>,
    pub vrfs: BTreeMap<String, Vrf>,
    pub ecmp: EcmpConfig,
}

impl State {
    pub fn new() -> Self {
        State::default()
    }

    /// Iterates over every switch instance, bridges first.
    pub fn switches(&self) -> impl Iterator<Item = &Bridge> {
        self.bridges
            .values()
            .chain(self.vrfs.values().map(|v| &v.up))
    }

    /// Mutable variant of [`State::switches`].
    pub fn switches_mut(&mut self) -> impl Iterator<Item = &mut Bridge> {
        self.bridges
            .values_mut()
            .chain(self.vrfs.values_mut().map(|v| &mut v.up))
    }

    /// Multi-line summary of the cached topology, for debug logging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (name, bridge) in &self.bridges {
            let _ = writeln!(
                out,
                "bridge {} type={} created={} dpid={}",
                name,
                bridge.dp_type,
                bridge.created,
                bridge
                    .dpid
                    .map_or_else(|| "-".to_string(), |d| d.to_string()),
            );
            dump_ports(&mut out, bridge);
            for (vlan_name, vlan) in &bridge.vlans {
                let _ = writeln!(
                    out,
                    "  vlan {} vid={} enabled={}",
                    vlan_name,
                    vlan.vid.as_u16(),
                    vlan.enabled
                );
            }
        }
        for (name, vrf) in &self.vrfs {
            let _ = writeln!(
                out,
                "vrf {} type={} created={} neighbors={} routes={}",
                name,
                vrf.up.dp_type,
                vrf.up.created,
                vrf.neighbors.len(),
                vrf.routes.len(),
            );
            dump_ports(&mut out, &vrf.up);
        }
        out
    }
}

fn dump_ports(out: &mut String, bridge: &Bridge) {
    for (port_name, port) in &bridge.ports {
        let ifaces: Vec<String> = port
            .ifaces
            .values()
            .map(|i| {
                format!(
                    "{}:{}",
                    i.name,
                    i.port_no.map_or_else(|| "-".to_string(), |n| n.to_string())
                )
            })
            .collect();
        let _ = writeln!(
            out,
            "  port {} bond={} ifaces=[{}]",
            port_name,
            port.bond_handle
                .map_or_else(|| "-".to_string(), |h| h.to_string()),
            ifaces.join(" ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_lists_instances() {
        let mut state = State::new();
        state
            .bridges
            .insert("br0".to_string(), Bridge::new("br0", "system"));
        state
            .vrfs
            .insert("vrf0".to_string(), Vrf::new("vrf0", "system"));

        let dump = state.dump();
        assert!(dump.contains("bridge br0 type=system"));
        assert!(dump.contains("vrf vrf0 type=system"));
    }
}
