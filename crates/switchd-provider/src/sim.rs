//! In-memory software datapath.
//!
//! `SimProvider` implements the full provider contract against plain maps.
//! It doubles as the engine's test double: every mutating call is recorded
//! in order, and individual operations, host entries or next-hops can be
//! scripted to fail.

use crate::netdev::{Duplex, Netdev, NetdevStats, NetdevStatus};
use crate::types::{
    BondHandle, BundleSettings, EcmpHashField, EgressId, NexthopOutcome, NexthopTarget,
    PortNumber, ProviderPort, RouteOp, RouteSpec,
};
use crate::{ProviderError, ProviderResult, SwitchProvider};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use switchd_types::{DatapathId, MacAddress, VlanId};

/// Device names the provider refuses to open.
const RESERVED_NETDEV_NAMES: &[&str] = &["default", "none"];

/// Datapath types the software datapath instantiates.
const SIM_DATAPATH_TYPES: &[&str] = &["system", "sim"];

/// Operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimOp {
    CreateSwitch,
    DeleteSwitch,
    OpenNetdev,
    PortAdd,
    PortDel,
    BundleRegister,
    AddL3Host,
    RouteAction,
    EcmpSet,
}

/// One recorded mutating provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    CreateSwitch {
        name: String,
        dp_type: String,
    },
    DeleteSwitch {
        name: String,
    },
    PortAdd {
        switch: String,
        netdev: String,
    },
    PortDel {
        switch: String,
        ports: Vec<PortNumber>,
    },
    BundleRegister {
        switch: String,
        key: String,
        bond: bool,
    },
    BundleUnregister {
        switch: String,
        key: String,
    },
    SetDatapathId {
        switch: String,
        dpid: DatapathId,
    },
    SetVlan {
        switch: String,
        vid: VlanId,
        enable: bool,
    },
    AddL3Host {
        switch: String,
        ip: IpAddr,
    },
    DeleteL3Host {
        switch: String,
        ip: IpAddr,
    },
    RouteAction {
        switch: String,
        op: RouteOp,
        prefix: String,
        nexthops: Vec<String>,
    },
    EcmpEnabled {
        enabled: bool,
    },
    EcmpHash {
        field: EcmpHashField,
        enabled: bool,
    },
}

#[derive(Debug)]
struct NetdevState {
    mac: MacAddress,
    config: BTreeMap<String, String>,
    admin_up: bool,
    link_up: bool,
    duplex: Option<Duplex>,
    speed_mbps: Option<u64>,
    mtu: Option<u32>,
    link_resets: u64,
    stats: NetdevStats,
    change_seq: u64,
}

impl NetdevState {
    fn new(mac: MacAddress) -> Self {
        NetdevState {
            mac,
            config: BTreeMap::new(),
            admin_up: true,
            link_up: false,
            duplex: Some(Duplex::Full),
            speed_mbps: Some(1000),
            mtu: Some(1500),
            link_resets: 0,
            stats: NetdevStats::default(),
            change_seq: 1,
        }
    }
}

#[derive(Debug, Clone)]
struct SimHost {
    mac: MacAddress,
    port: String,
    egress: EgressId,
    hit: bool,
}

#[derive(Debug, Default)]
struct SimSwitch {
    dp_type: String,
    next_port: PortNumber,
    ports: BTreeMap<PortNumber, ProviderPort>,
    bundles: BTreeMap<String, Option<BondHandle>>,
    vlans: BTreeSet<VlanId>,
    dpid: Option<DatapathId>,
    hosts: BTreeMap<IpAddr, SimHost>,
    routes: BTreeMap<String, BTreeMap<NexthopTarget, bool>>,
}

#[derive(Debug, Default)]
struct Inner {
    switches: BTreeMap<String, SimSwitch>,
    netdevs: BTreeMap<String, Arc<Mutex<NetdevState>>>,
    calls: Vec<ProviderCall>,
    fail_ops: BTreeSet<SimOp>,
    fail_hosts: BTreeSet<IpAddr>,
    fail_nexthops: BTreeSet<NexthopTarget>,
    next_mac: u8,
    next_bond: i64,
    next_egress: u64,
    connectivity_seq: u64,
    ecmp_enabled: bool,
}

/// The in-memory software datapath.
#[derive(Debug, Default)]
pub struct SimProvider {
    inner: Mutex<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimProvider {
    /// Creates an empty software datapath.
    pub fn new() -> Self {
        SimProvider {
            inner: Mutex::new(Inner {
                next_bond: 1,
                next_egress: 1,
                connectivity_seq: 1,
                ecmp_enabled: true,
                ..Inner::default()
            }),
        }
    }

    /// Predefines a device with a fixed Ethernet address.
    pub fn add_netdev(&self, name: &str, mac: MacAddress) {
        let mut inner = lock(&self.inner);
        inner
            .netdevs
            .insert(name.to_string(), Arc::new(Mutex::new(NetdevState::new(mac))));
    }

    /// Flips a device's carrier, bumping its change seq and the global
    /// connectivity seq.
    pub fn set_link(&self, name: &str, up: bool) {
        let mut inner = lock(&self.inner);
        if let Some(state) = inner.netdevs.get(name) {
            let mut state = lock(state);
            if state.link_up != up {
                state.link_up = up;
                if up {
                    state.link_resets += 1;
                }
                state.change_seq += 1;
            }
        }
        inner.connectivity_seq += 1;
    }

    /// Replaces a device's counters.
    pub fn set_stats(&self, name: &str, stats: NetdevStats) {
        let inner = lock(&self.inner);
        if let Some(state) = inner.netdevs.get(name) {
            let mut state = lock(state);
            state.stats = stats;
            state.change_seq += 1;
        }
    }

    /// Sets the hit bit of a programmed host entry.
    pub fn set_host_hit(&self, switch: &str, ip: IpAddr, hit: bool) {
        let mut inner = lock(&self.inner);
        if let Some(sw) = inner.switches.get_mut(switch) {
            if let Some(host) = sw.hosts.get_mut(&ip) {
                host.hit = hit;
            }
        }
    }

    /// Scripts an operation to fail until cleared.
    pub fn fail_op(&self, op: SimOp) {
        lock(&self.inner).fail_ops.insert(op);
    }

    /// Clears a scripted operation failure.
    pub fn clear_fail_op(&self, op: SimOp) {
        lock(&self.inner).fail_ops.remove(&op);
    }

    /// Scripts host programming for one IP to fail.
    pub fn fail_host(&self, ip: IpAddr) {
        lock(&self.inner).fail_hosts.insert(ip);
    }

    /// Scripts route programming for one next-hop target to fail.
    pub fn fail_nexthop(&self, target: NexthopTarget) {
        lock(&self.inner).fail_nexthops.insert(target);
    }

    /// Returns the recorded mutating calls.
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.inner).calls.clone()
    }

    /// Returns and clears the recorded mutating calls.
    pub fn take_calls(&self) -> Vec<ProviderCall> {
        std::mem::take(&mut lock(&self.inner).calls)
    }

    /// Returns the programmed routes of a switch as
    /// (prefix, next-hop, resolved) triples.
    pub fn routes(&self, switch: &str) -> Vec<(String, NexthopTarget, bool)> {
        let inner = lock(&self.inner);
        let Some(sw) = inner.switches.get(switch) else {
            return Vec::new();
        };
        sw.routes
            .iter()
            .flat_map(|(prefix, nhs)| {
                nhs.iter()
                    .map(move |(t, r)| (prefix.clone(), t.clone(), *r))
            })
            .collect()
    }

    /// Returns the route objects present on a switch, including routes
    /// whose next-hop set has been emptied without deleting them.
    pub fn route_prefixes(&self, switch: &str) -> Vec<String> {
        let inner = lock(&self.inner);
        inner
            .switches
            .get(switch)
            .map(|sw| sw.routes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the VLANs enabled for forwarding on a switch.
    pub fn enabled_vlans(&self, switch: &str) -> Vec<VlanId> {
        let inner = lock(&self.inner);
        inner
            .switches
            .get(switch)
            .map(|sw| sw.vlans.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the IPs with programmed host entries on a switch.
    pub fn host_ips(&self, switch: &str) -> Vec<IpAddr> {
        let inner = lock(&self.inner);
        inner
            .switches
            .get(switch)
            .map(|sw| sw.hosts.keys().copied().collect())
            .unwrap_or_default()
    }

    fn check_op(inner: &Inner, op: SimOp, what: &str) -> ProviderResult<()> {
        if inner.fail_ops.contains(&op) {
            Err(ProviderError::rejected(what, "scripted failure"))
        } else {
            Ok(())
        }
    }
}

impl SwitchProvider for SimProvider {
    fn datapath_types(&self) -> Vec<String> {
        SIM_DATAPATH_TYPES.iter().map(|s| s.to_string()).collect()
    }

    fn create_switch(&self, name: &str, dp_type: &str) -> ProviderResult<()> {
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::CreateSwitch, "create_switch")?;
        if !SIM_DATAPATH_TYPES.contains(&dp_type) {
            return Err(ProviderError::UnsupportedType(dp_type.to_string()));
        }
        if inner.switches.contains_key(name) {
            return Err(ProviderError::SwitchExists(name.to_string()));
        }
        inner.calls.push(ProviderCall::CreateSwitch {
            name: name.to_string(),
            dp_type: dp_type.to_string(),
        });
        inner.switches.insert(
            name.to_string(),
            SimSwitch {
                dp_type: dp_type.to_string(),
                next_port: 1,
                ..SimSwitch::default()
            },
        );
        debug!("sim: created switch {} type {}", name, dp_type);
        Ok(())
    }

    fn delete_switch(&self, name: &str) -> ProviderResult<()> {
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::DeleteSwitch, "delete_switch")?;
        if inner.switches.remove(name).is_none() {
            return Err(ProviderError::NoSuchSwitch(name.to_string()));
        }
        inner.calls.push(ProviderCall::DeleteSwitch {
            name: name.to_string(),
        });
        Ok(())
    }

    fn switches(&self) -> Vec<(String, String)> {
        lock(&self.inner)
            .switches
            .iter()
            .map(|(n, s)| (n.clone(), s.dp_type.clone()))
            .collect()
    }

    fn open_netdev(&self, name: &str, _kind: &str) -> ProviderResult<Box<dyn Netdev>> {
        if RESERVED_NETDEV_NAMES.contains(&name) {
            return Err(ProviderError::ReservedName(name.to_string()));
        }
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::OpenNetdev, "open_netdev")?;
        let state = match inner.netdevs.get(name) {
            Some(state) => Arc::clone(state),
            None => {
                // Unknown devices come up with a generated unicast address.
                inner.next_mac += 1;
                let mac = MacAddress::new([0x0c, 0x00, 0x00, 0x00, 0x00, inner.next_mac]);
                let state = Arc::new(Mutex::new(NetdevState::new(mac)));
                inner.netdevs.insert(name.to_string(), Arc::clone(&state));
                state
            }
        };
        Ok(Box::new(SimNetdev {
            name: name.to_string(),
            state,
        }))
    }

    fn port_add(&self, switch: &str, netdev: &str) -> ProviderResult<PortNumber> {
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::PortAdd, "port_add")?;
        if !inner.netdevs.contains_key(netdev) {
            return Err(ProviderError::NoSuchDevice(netdev.to_string()));
        }
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        if sw.ports.values().any(|p| p.name == netdev) {
            return Err(ProviderError::rejected("port_add", "already attached"));
        }
        let number = sw.next_port;
        sw.next_port += 1;
        sw.ports.insert(
            number,
            ProviderPort {
                number,
                name: netdev.to_string(),
                kind: "system".to_string(),
            },
        );
        inner.calls.push(ProviderCall::PortAdd {
            switch: switch.to_string(),
            netdev: netdev.to_string(),
        });
        Ok(number)
    }

    fn port_del(&self, switch: &str, port: PortNumber) -> ProviderResult<()> {
        self.port_del_batch(switch, &[port])
    }

    fn port_del_batch(&self, switch: &str, ports: &[PortNumber]) -> ProviderResult<()> {
        if ports.is_empty() {
            return Ok(());
        }
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::PortDel, "port_del")?;
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        for port in ports {
            if sw.ports.remove(port).is_none() {
                return Err(ProviderError::NoSuchPort(port.to_string()));
            }
        }
        inner.calls.push(ProviderCall::PortDel {
            switch: switch.to_string(),
            ports: ports.to_vec(),
        });
        Ok(())
    }

    fn ports(&self, switch: &str) -> Vec<ProviderPort> {
        lock(&self.inner)
            .switches
            .get(switch)
            .map(|sw| sw.ports.values().cloned().collect())
            .unwrap_or_default()
    }

    fn bundle_register(
        &self,
        switch: &str,
        key: &str,
        settings: &BundleSettings,
    ) -> ProviderResult<Option<BondHandle>> {
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::BundleRegister, "bundle_register")?;
        let next_bond = inner.next_bond;
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        let prior = sw.bundles.get(key).copied().flatten();
        let handle = if settings.bond.is_some() {
            Some(prior.unwrap_or(BondHandle(next_bond)))
        } else {
            None
        };
        if settings.bond.is_some() && prior.is_none() {
            inner.next_bond += 1;
        }
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        sw.bundles.insert(key.to_string(), handle);
        inner.calls.push(ProviderCall::BundleRegister {
            switch: switch.to_string(),
            key: key.to_string(),
            bond: settings.bond.is_some(),
        });
        Ok(handle)
    }

    fn bundle_unregister(&self, switch: &str, key: &str) -> ProviderResult<()> {
        let mut inner = lock(&self.inner);
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        if sw.bundles.remove(key).is_none() {
            return Err(ProviderError::NoSuchPort(key.to_string()));
        }
        inner.calls.push(ProviderCall::BundleUnregister {
            switch: switch.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    fn set_vlan(&self, switch: &str, vid: VlanId, enable: bool) -> ProviderResult<()> {
        let mut inner = lock(&self.inner);
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        if enable {
            sw.vlans.insert(vid);
        } else {
            sw.vlans.remove(&vid);
        }
        inner.calls.push(ProviderCall::SetVlan {
            switch: switch.to_string(),
            vid,
            enable,
        });
        Ok(())
    }

    fn set_datapath_id(&self, switch: &str, dpid: DatapathId) -> ProviderResult<()> {
        let mut inner = lock(&self.inner);
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        sw.dpid = Some(dpid);
        inner.calls.push(ProviderCall::SetDatapathId {
            switch: switch.to_string(),
            dpid,
        });
        Ok(())
    }

    fn datapath_version(&self, switch: &str) -> Option<String> {
        lock(&self.inner)
            .switches
            .get(switch)
            .map(|_| "sim-1.0".to_string())
    }

    fn add_l3_host(
        &self,
        switch: &str,
        ip: IpAddr,
        mac: MacAddress,
        port: &str,
    ) -> ProviderResult<EgressId> {
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::AddL3Host, "add_l3_host")?;
        if inner.fail_hosts.contains(&ip) {
            return Err(ProviderError::ResourceExhausted(format!("host {}", ip)));
        }
        let egress = EgressId(inner.next_egress);
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        let egress = sw.hosts.get(&ip).map(|h| h.egress).unwrap_or(egress);
        let fresh = !sw.hosts.contains_key(&ip);
        sw.hosts.insert(
            ip,
            SimHost {
                mac,
                port: port.to_string(),
                egress,
                hit: false,
            },
        );
        if fresh {
            inner.next_egress += 1;
        }
        inner.calls.push(ProviderCall::AddL3Host {
            switch: switch.to_string(),
            ip,
        });
        Ok(egress)
    }

    fn delete_l3_host(&self, switch: &str, ip: IpAddr) -> ProviderResult<()> {
        let mut inner = lock(&self.inner);
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        if sw.hosts.remove(&ip).is_none() {
            return Err(ProviderError::NotFound(ip.to_string()));
        }
        inner.calls.push(ProviderCall::DeleteL3Host {
            switch: switch.to_string(),
            ip,
        });
        Ok(())
    }

    fn l3_host_hit(&self, switch: &str, ip: IpAddr) -> ProviderResult<bool> {
        let inner = lock(&self.inner);
        let sw = inner
            .switches
            .get(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;
        sw.hosts
            .get(&ip)
            .map(|h| h.hit)
            .ok_or_else(|| ProviderError::NotFound(ip.to_string()))
    }

    fn route_action(
        &self,
        switch: &str,
        op: RouteOp,
        route: &RouteSpec,
    ) -> ProviderResult<Vec<NexthopOutcome>> {
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::RouteAction, "route_action")?;
        let fail_nexthops = inner.fail_nexthops.clone();
        let sw = inner
            .switches
            .get_mut(switch)
            .ok_or_else(|| ProviderError::NoSuchSwitch(switch.to_string()))?;

        let prefix = route.prefix.to_string();
        let mut outcomes = Vec::with_capacity(route.nexthops.len());
        for nh in &route.nexthops {
            if fail_nexthops.contains(&nh.target) {
                outcomes.push(NexthopOutcome::failed(
                    nh.target.clone(),
                    ProviderError::ResourceExhausted(format!("nexthop {}", nh.target)),
                ));
                continue;
            }
            match op {
                RouteOp::Add | RouteOp::Update => {
                    sw.routes
                        .entry(prefix.clone())
                        .or_default()
                        .insert(nh.target.clone(), nh.resolved);
                }
                RouteOp::Delete | RouteOp::DeleteNexthops => {
                    if let Some(nhs) = sw.routes.get_mut(&prefix) {
                        nhs.remove(&nh.target);
                    }
                }
            }
            outcomes.push(NexthopOutcome::ok(nh.target.clone()));
        }
        // Only Delete removes the route object itself; DeleteNexthops
        // leaves it in place even when its last next-hop goes.
        if op == RouteOp::Delete {
            sw.routes.remove(&prefix);
        }

        inner.calls.push(ProviderCall::RouteAction {
            switch: switch.to_string(),
            op,
            prefix,
            nexthops: route.nexthops.iter().map(|n| n.target.to_string()).collect(),
        });
        Ok(outcomes)
    }

    fn set_ecmp_enabled(&self, enabled: bool) -> ProviderResult<()> {
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::EcmpSet, "set_ecmp_enabled")?;
        inner.ecmp_enabled = enabled;
        inner.calls.push(ProviderCall::EcmpEnabled { enabled });
        Ok(())
    }

    fn set_ecmp_hash(&self, field: EcmpHashField, enabled: bool) -> ProviderResult<()> {
        let mut inner = lock(&self.inner);
        Self::check_op(&inner, SimOp::EcmpSet, "set_ecmp_hash")?;
        inner.calls.push(ProviderCall::EcmpHash { field, enabled });
        Ok(())
    }

    fn connectivity_seq(&self) -> u64 {
        lock(&self.inner).connectivity_seq
    }

    fn memory_usage(&self) -> Vec<(String, u64)> {
        let inner = lock(&self.inner);
        let ports: u64 = inner.switches.values().map(|s| s.ports.len() as u64).sum();
        let hosts: u64 = inner.switches.values().map(|s| s.hosts.len() as u64).sum();
        let routes: u64 = inner.switches.values().map(|s| s.routes.len() as u64).sum();
        vec![
            ("ports".to_string(), ports * 4),
            ("hosts".to_string(), hosts * 2),
            ("routes".to_string(), routes * 2),
        ]
    }
}

/// A device handle into the software datapath.
pub struct SimNetdev {
    name: String,
    state: Arc<Mutex<NetdevState>>,
}

impl Netdev for SimNetdev {
    fn name(&self) -> &str {
        &self.name
    }

    fn etheraddr(&self) -> ProviderResult<MacAddress> {
        Ok(lock(&self.state).mac)
    }

    fn set_etheraddr(&self, mac: MacAddress) -> ProviderResult<()> {
        let mut state = lock(&self.state);
        if state.mac != mac {
            state.mac = mac;
            state.change_seq += 1;
        }
        Ok(())
    }

    fn set_config(&self, config: &BTreeMap<String, String>) -> ProviderResult<()> {
        lock(&self.state).config = config.clone();
        Ok(())
    }

    fn stats(&self) -> ProviderResult<NetdevStats> {
        Ok(lock(&self.state).stats)
    }

    fn status(&self) -> ProviderResult<NetdevStatus> {
        let state = lock(&self.state);
        Ok(NetdevStatus {
            admin_up: state.admin_up,
            link_up: state.link_up,
            duplex: state.duplex,
            speed_mbps: state.speed_mbps,
            mtu: state.mtu,
            mac_in_use: Some(state.mac),
            link_resets: state.link_resets,
        })
    }

    fn change_seq(&self) -> u64 {
        lock(&self.state).change_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IpSettings, LacpMode, VlanMode};
    use pretty_assertions::assert_eq;

    fn bundle(bond: bool) -> BundleSettings {
        BundleSettings {
            members: vec![1],
            vlan_mode: VlanMode::Access,
            tag: None,
            trunks: Vec::new(),
            lacp: LacpMode::Off,
            bond: bond.then(Default::default),
            ip: IpSettings::default(),
            enabled: true,
        }
    }

    #[test]
    fn test_switch_lifecycle() {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();
        assert_eq!(
            sim.create_switch("br0", "system"),
            Err(ProviderError::SwitchExists("br0".to_string()))
        );
        assert_eq!(
            sim.create_switch("br1", "bogus"),
            Err(ProviderError::UnsupportedType("bogus".to_string()))
        );
        assert_eq!(
            sim.switches(),
            vec![("br0".to_string(), "system".to_string())]
        );
        sim.delete_switch("br0").unwrap();
        assert!(sim.switches().is_empty());
    }

    #[test]
    fn test_reserved_netdev_name() {
        let sim = SimProvider::new();
        assert_eq!(
            sim.open_netdev("default", "system").err(),
            Some(ProviderError::ReservedName("default".to_string()))
        );
    }

    #[test]
    fn test_port_numbers_and_batch_delete() {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();
        sim.open_netdev("eth0", "system").unwrap();
        sim.open_netdev("eth1", "system").unwrap();

        let p0 = sim.port_add("br0", "eth0").unwrap();
        let p1 = sim.port_add("br0", "eth1").unwrap();
        assert_eq!((p0, p1), (1, 2));
        assert!(sim.port_add("br0", "eth0").is_err());

        sim.port_del_batch("br0", &[p0, p1]).unwrap();
        assert!(sim.ports("br0").is_empty());
    }

    #[test]
    fn test_bundle_bond_handle_stable() {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();

        let h1 = sim.bundle_register("br0", "lag0", &bundle(true)).unwrap();
        assert!(h1.is_some());
        let h2 = sim.bundle_register("br0", "lag0", &bundle(true)).unwrap();
        assert_eq!(h1, h2);

        // Dropping the bond releases the handle.
        let h3 = sim.bundle_register("br0", "lag0", &bundle(false)).unwrap();
        assert_eq!(h3, None);
    }

    #[test]
    fn test_set_vlan() {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();
        let vid = VlanId::new(100).unwrap();

        sim.set_vlan("br0", vid, true).unwrap();
        assert_eq!(sim.enabled_vlans("br0"), vec![vid]);
        sim.set_vlan("br0", vid, false).unwrap();
        assert!(sim.enabled_vlans("br0").is_empty());
    }

    #[test]
    fn test_l3_host_and_hit() {
        let sim = SimProvider::new();
        sim.create_switch("vrf0", "system").unwrap();
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();

        let egress = sim.add_l3_host("vrf0", ip, mac, "p1").unwrap();
        assert!(egress.0 > 0);
        assert_eq!(sim.l3_host_hit("vrf0", ip), Ok(false));
        sim.set_host_hit("vrf0", ip, true);
        assert_eq!(sim.l3_host_hit("vrf0", ip), Ok(true));

        sim.delete_l3_host("vrf0", ip).unwrap();
        assert!(matches!(
            sim.l3_host_hit("vrf0", ip),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_scripted_host_failure() {
        let sim = SimProvider::new();
        sim.create_switch("vrf0", "system").unwrap();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();

        sim.fail_host(ip);
        assert!(matches!(
            sim.add_l3_host("vrf0", ip, mac, "p1"),
            Err(ProviderError::ResourceExhausted(_))
        ));
        assert!(sim.host_ips("vrf0").is_empty());
    }

    #[test]
    fn test_route_per_nexthop_outcomes() {
        let sim = SimProvider::new();
        sim.create_switch("vrf0", "system").unwrap();
        let good = NexthopTarget::Ip("10.0.0.1".parse().unwrap());
        let bad = NexthopTarget::Ip("10.0.0.2".parse().unwrap());
        sim.fail_nexthop(bad.clone());

        let spec = RouteSpec {
            prefix: "10.1.0.0/16".parse().unwrap(),
            nexthops: vec![
                crate::types::RouteNexthop {
                    target: good.clone(),
                    resolved: false,
                    egress: None,
                },
                crate::types::RouteNexthop {
                    target: bad.clone(),
                    resolved: false,
                    egress: None,
                },
            ],
        };
        let outcomes = sim.route_action("vrf0", RouteOp::Add, &spec).unwrap();
        assert_eq!(outcomes[0].error, None);
        assert!(outcomes[1].error.is_some());

        // Only the good next-hop landed.
        let routes = sim.routes("vrf0");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].1, good);
    }

    #[test]
    fn test_call_log_records_mutations_only() {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();
        sim.datapath_version("br0");
        sim.ports("br0");

        let calls = sim.take_calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], ProviderCall::CreateSwitch { .. }));
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_connectivity_seq_tracks_link() {
        let sim = SimProvider::new();
        sim.add_netdev("eth0", "00:11:22:33:44:55".parse().unwrap());
        let before = sim.connectivity_seq();
        sim.set_link("eth0", true);
        assert!(sim.connectivity_seq() > before);
    }
}
