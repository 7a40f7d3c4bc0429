//! Bridge reconciliation and the top-level reconfiguration driver.
//!
//! One pass walks a fixed sequence of phases over every switch instance:
//! instance add/delete, port teardown, provider instance sync, device
//! attach, datapath-id selection, bundle pushes, VLANs, then the per-VRF
//! L3 state and global ECMP policy. Work within a phase is batched across
//! instances so deletions always precede the creations that may reuse
//! their resources.

use crate::iface::{self, Iface};
use crate::port::Port;
use crate::schema;
use crate::state::State;
use crate::vlan::Vlan;
use crate::{ecmp, neighbor, route, vlan, vrf};
use log::{error, warn};
use std::collections::{BTreeMap, BTreeSet};
use switchd_provider::{PortNumber, ProviderError, SwitchProvider};
use switchd_store::{Row, Seqno, Store, Txn};
use switchd_types::{DatapathId, MacAddress};

/// Everything one reconciliation pass reads and writes besides the state.
pub struct ReconcileCtx<'a> {
    pub store: &'a Store,
    pub txn: &'a mut Txn,
    pub provider: &'a dyn SwitchProvider,
    /// Store seqno as of the previous pass; rows unchanged since then are
    /// not re-examined.
    pub since: Seqno,
    /// Fallback Ethernet address when no interface provides one.
    pub system_mac: MacAddress,
}

/// One switch instance: a bridge, or the datapath half of a VRF.
pub struct Bridge {
    pub name: String,
    pub dp_type: String,
    /// True once the provider instance exists.
    pub created: bool,
    /// Ethernet address chosen on the last pass.
    pub ea: Option<MacAddress>,
    /// Datapath ID as last pushed to the provider.
    pub dpid: Option<DatapathId>,
    pub ports: BTreeMap<String, Port>,
    pub vlans: BTreeMap<String, Vlan>,
}

impl Bridge {
    pub fn new(name: &str, dp_type: &str) -> Self {
        Bridge {
            name: name.to_string(),
            dp_type: dp_type.to_string(),
            created: false,
            ea: None,
            dpid: None,
            ports: BTreeMap::new(),
            vlans: BTreeMap::new(),
        }
    }
}

/// Runs one full reconciliation pass.
pub fn reconfigure(state: &mut State, ctx: &mut ReconcileCtx<'_>) {
    let store = ctx.store;

    add_del_bridges(state, ctx);
    vrf::add_del_vrfs(state, ctx);

    // Resolve port ownership before touching anything: a port belongs to
    // the first instance that names it, bridges before VRFs.
    let mut claimed = BTreeSet::new();
    let bridge_wanted: BTreeMap<String, BTreeMap<String, &Row>> = state
        .bridges
        .keys()
        .map(|name| {
            (
                name.clone(),
                collect_wanted_ports(store, schema::BRIDGE, name, &mut claimed),
            )
        })
        .collect();
    let vrf_wanted: BTreeMap<String, BTreeMap<String, &Row>> = state
        .vrfs
        .keys()
        .map(|name| {
            (
                name.clone(),
                collect_wanted_ports(store, schema::VRF, name, &mut claimed),
            )
        })
        .collect();

    let bridge_ifaces: BTreeMap<String, BTreeMap<String, (String, &Row)>> = bridge_wanted
        .iter()
        .map(|(name, wanted)| (name.clone(), collect_wanted_ifaces(store, wanted)))
        .collect();
    let vrf_ifaces: BTreeMap<String, BTreeMap<String, (String, &Row)>> = vrf_wanted
        .iter()
        .map(|(name, wanted)| (name.clone(), collect_wanted_ifaces(store, wanted)))
        .collect();

    let empty = BTreeMap::new();
    for (name, bridge) in &mut state.bridges {
        del_unwanted_ports(bridge, bridge_wanted.get(name).unwrap_or(&empty), ctx);
    }
    for (name, vrf) in &mut state.vrfs {
        let wanted = vrf_wanted.get(name).unwrap_or(&empty);
        // An L3 port takes its neighbors down with it, and each neighbor
        // unresolves its dependent routes before its host entry goes.
        let doomed: Vec<String> = vrf
            .up
            .ports
            .keys()
            .filter(|port| !wanted.contains_key(*port))
            .cloned()
            .collect();
        for port in &doomed {
            neighbor::purge_port(vrf, port, ctx);
        }
        del_unwanted_ports(&mut vrf.up, wanted, ctx);
    }

    sync_provider_switches(state, ctx);

    // Every instance releases its doomed devices before any instance
    // attaches one: an interface moving between instances must leave its
    // old datapath first.
    let no_ifaces = BTreeMap::new();
    for (name, bridge) in &mut state.bridges {
        prune_switch_ports(
            bridge,
            bridge_wanted.get(name).unwrap_or(&empty),
            bridge_ifaces.get(name).unwrap_or(&no_ifaces),
            ctx,
        );
    }
    for (name, vrf) in &mut state.vrfs {
        prune_switch_ports(
            &mut vrf.up,
            vrf_wanted.get(name).unwrap_or(&empty),
            vrf_ifaces.get(name).unwrap_or(&no_ifaces),
            ctx,
        );
    }

    for (name, bridge) in &mut state.bridges {
        let wanted = bridge_wanted.get(name).unwrap_or(&empty);
        attach_switch_ifaces(bridge, bridge_ifaces.get(name).unwrap_or(&no_ifaces), ctx);
        let Some(row) = store.table(schema::BRIDGE).get(name) else {
            continue;
        };
        configure_datapath_id(bridge, row, ctx);
        configure_ports(bridge, wanted, ctx);
        vlan::configure(bridge, row, ctx);
    }
    for (name, vrf) in &mut state.vrfs {
        let wanted = vrf_wanted.get(name).unwrap_or(&empty);
        attach_switch_ifaces(&mut vrf.up, vrf_ifaces.get(name).unwrap_or(&no_ifaces), ctx);
        configure_ports(&mut vrf.up, wanted, ctx);
        neighbor::reconcile(vrf, ctx);
        route::reconcile(vrf, ctx);
    }

    ecmp::reconcile(&mut state.ecmp, ctx);
}

fn add_del_bridges(state: &mut State, ctx: &mut ReconcileCtx<'_>) {
    let mut wanted: BTreeMap<String, String> = BTreeMap::new();
    for (name, row) in ctx.store.table(schema::BRIDGE).rows() {
        if name.contains('/') {
            // Reserved for datapath-internal device names.
            warn!("bridge name {} may not contain a slash; ignoring", name);
            continue;
        }
        wanted.insert(
            name.to_string(),
            row.get_or("datapath_type", "system").to_string(),
        );
    }

    // A datapath type change destroys and recreates the instance.
    let doomed: Vec<String> = state
        .bridges
        .iter()
        .filter(|(name, bridge)| wanted.get(*name) != Some(&bridge.dp_type))
        .map(|(name, _)| name.clone())
        .collect();
    for name in doomed {
        destroy_switch_state(state.bridges.remove(&name), ctx);
    }

    for (name, dp_type) in wanted {
        state
            .bridges
            .entry(name.clone())
            .or_insert_with(|| Bridge::new(&name, &dp_type));
    }
}

/// Drops a switch from the engine cache, clearing the operational fields
/// of everything it carried. The provider instance itself is cleaned up
/// as an orphan on the next instance sync.
pub(crate) fn destroy_switch_state(bridge: Option<Bridge>, ctx: &mut ReconcileCtx<'_>) {
    let Some(bridge) = bridge else {
        return;
    };
    for (port_name, port) in &bridge.ports {
        ctx.txn
            .clear(schema::PORT, port_name, "status:bond_hw_handle");
        for iface_name in port.ifaces.keys() {
            iface::clear_status(ctx.txn, iface_name);
        }
    }
}

/// Maps each port named by an instance row to its Port row, skipping
/// ports that do not exist or are already claimed elsewhere.
pub(crate) fn collect_wanted_ports<'a>(
    store: &'a Store,
    table: &str,
    key: &str,
    claimed: &mut BTreeSet<String>,
) -> BTreeMap<String, &'a Row> {
    let mut wanted = BTreeMap::new();
    let Some(row) = store.table(table).get(key) else {
        return wanted;
    };
    for port_name in row.get_list("ports") {
        let Some(port_row) = store.table(schema::PORT).get(port_name) else {
            warn!("{}: port {} does not exist; ignoring", key, port_name);
            continue;
        };
        if !claimed.insert(port_name.to_string()) {
            warn!(
                "port {} appears in more than one switch instance; keeping first",
                port_name
            );
            continue;
        }
        wanted.insert(port_name.to_string(), port_row);
    }
    wanted
}

fn del_unwanted_ports(
    bridge: &mut Bridge,
    wanted: &BTreeMap<String, &Row>,
    ctx: &mut ReconcileCtx<'_>,
) {
    let doomed: Vec<String> = bridge
        .ports
        .keys()
        .filter(|name| !wanted.contains_key(*name))
        .cloned()
        .collect();
    for name in doomed {
        let Some(port) = bridge.ports.remove(&name) else {
            continue;
        };
        if bridge.created {
            let numbers: Vec<PortNumber> =
                port.ifaces.values().filter_map(|i| i.port_no).collect();
            if !numbers.is_empty() {
                if let Err(err) = ctx.provider.port_del_batch(&bridge.name, &numbers) {
                    error!("{}: failed to detach port {}: {}", bridge.name, name, err);
                }
            }
            if port.applied.is_some() {
                if let Err(err) = ctx.provider.bundle_unregister(&bridge.name, &name) {
                    warn!("{}: failed to unregister {}: {}", bridge.name, name, err);
                }
            }
        }
        ctx.txn.clear(schema::PORT, &name, "status:bond_hw_handle");
        for iface_name in port.ifaces.keys() {
            iface::clear_status(ctx.txn, iface_name);
        }
    }
}

fn sync_provider_switches(state: &mut State, ctx: &mut ReconcileCtx<'_>) {
    let provider = ctx.provider;

    for (name, dp_type) in provider.switches() {
        let keep = state
            .bridges
            .get(&name)
            .map(|b| b.dp_type == dp_type)
            .or_else(|| state.vrfs.get(&name).map(|v| v.up.dp_type == dp_type))
            .unwrap_or(false);
        if !keep {
            if let Err(err) = provider.delete_switch(&name) {
                error!("failed to delete datapath {}: {}", name, err);
            }
        }
    }

    let types = provider.datapath_types();
    let mut failed_bridges = Vec::new();
    for (name, bridge) in &mut state.bridges {
        if !create_switch_instance(bridge, &types, provider) {
            failed_bridges.push(name.clone());
        }
    }
    for name in failed_bridges {
        destroy_switch_state(state.bridges.remove(&name), ctx);
    }

    let mut failed_vrfs = Vec::new();
    for (name, vrf) in &mut state.vrfs {
        if !create_switch_instance(&mut vrf.up, &types, provider) {
            failed_vrfs.push(name.clone());
        }
    }
    for name in failed_vrfs {
        destroy_switch_state(state.vrfs.remove(&name).map(|v| v.up), ctx);
    }
}

fn create_switch_instance(
    bridge: &mut Bridge,
    types: &[String],
    provider: &dyn SwitchProvider,
) -> bool {
    if bridge.created {
        return true;
    }
    if !types.iter().any(|t| t == &bridge.dp_type) {
        error!(
            "{}: unknown datapath type {}; not creating",
            bridge.name, bridge.dp_type
        );
        return false;
    }
    match provider.create_switch(&bridge.name, &bridge.dp_type) {
        Ok(()) | Err(ProviderError::SwitchExists(_)) => {
            bridge.created = true;
            true
        }
        Err(err) => {
            error!("failed to create datapath {}: {}", bridge.name, err);
            false
        }
    }
}

/// Maps each interface named by the wanted ports to its owning port and
/// Interface row, first claim wins.
fn collect_wanted_ifaces<'a>(
    store: &'a Store,
    wanted: &BTreeMap<String, &'a Row>,
) -> BTreeMap<String, (String, &'a Row)> {
    let mut ifaces: BTreeMap<String, (String, &Row)> = BTreeMap::new();
    for (port_name, port_row) in wanted {
        for iface_name in port_row.get_list("interfaces") {
            let Some(iface_row) = store.table(schema::INTERFACE).get(iface_name) else {
                warn!(
                    "port {}: interface {} does not exist; ignoring",
                    port_name, iface_name
                );
                continue;
            };
            if ifaces.contains_key(iface_name) {
                warn!(
                    "interface {} appears in more than one port; keeping first",
                    iface_name
                );
                continue;
            }
            ifaces.insert(iface_name.to_string(), (port_name.clone(), iface_row));
        }
    }
    ifaces
}

/// Creates cache entries for wanted ports and detaches every interface
/// that moved away, changed type, or lost its row.
fn prune_switch_ports(
    bridge: &mut Bridge,
    wanted: &BTreeMap<String, &Row>,
    ifaces: &BTreeMap<String, (String, &Row)>,
    ctx: &mut ReconcileCtx<'_>,
) {
    for port_name in wanted.keys() {
        bridge
            .ports
            .entry(port_name.clone())
            .or_insert_with(|| Port::new(port_name));
    }

    let mut del: BTreeSet<PortNumber> = BTreeSet::new();
    for port in bridge.ports.values_mut() {
        let doomed: Vec<String> = port
            .ifaces
            .iter()
            .filter(|(name, iface)| {
                !ifaces.get(*name).is_some_and(|(owner, row)| {
                    owner == &port.name && row.get_or("type", "system") == iface.kind
                })
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in doomed {
            if let Some(old) = port.ifaces.remove(&name) {
                if let Some(number) = old.port_no {
                    del.insert(number);
                }
                iface::clear_status(ctx.txn, &name);
            }
        }
    }
    if !bridge.created {
        return;
    }

    // Stray datapath ports with no cached counterpart go too.
    let cached: BTreeSet<PortNumber> = bridge
        .ports
        .values()
        .flat_map(|p| p.ifaces.values().filter_map(|i| i.port_no))
        .collect();
    for provider_port in ctx.provider.ports(&bridge.name) {
        if !cached.contains(&provider_port.number) && !ifaces.contains_key(&provider_port.name) {
            del.insert(provider_port.number);
        }
    }
    if !del.is_empty() {
        let numbers: Vec<PortNumber> = del.into_iter().collect();
        if let Err(err) = ctx.provider.port_del_batch(&bridge.name, &numbers) {
            error!("{}: failed to detach ports: {}", bridge.name, err);
        }
    }
}

/// Opens and attaches wanted interfaces not yet present, and reapplies
/// device options on the ones that are. Runs only after every instance
/// has been pruned.
fn attach_switch_ifaces(
    bridge: &mut Bridge,
    ifaces: &BTreeMap<String, (String, &Row)>,
    ctx: &mut ReconcileCtx<'_>,
) {
    if !bridge.created {
        return;
    }
    for (iface_name, (port_name, iface_row)) in ifaces {
        let Some(port) = bridge.ports.get_mut(port_name) else {
            continue;
        };
        if let Some(existing) = port.ifaces.get(iface_name) {
            if iface_row.column_modified_since("options", ctx.since) {
                existing.apply_config(iface_row);
            }
        } else if let Some(iface) =
            Iface::create(iface_name, iface_row, &bridge.name, ctx.provider, ctx.txn)
        {
            port.ifaces.insert(iface_name.clone(), iface);
        }
    }
}

fn configure_datapath_id(bridge: &mut Bridge, row: &Row, ctx: &mut ReconcileCtx<'_>) {
    if !bridge.created {
        return;
    }
    let ea = choose_ea(bridge, row, ctx.system_mac);
    let dpid = row
        .get("other_config:datapath-id")
        .and_then(|s| match s.parse::<DatapathId>() {
            Ok(dpid) if !dpid.is_zero() => Some(dpid),
            Ok(_) => {
                warn!("bridge {}: invalid all-zero datapath-id", bridge.name);
                None
            }
            Err(err) => {
                warn!("bridge {}: invalid datapath-id: {}", bridge.name, err);
                None
            }
        })
        .unwrap_or_else(|| DatapathId::from_mac(ea));
    bridge.ea = Some(ea);

    if bridge.dpid != Some(dpid) {
        if let Err(err) = ctx.provider.set_datapath_id(&bridge.name, dpid) {
            error!("bridge {}: failed to set datapath ID: {}", bridge.name, err);
            return;
        }
        bridge.dpid = Some(dpid);
        ctx.txn
            .set(schema::BRIDGE, &bridge.name, "datapath_id", &dpid.to_string());
    }
}

/// Picks the bridge's Ethernet address: the configured override if usable,
/// otherwise the numerically smallest eligible interface address,
/// otherwise the system default.
fn choose_ea(bridge: &Bridge, row: &Row, system_mac: MacAddress) -> MacAddress {
    if let Some(requested) = row.get("other_config:hwaddr") {
        match requested.parse::<MacAddress>() {
            Ok(mac) if !mac.is_multicast() && !mac.is_zero() => return mac,
            Ok(mac) => warn!(
                "bridge {}: cannot use requested address {}",
                bridge.name, mac
            ),
            Err(err) => warn!("bridge {}: invalid hwaddr: {}", bridge.name, err),
        }
    }

    let mut best: Option<MacAddress> = None;
    for port in bridge.ports.values() {
        // Each port is represented by its alphabetically first interface.
        let Some(iface) = port.ifaces.values().next() else {
            continue;
        };
        let Ok(mac) = iface.netdev.etheraddr() else {
            continue;
        };
        if mac.is_multicast() || mac.is_local() || mac.is_zero() || mac.is_reserved() {
            continue;
        }
        if best.is_none_or(|b| mac < b) {
            best = Some(mac);
        }
    }
    best.unwrap_or(system_mac)
}

fn configure_ports(
    bridge: &mut Bridge,
    wanted: &BTreeMap<String, &Row>,
    ctx: &mut ReconcileCtx<'_>,
) {
    if !bridge.created {
        return;
    }
    let switch = bridge.name.clone();
    for (name, row) in wanted {
        let Some(port) = bridge.ports.get_mut(name) else {
            continue;
        };
        if port.needs_configure(row, ctx.store, ctx.since) {
            port.configure(row, &switch, ctx.store, ctx.provider, ctx.txn);
        }
    }
}
