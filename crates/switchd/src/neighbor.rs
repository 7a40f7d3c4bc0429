//! Neighbor reconciliation and the hit-bit poller.
//!
//! A neighbor's host entry carries the egress every route through it
//! resolves onto, so teardown always fans the loss of resolution out to
//! dependent routes before the host entry itself goes away.

use crate::bridge::ReconcileCtx;
use crate::route;
use crate::schema;
use crate::state::State;
use crate::vrf::Vrf;
use log::{error, warn};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use switchd_provider::{EgressId, SwitchProvider};
use switchd_store::{Row, Store, TxnSlot};
use switchd_types::MacAddress;

const HIT_INTERVAL: Duration = Duration::from_millis(10_000);
const HIT_RETRY: Duration = Duration::from_millis(100);

/// One cached neighbor, keyed in the VRF by its address.
pub struct Neighbor {
    /// Neighbor row this entry came from.
    pub row_key: String,
    pub ip: IpAddr,
    pub mac: Option<MacAddress>,
    pub port_name: String,
    /// Egress of the programmed host entry; `None` while unprogrammed.
    pub egress: Option<EgressId>,
    /// Last hit bit written to the row.
    pub hit: Option<bool>,
}

/// Brings the VRF's programmed host entries in line with the Neighbor
/// table.
pub fn reconcile(vrf: &mut Vrf, ctx: &mut ReconcileCtx<'_>) {
    if !vrf.up.created {
        return;
    }
    let store = ctx.store;
    let table = store.table(schema::NEIGHBOR);

    let deleted: Vec<String> = table.deleted_since(ctx.since).map(str::to_string).collect();
    for key in deleted {
        let doomed: Vec<IpAddr> = vrf
            .neighbors
            .iter()
            .filter(|(_, n)| n.row_key == key)
            .map(|(ip, _)| *ip)
            .collect();
        for ip in doomed {
            destroy(vrf, ip, ctx);
        }
    }

    let rows: Vec<(String, &Row)> = table
        .rows()
        .filter(|(_, row)| row.get("vrf") == Some(vrf.up.name.as_str()))
        .map(|(key, row)| (key.to_string(), row))
        .collect();
    for (key, row) in rows {
        if !row.changed_since(ctx.since) {
            continue;
        }
        let cached_ip = vrf
            .neighbors
            .iter()
            .find(|(_, n)| n.row_key == key)
            .map(|(ip, _)| *ip);
        match cached_ip {
            None => create(vrf, &key, row, ctx),
            Some(ip) => modify(vrf, ip, &key, row, ctx),
        }
    }
}

/// Tears down every neighbor learned on the named port. Used when the
/// port itself is about to go away.
pub fn purge_port(vrf: &mut Vrf, port: &str, ctx: &mut ReconcileCtx<'_>) {
    let doomed: Vec<IpAddr> = vrf
        .neighbors
        .iter()
        .filter(|(_, n)| n.port_name == port)
        .map(|(ip, _)| *ip)
        .collect();
    for ip in doomed {
        destroy(vrf, ip, ctx);
    }
}

fn create(vrf: &mut Vrf, key: &str, row: &Row, ctx: &mut ReconcileCtx<'_>) {
    let Some((ip, mac, port)) = parse(vrf, key, row) else {
        return;
    };
    let Some(mac) = mac else {
        // Unresolved kernel entry; nothing to program yet.
        return;
    };
    match ctx.provider.add_l3_host(&vrf.up.name, ip, mac, &port) {
        Ok(egress) => {
            ctx.txn.clear(schema::NEIGHBOR, key, "status:error");
            vrf.neighbors.insert(
                ip,
                Neighbor {
                    row_key: key.to_string(),
                    ip,
                    mac: Some(mac),
                    port_name: port,
                    egress: Some(egress),
                    hit: None,
                },
            );
            route::set_nexthop_resolution(vrf, ip, Some(egress), ctx);
        }
        Err(err) => {
            error!("{}: failed to add host {}: {}", vrf.up.name, ip, err);
            ctx.txn
                .set(schema::NEIGHBOR, key, "status:error", &err.to_string());
        }
    }
}

fn modify(vrf: &mut Vrf, old_ip: IpAddr, key: &str, row: &Row, ctx: &mut ReconcileCtx<'_>) {
    let parsed = parse(vrf, key, row);
    let Some((ip, mac, port)) = parsed else {
        destroy(vrf, old_ip, ctx);
        return;
    };
    if ip != old_ip {
        destroy(vrf, old_ip, ctx);
        create(vrf, key, row, ctx);
        return;
    }

    // Same address: tear down the old programming, then re-add with the
    // new MAC if the entry is resolved.
    let had_egress = teardown_programming(vrf, ip, ctx);
    let Some(entry) = vrf.neighbors.get_mut(&ip) else {
        return;
    };
    entry.mac = mac;
    entry.port_name = port.clone();
    match mac {
        Some(mac) => match ctx.provider.add_l3_host(&vrf.up.name, ip, mac, &port) {
            Ok(egress) => {
                entry.egress = Some(egress);
                ctx.txn.clear(schema::NEIGHBOR, key, "status:error");
                route::set_nexthop_resolution(vrf, ip, Some(egress), ctx);
            }
            Err(err) => {
                error!("{}: failed to re-add host {}: {}", vrf.up.name, ip, err);
                ctx.txn
                    .set(schema::NEIGHBOR, key, "status:error", &err.to_string());
            }
        },
        None => {
            // The entry went unresolved; keep it cached so resolution
            // can come back without a row churn.
            if had_egress {
                ctx.txn
                    .set(schema::NEIGHBOR, key, "status:error", "unresolved");
            }
        }
    }
}

fn destroy(vrf: &mut Vrf, ip: IpAddr, ctx: &mut ReconcileCtx<'_>) {
    teardown_programming(vrf, ip, ctx);
    vrf.neighbors.remove(&ip);
}

/// Withdraws the host entry: dependent routes lose resolution first,
/// then the entry comes out of the forwarding plane. Returns whether an
/// entry was actually programmed.
fn teardown_programming(vrf: &mut Vrf, ip: IpAddr, ctx: &mut ReconcileCtx<'_>) -> bool {
    let had_egress = vrf
        .neighbors
        .get(&ip)
        .is_some_and(|n| n.egress.is_some());
    if !had_egress {
        return false;
    }
    route::set_nexthop_resolution(vrf, ip, None, ctx);
    if let Some(entry) = vrf.neighbors.get_mut(&ip) {
        entry.egress = None;
    }
    if let Err(err) = ctx.provider.delete_l3_host(&vrf.up.name, ip) {
        error!("{}: failed to delete host {}: {}", vrf.up.name, ip, err);
    }
    true
}

/// Parses a neighbor row. A missing or bad MAC yields `mac: None`; a bad
/// address or unknown port makes the whole row unusable.
fn parse(vrf: &Vrf, key: &str, row: &Row) -> Option<(IpAddr, Option<MacAddress>, String)> {
    let address = row.get_or("ip_address", "");
    let ip = match address.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(err) => {
            warn!("neighbor {}: bad address {}: {}", key, address, err);
            return None;
        }
    };
    let port = row.get_or("port", "");
    if !vrf.up.ports.contains_key(port) {
        warn!("neighbor {}: port {} is not in VRF {}", key, port, vrf.up.name);
        return None;
    }
    let mac = match row.get("mac") {
        None => None,
        Some(text) => match text.parse::<MacAddress>() {
            Ok(mac) => Some(mac),
            Err(err) => {
                warn!("neighbor {}: bad MAC {}: {}", key, text, err);
                None
            }
        },
    };
    Some((ip, mac, port.to_string()))
}

/// Periodic poller for the hardware hit bit of programmed neighbors.
pub struct HitPoller {
    next_run: Instant,
    slot: TxnSlot,
}

impl Default for HitPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl HitPoller {
    pub fn new() -> Self {
        HitPoller {
            next_run: Instant::now(),
            slot: TxnSlot::default(),
        }
    }

    pub fn run(&mut self, state: &mut State, store: &mut Store, provider: &dyn SwitchProvider) {
        self.slot.poll(store, HIT_RETRY);
        let now = Instant::now();
        if now < self.next_run || !self.slot.ready() {
            return;
        }
        self.next_run = now + HIT_INTERVAL;

        let mut txn = store.begin();
        for vrf in state.vrfs.values_mut() {
            if !vrf.up.created {
                continue;
            }
            for neighbor in vrf.neighbors.values_mut() {
                if neighbor.egress.is_none() {
                    continue;
                }
                let hit = match provider.l3_host_hit(&vrf.up.name, neighbor.ip) {
                    Ok(hit) => hit,
                    Err(err) => {
                        warn!(
                            "{}: hit query for {} failed: {}",
                            vrf.up.name, neighbor.ip, err
                        );
                        continue;
                    }
                };
                if neighbor.hit != Some(hit) {
                    txn.set(
                        schema::NEIGHBOR,
                        &neighbor.row_key,
                        "status:dp_hit",
                        if hit { "true" } else { "false" },
                    );
                    neighbor.hit = Some(hit);
                }
            }
        }
        self.slot.submit(store, txn, HIT_RETRY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use pretty_assertions::assert_eq;
    use switchd_provider::{ProviderCall, RouteOp, SimProvider};
    use switchd_types::IpPrefix;

    fn vrf_with_port(sim: &SimProvider) -> Vrf {
        sim.create_switch("vrf0", "system").unwrap();
        let mut vrf = Vrf::new("vrf0", "system");
        vrf.up.created = true;
        vrf.up
            .ports
            .insert("p1".to_string(), crate::port::Port::new("p1"));
        vrf
    }

    fn neighbor_store(mac: &str) -> Store {
        let mut store = Store::new();
        store
            .insert_row(
                schema::NEIGHBOR,
                "n1",
                [
                    ("vrf", "vrf0"),
                    ("ip_address", "10.0.0.1"),
                    ("mac", mac),
                    ("port", "p1"),
                ],
            )
            .unwrap();
        store
    }

    fn run(vrf: &mut Vrf, store: &Store, sim: &SimProvider, since: u64) {
        let mut txn = store.begin();
        let mut ctx = ReconcileCtx {
            store,
            txn: &mut txn,
            provider: sim,
            since,
            system_mac: MacAddress::ZERO,
        };
        reconcile(vrf, &mut ctx);
    }

    #[test]
    fn test_create_programs_host() {
        let sim = SimProvider::new();
        let mut vrf = vrf_with_port(&sim);
        let store = neighbor_store("00:11:22:33:44:55");

        run(&mut vrf, &store, &sim, 0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(vrf.neighbors[&ip].egress.is_some());
        assert_eq!(sim.host_ips("vrf0"), vec![ip]);
    }

    #[test]
    fn test_invalid_mac_not_programmed() {
        let sim = SimProvider::new();
        let mut vrf = vrf_with_port(&sim);
        let store = neighbor_store("not-a-mac");

        run(&mut vrf, &store, &sim, 0);
        assert!(vrf.neighbors.is_empty());
        assert!(sim.host_ips("vrf0").is_empty());
    }

    #[test]
    fn test_programming_failure_writes_error() {
        let sim = SimProvider::new();
        let mut vrf = vrf_with_port(&sim);
        let mut store = neighbor_store("00:11:22:33:44:55");
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        sim.fail_host(ip);

        let mut txn = store.begin();
        let mut ctx = ReconcileCtx {
            store: &store,
            txn: &mut txn,
            provider: &sim,
            since: 0,
            system_mac: MacAddress::ZERO,
        };
        reconcile(&mut vrf, &mut ctx);
        store.commit(&mut txn);

        assert!(vrf.neighbors.is_empty());
        assert!(store
            .table(schema::NEIGHBOR)
            .get("n1")
            .unwrap()
            .get("status:error")
            .is_some());
    }

    #[test]
    fn test_delete_unresolves_routes_before_host_delete() {
        let sim = SimProvider::new();
        let mut vrf = vrf_with_port(&sim);
        let mut store = neighbor_store("00:11:22:33:44:55");
        run(&mut vrf, &store, &sim, 0);

        // Hang a route off the neighbor.
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let prefix: IpPrefix = "10.1.0.0/16".parse().unwrap();
        let egress = vrf.neighbors[&ip].egress;
        vrf.routes.insert(
            "r1".to_string(),
            crate::route::Route {
                prefix,
                nexthops: [(
                    switchd_provider::NexthopTarget::Ip(ip),
                    crate::route::CachedNexthop {
                        row_key: "nh1".to_string(),
                        resolved: true,
                        egress,
                    },
                )]
                .into_iter()
                .collect(),
            },
        );
        vrf.nexthop_index
            .entry(ip)
            .or_default()
            .insert("r1".to_string());

        let since = store.seqno();
        store.delete_row(schema::NEIGHBOR, "n1").unwrap();
        sim.take_calls();
        run(&mut vrf, &store, &sim, since);

        let calls = sim.calls();
        let update_pos = calls.iter().position(|c| {
            matches!(c, ProviderCall::RouteAction { op: RouteOp::Update, .. })
        });
        let delete_pos = calls
            .iter()
            .position(|c| matches!(c, ProviderCall::DeleteL3Host { .. }));
        assert!(update_pos.is_some());
        assert!(delete_pos.is_some());
        assert!(update_pos < delete_pos);
        assert!(vrf.neighbors.is_empty());
        assert!(!vrf.routes["r1"].nexthops[&switchd_provider::NexthopTarget::Ip(ip)].resolved);
    }

    #[test]
    fn test_purge_port_removes_its_neighbors() {
        let sim = SimProvider::new();
        let mut vrf = vrf_with_port(&sim);
        let store = neighbor_store("00:11:22:33:44:55");
        run(&mut vrf, &store, &sim, 0);

        let mut txn = store.begin();
        let mut ctx = ReconcileCtx {
            store: &store,
            txn: &mut txn,
            provider: &sim,
            since: 0,
            system_mac: MacAddress::ZERO,
        };
        purge_port(&mut vrf, "p1", &mut ctx);
        assert!(vrf.neighbors.is_empty());
        assert!(sim.host_ips("vrf0").is_empty());
    }

    #[test]
    fn test_modify_to_unresolved_keeps_cache_entry() {
        let sim = SimProvider::new();
        let mut vrf = vrf_with_port(&sim);
        let mut store = neighbor_store("00:11:22:33:44:55");
        run(&mut vrf, &store, &sim, 0);
        let since = store.seqno();

        store
            .set_field(schema::NEIGHBOR, "n1", "mac", "bogus")
            .unwrap();
        run(&mut vrf, &store, &sim, since);

        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(vrf.neighbors[&ip].egress.is_none());
        assert!(sim.host_ips("vrf0").is_empty());

        // Resolution comes back.
        let since = store.seqno();
        store
            .set_field(schema::NEIGHBOR, "n1", "mac", "00:11:22:33:44:66")
            .unwrap();
        run(&mut vrf, &store, &sim, since);
        assert!(vrf.neighbors[&ip].egress.is_some());
        assert_eq!(sim.host_ips("vrf0"), vec![ip]);
    }

    #[test]
    fn test_hit_poller_writes_on_change_only() {
        let sim = SimProvider::new();
        let mut state = State::new();
        let mut store = neighbor_store("00:11:22:33:44:55");
        let mut vrf = vrf_with_port(&sim);
        run(&mut vrf, &store, &sim, 0);
        state.vrfs.insert("vrf0".to_string(), vrf);

        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        sim.set_host_hit("vrf0", ip, true);

        let mut poller = HitPoller::new();
        poller.run(&mut state, &mut store, &sim);
        let row = store.table(schema::NEIGHBOR).get("n1").unwrap();
        assert_eq!(row.get("status:dp_hit"), Some("true"));

        // Unchanged bit: the next pass stays silent.
        let before = store.seqno();
        poller.next_run = Instant::now();
        poller.run(&mut state, &mut store, &sim);
        assert_eq!(store.seqno(), before);
    }

    #[test]
    fn test_bridge_port_required() {
        let sim = SimProvider::new();
        sim.create_switch("vrf0", "system").unwrap();
        let mut vrf = Vrf::new("vrf0", "system");
        vrf.up = Bridge::new("vrf0", "system");
        vrf.up.created = true;
        let store = neighbor_store("00:11:22:33:44:55");

        run(&mut vrf, &store, &sim, 0);
        assert!(vrf.neighbors.is_empty());
    }
}
