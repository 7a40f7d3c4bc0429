//! Route and next-hop reconciliation.
//!
//! The engine caches exactly the next-hops the provider accepted, so the
//! cached set is always the configured set minus failed programming.
//! Resolution changes fan out from the neighbor cache through the
//! next-hop index, one in-place update per dependent route.

use crate::bridge::ReconcileCtx;
use crate::neighbor::Neighbor;
use crate::schema;
use crate::vrf::Vrf;
use log::{error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use switchd_provider::{EgressId, NexthopOutcome, NexthopTarget, RouteNexthop, RouteOp, RouteSpec};
use switchd_store::{Row, Seqno, Store, Txn};
use switchd_types::IpPrefix;

/// One programmed route.
pub struct Route {
    pub prefix: IpPrefix,
    pub nexthops: BTreeMap<NexthopTarget, CachedNexthop>,
}

/// One programmed next-hop of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedNexthop {
    /// NextHop row this entry came from, for status writes.
    pub row_key: String,
    pub resolved: bool,
    pub egress: Option<EgressId>,
}

/// Brings the VRF's programmed routes in line with the Route table.
pub fn reconcile(vrf: &mut Vrf, ctx: &mut ReconcileCtx<'_>) {
    if !vrf.up.created {
        return;
    }
    let store = ctx.store;
    let table = store.table(schema::ROUTE);
    let switch = vrf.up.name.clone();

    // An empty table is a routing restart: drop everything and wait for
    // the repopulation.
    if table.is_empty() {
        if !vrf.routes.is_empty() {
            info!(
                "{}: route table cleared; flushing {} routes",
                switch,
                vrf.routes.len()
            );
            let routes = std::mem::take(&mut vrf.routes);
            vrf.nexthop_index.clear();
            for route in routes.values() {
                delete_route(ctx, &switch, route);
            }
        }
        return;
    }

    let deleted: Vec<String> = table
        .deleted_since(ctx.since)
        .map(str::to_string)
        .collect();
    for key in deleted {
        if let Some(route) = vrf.routes.remove(&key) {
            unindex_route(&mut vrf.nexthop_index, &key, &route);
            delete_route(ctx, &switch, &route);
        }
    }

    let rows: Vec<(String, &Row)> = table
        .rows()
        .filter(|(_, row)| row.get("vrf") == Some(vrf.up.name.as_str()))
        .map(|(key, row)| (key.to_string(), row))
        .collect();
    for (key, row) in rows {
        let cached = vrf.routes.contains_key(&key);
        if cached && !row.changed_since(ctx.since) && !nexthop_refs_changed(row, store, ctx.since)
        {
            continue;
        }
        let Some(prefix) = parse_prefix(&key, row) else {
            continue;
        };
        let desired = desired_nexthops(&vrf.neighbors, row, store);

        if !cached {
            if desired.is_empty() {
                continue;
            }
            let spec = to_spec(prefix, desired.iter());
            match ctx.provider.route_action(&switch, RouteOp::Add, &spec) {
                Ok(outcomes) => {
                    let kept = apply_outcomes(desired, &outcomes, ctx.txn);
                    index_route(&mut vrf.nexthop_index, &key, &kept);
                    ctx.txn.clear(schema::ROUTE, &key, "status:error");
                    vrf.routes.insert(
                        key,
                        Route {
                            prefix,
                            nexthops: kept,
                        },
                    );
                }
                Err(err) => {
                    error!("{}: failed to add route {}: {}", switch, prefix, err);
                    ctx.txn.set(schema::ROUTE, &key, "status:error", &err.to_string());
                }
            }
            continue;
        }

        // The row no longer asks for any next-hop (deselected or all
        // references dropped): the route object itself comes down.
        if desired.is_empty() {
            if let Some(route) = vrf.routes.remove(&key) {
                unindex_route(&mut vrf.nexthop_index, &key, &route);
                delete_route(ctx, &switch, &route);
            }
            ctx.txn.clear(schema::ROUTE, &key, "status:error");
            continue;
        }

        let Some(route) = vrf.routes.get_mut(&key) else {
            continue;
        };
        let mut failure: Option<String> = None;
        let removed: Vec<(NexthopTarget, CachedNexthop)> = route
            .nexthops
            .iter()
            .filter(|(target, _)| !desired.contains_key(*target))
            .map(|(target, nh)| (target.clone(), nh.clone()))
            .collect();
        if !removed.is_empty() {
            let spec = to_spec(prefix, removed.iter().map(|(t, n)| (t, n)));
            if let Err(err) = ctx
                .provider
                .route_action(&switch, RouteOp::DeleteNexthops, &spec)
            {
                error!(
                    "{}: failed to remove next-hops of {}: {}",
                    switch, prefix, err
                );
                failure = Some(err.to_string());
            }
            for (target, _) in &removed {
                route.nexthops.remove(target);
                if let NexthopTarget::Ip(ip) = target {
                    unindex_one(&mut vrf.nexthop_index, *ip, &key);
                }
            }
        }
        let added: BTreeMap<NexthopTarget, CachedNexthop> = desired
            .into_iter()
            .filter(|(target, _)| !route.nexthops.contains_key(target))
            .collect();
        if !added.is_empty() {
            let spec = to_spec(prefix, added.iter());
            match ctx.provider.route_action(&switch, RouteOp::Add, &spec) {
                Ok(outcomes) => {
                    let kept = apply_outcomes(added, &outcomes, ctx.txn);
                    index_route(&mut vrf.nexthop_index, &key, &kept);
                    route.nexthops.extend(kept);
                }
                Err(err) => {
                    error!("{}: failed to extend route {}: {}", switch, prefix, err);
                    failure = Some(err.to_string());
                }
            }
        }
        match failure {
            Some(err) => ctx.txn.set(schema::ROUTE, &key, "status:error", &err),
            None => ctx.txn.clear(schema::ROUTE, &key, "status:error"),
        }
        if route.nexthops.is_empty() {
            if let Some(route) = vrf.routes.remove(&key) {
                delete_route(ctx, &switch, &route);
            }
        }
    }
}

/// Propagates a neighbor's resolution change to every route that uses it
/// as a next-hop, one in-place provider update per route.
pub fn set_nexthop_resolution(
    vrf: &mut Vrf,
    ip: IpAddr,
    egress: Option<EgressId>,
    ctx: &mut ReconcileCtx<'_>,
) {
    let resolved = egress.is_some();
    let Some(keys) = vrf.nexthop_index.get(&ip) else {
        return;
    };
    let keys: Vec<String> = keys.iter().cloned().collect();
    let switch = vrf.up.name.clone();
    let target = NexthopTarget::Ip(ip);
    for key in keys {
        let Some(route) = vrf.routes.get_mut(&key) else {
            continue;
        };
        let Some(nh) = route.nexthops.get_mut(&target) else {
            continue;
        };
        if nh.resolved == resolved && nh.egress == egress {
            continue;
        }
        nh.resolved = resolved;
        nh.egress = egress;
        let spec = RouteSpec {
            prefix: route.prefix,
            nexthops: vec![RouteNexthop {
                target: target.clone(),
                resolved,
                egress,
            }],
        };
        if let Err(err) = ctx.provider.route_action(&switch, RouteOp::Update, &spec) {
            error!(
                "{}: failed to update next-hop {} of {}: {}",
                switch, target, route.prefix, err
            );
        }
    }
}

/// Builds the next-hop set a selected route row asks for. Unselected
/// routes and malformed next-hop rows contribute nothing.
fn desired_nexthops(
    neighbors: &BTreeMap<IpAddr, Neighbor>,
    row: &Row,
    store: &Store,
) -> BTreeMap<NexthopTarget, CachedNexthop> {
    let mut desired = BTreeMap::new();
    if !row.get_bool("selected", false) {
        return desired;
    }
    for nh_key in row.get_list("nexthops") {
        let Some(nh_row) = store.table(schema::NEXTHOP).get(nh_key) else {
            warn!("next-hop {} does not exist; ignoring", nh_key);
            continue;
        };
        if !nh_row.get_bool("selected", true) {
            continue;
        }
        let address = nh_row.get("ip_address");
        let ports = nh_row.get_list("ports");
        let target = match (address, ports.is_empty()) {
            (Some(address), true) => match address.parse::<IpAddr>() {
                Ok(ip) => NexthopTarget::Ip(ip),
                Err(err) => {
                    warn!("next-hop {}: bad address {}: {}", nh_key, address, err);
                    continue;
                }
            },
            (None, false) => {
                if ports.len() > 1 {
                    warn!("next-hop {}: multiple ports; using {}", nh_key, ports[0]);
                }
                NexthopTarget::Port(ports[0].to_string())
            }
            _ => {
                warn!(
                    "next-hop {} must name exactly one of an address or a port",
                    nh_key
                );
                continue;
            }
        };
        let (resolved, egress) = match &target {
            NexthopTarget::Ip(ip) => neighbors
                .get(ip)
                .map_or((false, None), |n| (n.egress.is_some(), n.egress)),
            NexthopTarget::Port(_) => (true, None),
        };
        desired.insert(
            target,
            CachedNexthop {
                row_key: nh_key.to_string(),
                resolved,
                egress,
            },
        );
    }
    desired
}

/// Keeps the next-hops the provider accepted; failed ones get their
/// error written back and are dropped from the cache.
fn apply_outcomes(
    mut nexthops: BTreeMap<NexthopTarget, CachedNexthop>,
    outcomes: &[NexthopOutcome],
    txn: &mut Txn,
) -> BTreeMap<NexthopTarget, CachedNexthop> {
    for outcome in outcomes {
        let Some(nh) = nexthops.get(&outcome.target) else {
            continue;
        };
        match &outcome.error {
            Some(err) => {
                warn!("next-hop {} not programmed: {}", outcome.target, err);
                txn.set(schema::NEXTHOP, &nh.row_key, "status:error", &err.to_string());
                nexthops.remove(&outcome.target);
            }
            None => txn.clear(schema::NEXTHOP, &nh.row_key, "status:error"),
        }
    }
    nexthops
}

fn delete_route(ctx: &mut ReconcileCtx<'_>, switch: &str, route: &Route) {
    let spec = to_spec(route.prefix, route.nexthops.iter());
    if let Err(err) = ctx.provider.route_action(switch, RouteOp::Delete, &spec) {
        error!("{}: failed to delete route {}: {}", switch, route.prefix, err);
    }
}

fn to_spec<'a, I>(prefix: IpPrefix, nexthops: I) -> RouteSpec
where
    I: Iterator<Item = (&'a NexthopTarget, &'a CachedNexthop)>,
{
    RouteSpec {
        prefix,
        nexthops: nexthops
            .map(|(target, nh)| RouteNexthop {
                target: target.clone(),
                resolved: nh.resolved,
                egress: nh.egress,
            })
            .collect(),
    }
}

fn parse_prefix(key: &str, row: &Row) -> Option<IpPrefix> {
    match row.get_or("prefix", "").parse::<IpPrefix>() {
        Ok(prefix) => Some(prefix),
        Err(err) => {
            warn!("route {}: bad prefix: {}", key, err);
            None
        }
    }
}

fn nexthop_refs_changed(row: &Row, store: &Store, since: Seqno) -> bool {
    let table = store.table(schema::NEXTHOP);
    let refs = row.get_list("nexthops");
    refs.iter()
        .any(|key| table.get(key).is_none_or(|r| r.changed_since(since)))
        || table.deleted_since(since).any(|key| refs.contains(&key))
}

fn index_route(
    index: &mut BTreeMap<IpAddr, BTreeSet<String>>,
    key: &str,
    nexthops: &BTreeMap<NexthopTarget, CachedNexthop>,
) {
    for target in nexthops.keys() {
        if let NexthopTarget::Ip(ip) = target {
            index.entry(*ip).or_default().insert(key.to_string());
        }
    }
}

fn unindex_route(
    index: &mut BTreeMap<IpAddr, BTreeSet<String>>,
    key: &str,
    route: &Route,
) {
    for target in route.nexthops.keys() {
        if let NexthopTarget::Ip(ip) = target {
            unindex_one(index, *ip, key);
        }
    }
}

fn unindex_one(index: &mut BTreeMap<IpAddr, BTreeSet<String>>, ip: IpAddr, key: &str) {
    if let Some(keys) = index.get_mut(&ip) {
        keys.remove(key);
        if keys.is_empty() {
            index.remove(&ip);
        }
    }
}
