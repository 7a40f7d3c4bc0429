//! Port reconciliation: translating a Port row into a forwarding-plane
//! bundle, including VLAN membership, bond qualification and L3 addresses.

use crate::iface::Iface;
use crate::schema;
use log::warn;
use std::collections::BTreeMap;
use switchd_provider::{
    BondHandle, BondMode, BondSettings, BundleSettings, IpSettings, LacpMode, SwitchProvider,
    VlanMode,
};
use switchd_store::{Row, Store, Txn};
use switchd_types::{IpPrefix, VlanId};

const DEFAULT_BOND_REBALANCE_MS: u64 = 10_000;

/// One configured port and its member interfaces.
pub struct Port {
    pub name: String,
    pub ifaces: BTreeMap<String, Iface>,
    /// Hardware bond handle, present while the port holds a bond.
    pub bond_handle: Option<BondHandle>,
    /// Bundle as last pushed to the provider, change flags cleared.
    pub applied: Option<BundleSettings>,
}

impl Port {
    pub fn new(name: &str) -> Self {
        Port {
            name: name.to_string(),
            ifaces: BTreeMap::new(),
            bond_handle: None,
            applied: None,
        }
    }

    /// True if the port's own row, any member interface row, or a member
    /// interface set change requires the bundle to be re-pushed.
    pub fn needs_configure(&self, row: &Row, store: &Store, since: switchd_store::Seqno) -> bool {
        if self.applied.is_none() || row.changed_since(since) {
            return true;
        }
        row.get_list("interfaces").iter().any(|name| {
            store
                .table(schema::INTERFACE)
                .get(name)
                .is_some_and(|r| r.changed_since(since))
        })
    }

    /// Pushes the port's bundle to the provider and mirrors the bond
    /// handle into the port's status.
    pub fn configure(
        &mut self,
        row: &Row,
        switch: &str,
        store: &Store,
        provider: &dyn SwitchProvider,
        txn: &mut Txn,
    ) {
        let settings = self.translate(row, store);
        match provider.bundle_register(switch, &self.name, &settings) {
            Ok(handle) => {
                if handle != self.bond_handle {
                    match handle {
                        Some(handle) => txn.set(
                            schema::PORT,
                            &self.name,
                            "status:bond_hw_handle",
                            &handle.to_string(),
                        ),
                        None => txn.clear(schema::PORT, &self.name, "status:bond_hw_handle"),
                    }
                    self.bond_handle = handle;
                }
                let mut applied = settings;
                applied.ip.primary_v4_changed = false;
                applied.ip.secondary_v4_changed = false;
                applied.ip.primary_v6_changed = false;
                applied.ip.secondary_v6_changed = false;
                self.applied = Some(applied);
            }
            Err(err) => warn!("port {}: bundle registration failed: {}", self.name, err),
        }
    }

    /// Builds the bundle for this port from its row.
    pub fn translate(&self, row: &Row, store: &Store) -> BundleSettings {
        let lacp = match row.get_or("lacp", "off") {
            "active" => LacpMode::Active,
            "passive" => LacpMode::Passive,
            "off" => LacpMode::Off,
            other => {
                warn!("port {}: unknown lacp mode {}", self.name, other);
                LacpMode::Off
            }
        };
        let member_names = row.get_list("interfaces");
        // A port becomes a hardware bond when named as one, when it has
        // more than one configured member, or when LACP is on. A plain
        // single-interface port never allocates bond resources.
        let bond_qualified =
            self.name.starts_with("lag") || member_names.len() >= 2 || lacp.is_enabled();

        let mut members = Vec::new();
        for name in &member_names {
            let Some(iface) = self.ifaces.get(*name) else {
                continue;
            };
            let Some(port_no) = iface.port_no else {
                continue;
            };
            if bond_qualified && !member_forwarding(store, name) {
                continue;
            }
            members.push(port_no);
        }

        let tag = row.get("tag").and_then(|t| match t.parse::<VlanId>() {
            Ok(tag) => Some(tag),
            Err(err) => {
                warn!("port {}: ignoring tag: {}", self.name, err);
                None
            }
        });
        let vlan_mode = match row.get("vlan_mode") {
            Some("access") => VlanMode::Access,
            Some("trunk") => VlanMode::Trunk,
            Some("native-tagged") => VlanMode::NativeTagged,
            Some("native-untagged") => VlanMode::NativeUntagged,
            Some(other) => {
                warn!("port {}: unknown vlan_mode {}", self.name, other);
                if tag.is_some() {
                    VlanMode::Access
                } else {
                    VlanMode::Trunk
                }
            }
            None => {
                if tag.is_some() {
                    VlanMode::Access
                } else {
                    VlanMode::Trunk
                }
            }
        };
        let tag = if vlan_mode == VlanMode::Trunk { None } else { tag };
        let trunks = row
            .get_list("trunks")
            .iter()
            .filter_map(|t| match t.parse::<VlanId>() {
                Ok(vid) => Some(vid),
                Err(err) => {
                    warn!("port {}: ignoring trunk VLAN: {}", self.name, err);
                    None
                }
            })
            .collect();

        let bond = bond_qualified.then(|| BondSettings {
            // Hold the hardware handle even before any member can carry
            // traffic, so the handle survives member flaps.
            alloc_only: members.is_empty() && self.bond_handle.is_none(),
            mode: match row.get_or("other_config:bond-mode", "active-backup") {
                "active-backup" => BondMode::ActiveBackup,
                "balance-slb" => BondMode::BalanceSlb,
                "balance-tcp" => BondMode::BalanceTcp,
                other => {
                    warn!("port {}: unknown bond mode {}", self.name, other);
                    BondMode::ActiveBackup
                }
            },
            rebalance_ms: row
                .get("other_config:bond-rebalance-interval")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BOND_REBALANCE_MS),
            // Zero keeps link monitoring off.
            miimon_ms: row
                .get("other_config:bond-miimon-interval")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        });

        BundleSettings {
            members,
            vlan_mode,
            tag,
            trunks,
            lacp,
            bond,
            ip: self.translate_ip(row),
            enabled: row.get_bool("hw_config:enable", true),
        }
    }

    fn translate_ip(&self, row: &Row) -> IpSettings {
        let prev = self.applied.as_ref().map(|a| &a.ip);
        let parse_one = |field: &str| {
            row.get(field).and_then(|s| match s.parse::<IpPrefix>() {
                Ok(prefix) => Some(prefix),
                Err(err) => {
                    warn!("port {}: ignoring {}: {}", self.name, field, err);
                    None
                }
            })
        };
        let parse_list = |field: &str| -> Vec<IpPrefix> {
            row.get_list(field)
                .iter()
                .filter_map(|s| match s.parse::<IpPrefix>() {
                    Ok(prefix) => Some(prefix),
                    Err(err) => {
                        warn!("port {}: ignoring {} entry: {}", self.name, field, err);
                        None
                    }
                })
                .collect()
        };

        let primary_v4 = parse_one("ip4_address");
        let secondary_v4 = parse_list("ip4_address_secondary");
        let primary_v6 = parse_one("ip6_address");
        let secondary_v6 = parse_list("ip6_address_secondary");

        IpSettings {
            primary_v4_changed: prev.map_or(primary_v4.is_some(), |p| p.primary_v4 != primary_v4),
            secondary_v4_changed: prev
                .map_or(!secondary_v4.is_empty(), |p| p.secondary_v4 != secondary_v4),
            primary_v6_changed: prev.map_or(primary_v6.is_some(), |p| p.primary_v6 != primary_v6),
            secondary_v6_changed: prev
                .map_or(!secondary_v6.is_empty(), |p| p.secondary_v6 != secondary_v6),
            primary_v4,
            secondary_v4,
            primary_v6,
            secondary_v6,
        }
    }
}

/// True if a bond member interface may carry traffic in both directions.
fn member_forwarding(store: &Store, iface: &str) -> bool {
    store.table(schema::INTERFACE).get(iface).is_some_and(|row| {
        row.get_bool("hw_bond_config:rx_enabled", false)
            && row.get_bool("hw_bond_config:tx_enabled", false)
    })
}
