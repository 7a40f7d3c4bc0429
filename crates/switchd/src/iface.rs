//! Interface lifecycle: network device open, datapath attach, and the
//! operational fields written back for each device.

use crate::schema;
use log::{error, warn};
use std::collections::BTreeMap;
use switchd_provider::{Netdev, PortNumber, SwitchProvider};
use switchd_store::{Row, Txn};

/// Operational columns the engine owns on an Interface row.
pub const STATUS_COLUMNS: &[&str] = &[
    "admin_state",
    "link_state",
    "link_resets",
    "duplex",
    "link_speed",
    "mtu",
    "mac_in_use",
];

/// One interface attached to a switch instance.
pub struct Iface {
    pub name: String,
    pub kind: String,
    pub port_no: Option<PortNumber>,
    pub netdev: Box<dyn Netdev>,
    /// Device change seq as of the last status refresh.
    pub change_seq: u64,
}

impl Iface {
    /// Opens the device, applies its options and attaches it to `switch`.
    ///
    /// On any failure the interface's operational columns are cleared and
    /// no partial object is left behind.
    pub fn create(
        name: &str,
        row: &Row,
        switch: &str,
        provider: &dyn SwitchProvider,
        txn: &mut Txn,
    ) -> Option<Iface> {
        let kind = row.get_or("type", "system").to_string();
        let netdev = match provider.open_netdev(name, &kind) {
            Ok(netdev) => netdev,
            Err(err) => {
                warn!("could not open network device {} ({}): {}", name, kind, err);
                clear_status(txn, name);
                return None;
            }
        };
        if let Err(err) = netdev.set_config(&options_of(row)) {
            warn!("{}: could not set configuration: {}", name, err);
            clear_status(txn, name);
            return None;
        }
        let port_no = match provider.port_add(switch, name) {
            Ok(port_no) => port_no,
            Err(err) => {
                error!("failed to add {} as port of {}: {}", name, switch, err);
                clear_status(txn, name);
                return None;
            }
        };
        Some(Iface {
            name: name.to_string(),
            kind,
            port_no: Some(port_no),
            netdev,
            change_seq: 0,
        })
    }

    /// Reapplies device options after a configuration change.
    pub fn apply_config(&self, row: &Row) {
        if let Err(err) = self.netdev.set_config(&options_of(row)) {
            warn!("{}: could not set configuration: {}", self.name, err);
        }
    }

    /// Writes the device's operational state into the transaction.
    ///
    /// Skipped when the device change seq has not moved, unless `forced`.
    pub fn refresh_status(&mut self, txn: &mut Txn, forced: bool) {
        let seq = self.netdev.change_seq();
        if !forced && seq == self.change_seq {
            return;
        }
        let status = match self.netdev.status() {
            Ok(status) => status,
            Err(err) => {
                warn!("{}: could not read device status: {}", self.name, err);
                return;
            }
        };
        let name = self.name.as_str();
        txn.set(
            schema::INTERFACE,
            name,
            "admin_state",
            if status.admin_up { "up" } else { "down" },
        );
        txn.set(
            schema::INTERFACE,
            name,
            "link_state",
            if status.link_up { "up" } else { "down" },
        );
        txn.set(
            schema::INTERFACE,
            name,
            "link_resets",
            &status.link_resets.to_string(),
        );
        match status.duplex {
            Some(duplex) => txn.set(schema::INTERFACE, name, "duplex", duplex.as_str()),
            None => txn.clear(schema::INTERFACE, name, "duplex"),
        }
        match status.speed_mbps {
            // link_speed is kept in bits per second.
            Some(mbps) => txn.set(
                schema::INTERFACE,
                name,
                "link_speed",
                &(mbps * 1_000_000).to_string(),
            ),
            None => txn.clear(schema::INTERFACE, name, "link_speed"),
        }
        match status.mtu {
            Some(mtu) => txn.set(schema::INTERFACE, name, "mtu", &mtu.to_string()),
            None => txn.clear(schema::INTERFACE, name, "mtu"),
        }
        match status.mac_in_use {
            Some(mac) => txn.set(schema::INTERFACE, name, "mac_in_use", &mac.to_string()),
            None => txn.clear(schema::INTERFACE, name, "mac_in_use"),
        }
        self.change_seq = seq;
    }

    /// Writes the device's counters into the transaction. Counters the
    /// device does not maintain are not reported.
    pub fn refresh_stats(&self, txn: &mut Txn) {
        let stats = match self.netdev.stats() {
            Ok(stats) => stats,
            Err(err) => {
                warn!("{}: could not read device stats: {}", self.name, err);
                return;
            }
        };
        let counters = [
            ("rx_packets", stats.rx_packets),
            ("tx_packets", stats.tx_packets),
            ("rx_bytes", stats.rx_bytes),
            ("tx_bytes", stats.tx_bytes),
            ("rx_dropped", stats.rx_dropped),
            ("tx_dropped", stats.tx_dropped),
            ("rx_errors", stats.rx_errors),
            ("tx_errors", stats.tx_errors),
            ("rx_frame_err", stats.rx_frame_errors),
            ("rx_over_err", stats.rx_over_errors),
            ("rx_crc_err", stats.rx_crc_errors),
            ("collisions", stats.collisions),
        ];
        for (key, value) in counters {
            if let Some(value) = value {
                txn.set(
                    schema::INTERFACE,
                    &self.name,
                    &format!("statistics:{}", key),
                    &value.to_string(),
                );
            }
        }
    }
}

fn options_of(row: &Row) -> BTreeMap<String, String> {
    row.get_map("options")
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Clears every engine-owned operational field of an interface.
pub fn clear_status(txn: &mut Txn, iface: &str) {
    for column in STATUS_COLUMNS {
        txn.clear(schema::INTERFACE, iface, column);
    }
    txn.clear_column(schema::INTERFACE, iface, "status");
    txn.clear_column(schema::INTERFACE, iface, "statistics");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use switchd_provider::{SimOp, SimProvider};
    use switchd_store::Store;

    fn store_with_iface() -> Store {
        let mut store = Store::new();
        store
            .insert_row(
                schema::INTERFACE,
                "eth0",
                [("name", "eth0"), ("link_state", "up")],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_create_attaches_port() {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();
        let store = store_with_iface();
        let mut txn = store.begin();

        let row = store.table(schema::INTERFACE).get("eth0").unwrap();
        let iface = Iface::create("eth0", row, "br0", &sim, &mut txn).unwrap();
        assert_eq!(iface.port_no, Some(1));
        assert_eq!(iface.kind, "system");
        assert!(txn.is_empty());
    }

    #[test]
    fn test_create_failure_clears_operational_fields() {
        let sim = SimProvider::new();
        sim.fail_op(SimOp::OpenNetdev);
        let mut store = store_with_iface();
        let mut txn = store.begin();

        let row = store.table(schema::INTERFACE).get("eth0").unwrap();
        assert!(Iface::create("eth0", row, "br0", &sim, &mut txn).is_none());

        store.commit(&mut txn);
        let row = store.table(schema::INTERFACE).get("eth0").unwrap();
        assert_eq!(row.get("link_state"), None);
    }

    #[test]
    fn test_refresh_status_suppressed_without_change() {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();
        sim.add_netdev("eth0", "00:11:22:33:44:55".parse().unwrap());
        let mut store = store_with_iface();

        let mut txn = store.begin();
        let row = store.table(schema::INTERFACE).get("eth0").unwrap();
        let mut iface = Iface::create("eth0", row, "br0", &sim, &mut txn).unwrap();

        iface.refresh_status(&mut txn, false);
        store.commit(&mut txn);
        let row = store.table(schema::INTERFACE).get("eth0").unwrap();
        assert_eq!(row.get("link_state"), Some("down"));
        assert_eq!(row.get("mac_in_use"), Some("00:11:22:33:44:55"));

        // No device change: nothing staged.
        let mut txn = store.begin();
        iface.refresh_status(&mut txn, false);
        assert!(txn.is_empty());

        sim.set_link("eth0", true);
        let mut txn = store.begin();
        iface.refresh_status(&mut txn, false);
        store.commit(&mut txn);
        let row = store.table(schema::INTERFACE).get("eth0").unwrap();
        assert_eq!(row.get("link_state"), Some("up"));
        assert_eq!(row.get("link_resets"), Some("1"));
    }

    #[test]
    fn test_refresh_stats_reports_maintained_counters_only() {
        let sim = SimProvider::new();
        sim.create_switch("br0", "system").unwrap();
        sim.add_netdev("eth0", "00:11:22:33:44:55".parse().unwrap());
        sim.set_stats(
            "eth0",
            switchd_provider::NetdevStats {
                rx_packets: Some(7),
                tx_packets: None,
                ..Default::default()
            },
        );
        let mut store = store_with_iface();

        let mut txn = store.begin();
        let row = store.table(schema::INTERFACE).get("eth0").unwrap();
        let iface = Iface::create("eth0", row, "br0", &sim, &mut txn).unwrap();
        iface.refresh_stats(&mut txn);
        store.commit(&mut txn);

        let row = store.table(schema::INTERFACE).get("eth0").unwrap();
        assert_eq!(row.get("statistics:rx_packets"), Some("7"));
        assert_eq!(row.get("statistics:tx_packets"), None);
    }
}
