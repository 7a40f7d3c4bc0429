//! The switchd daemon: one logical thread driving reconciliation and the
//! periodic pollers over a shared store and provider.

use crate::bridge::{reconfigure, ReconcileCtx};
use crate::blocks::StatsBlocks;
use crate::neighbor::HitPoller;
use crate::schema;
use crate::state::State;
use crate::stats::StatsPoller;
use crate::status::StatusUpdater;
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use switchd_provider::SwitchProvider;
use switchd_store::{Seqno, Store, StoreError, Txn, TxnSlot};
use switchd_types::MacAddress;
use thiserror::Error;

const TICK: Duration = Duration::from_millis(50);
const RECONF_RETRY: Duration = Duration::from_millis(1_000);
const CONFIG_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Statistics refresh interval; clamped to the poller's floor.
    pub stats_interval_ms: u64,
    /// Fallback system MAC used when no port can supply one.
    pub system_mac: MacAddress,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            stats_interval_ms: 5_000,
            system_mac: MacAddress::new([0x00, 0x01, 0x02, 0x03, 0x04, 0x05]),
        }
    }
}

/// Columns the engine itself writes. Readers are not alerted about
/// them, which keeps the engine's own commits from looking like
/// configuration changes.
const ENGINE_COLUMNS: [(&str, &str); 16] = [
    (schema::SYSTEM, "cur_cfg"),
    (schema::BRIDGE, "datapath_id"),
    (schema::BRIDGE, "datapath_version"),
    (schema::PORT, "status"),
    (schema::INTERFACE, "admin_state"),
    (schema::INTERFACE, "link_state"),
    (schema::INTERFACE, "link_resets"),
    (schema::INTERFACE, "duplex"),
    (schema::INTERFACE, "link_speed"),
    (schema::INTERFACE, "mtu"),
    (schema::INTERFACE, "mac_in_use"),
    (schema::INTERFACE, "statistics"),
    (schema::INTERFACE, "status"),
    (schema::NEIGHBOR, "status"),
    (schema::ROUTE, "status"),
    (schema::NEXTHOP, "status"),
];

pub struct Daemon {
    state: State,
    store: Store,
    provider: Arc<dyn SwitchProvider>,
    config: DaemonConfig,
    last_seqno: Seqno,
    reconf_slot: TxnSlot,
    status: StatusUpdater,
    stats: StatsPoller,
    hits: HitPoller,
}

impl Daemon {
    pub fn new(provider: Arc<dyn SwitchProvider>, config: DaemonConfig) -> Self {
        let mut store = Store::new();
        for (table, column) in ENGINE_COLUMNS {
            store.omit_alert(table, column);
        }
        let stats = StatsPoller::new(config.stats_interval_ms, StatsBlocks::with_defaults());
        Daemon {
            state: State::new(),
            store,
            provider,
            config,
            last_seqno: 0,
            reconf_slot: TxnSlot::default(),
            status: StatusUpdater::new(),
            stats,
            hits: HitPoller::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// True once initial configuration has been pushed into the store.
    pub fn configured(&self) -> bool {
        self.store
            .table(schema::SYSTEM)
            .rows()
            .next()
            .is_some_and(|(_, row)| {
                row.get_or("cur_cfg", "0").parse::<u64>().unwrap_or(0) >= 1
            })
    }

    /// One pass of the run loop: reconcile if the store moved, then give
    /// each poller its tick.
    pub fn tick(&mut self) {
        self.reconf_slot.poll(&mut self.store, RECONF_RETRY);
        if self.reconf_slot.ready()
            && (self.store.seqno() != self.last_seqno || self.reconf_slot.retry_requested())
        {
            let seqno = self.store.seqno();
            let mut txn = self.store.begin();
            let mut ctx = ReconcileCtx {
                store: &self.store,
                txn: &mut txn,
                provider: self.provider.as_ref(),
                since: self.last_seqno,
                system_mac: self.config.system_mac,
            };
            reconfigure(&mut self.state, &mut ctx);
            ack_config(&self.store, &mut txn);
            self.last_seqno = seqno;
            self.reconf_slot.submit(&mut self.store, txn, RECONF_RETRY);
            if log::log_enabled!(log::Level::Debug) {
                debug!("reconfigured:\n{}", self.state.dump());
                for (category, kb) in self.provider.memory_usage() {
                    debug!("memory {}: {} kB", category, kb);
                }
            }
        }

        self.status
            .run(&mut self.state, &mut self.store, self.provider.as_ref());
        self.stats.run(&self.state, &mut self.store);
        self.hits
            .run(&mut self.state, &mut self.store, self.provider.as_ref());
    }

    /// Runs until cancelled. Holds off until initial configuration is
    /// present; a restart must not tear down a running datapath from an
    /// empty store.
    pub async fn run(&mut self) {
        while !self.configured() {
            tokio::time::sleep(CONFIG_WAIT).await;
        }
        info!("initial configuration present, starting reconciliation");
        loop {
            self.tick();
            tokio::time::sleep(TICK).await;
        }
    }
}

/// Acknowledges a configuration push: `cur_cfg` catches up with
/// `next_cfg` once the pass that saw it has run.
fn ack_config(store: &Store, txn: &mut Txn) {
    let Some((key, row)) = store.table(schema::SYSTEM).rows().next() else {
        return;
    };
    let next = row.get_or("next_cfg", "");
    if !next.is_empty() && row.get("cur_cfg") != Some(next) {
        txn.set(schema::SYSTEM, key, "cur_cfg", next);
    }
}

/// Loads a JSON store snapshot from a file.
pub fn load_config_file(store: &mut Store, path: &Path) -> Result<(), DaemonError> {
    let text = std::fs::read_to_string(path)?;
    store.load_json(&text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use switchd_provider::SimProvider;

    fn configured_daemon() -> (Daemon, Arc<SimProvider>) {
        let sim = Arc::new(SimProvider::new());
        let mut daemon = Daemon::new(sim.clone(), DaemonConfig::default());
        daemon
            .store_mut()
            .insert_row(schema::SYSTEM, "system", [("cur_cfg", "1")])
            .unwrap();
        (daemon, sim)
    }

    #[test]
    fn test_waits_for_initial_configuration() {
        let sim = Arc::new(SimProvider::new());
        let daemon = Daemon::new(sim, DaemonConfig::default());
        assert!(!daemon.configured());

        let (daemon, _) = configured_daemon();
        assert!(daemon.configured());
    }

    #[test]
    fn test_tick_reconciles_store_changes() {
        let (mut daemon, sim) = configured_daemon();
        daemon
            .store_mut()
            .insert_row(schema::BRIDGE, "br0", [("name", "br0")])
            .unwrap();

        daemon.tick();
        assert_eq!(sim.switches(), vec![("br0".to_string(), "system".to_string())]);
        assert!(daemon.state().bridges.contains_key("br0"));
    }

    #[test]
    fn test_unchanged_store_skips_reconciliation() {
        let (mut daemon, sim) = configured_daemon();
        daemon
            .store_mut()
            .insert_row(schema::BRIDGE, "br0", [("name", "br0")])
            .unwrap();
        daemon.tick();
        sim.take_calls();

        daemon.tick();
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_config_push_acknowledged() {
        let (mut daemon, _sim) = configured_daemon();
        daemon
            .store_mut()
            .set_field(schema::SYSTEM, "system", "next_cfg", "2")
            .unwrap();
        daemon.tick();
        assert_eq!(
            daemon
                .store()
                .table(schema::SYSTEM)
                .get("system")
                .unwrap()
                .get("cur_cfg"),
            Some("2")
        );
    }

    #[test]
    fn test_engine_writes_do_not_retrigger() {
        let (mut daemon, _sim) = configured_daemon();
        daemon
            .store_mut()
            .insert_row(schema::BRIDGE, "br0", [("name", "br0")])
            .unwrap();
        daemon.tick();

        // The datapath_id write from the first pass must not make the
        // second pass see a changed store.
        let seqno = daemon.store().seqno();
        daemon.tick();
        assert_eq!(daemon.store().seqno(), seqno);
    }
}
