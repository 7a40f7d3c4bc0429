//! Operational status updates.
//!
//! Runs only when the provider's connectivity sequence number moves, so
//! steady state costs one sequence read per tick. A retried commit
//! forces a full refresh since the earlier writes were lost.

use crate::schema;
use crate::state::State;
use std::time::Duration;
use switchd_provider::SwitchProvider;
use switchd_store::{Store, TxnSlot};

const RETRY: Duration = Duration::from_millis(100);

#[derive(Default)]
pub struct StatusUpdater {
    last_seq: u64,
    slot: TxnSlot,
}

impl StatusUpdater {
    pub fn new() -> Self {
        StatusUpdater::default()
    }

    pub fn run(&mut self, state: &mut State, store: &mut Store, provider: &dyn SwitchProvider) {
        self.slot.poll(store, RETRY);
        let retrying = self.slot.retry_requested();
        if !self.slot.ready() {
            return;
        }
        let seq = provider.connectivity_seq();
        if seq == self.last_seq && !retrying {
            return;
        }

        let mut txn = store.begin();
        for bridge in state.switches() {
            if !bridge.created {
                continue;
            }
            if let Some(version) = provider.datapath_version(&bridge.name) {
                txn.set(schema::BRIDGE, &bridge.name, "datapath_version", &version);
            }
        }
        for bridge in state.switches_mut() {
            for port in bridge.ports.values_mut() {
                for iface in port.ifaces.values_mut() {
                    iface.refresh_status(&mut txn, retrying);
                }
            }
        }
        self.last_seq = seq;
        self.slot.submit(store, txn, RETRY);
    }
}
