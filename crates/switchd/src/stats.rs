//! Statistics poller.
//!
//! Runs the registered blocks over the cached topology on a fixed
//! interval and pushes the collected counters through a single
//! transaction slot, so a stalled commit never stacks a second
//! transaction behind it.

use crate::blocks::{StatsBlocks, StatsPhase, StatsScope};
use crate::state::State;
use std::time::{Duration, Instant};
use switchd_store::{Store, TxnSlot};

/// Floor for the configurable interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(5_000);
const RETRY: Duration = Duration::from_millis(100);

pub struct StatsPoller {
    interval: Duration,
    next_run: Instant,
    slot: TxnSlot,
    blocks: StatsBlocks,
    inited: bool,
}

impl StatsPoller {
    /// Requested intervals below the floor are clamped up.
    pub fn new(requested_ms: u64, blocks: StatsBlocks) -> Self {
        StatsPoller {
            interval: Duration::from_millis(requested_ms).max(MIN_INTERVAL),
            next_run: Instant::now(),
            slot: TxnSlot::default(),
            blocks,
            inited: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn run(&mut self, state: &State, store: &mut Store) {
        self.slot.poll(store, RETRY);
        let now = Instant::now();
        if now < self.next_run || !self.slot.ready() {
            return;
        }
        self.next_run = now + self.interval;

        let since = store.seqno();
        let mut txn = store.begin();
        if !self.inited {
            self.blocks
                .run(StatsPhase::Init, &mut txn, store, since, &StatsScope::Init);
            self.inited = true;
        }
        self.blocks
            .run(StatsPhase::Begin, &mut txn, store, since, &StatsScope::Begin);
        for bridge in state.switches() {
            self.blocks.run(
                StatsPhase::PerBridge,
                &mut txn,
                store,
                since,
                &StatsScope::Bridge(bridge),
            );
            for port in bridge.ports.values() {
                self.blocks.run(
                    StatsPhase::PerPort,
                    &mut txn,
                    store,
                    since,
                    &StatsScope::Port(bridge, port),
                );
                for iface in port.ifaces.values() {
                    self.blocks.run(
                        StatsPhase::PerIface,
                        &mut txn,
                        store,
                        since,
                        &StatsScope::Iface(bridge, port, iface),
                    );
                }
            }
        }
        for vrf in state.vrfs.values() {
            self.blocks
                .run(StatsPhase::PerVrf, &mut txn, store, since, &StatsScope::Vrf(vrf));
        }
        self.blocks
            .run(StatsPhase::End, &mut txn, store, since, &StatsScope::End);
        self.slot.submit(store, txn, RETRY);
    }
}
