//! Statistics callback blocks.
//!
//! The stats pass walks the cached topology in a fixed phase order and
//! hands each scope to the blocks registered for that phase, in priority
//! order. The built-in block writes per-interface counters; extensions
//! hook in with [`StatsBlocks::register`].

use crate::bridge::Bridge;
use crate::iface::Iface;
use crate::port::Port;
use crate::vrf::Vrf;
use switchd_store::{Seqno, Store, Txn};

/// Phases of one statistics pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatsPhase {
    /// Once, before the first pass.
    Init,
    /// Start of every pass.
    Begin,
    PerBridge,
    PerPort,
    PerIface,
    PerVrf,
    /// End of every pass.
    End,
}

/// What a block sees at its phase.
pub enum StatsScope<'a> {
    Init,
    Begin,
    Bridge(&'a Bridge),
    Port(&'a Bridge, &'a Port),
    Iface(&'a Bridge, &'a Port, &'a Iface),
    Vrf(&'a Vrf),
    End,
}

/// A block gets the open transaction, a read handle on the store, the
/// seqno as of the pass, and the scope it was registered for.
pub type StatsCallback = Box<dyn FnMut(&mut Txn, &Store, Seqno, &StatsScope<'_>) + Send>;

struct Entry {
    phase: StatsPhase,
    priority: i32,
    callback: StatsCallback,
}

/// Registered statistics blocks, ordered by phase then priority.
#[derive(Default)]
pub struct StatsBlocks {
    entries: Vec<Entry>,
}

impl StatsBlocks {
    pub fn new() -> Self {
        StatsBlocks::default()
    }

    /// The built-in set: interface counters at priority 0.
    pub fn with_defaults() -> Self {
        let mut blocks = StatsBlocks::new();
        blocks.register(
            StatsPhase::PerIface,
            0,
            Box::new(|txn, _store, _since, scope| {
                if let StatsScope::Iface(_, _, iface) = scope {
                    iface.refresh_stats(txn);
                }
            }),
        );
        blocks
    }

    pub fn register(&mut self, phase: StatsPhase, priority: i32, callback: StatsCallback) {
        self.entries.push(Entry {
            phase,
            priority,
            callback,
        });
        self.entries.sort_by_key(|e| (e.phase, e.priority));
    }

    /// Runs every block of one phase against a scope.
    pub fn run(
        &mut self,
        phase: StatsPhase,
        txn: &mut Txn,
        store: &Store,
        since: Seqno,
        scope: &StatsScope<'_>,
    ) {
        for entry in self.entries.iter_mut().filter(|e| e.phase == phase) {
            (entry.callback)(txn, store, since, scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use switchd_store::Store;

    #[test]
    fn test_blocks_run_in_priority_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut blocks = StatsBlocks::new();
        for (priority, tag) in [(10, "late"), (-5, "early"), (0, "mid")] {
            let order = Arc::clone(&order);
            blocks.register(
                StatsPhase::Begin,
                priority,
                Box::new(move |_, _, _, _| order.lock().unwrap().push(tag)),
            );
        }

        let store = Store::new();
        let mut txn = store.begin();
        blocks.run(StatsPhase::Begin, &mut txn, &store, 0, &StatsScope::Begin);
        assert_eq!(*order.lock().unwrap(), vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_blocks_filtered_by_phase() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut blocks = StatsBlocks::new();
        let counter = Arc::clone(&hits);
        blocks.register(
            StatsPhase::End,
            0,
            Box::new(move |_, _, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let store = Store::new();
        let mut txn = store.begin();
        blocks.run(StatsPhase::Begin, &mut txn, &store, 0, &StatsScope::Begin);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        blocks.run(StatsPhase::End, &mut txn, &store, 0, &StatsScope::End);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocks_receive_store_and_seqno() {
        let mut store = Store::new();
        store
            .insert_row(crate::schema::BRIDGE, "br0", [("name", "br0")])
            .unwrap();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let mut blocks = StatsBlocks::new();
        let sink = Arc::clone(&seen);
        blocks.register(
            StatsPhase::Begin,
            0,
            Box::new(move |_, store, since, _| {
                let bridges = store.table(crate::schema::BRIDGE).rows().count();
                *sink.lock().unwrap() = Some((bridges, since));
            }),
        );

        let since = store.seqno();
        let mut txn = store.begin();
        blocks.run(StatsPhase::Begin, &mut txn, &store, since, &StatsScope::Begin);
        assert_eq!(*seen.lock().unwrap(), Some((1, since)));
    }
}
