//! Non-blocking transactions and the per-subsystem transaction slot.

use crate::store::{column_of, Store};
use std::time::{Duration, Instant};

/// Result of committing a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// All writes applied.
    Success,
    /// Nothing to apply; every staged write matched the stored value.
    Unchanged,
    /// Commit still in progress; poll again later.
    Incomplete,
    /// Commit failed; the caller should schedule a retry.
    Failed,
}

#[derive(Debug, Clone)]
enum Write {
    Set {
        table: String,
        key: String,
        field: String,
        value: String,
    },
    Clear {
        table: String,
        key: String,
        field: String,
    },
    ClearColumn {
        table: String,
        key: String,
        column: String,
    },
}

/// A batch of staged writes.
///
/// Writes accumulate locally and hit the store only on [`Store::commit`];
/// an incomplete commit leaves the batch intact for a later poll.
#[derive(Debug, Clone, Default)]
pub struct Txn {
    writes: Vec<Write>,
}

impl Txn {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Txn::default()
    }

    /// True if no writes are staged.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Stages a field write.
    pub fn set(&mut self, table: &str, key: &str, field: &str, value: &str) {
        self.writes.push(Write::Set {
            table: table.to_string(),
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        });
    }

    /// Stages a field removal.
    pub fn clear(&mut self, table: &str, key: &str, field: &str) {
        self.writes.push(Write::Clear {
            table: table.to_string(),
            key: key.to_string(),
            field: field.to_string(),
        });
    }

    /// Stages removal of a whole column, including all its map entries.
    pub fn clear_column(&mut self, table: &str, key: &str, column: &str) {
        self.writes.push(Write::ClearColumn {
            table: table.to_string(),
            key: key.to_string(),
            column: column.to_string(),
        });
    }
}

impl Store {
    /// Begins a new transaction.
    pub fn begin(&self) -> Txn {
        Txn::new()
    }

    /// Commits a transaction.
    ///
    /// On [`CommitStatus::Incomplete`] the staged writes are left in place so
    /// the caller can poll again; any other status drains the transaction.
    pub fn commit(&mut self, txn: &mut Txn) -> CommitStatus {
        match self.next_scripted_commit() {
            Some(CommitStatus::Incomplete) => return CommitStatus::Incomplete,
            Some(CommitStatus::Failed) => {
                txn.writes.clear();
                return CommitStatus::Failed;
            }
            _ => {}
        }

        let mut changed = false;
        for write in txn.writes.drain(..) {
            match write {
                Write::Set {
                    table,
                    key,
                    field,
                    value,
                } => {
                    if !self.is_omitted(&table, column_of(&field)) {
                        changed |= self.apply_set(&table, &key, &field, &value);
                    }
                }
                Write::Clear { table, key, field } => {
                    if !self.is_omitted(&table, column_of(&field)) {
                        changed |= self.apply_clear(&table, &key, &field);
                    }
                }
                Write::ClearColumn { table, key, column } => {
                    if !self.is_omitted(&table, &column) {
                        changed |= self.apply_clear_column(&table, &key, &column);
                    }
                }
            }
        }

        if changed {
            CommitStatus::Success
        } else {
            CommitStatus::Unchanged
        }
    }
}

/// At-most-one-outstanding-transaction state machine.
///
/// Each transaction-writing subsystem (reconfiguration, status refresh,
/// statistics, neighbor hit polling) owns one slot and drives it from its
/// poll tick: a new transaction is only started while the slot is ready.
#[derive(Debug, Default)]
pub enum TxnSlot {
    /// No transaction outstanding.
    #[default]
    Idle,
    /// A commit returned incomplete; the transaction is still in flight.
    Pending(Txn),
    /// A commit failed; retry once the deadline passes.
    Retrying { deadline: Instant },
}

impl TxnSlot {
    /// True if a new transaction may be started now.
    pub fn ready(&self) -> bool {
        match self {
            TxnSlot::Idle => true,
            TxnSlot::Pending(_) => false,
            TxnSlot::Retrying { deadline } => Instant::now() >= *deadline,
        }
    }

    /// True if a retry was requested and is still (or now) due.
    pub fn retry_requested(&self) -> bool {
        matches!(self, TxnSlot::Retrying { .. })
    }

    /// Commits a fresh transaction through the slot.
    ///
    /// Incomplete commits park the transaction as pending; failed commits
    /// schedule a retry after `retry_delay`.
    pub fn submit(&mut self, store: &mut Store, mut txn: Txn, retry_delay: Duration) -> CommitStatus {
        let status = store.commit(&mut txn);
        *self = match status {
            CommitStatus::Incomplete => TxnSlot::Pending(txn),
            CommitStatus::Failed => TxnSlot::Retrying {
                deadline: Instant::now() + retry_delay,
            },
            CommitStatus::Success | CommitStatus::Unchanged => TxnSlot::Idle,
        };
        status
    }

    /// Polls a pending transaction; no-op unless the slot is pending.
    pub fn poll(&mut self, store: &mut Store, retry_delay: Duration) -> Option<CommitStatus> {
        if let TxnSlot::Pending(txn) = self {
            let status = store.commit(txn);
            match status {
                CommitStatus::Incomplete => {}
                CommitStatus::Failed => {
                    *self = TxnSlot::Retrying {
                        deadline: Instant::now() + retry_delay,
                    };
                }
                CommitStatus::Success | CommitStatus::Unchanged => *self = TxnSlot::Idle,
            }
            Some(status)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_with_row() -> Store {
        let mut store = Store::new();
        store
            .insert_row("Interface", "eth0", [("name", "eth0")])
            .unwrap();
        store
    }

    #[test]
    fn test_commit_success_and_unchanged() {
        let mut store = store_with_row();

        let mut txn = store.begin();
        txn.set("Interface", "eth0", "link_state", "up");
        assert_eq!(store.commit(&mut txn), CommitStatus::Success);
        assert_eq!(
            store.table("Interface").get("eth0").unwrap().get("link_state"),
            Some("up")
        );

        // Same value again: nothing to apply.
        let mut txn = store.begin();
        txn.set("Interface", "eth0", "link_state", "up");
        assert_eq!(store.commit(&mut txn), CommitStatus::Unchanged);
    }

    #[test]
    fn test_alert_suppressed_write_keeps_seqno() {
        let mut store = store_with_row();
        store.omit_alert("Interface", "statistics");
        let before = store.seqno();

        let mut txn = store.begin();
        txn.set("Interface", "eth0", "statistics:rx_packets", "10");
        assert_eq!(store.commit(&mut txn), CommitStatus::Success);
        assert_eq!(store.seqno(), before);

        // A non-suppressed column still bumps it.
        let mut txn = store.begin();
        txn.set("Interface", "eth0", "link_state", "up");
        store.commit(&mut txn);
        assert!(store.seqno() > before);
    }

    #[test]
    fn test_suppressed_write_not_seen_as_modification() {
        let mut store = store_with_row();
        store.omit_alert("Interface", "statistics");
        let before = store.seqno();

        let mut txn = store.begin();
        txn.set("Interface", "eth0", "statistics:rx_packets", "10");
        store.commit(&mut txn);

        let row = store.table("Interface").get("eth0").unwrap();
        assert!(!row.modified_since(before));
        assert!(!row.column_modified_since("statistics", before));
    }

    #[test]
    fn test_omitted_column_write_dropped() {
        let mut store = store_with_row();
        store.omit("Interface", "ignored");

        let mut txn = store.begin();
        txn.set("Interface", "eth0", "ignored:key", "v");
        assert_eq!(store.commit(&mut txn), CommitStatus::Unchanged);
        assert!(store.table("Interface").get("eth0").unwrap().get("ignored:key").is_none());
    }

    #[test]
    fn test_write_to_deleted_row_dropped() {
        let mut store = store_with_row();
        let mut txn = store.begin();
        txn.set("Interface", "eth0", "link_state", "up");
        store.delete_row("Interface", "eth0").unwrap();
        assert_eq!(store.commit(&mut txn), CommitStatus::Unchanged);
    }

    #[test]
    fn test_clear_column() {
        let mut store = store_with_row();
        let mut txn = store.begin();
        txn.set("Interface", "eth0", "status:a", "1");
        txn.set("Interface", "eth0", "status:b", "2");
        store.commit(&mut txn);

        let mut txn = store.begin();
        txn.clear_column("Interface", "eth0", "status");
        assert_eq!(store.commit(&mut txn), CommitStatus::Success);
        let row = store.table("Interface").get("eth0").unwrap();
        assert!(row.get_map("status").is_empty());
    }

    #[test]
    fn test_slot_incomplete_keeps_pending() {
        let mut store = store_with_row();
        store.script_commit(CommitStatus::Incomplete);

        let mut slot = TxnSlot::Idle;
        let mut txn = store.begin();
        txn.set("Interface", "eth0", "link_state", "up");
        assert_eq!(
            slot.submit(&mut store, txn, Duration::from_millis(100)),
            CommitStatus::Incomplete
        );
        assert!(!slot.ready());

        // The write has not landed yet.
        assert!(store.table("Interface").get("eth0").unwrap().get("link_state").is_none());

        // Next poll completes it.
        assert_eq!(
            slot.poll(&mut store, Duration::from_millis(100)),
            Some(CommitStatus::Success)
        );
        assert!(slot.ready());
        assert_eq!(
            store.table("Interface").get("eth0").unwrap().get("link_state"),
            Some("up")
        );
    }

    #[test]
    fn test_slot_failed_schedules_retry() {
        let mut store = store_with_row();
        store.script_commit(CommitStatus::Failed);

        let mut slot = TxnSlot::Idle;
        let mut txn = store.begin();
        txn.set("Interface", "eth0", "link_state", "up");
        assert_eq!(
            slot.submit(&mut store, txn, Duration::from_millis(100)),
            CommitStatus::Failed
        );
        assert!(slot.retry_requested());
        assert!(!slot.ready());
    }

    #[test]
    fn test_slot_retry_deadline_elapses() {
        let mut store = store_with_row();
        store.script_commit(CommitStatus::Failed);

        let mut slot = TxnSlot::Idle;
        let txn = store.begin();
        slot.submit(&mut store, txn, Duration::from_millis(0));
        assert!(slot.ready());
        assert!(slot.retry_requested());
    }
}
