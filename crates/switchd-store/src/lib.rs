//! In-process replica of the switchd configuration store.
//!
//! The reconciliation engine consumes configuration through a deliberately
//! narrow contract: read current rows, test per-row "inserted / modified /
//! deleted since sequence N" predicates, and stage writes into non-blocking
//! transactions with a tri-state commit result. This crate implements that
//! contract over an in-memory table set:
//!
//! - [`Store`]: named tables of string field/value rows with per-row and
//!   per-column change sequence numbers
//! - [`Txn`]: a batch of staged writes applied atomically on commit
//! - [`CommitStatus`]: success / unchanged / incomplete / failed
//! - [`TxnSlot`]: the at-most-one-outstanding-transaction state machine
//!   each subsystem drives from its poll tick
//!
//! Map-valued columns are flattened into `column:key` fields, so
//! `other_config:hwaddr` is one field whose column is `other_config`.

mod store;
mod txn;

pub use store::{column_of, Row, Seqno, Store, Table};
pub use txn::{CommitStatus, Txn, TxnSlot};

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("no such row: {table} {key}")]
    NoSuchRow { table: String, key: String },

    #[error("duplicate row: {table} {key}")]
    DuplicateRow { table: String, key: String },

    #[error("malformed snapshot: {0}")]
    BadSnapshot(String),
}
