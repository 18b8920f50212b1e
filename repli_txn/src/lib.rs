//! RepliKV transaction layer: Serializable Snapshot Isolation over the
//! Available Copies replication protocol.
#![deny(missing_docs)]

mod graph;
mod manager;
mod txn;

pub use graph::{DependencyGraph, EdgeKind, EdgeUndo};
pub use manager::TransactionManager;
pub use txn::{AbortReason, PendingWrite, ReadRecord, Transaction, TxnStatus, WaitingRead};
