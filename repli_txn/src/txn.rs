use repli_site::{SiteId, TxnId, VarId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Running and able to issue operations.
    Active,
    /// Blocked on a read with no currently readable site.
    Waiting,
    /// Terminal: validated and applied.
    Committed,
    /// Terminal: rolled back.
    Aborted,
}

impl TxnStatus {
    /// Whether the transaction can still issue operations.
    pub fn is_live(self) -> bool {
        matches!(self, TxnStatus::Active | TxnStatus::Waiting)
    }

    /// Whether the transaction has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnStatus::Active => "active",
            TxnStatus::Waiting => "waiting",
            TxnStatus::Committed => "committed",
            TxnStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Why a transaction aborted; rendered as the user-facing reason tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// A site this transaction wrote to failed before it committed.
    SiteFailedAfterWrite,
    /// Another transaction committed a write to the same variable
    /// first.
    WwConflict,
    /// Committing would close a serialization cycle with two
    /// consecutive anti-dependency edges.
    DangerousCycle,
    /// No site can ever serve the snapshot a read needs.
    NoReadableCopy,
    /// A write found no up site to go to.
    NoUpSiteForWrite,
}

impl AbortReason {
    /// The reason tag printed after `Tn aborts: `.
    pub fn tag(self) -> &'static str {
        match self {
            AbortReason::SiteFailedAfterWrite => "site-failed-after-write",
            AbortReason::WwConflict => "WW-conflict",
            AbortReason::DangerousCycle => "dangerous-cycle",
            AbortReason::NoReadableCopy => "no-readable-copy",
            AbortReason::NoUpSiteForWrite => "no-up-site-for-write",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A snapshot read recorded in a transaction's read set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRecord {
    /// Value observed.
    pub value: i64,
    /// Site that served the read.
    pub site: SiteId,
    /// Writer of the observed version at that site; `None` for the
    /// seed version.
    pub writer: Option<TxnId>,
    /// Commit time of the observed version.
    pub commit_time: u64,
}

/// A buffered write, not applied to any site until commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    /// Value to install at commit.
    pub value: i64,
    /// Sites that were up when the write was issued.
    pub sites: BTreeSet<SiteId>,
}

/// One transaction's record in the table. Kept after it reaches a
/// terminal state so later commits can still look up its dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id.
    pub id: TxnId,
    /// Logical clock at `begin`.
    pub start_time: u64,
    /// Current lifecycle state.
    pub status: TxnStatus,
    /// Snapshot reads, by variable.
    pub reads: BTreeMap<VarId, ReadRecord>,
    /// Buffered writes, by variable; the latest write wins.
    pub writes: BTreeMap<VarId, PendingWrite>,
    /// Earliest logical time this transaction wrote to each site.
    pub first_write_at: BTreeMap<SiteId, u64>,
    /// Reason recorded when the transaction aborted.
    pub abort_reason: Option<AbortReason>,
}

impl Transaction {
    /// A fresh transaction beginning at `start_time`.
    pub fn new(id: TxnId, start_time: u64) -> Transaction {
        Transaction {
            id,
            start_time,
            status: TxnStatus::Active,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            first_write_at: BTreeMap::new(),
            abort_reason: None,
        }
    }
}

/// A read blocked until some site recovery makes it servable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingRead {
    /// Blocked transaction.
    pub txn: TxnId,
    /// Variable it is waiting to read.
    pub var: VarId,
}
