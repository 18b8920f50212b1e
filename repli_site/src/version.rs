use serde::{Deserialize, Serialize};

use crate::{TxnId, VarId};

/// One immutable committed version of a variable at a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Committed value.
    pub value: i64,
    /// Logical time at which the writer committed.
    pub commit_time: u64,
    /// Committing transaction; `None` for the seed version at time 0.
    pub writer: Option<TxnId>,
}

/// A variable's replica at one site: an append-only version chain plus
/// the readability gate a replicated copy must pass after recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    versions: Vec<Version>,
    readable: bool,
}

impl Replica {
    /// A fresh replica seeded with the initial value at time 0.
    pub fn seeded(var: VarId) -> Replica {
        Replica {
            versions: vec![Version {
                value: var.initial_value(),
                commit_time: 0,
                writer: None,
            }],
            readable: true,
        }
    }

    /// Append a committed version. Commit times are strictly
    /// increasing along the chain since at most one commit happens per
    /// logical tick. Installing a version also re-opens the replica
    /// for new snapshots.
    pub fn install(&mut self, value: i64, commit_time: u64, writer: TxnId) {
        debug_assert!(commit_time > self.latest().commit_time);
        self.versions.push(Version {
            value,
            commit_time,
            writer: Some(writer),
        });
        self.readable = true;
    }

    /// The version a snapshot taken at `ts` observes: the one with the
    /// greatest commit time `<= ts`.
    pub fn visible_at(&self, ts: u64) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.commit_time <= ts)
    }

    /// Most recently committed version. The chain is never empty.
    pub fn latest(&self) -> &Version {
        self.versions.last().expect("seeded chain")
    }

    /// Whether this replica may serve new snapshots.
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Close the replica to new snapshots until the next install.
    pub fn mark_unreadable(&mut self) {
        self.readable = false;
    }

    /// Full version chain, ascending by commit time.
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(i: u8) -> VarId {
        VarId::new(i).unwrap()
    }

    #[test]
    fn seeded_chain_holds_initial_value() {
        let rep = Replica::seeded(var(6));
        assert_eq!(rep.latest().value, 60);
        assert_eq!(rep.latest().commit_time, 0);
        assert!(rep.latest().writer.is_none());
    }

    #[test]
    fn snapshot_picks_greatest_commit_at_or_before() {
        let mut rep = Replica::seeded(var(2));
        rep.install(21, 5, TxnId::from("T1"));
        rep.install(22, 9, TxnId::from("T2"));
        assert_eq!(rep.visible_at(4).unwrap().value, 20);
        // a version committed exactly at the snapshot time is visible
        assert_eq!(rep.visible_at(5).unwrap().value, 21);
        assert_eq!(rep.visible_at(8).unwrap().value, 21);
        assert_eq!(rep.visible_at(100).unwrap().value, 22);
    }

    #[test]
    fn install_reopens_replica() {
        let mut rep = Replica::seeded(var(2));
        rep.mark_unreadable();
        assert!(!rep.is_readable());
        rep.install(25, 3, TxnId::from("T1"));
        assert!(rep.is_readable());
    }
}
