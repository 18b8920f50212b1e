use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::version::{Replica, Version};
use crate::{sites_for, SiteId, TxnId, VarId};

/// One failure event at a site; the interval is open while the site is
/// still down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInterval {
    /// Logical time of the failure.
    pub failed_at: u64,
    /// Logical time of the matching recovery, if it happened yet.
    pub recovered_at: Option<u64>,
}

/// A single database site: up/down status, hosted replicas and the
/// failure-interval log. Version chains survive failures; only the
/// readability of replicated copies is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    id: SiteId,
    up: bool,
    replicas: BTreeMap<VarId, Replica>,
    failures: Vec<FailureInterval>,
}

impl Site {
    /// A fresh site holding seeded replicas of every variable the
    /// placement policy assigns to it.
    pub fn new(id: SiteId) -> Site {
        let replicas = VarId::all()
            .filter(|v| sites_for(*v).contains(&id))
            .map(|v| (v, Replica::seeded(v)))
            .collect();
        Site {
            id,
            up: true,
            replicas,
            failures: Vec::new(),
        }
    }

    /// Site id.
    pub fn id(&self) -> SiteId {
        self.id
    }

    /// Whether the site is currently up.
    pub fn is_up(&self) -> bool {
        self.up
    }

    /// Failure history, oldest first.
    pub fn failures(&self) -> &[FailureInterval] {
        &self.failures
    }

    /// Whether this site hosts `var`.
    pub fn hosts(&self, var: VarId) -> bool {
        self.replicas.contains_key(&var)
    }

    /// The replica of `var` at this site, if hosted.
    pub fn replica(&self, var: VarId) -> Option<&Replica> {
        self.replicas.get(&var)
    }

    /// Mark the site down at time `t`. Replicated copies stop serving
    /// new snapshots until a post-recovery commit touches them.
    pub fn fail(&mut self, t: u64) {
        debug_assert!(self.up);
        self.up = false;
        self.failures.push(FailureInterval {
            failed_at: t,
            recovered_at: None,
        });
        for (var, replica) in &mut self.replicas {
            if var.is_replicated() {
                replica.mark_unreadable();
            }
        }
        debug!(site = %self.id, at = t, "site failed");
    }

    /// Mark the site up at time `t`, closing the open failure
    /// interval. Single-homed variables are immediately readable
    /// again; replicated ones stay gated.
    pub fn recover(&mut self, t: u64) {
        debug_assert!(!self.up);
        self.up = true;
        if let Some(last) = self.failures.last_mut() {
            last.recovered_at = Some(t);
        }
        debug!(site = %self.id, at = t, "site recovered");
    }

    /// Whether the site stayed up over `(from, to]`: no failure
    /// strictly after `from` and at or before `to`. A failure at
    /// exactly `from` does not disqualify; one at exactly `to` does.
    pub fn up_throughout(&self, from: u64, to: u64) -> bool {
        !self
            .failures
            .iter()
            .any(|f| f.failed_at > from && f.failed_at <= to)
    }

    /// Whether any failure happened strictly after `t`.
    pub fn failed_after(&self, t: u64) -> bool {
        self.failures.iter().any(|f| f.failed_at > t)
    }

    /// Serve a snapshot read for a transaction that started at
    /// `txn_start`, or `None` if this site cannot.
    ///
    /// Single-homed variables only need the site to be up. Replicated
    /// variables additionally need the readability gate open and the
    /// site up throughout `(version.commit_time, txn_start]`.
    pub fn snapshot_read(&self, var: VarId, txn_start: u64) -> Option<&Version> {
        if !self.up {
            return None;
        }
        let replica = self.replicas.get(&var)?;
        if !var.is_replicated() {
            return replica.visible_at(txn_start);
        }
        if !replica.is_readable() {
            return None;
        }
        let version = replica.visible_at(txn_start)?;
        self.up_throughout(version.commit_time, txn_start)
            .then_some(version)
    }

    /// Whether a read at `txn_start` could still be served from here
    /// after a future recovery (and, for replicated data, a refresh
    /// commit). Current up/readability status is deliberately ignored;
    /// only the failure log over the snapshot interval matters.
    pub fn could_serve_later(&self, var: VarId, txn_start: u64) -> bool {
        let Some(replica) = self.replicas.get(&var) else {
            return false;
        };
        match replica.visible_at(txn_start) {
            Some(version) => {
                !var.is_replicated() || self.up_throughout(version.commit_time, txn_start)
            }
            None => false,
        }
    }

    /// Append a committed version to the hosted replica of `var`.
    pub fn install(&mut self, var: VarId, value: i64, commit_time: u64, writer: TxnId) {
        if let Some(replica) = self.replicas.get_mut(&var) {
            replica.install(value, commit_time, writer);
            debug!(site = %self.id, %var, value, at = commit_time, "version installed");
        }
    }

    /// Latest committed value of every hosted variable, ascending by
    /// variable index. Served even while the site is down.
    pub fn committed_values(&self) -> Vec<(VarId, i64)> {
        self.replicas
            .iter()
            .map(|(var, replica)| (*var, replica.latest().value))
            .collect()
    }
}
