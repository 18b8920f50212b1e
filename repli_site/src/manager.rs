use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::site::Site;
use crate::{sites_for, SiteId, TxnId, VarId};

/// A snapshot value served by a specific site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRead {
    /// Value observed by the snapshot.
    pub value: i64,
    /// Site that served the read.
    pub site: SiteId,
    /// Writer of the observed version; `None` for the seed version.
    pub writer: Option<TxnId>,
    /// Commit time of the observed version.
    pub commit_time: u64,
}

/// Owns the ten sites and routes placement-aware operations to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteManager {
    sites: Vec<Site>,
}

impl Default for SiteManager {
    fn default() -> SiteManager {
        SiteManager::new()
    }
}

impl SiteManager {
    /// A fresh cluster, every site up and seeded.
    pub fn new() -> SiteManager {
        SiteManager {
            sites: SiteId::all().map(Site::new).collect(),
        }
    }

    /// The site with the given id.
    pub fn site(&self, id: SiteId) -> &Site {
        &self.sites[usize::from(id.get()) - 1]
    }

    fn site_mut(&mut self, id: SiteId) -> &mut Site {
        &mut self.sites[usize::from(id.get()) - 1]
    }

    /// Sites hosting `var` that are currently up, ascending.
    pub fn up_sites_for(&self, var: VarId) -> Vec<SiteId> {
        sites_for(var)
            .into_iter()
            .filter(|s| self.site(*s).is_up())
            .collect()
    }

    /// Fail a site at time `t`.
    pub fn fail(&mut self, id: SiteId, t: u64) {
        self.site_mut(id).fail(t);
    }

    /// Recover a site at time `t`.
    pub fn recover(&mut self, id: SiteId, t: u64) {
        self.site_mut(id).recover(t);
    }

    /// Find one site able to serve a snapshot of `var` for a
    /// transaction started at `txn_start`. Candidate sites are tried
    /// in ascending id order and the first match wins.
    pub fn can_read(&self, var: VarId, txn_start: u64) -> Option<SnapshotRead> {
        for id in sites_for(var) {
            if let Some(version) = self.site(id).snapshot_read(var, txn_start) {
                return Some(SnapshotRead {
                    value: version.value,
                    site: id,
                    writer: version.writer.clone(),
                    commit_time: version.commit_time,
                });
            }
        }
        None
    }

    /// Whether any hosting site could still serve the snapshot after a
    /// future recovery. When this is false for a replicated variable,
    /// a blocked read can never resume.
    pub fn recoverable(&self, var: VarId, txn_start: u64) -> bool {
        sites_for(var)
            .into_iter()
            .any(|s| self.site(s).could_serve_later(var, txn_start))
    }

    /// Apply a committed write to every target site that is still up.
    pub fn write_committed(
        &mut self,
        var: VarId,
        value: i64,
        commit_time: u64,
        writer: &TxnId,
        targets: &[SiteId],
    ) {
        for &id in targets {
            if self.site(id).is_up() {
                self.site_mut(id).install(var, value, commit_time, writer.clone());
            }
        }
        debug!(%var, value, at = commit_time, %writer, ?targets, "write committed");
    }

    /// Every transaction that committed a write to `var`, gathered
    /// from the version chains of all hosting sites (down sites
    /// included; their chains persist).
    pub fn committed_writers(&self, var: VarId) -> BTreeSet<TxnId> {
        let mut writers = BTreeSet::new();
        for id in sites_for(var) {
            if let Some(replica) = self.site(id).replica(var) {
                writers.extend(
                    replica
                        .versions()
                        .iter()
                        .filter_map(|v| v.writer.clone()),
                );
            }
        }
        writers
    }

    /// Greatest commit time of any version of `var` cluster-wide.
    pub fn latest_commit_time(&self, var: VarId) -> u64 {
        sites_for(var)
            .into_iter()
            .filter_map(|s| self.site(s).replica(var).map(|r| r.latest().commit_time))
            .max()
            .unwrap_or(0)
    }

    /// First-committer-wins probe: whether any hosting site holds a
    /// version committed strictly after `txn_start` by someone other
    /// than `txn`.
    pub fn conflicting_commit(&self, var: VarId, txn_start: u64, txn: &TxnId) -> Option<TxnId> {
        for id in sites_for(var) {
            if let Some(replica) = self.site(id).replica(var) {
                for version in replica.versions() {
                    if version.commit_time > txn_start {
                        if let Some(writer) = &version.writer {
                            if writer != txn {
                                return Some(writer.clone());
                            }
                        }
                    }
                }
            }
        }
        None
    }

    /// Committed state of the whole cluster: for every site, the
    /// latest committed value of every hosted variable. Down sites are
    /// included.
    pub fn dump(&self) -> Vec<(SiteId, Vec<(VarId, i64)>)> {
        self.sites
            .iter()
            .map(|s| (s.id(), s.committed_values()))
            .collect()
    }
}
