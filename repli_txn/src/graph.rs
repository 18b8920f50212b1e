use repli_site::TxnId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::txn::TxnStatus;

/// Kind tag on a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Anti-dependency: the source read a version the target
    /// overwrites.
    Rw,
    /// Write ordering: the source committed a write to a variable the
    /// target also writes, or wrote the version the target read.
    Ww,
}

/// Undo log for edges added provisionally during commit validation.
#[derive(Debug, Default)]
pub struct EdgeUndo {
    entries: Vec<(TxnId, TxnId, Option<EdgeKind>)>,
}

/// Directed RW/WW edge set over transaction ids.
///
/// At most one edge is stored per ordered pair, with RW dominating WW:
/// traversal never looks at the kind, only the adjacent-RW test does,
/// and an RW tag is only present when a genuine anti-dependency
/// exists.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<TxnId, HashMap<TxnId, EdgeKind>>,
}

impl DependencyGraph {
    /// Add an edge `from → to`.
    pub fn add(&mut self, from: &TxnId, to: &TxnId, kind: EdgeKind) {
        let out = self.edges.entry(from.clone()).or_default();
        match out.get(to) {
            Some(EdgeKind::Rw) => {}
            _ => {
                debug!(%from, %to, ?kind, "dependency edge");
                out.insert(to.clone(), kind);
            }
        }
    }

    /// Add an edge whose insertion can be rolled back through `undo`.
    pub fn add_provisional(&mut self, from: &TxnId, to: &TxnId, kind: EdgeKind, undo: &mut EdgeUndo) {
        let prior = self.edges.get(from).and_then(|out| out.get(to).copied());
        undo.entries.push((from.clone(), to.clone(), prior));
        self.add(from, to, kind);
    }

    /// Restore the state recorded by `add_provisional` calls.
    pub fn rollback(&mut self, undo: EdgeUndo) {
        for (from, to, prior) in undo.entries.into_iter().rev() {
            if let Some(out) = self.edges.get_mut(&from) {
                match prior {
                    Some(kind) => {
                        out.insert(to, kind);
                    }
                    None => {
                        out.remove(&to);
                    }
                }
            }
        }
    }

    /// Drop every edge incident to `txn`, in both directions.
    pub fn remove_node(&mut self, txn: &TxnId) {
        self.edges.remove(txn);
        for out in self.edges.values_mut() {
            out.remove(txn);
        }
    }

    /// Kind of the edge `from → to`, if present.
    pub fn kind(&self, from: &TxnId, to: &TxnId) -> Option<EdgeKind> {
        self.edges.get(from).and_then(|out| out.get(to).copied())
    }

    /// Every edge as `(from, to, kind)`, sorted for stable output.
    pub fn iter_sorted(&self) -> Vec<(&TxnId, &TxnId, EdgeKind)> {
        let mut all: Vec<_> = self
            .edges
            .iter()
            .flat_map(|(from, out)| out.iter().map(move |(to, kind)| (from, to, *kind)))
            .collect();
        all.sort();
        all
    }

    /// Dangerous-structure test for a committing transaction `origin`:
    /// is there a cycle through `origin` in which some pair of
    /// cyclically-adjacent edges are both RW?
    ///
    /// Intermediate nodes must be committed; the edges of live
    /// transactions are still tentative. A live transaction may only
    /// contribute the closing RW edge into `origin`, and not as the
    /// sole other node of the cycle; this is what lets the first of
    /// two mutually anti-dependent transactions commit and aborts only
    /// the second.
    pub fn has_dangerous_cycle<F>(&self, origin: &TxnId, status: F) -> bool
    where
        F: Fn(&TxnId) -> Option<TxnStatus>,
    {
        let mut visited = HashSet::new();
        let mut kinds = Vec::new();
        self.search(origin, origin, &mut visited, &mut kinds, &status)
    }

    fn search<'a, F>(
        &'a self,
        origin: &TxnId,
        current: &'a TxnId,
        visited: &mut HashSet<&'a TxnId>,
        kinds: &mut Vec<EdgeKind>,
        status: &F,
    ) -> bool
    where
        F: Fn(&TxnId) -> Option<TxnStatus>,
    {
        let Some(out) = self.edges.get(current) else {
            return false;
        };
        for (next, &kind) in out {
            if next == origin {
                if kinds.is_empty() {
                    continue;
                }
                kinds.push(kind);
                let dangerous = two_adjacent_rw(kinds);
                kinds.pop();
                if dangerous {
                    return true;
                }
                continue;
            }
            if visited.contains(next) {
                continue;
            }
            match status(next) {
                Some(TxnStatus::Committed) => {
                    visited.insert(next);
                    kinds.push(kind);
                    let found = self.search(origin, next, visited, kinds, status);
                    kinds.pop();
                    visited.remove(next);
                    if found {
                        return true;
                    }
                }
                Some(TxnStatus::Active) | Some(TxnStatus::Waiting) => {
                    // only usable to close the cycle, and never as the
                    // single hop between origin and itself
                    if kinds.is_empty() {
                        continue;
                    }
                    if self.kind(next, origin) == Some(EdgeKind::Rw) {
                        kinds.push(kind);
                        kinds.push(EdgeKind::Rw);
                        let dangerous = two_adjacent_rw(kinds);
                        kinds.pop();
                        kinds.pop();
                        if dangerous {
                            return true;
                        }
                    }
                }
                _ => {}
            }
        }
        false
    }
}

/// Whether two cyclically-adjacent entries are both RW.
fn two_adjacent_rw(kinds: &[EdgeKind]) -> bool {
    let n = kinds.len();
    n >= 2 && (0..n).any(|i| kinds[i] == EdgeKind::Rw && kinds[(i + 1) % n] == EdgeKind::Rw)
}
