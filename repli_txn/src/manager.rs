use repli_parser::Command;
use repli_site::{SiteId, SiteManager, SnapshotRead, TxnId, VarId};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::{debug, warn};

use crate::graph::{DependencyGraph, EdgeKind, EdgeUndo};
use crate::txn::{AbortReason, PendingWrite, ReadRecord, Transaction, TxnStatus, WaitingRead};

/// The transaction manager: consumes parsed commands and owns the
/// sites, the transaction table, the dependency graph and the
/// waiting-read queue.
///
/// Single-threaded: the input stream imposes a total order on
/// commands and each one runs to completion. `Waiting` is a table
/// state, not a suspension; blocked reads are retried on `recover`.
pub struct TransactionManager {
    sites: SiteManager,
    txns: HashMap<TxnId, Transaction>,
    graph: DependencyGraph,
    waiting: VecDeque<WaitingRead>,
    clock: u64,
}

impl Default for TransactionManager {
    fn default() -> TransactionManager {
        TransactionManager::new()
    }
}

impl TransactionManager {
    /// A fresh manager over a fully-up, seeded cluster at time 0.
    pub fn new() -> TransactionManager {
        TransactionManager {
            sites: SiteManager::new(),
            txns: HashMap::new(),
            graph: DependencyGraph::default(),
            waiting: VecDeque::new(),
            clock: 0,
        }
    }

    /// Current logical time.
    pub fn now(&self) -> u64 {
        self.clock
    }

    /// Committed cluster state, for inspection.
    pub fn sites(&self) -> &SiteManager {
        &self.sites
    }

    /// Look up a transaction record.
    pub fn transaction(&self, id: &TxnId) -> Option<&Transaction> {
        self.txns.get(id)
    }

    /// Apply one command. The logical clock advances exactly once per
    /// call, including for `Noop`. Returns the user-visible output
    /// lines in emission order.
    pub fn apply(&mut self, cmd: &Command) -> Vec<String> {
        self.clock += 1;
        let mut out = Vec::new();
        match cmd {
            Command::Begin { txn } => self.begin(txn, &mut out),
            Command::Read { txn, var } => self.read(txn, var, &mut out),
            Command::Write { txn, var, value } => self.write(txn, var, *value, &mut out),
            Command::End { txn } => self.end(txn, &mut out),
            Command::Fail { site } => self.fail(*site, &mut out),
            Command::Recover { site } => self.recover(*site, &mut out),
            Command::Dump => self.dump(&mut out),
            Command::QueryState => self.query_state(&mut out),
            Command::Noop => {}
        }
        out
    }

    fn begin(&mut self, name: &str, out: &mut Vec<String>) {
        let id = TxnId::from(name);
        if self.txns.contains_key(&id) {
            warn!(txn = name, "duplicate begin");
            out.push(format!("Error: Transaction {name} already exists"));
            return;
        }
        debug!(txn = name, at = self.clock, "transaction begins");
        self.txns.insert(id.clone(), Transaction::new(id, self.clock));
        out.push(format!("{name} begins"));
    }

    /// Resolve a transaction name to a live transaction, emitting a
    /// protocol diagnostic otherwise.
    fn live_txn(&self, name: &str, out: &mut Vec<String>) -> Option<TxnId> {
        let id = TxnId::from(name);
        match self.txns.get(&id) {
            None => {
                warn!(txn = name, "unknown transaction");
                out.push(format!("Error: Transaction {name} not found"));
                None
            }
            Some(txn) if txn.status.is_terminal() => {
                warn!(txn = name, status = %txn.status, "operation on terminal transaction");
                out.push(format!("Error: Transaction {name} is no longer active"));
                None
            }
            Some(_) => Some(id),
        }
    }

    fn known_var(var: &str, out: &mut Vec<String>) -> Option<VarId> {
        match VarId::parse(var) {
            Some(id) => Some(id),
            None => {
                warn!(var, "unknown variable");
                out.push(format!("Error: unknown variable {var}"));
                None
            }
        }
    }

    fn read(&mut self, name: &str, var_name: &str, out: &mut Vec<String>) {
        let Some(id) = self.live_txn(name, out) else {
            return;
        };
        let Some(var) = Self::known_var(var_name, out) else {
            return;
        };

        let txn = &self.txns[&id];
        // read-your-writes: a buffered write shadows every snapshot
        if let Some(pending) = txn.writes.get(&var) {
            out.push(format!("{var}: {}", pending.value));
            return;
        }
        // repeated reads return the cached snapshot without new edges
        if let Some(read) = txn.reads.get(&var) {
            out.push(format!("{var}: {}", read.value));
            return;
        }

        let start = txn.start_time;
        match self.sites.can_read(var, start) {
            Some(snap) => self.finish_read(&id, var, snap, out),
            None if var.is_replicated() && !self.sites.recoverable(var, start) => {
                debug!(txn = name, %var, "no readable copy can ever appear");
                self.abort(&id, AbortReason::NoReadableCopy, out);
            }
            None => {
                debug!(txn = name, %var, "read blocked until recovery");
                if let Some(txn) = self.txns.get_mut(&id) {
                    txn.status = TxnStatus::Waiting;
                }
                self.waiting.push_back(WaitingRead { txn: id, var });
                out.push(format!("{name} waiting for {var} (no available site)"));
            }
        }
    }

    /// Record a served snapshot read: anti-dependency edges against
    /// every live transaction with a buffered write to the variable,
    /// then the read-set entry and the output line.
    fn finish_read(&mut self, id: &TxnId, var: VarId, snap: SnapshotRead, out: &mut Vec<String>) {
        let writers: Vec<TxnId> = self
            .txns
            .values()
            .filter(|u| u.id != *id && u.status.is_live() && u.writes.contains_key(&var))
            .map(|u| u.id.clone())
            .collect();
        for writer in &writers {
            self.graph.add(id, writer, EdgeKind::Rw);
        }
        let txn = self.txns.get_mut(id).expect("read on known transaction");
        txn.reads.insert(
            var,
            ReadRecord {
                value: snap.value,
                site: snap.site,
                writer: snap.writer,
                commit_time: snap.commit_time,
            },
        );
        out.push(format!("{var}: {}", snap.value));
    }

    fn write(&mut self, name: &str, var_name: &str, value: i64, out: &mut Vec<String>) {
        let Some(id) = self.live_txn(name, out) else {
            return;
        };
        let Some(var) = Self::known_var(var_name, out) else {
            return;
        };

        let up = self.sites.up_sites_for(var);
        if up.is_empty() {
            // a write that reaches no replica can never commit
            debug!(txn = name, %var, "write found no up site");
            self.abort(&id, AbortReason::NoUpSiteForWrite, out);
            return;
        }

        let readers: Vec<TxnId> = self
            .txns
            .values()
            .filter(|u| u.id != id && u.status.is_live() && u.reads.contains_key(&var))
            .map(|u| u.id.clone())
            .collect();
        for reader in &readers {
            self.graph.add(reader, &id, EdgeKind::Rw);
        }

        let now = self.clock;
        let txn = self.txns.get_mut(&id).expect("write on known transaction");
        for &site in &up {
            txn.first_write_at.entry(site).or_insert(now);
        }
        txn.writes.insert(
            var,
            PendingWrite {
                value,
                sites: up.iter().copied().collect(),
            },
        );

        let sites = up
            .iter()
            .map(SiteId::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        out.push(format!("{name} writes {var}={value} to sites: {sites}"));
    }

    fn end(&mut self, name: &str, out: &mut Vec<String>) {
        let Some(id) = self.live_txn(name, out) else {
            return;
        };
        let txn = self.txns[&id].clone();

        if txn.status == TxnStatus::Waiting {
            // its outstanding read still has no readable copy
            self.abort(&id, AbortReason::NoReadableCopy, out);
            return;
        }

        // Phase A: Available Copies. A site that failed after we wrote
        // to it loses the buffered write; recovery does not bring it
        // back.
        for (&site, &wrote_at) in &txn.first_write_at {
            if self.sites.site(site).failed_after(wrote_at) {
                debug!(txn = name, %site, wrote_at, "write site failed before commit");
                self.abort(&id, AbortReason::SiteFailedAfterWrite, out);
                return;
            }
        }

        // Phase B: first-committer-wins over every hosting site's
        // chain, down sites included.
        for var in txn.writes.keys() {
            if let Some(winner) = self.sites.conflicting_commit(*var, txn.start_time, &id) {
                debug!(txn = name, %var, %winner, "first committer wins");
                self.abort(&id, AbortReason::WwConflict, out);
                return;
            }
        }

        // Phase C: dangerous structures. Provisionally add the WW
        // edges committing would fix, then look for a cycle through
        // this transaction with two consecutive RW edges. A write-free
        // transaction gains no incoming edges and validates trivially.
        if !txn.writes.is_empty() {
            let mut undo = EdgeUndo::default();
            for var in txn.writes.keys() {
                for writer in self.sites.committed_writers(*var) {
                    if writer != id {
                        self.graph.add_provisional(&writer, &id, EdgeKind::Ww, &mut undo);
                    }
                }
            }
            for (var, read) in &txn.reads {
                if let Some(writer) = &read.writer {
                    if *writer != id && self.sites.latest_commit_time(*var) > read.commit_time {
                        self.graph.add_provisional(writer, &id, EdgeKind::Ww, &mut undo);
                    }
                }
            }
            let txns = &self.txns;
            let dangerous = self
                .graph
                .has_dangerous_cycle(&id, |t| txns.get(t).map(|x| x.status));
            if dangerous {
                debug!(txn = name, "commit would close a dangerous cycle");
                self.graph.rollback(undo);
                self.abort(&id, AbortReason::DangerousCycle, out);
                return;
            }
        }

        // Commit: install on the sites recorded at write time that are
        // still up. Provisional edges become permanent.
        let now = self.clock;
        for (var, pending) in &txn.writes {
            let up: BTreeSet<SiteId> = self.sites.up_sites_for(*var).into_iter().collect();
            let targets: Vec<SiteId> = pending.sites.intersection(&up).copied().collect();
            self.sites
                .write_committed(*var, pending.value, now, &id, &targets);
        }
        if let Some(txn) = self.txns.get_mut(&id) {
            txn.status = TxnStatus::Committed;
        }
        debug!(txn = name, at = now, "transaction commits");
        out.push(format!("{name} commits"));
    }

    /// Force a transaction into the aborted state: drop its queued
    /// reads and dependency edges, record the reason, emit the line.
    fn abort(&mut self, id: &TxnId, reason: AbortReason, out: &mut Vec<String>) {
        self.waiting.retain(|w| w.txn != *id);
        self.graph.remove_node(id);
        if let Some(txn) = self.txns.get_mut(id) {
            txn.status = TxnStatus::Aborted;
            txn.abort_reason = Some(reason);
        }
        debug!(txn = %id, %reason, "transaction aborts");
        out.push(format!("{id} aborts: {reason}"));
    }

    fn known_site(&self, site: u32, out: &mut Vec<String>) -> Option<SiteId> {
        let id = u8::try_from(site).ok().and_then(SiteId::new);
        if id.is_none() {
            warn!(site, "unknown site");
            out.push(format!("Error: unknown site {site}"));
        }
        id
    }

    fn fail(&mut self, site: u32, out: &mut Vec<String>) {
        let Some(id) = self.known_site(site, out) else {
            return;
        };
        if !self.sites.site(id).is_up() {
            out.push(format!("Error: Site {id} is already down"));
            return;
        }
        self.sites.fail(id, self.clock);
        out.push(format!("Site {id} failed"));
    }

    fn recover(&mut self, site: u32, out: &mut Vec<String>) {
        let Some(id) = self.known_site(site, out) else {
            return;
        };
        if self.sites.site(id).is_up() {
            out.push(format!("Error: Site {id} is already up"));
            return;
        }
        self.sites.recover(id, self.clock);
        out.push(format!("Site {id} recovered"));
        self.drain_waiting(out);
    }

    /// Retry queued reads in FIFO order. A served read reactivates its
    /// transaction; unservable ones stay queued for the next recovery.
    fn drain_waiting(&mut self, out: &mut Vec<String>) {
        let mut still = VecDeque::new();
        while let Some(op) = self.waiting.pop_front() {
            let Some(txn) = self.txns.get(&op.txn) else {
                continue;
            };
            if txn.status.is_terminal() {
                continue;
            }
            match self.sites.can_read(op.var, txn.start_time) {
                Some(snap) => {
                    debug!(txn = %op.txn, var = %op.var, "waiting read resumed");
                    self.finish_read(&op.txn, op.var, snap, out);
                    if let Some(txn) = self.txns.get_mut(&op.txn) {
                        txn.status = TxnStatus::Active;
                    }
                }
                None => still.push_back(op),
            }
        }
        self.waiting = still;
    }

    fn dump(&self, out: &mut Vec<String>) {
        for (site, values) in self.sites.dump() {
            let list = values
                .iter()
                .map(|(var, value)| format!("{var}: {value}"))
                .collect::<Vec<_>>()
                .join(", ");
            out.push(format!("site {site} - {list}"));
        }
    }

    /// Diagnostic report of the whole engine state.
    fn query_state(&self, out: &mut Vec<String>) {
        out.push("=== System State ===".to_string());
        out.push(format!("Current time: {}", self.clock));
        for id in SiteId::all() {
            let status = if self.sites.site(id).is_up() { "UP" } else { "DOWN" };
            out.push(format!("Site {id}: {status}"));
        }
        let mut txns: Vec<&Transaction> = self.txns.values().collect();
        txns.sort_by_key(|t| (t.start_time, t.id.clone()));
        for txn in txns {
            out.push(format!(
                "{}: status={}, start={}",
                txn.id, txn.status, txn.start_time
            ));
            for (var, read) in &txn.reads {
                out.push(format!("  read {var}={} from site {}", read.value, read.site));
            }
            for (var, pending) in &txn.writes {
                out.push(format!("  write {var}={}", pending.value));
            }
            if let Some(reason) = txn.abort_reason {
                out.push(format!("  abort reason: {reason}"));
            }
        }
        for (from, to, kind) in self.graph.iter_sorted() {
            let tag = match kind {
                EdgeKind::Rw => "RW",
                EdgeKind::Ww => "WW",
            };
            out.push(format!("{from} --{tag}--> {to}"));
        }
        for op in &self.waiting {
            out.push(format!("{} waiting for {}", op.txn, op.var));
        }
        out.push("====================".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repli_parser::parse_line;

    fn exec(tm: &mut TransactionManager, line: &str) -> Vec<String> {
        tm.apply(&parse_line(line).expect("test script parses"))
    }

    fn run(tm: &mut TransactionManager, script: &[&str]) -> Vec<String> {
        script.iter().flat_map(|line| exec(tm, line)).collect()
    }

    #[test]
    fn first_committer_wins() {
        let mut tm = TransactionManager::new();
        let out = run(
            &mut tm,
            &[
                "begin(T1)",
                "begin(T2)",
                "W(T1, x1, 101)",
                "W(T2, x1, 102)",
                "end(T1)",
                "end(T2)",
            ],
        );
        assert!(out.contains(&"T1 commits".to_string()));
        assert!(out.contains(&"T2 aborts: WW-conflict".to_string()));
        let dump = exec(&mut tm, "dump()");
        assert!(dump[1].starts_with("site 2 - "));
        assert!(dump[1].contains("x1: 101"));
    }

    #[test]
    fn available_copies_aborts_after_write_site_failure() {
        let mut tm = TransactionManager::new();
        let out = run(&mut tm, &["begin(T1)", "W(T1, x6, 66)", "fail(3)", "end(T1)"]);
        assert!(out.contains(&"T1 aborts: site-failed-after-write".to_string()));
        // the buffered write never reached any chain
        let dump = exec(&mut tm, "dump()");
        assert!(dump.iter().all(|line| line.contains("x6: 60")));
    }

    #[test]
    fn recovery_gates_replicated_reads() {
        let mut tm = TransactionManager::new();
        let out = run(&mut tm, &["fail(2)", "recover(2)", "begin(T1)", "R(T1, x2)"]);
        assert!(out.contains(&"x2: 20".to_string()));
        let read = &tm.transaction(&TxnId::from("T1")).unwrap().reads[&VarId::new(2).unwrap()];
        assert_ne!(read.site, SiteId::new(2).unwrap());
        // a committed write re-opens the recovered replica
        let out = run(
            &mut tm,
            &["begin(T7)", "W(T7, x2, 222)", "end(T7)", "begin(T8)", "R(T8, x2)"],
        );
        assert!(out.contains(&"x2: 222".to_string()));
    }

    #[test]
    fn snapshot_reads_ignore_later_commits() {
        let mut tm = TransactionManager::new();
        let out = run(
            &mut tm,
            &["begin(T1)", "begin(T2)", "W(T1, x4, 44)", "end(T1)", "R(T2, x4)"],
        );
        assert!(out.contains(&"T1 commits".to_string()));
        // T2 started before T1 committed and keeps the old snapshot
        assert!(out.contains(&"x4: 40".to_string()));
        let out = run(&mut tm, &["begin(T3)", "R(T3, x4)"]);
        assert!(out.contains(&"x4: 44".to_string()));
    }

    #[test]
    fn dangerous_cycle_aborts_second_committer() {
        let mut tm = TransactionManager::new();
        let out = run(
            &mut tm,
            &[
                "begin(T1)",
                "begin(T2)",
                "R(T1, x2)",
                "R(T2, x4)",
                "W(T1, x4, 41)",
                "W(T2, x2, 21)",
                "end(T1)",
                "end(T2)",
            ],
        );
        assert!(out.contains(&"T1 commits".to_string()));
        assert!(out.contains(&"T2 aborts: dangerous-cycle".to_string()));
    }

    #[test]
    fn waiting_read_resumes_on_recovery() {
        let mut tm = TransactionManager::new();
        let out = run(&mut tm, &["fail(4)", "begin(T1)", "R(T1, x3)"]);
        assert!(out.contains(&"T1 waiting for x3 (no available site)".to_string()));
        assert_eq!(
            tm.transaction(&TxnId::from("T1")).unwrap().status,
            TxnStatus::Waiting
        );
        let out = run(&mut tm, &["recover(4)"]);
        assert_eq!(out, vec!["Site 4 recovered".to_string(), "x3: 30".to_string()]);
        let out = run(&mut tm, &["end(T1)"]);
        assert!(out.contains(&"T1 commits".to_string()));
    }

    #[test]
    fn waiting_replicated_read_needs_a_refresh_commit() {
        let mut tm = TransactionManager::new();
        let mut script = vec!["begin(T1)".to_string()];
        for site in 1..=10 {
            script.push(format!("fail({site})"));
        }
        for line in &script {
            exec(&mut tm, line);
        }
        let out = run(&mut tm, &["R(T1, x2)"]);
        assert!(out.contains(&"T1 waiting for x2 (no available site)".to_string()));
        // recovery alone is not enough for a replicated copy
        let out = run(&mut tm, &["recover(1)"]);
        assert_eq!(out, vec!["Site 1 recovered".to_string()]);
        // a refresh commit makes the next recovery retry succeed
        run(&mut tm, &["begin(T2)", "W(T2, x2, 22)", "end(T2)"]);
        let out = run(&mut tm, &["recover(2)"]);
        assert!(out.contains(&"x2: 20".to_string()));
        assert_eq!(
            tm.transaction(&TxnId::from("T1")).unwrap().status,
            TxnStatus::Active
        );
    }

    #[test]
    fn unservable_replicated_read_aborts() {
        let mut tm = TransactionManager::new();
        for site in 1..=10 {
            exec(&mut tm, &format!("fail({site})"));
        }
        exec(&mut tm, "recover(1)");
        let out = run(&mut tm, &["begin(T1)", "R(T1, x2)"]);
        // every snapshot interval is broken: no copy can ever serve T1
        assert!(out.contains(&"T1 aborts: no-readable-copy".to_string()));
    }

    #[test]
    fn write_with_no_up_site_aborts() {
        let mut tm = TransactionManager::new();
        exec(&mut tm, "begin(T1)");
        exec(&mut tm, "fail(4)");
        let out = run(&mut tm, &["W(T1, x3, 33)"]);
        assert_eq!(out, vec!["T1 aborts: no-up-site-for-write".to_string()]);
        assert!(tm.transaction(&TxnId::from("T1")).unwrap().writes.is_empty());
    }

    #[test]
    fn end_while_waiting_aborts() {
        let mut tm = TransactionManager::new();
        let out = run(&mut tm, &["fail(4)", "begin(T1)", "R(T1, x3)", "end(T1)"]);
        assert!(out.contains(&"T1 aborts: no-readable-copy".to_string()));
    }

    #[test]
    fn read_your_writes() {
        let mut tm = TransactionManager::new();
        let out = run(&mut tm, &["begin(T1)", "W(T1, x2, 99)", "R(T1, x2)"]);
        assert!(out.contains(&"x2: 99".to_string()));
    }

    #[test]
    fn repeated_reads_reuse_the_snapshot() {
        let mut tm = TransactionManager::new();
        run(&mut tm, &["begin(T1)", "R(T1, x2)"]);
        run(&mut tm, &["begin(T2)", "W(T2, x2, 21)", "end(T2)"]);
        let out = run(&mut tm, &["R(T1, x2)"]);
        assert_eq!(out, vec!["x2: 20".to_string()]);
    }

    #[test]
    fn write_reports_the_accepting_sites() {
        let mut tm = TransactionManager::new();
        exec(&mut tm, "fail(3)");
        let out = run(&mut tm, &["begin(T1)", "W(T1, x2, 25)"]);
        assert_eq!(
            out,
            vec![
                "T1 begins".to_string(),
                "T1 writes x2=25 to sites: 1, 2, 4, 5, 6, 7, 8, 9, 10".to_string()
            ]
        );
    }

    #[test]
    fn read_site_failure_does_not_abort_commit() {
        // a failure between a read-only access and commit is harmless
        let mut tm = TransactionManager::new();
        let out = run(
            &mut tm,
            &["begin(T1)", "R(T1, x2)", "W(T1, x3, 33)", "fail(1)", "end(T1)"],
        );
        assert!(out.contains(&"T1 commits".to_string()));
    }

    #[test]
    fn protocol_errors_do_not_mutate_state() {
        let mut tm = TransactionManager::new();
        let out = run(
            &mut tm,
            &[
                "R(T9, x2)",
                "begin(T1)",
                "begin(T1)",
                "R(T1, x25)",
                "fail(12)",
                "recover(3)",
            ],
        );
        assert!(out.contains(&"Error: Transaction T9 not found".to_string()));
        assert!(out.contains(&"Error: Transaction T1 already exists".to_string()));
        assert!(out.contains(&"Error: unknown variable x25".to_string()));
        assert!(out.contains(&"Error: unknown site 12".to_string()));
        assert!(out.contains(&"Error: Site 3 is already up".to_string()));
        let out = run(&mut tm, &["end(T1)", "end(T1)"]);
        assert!(out.contains(&"T1 commits".to_string()));
        assert!(out.contains(&"Error: Transaction T1 is no longer active".to_string()));
    }

    #[test]
    fn dump_covers_down_sites() {
        let mut tm = TransactionManager::new();
        run(&mut tm, &["begin(T1)", "W(T1, x8, 88)", "end(T1)", "fail(5)"]);
        let dump = exec(&mut tm, "dump()");
        assert_eq!(dump.len(), 10);
        assert!(dump[4].starts_with("site 5 - "));
        assert!(dump[4].contains("x8: 88"));
    }
}
