use serde::Serialize;

/// A parsed workload command; one per input line.
///
/// Transaction, variable and site references are carried as written;
/// semantic validation (unknown transaction, variable out of range,
/// bad site id) is the transaction manager's job so that such lines
/// surface as protocol diagnostics, not parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Command {
    /// `begin(T1)`: start a transaction at the current clock.
    Begin {
        /// Transaction name.
        txn: String,
    },
    /// `R(T1, x2)`: snapshot read.
    Read {
        /// Transaction name.
        txn: String,
        /// Variable name.
        var: String,
    },
    /// `W(T1, x2, 99)`: buffered write.
    Write {
        /// Transaction name.
        txn: String,
        /// Variable name.
        var: String,
        /// Value to write.
        value: i64,
    },
    /// `end(T1)`: run the commit protocol.
    End {
        /// Transaction name.
        txn: String,
    },
    /// `fail(3)`: fail a site.
    Fail {
        /// Site id as written.
        site: u32,
    },
    /// `recover(3)`: recover a site.
    Recover {
        /// Site id as written.
        site: u32,
    },
    /// `dump()`: emit the committed state of every site.
    Dump,
    /// `querystate()`: emit a diagnostic engine-state report.
    QueryState,
    /// Blank or comment line; still advances the logical clock.
    Noop,
}
