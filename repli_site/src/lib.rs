//! RepliKV site layer: placement policy and the multi-version store
//! kept at each of the ten sites.
#![deny(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

mod manager;
mod site;
mod version;

pub use manager::{SiteManager, SnapshotRead};
pub use site::{FailureInterval, Site};
pub use version::{Replica, Version};

/// Number of sites in the fixed cluster.
pub const SITE_COUNT: u8 = 10;

/// Number of logical variables (`x1`..`x20`).
pub const VAR_COUNT: u8 = 20;

/// Site identifier, `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(u8);

impl SiteId {
    /// Construct a site id, rejecting anything outside `1..=10`.
    pub fn new(id: u8) -> Option<SiteId> {
        (1..=SITE_COUNT).contains(&id).then_some(SiteId(id))
    }

    /// Numeric value of the id.
    pub fn get(self) -> u8 {
        self.0
    }

    /// All site ids in ascending order.
    pub fn all() -> impl Iterator<Item = SiteId> {
        (1..=SITE_COUNT).map(SiteId)
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical variable identifier, `x1`..`x20`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(u8);

impl VarId {
    /// Construct a variable id, rejecting indices outside `1..=20`.
    pub fn new(index: u8) -> Option<VarId> {
        (1..=VAR_COUNT).contains(&index).then_some(VarId(index))
    }

    /// Parse a variable name such as `x7`.
    pub fn parse(name: &str) -> Option<VarId> {
        let digits = name.strip_prefix('x').or_else(|| name.strip_prefix('X'))?;
        digits.parse().ok().and_then(VarId::new)
    }

    /// Numeric index of the variable.
    pub fn index(self) -> u8 {
        self.0
    }

    /// Even-indexed variables are replicated on every site.
    pub fn is_replicated(self) -> bool {
        self.0 % 2 == 0
    }

    /// Seed value installed at time 0 (`10 * index`).
    pub fn initial_value(self) -> i64 {
        10 * i64::from(self.0)
    }

    /// All variable ids in ascending index order.
    pub fn all() -> impl Iterator<Item = VarId> {
        (1..=VAR_COUNT).map(VarId)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// Transaction identifier as named by the workload (e.g. `T3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(String);

impl TxnId {
    /// Wrap a transaction name.
    pub fn new<S: Into<String>>(name: S) -> TxnId {
        TxnId(name.into())
    }

    /// The transaction name as written in the workload.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TxnId {
    fn from(name: &str) -> TxnId {
        TxnId::new(name)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Placement policy: the sites hosting a variable, ascending.
///
/// Even-indexed variables are replicated on all ten sites; odd-indexed
/// variables are single-homed at site `1 + (index mod 10)`.
pub fn sites_for(var: VarId) -> Vec<SiteId> {
    if var.is_replicated() {
        SiteId::all().collect()
    } else {
        vec![SiteId(1 + var.index() % SITE_COUNT)]
    }
}
