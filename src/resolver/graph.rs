// src/resolver/graph.rs

//! Node hypergraph
//!
//! Nodes live in one arena and refer to each other by [`NodeId`]. Node 0 is
//! the synthetic root whose children are the user's requests. Every other
//! node pairs one package with one [`Action`].

use super::error::NodeError;
use crate::db::Database;
use serde::Serialize;
use std::fmt;

pub type NodeId = usize;

/// Index of the root node
pub const ROOT: NodeId = 0;

/// What should happen to a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Remove,
    Purge,
    Update,
}

impl Action {
    pub fn is_removal(self) -> bool {
        matches!(self, Action::Remove | Action::Purge)
    }

    pub fn is_install(self) -> bool {
        matches!(self, Action::Install | Action::Update)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Remove => "remove",
            Action::Purge => "purge",
            Action::Update => "update",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dependency slot of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    /// Exactly one way to satisfy the dependency
    Single(NodeId),
    /// Any one of these nodes satisfies it
    Alternatives(Vec<NodeId>),
}

impl Child {
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            Child::Single(id) => std::slice::from_ref(id),
            Child::Alternatives(ids) => ids,
        }
    }
}

/// Aggregate cost of a subtree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub weight: i64,
    pub download_size: i64,
    pub install_size: i64,
}

impl Totals {
    /// Ordering key: weight, then download size, then install size
    pub fn key(&self) -> (i64, i64, i64) {
        (self.weight, self.download_size, self.install_size)
    }
}

impl std::ops::AddAssign for Totals {
    fn add_assign(&mut self, rhs: Self) {
        self.weight += rhs.weight;
        self.download_size += rhs.download_size;
        self.install_size += rhs.install_size;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// `None` only for the root
    pub package: Option<u32>,
    pub action: Action,
    /// `false` when the action would not change anything
    pub wanted: bool,
    pub error: Option<NodeError>,
    /// Cost of this node alone, set by the weigher
    pub weight: i64,
    /// Cheapest fully resolved subtree
    pub min: Totals,
    /// Priciest fully resolved subtree
    pub max: Totals,
    pub children: Vec<Child>,
    pub(crate) weighted: bool,
}

impl Node {
    pub(crate) fn root() -> Self {
        Self::new(None, Action::Install)
    }

    pub(crate) fn new(package: Option<u32>, action: Action) -> Self {
        Self {
            package,
            action,
            wanted: true,
            error: None,
            weight: 0,
            min: Totals::default(),
            max: Totals::default(),
            children: Vec::new(),
            weighted: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.package.is_none()
    }
}

/// `install foo~1.0` style description of a node
pub fn describe(db: &Database, node: &Node) -> String {
    match node.package.and_then(|p| db.package(p)) {
        Some(record) => format!(
            "{} {}~{}",
            node.action,
            db.str(record.name),
            db.str(record.version)
        ),
        None => "request".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_ordering_key() {
        let cheap = Totals {
            weight: 1,
            download_size: 100,
            install_size: 5,
        };
        let same_weight_smaller = Totals {
            weight: 1,
            download_size: 50,
            install_size: 500,
        };
        assert!(same_weight_smaller.key() < cheap.key());

        let mut sum = cheap;
        sum += same_weight_smaller;
        assert_eq!(sum.weight, 2);
        assert_eq!(sum.download_size, 150);
    }

    #[test]
    fn test_child_nodes() {
        assert_eq!(Child::Single(3).nodes(), &[3]);
        assert_eq!(Child::Alternatives(vec![1, 2]).nodes(), &[1, 2]);
    }
}
