// src/resolver/error.rs

//! Resolution errors
//!
//! Errors found while building the graph are stored on the failing node and
//! wrapped as `ChildError` by its parents. Only the first one reached from
//! the root is reported, unwrapped down to the node that caused it.

use super::graph::{describe, Child, Node, NodeId};
use crate::db::Database;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverErrorKind {
    /// No package satisfies a dependency
    NoDeps,
    /// A dependency of this node failed
    ChildError,
    SameNameSameVersionDifferentAction,
    SameNameSameActionDifferentVersion,
    UninstallablePackageInstalled,
    UnremovablePackageRemoved,
    UnupdatablePackageUpdated,
    InternalError,
}

impl fmt::Display for SolverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SolverErrorKind::NoDeps => "no package satisfies the dependency",
            SolverErrorKind::ChildError => "a dependency cannot be resolved",
            SolverErrorKind::SameNameSameVersionDifferentAction => {
                "the same package is both installed and removed"
            }
            SolverErrorKind::SameNameSameActionDifferentVersion => {
                "two versions of the same package would be installed"
            }
            SolverErrorKind::UninstallablePackageInstalled => "the package may not be installed",
            SolverErrorKind::UnremovablePackageRemoved => "the package may not be removed",
            SolverErrorKind::UnupdatablePackageUpdated => "the package may not be updated",
            SolverErrorKind::InternalError => "internal solver error",
        };
        f.write_str(text)
    }
}

/// Error attached to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeError {
    pub kind: SolverErrorKind,
    /// Node involved in the failure, if any
    pub other: Option<NodeId>,
    /// Unresolved dependency pattern, for `NoDeps`
    pub pattern: Option<String>,
}

impl NodeError {
    pub fn new(kind: SolverErrorKind) -> Self {
        Self {
            kind,
            other: None,
            pattern: None,
        }
    }

    pub fn with_other(kind: SolverErrorKind, other: NodeId) -> Self {
        Self {
            kind,
            other: Some(other),
            pattern: None,
        }
    }

    pub fn no_deps(pattern: String) -> Self {
        Self {
            kind: SolverErrorKind::NoDeps,
            other: None,
            pattern: Some(pattern),
        }
    }
}

/// A resolution failure reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{subject}: {kind}{}", .pattern.as_ref().map(|p| format!(" ({})", p)).unwrap_or_default())]
pub struct SolverError {
    pub kind: SolverErrorKind,
    /// Node the failure belongs to
    pub node: NodeId,
    pub other: Option<NodeId>,
    pub pattern: Option<String>,
    /// Human readable description of `node`
    pub subject: String,
}

impl SolverError {
    /// Error for `node`, following `ChildError` links down to the cause
    pub fn from_node(db: &Database, nodes: &[Node], node: NodeId) -> Self {
        let mut current = node;
        for _ in 0..nodes.len() {
            let Some(error) = nodes.get(current).and_then(|n| n.error.as_ref()) else {
                break;
            };
            let next = match (error.kind, error.other) {
                (SolverErrorKind::ChildError, Some(other)) => Some(other),
                (SolverErrorKind::ChildError, None) => first_failing_child(nodes, current),
                _ => None,
            };
            match next {
                Some(n) if nodes.get(n).is_some_and(|c| c.error.is_some()) => current = n,
                _ => break,
            }
        }

        match nodes.get(current).and_then(|n| n.error.clone().map(|e| (n, e))) {
            Some((n, error)) => Self {
                kind: error.kind,
                node: current,
                other: error.other,
                pattern: error.pattern,
                subject: describe(db, n),
            },
            None => Self {
                kind: SolverErrorKind::InternalError,
                node,
                other: None,
                pattern: None,
                subject: nodes.get(node).map(|n| describe(db, n)).unwrap_or_default(),
            },
        }
    }

    /// Error for a conflict between two materialized nodes
    pub fn conflict(db: &Database, nodes: &[Node], kind: SolverErrorKind, node: NodeId, other: NodeId) -> Self {
        let subject = match (nodes.get(node), nodes.get(other)) {
            (Some(a), Some(b)) => format!("{} / {}", describe(db, a), describe(db, b)),
            _ => String::new(),
        };
        Self {
            kind,
            node,
            other: Some(other),
            pattern: None,
            subject,
        }
    }
}

/// First errored node among the alternatives of a failed node
fn first_failing_child(nodes: &[Node], id: NodeId) -> Option<NodeId> {
    nodes
        .get(id)?
        .children
        .iter()
        .flat_map(Child::nodes)
        .copied()
        .find(|&c| nodes.get(c).is_some_and(|n| n.error.is_some()))
}
