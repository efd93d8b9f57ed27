// src/resolver/plan.rs

//! Resumable choice traversal
//!
//! The graph is walked depth first with an explicit frame stack so the walk
//! can stop at a choice and resume later. Nodes are appended to the action
//! list after their children, so dependencies come before dependents.
//!
//! Each unresolved choice pushes a [`Level`] that snapshots the walk. Picking
//! an alternative continues from the top level; going up restores an earlier
//! snapshot so the choice can be made again.

use super::error::{SolverError, SolverErrorKind};
use super::graph::{Action, Child, Node, NodeId, ROOT};
use crate::db::Database;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// One step of the final action list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedAction {
    pub node: NodeId,
    pub package: u32,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    node: NodeId,
    next_child: usize,
}

#[derive(Debug, Clone)]
struct Level {
    /// Node owning the choice and the index of the choice among its children
    node: NodeId,
    child: usize,
    alternatives: Vec<NodeId>,
    stack: Vec<Frame>,
    finished_len: usize,
    list_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Pending,
    Ended,
}

#[derive(Debug, Default)]
pub struct Traversal {
    stack: Vec<Frame>,
    finished: Vec<NodeId>,
    finished_set: HashSet<NodeId>,
    list: Vec<PlannedAction>,
    levels: Vec<Level>,
    phase: Phase,
}

impl Traversal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over from the root
    ///
    /// Returns `Ok(true)` when the walk finished, `Ok(false)` when it stopped
    /// at a choice.
    pub fn begin(&mut self, db: &Database, nodes: &[Node]) -> Result<bool> {
        *self = Self::default();
        if nodes.is_empty() {
            self.phase = Phase::Ended;
            return Ok(true);
        }
        self.stack.push(Frame {
            node: ROOT,
            next_child: 0,
        });
        self.run(db, nodes)
    }

    /// Take alternative `choice` of the pending choice and keep walking
    ///
    /// On error the walk is rolled back to the same choice, which stays
    /// pending.
    pub fn continue_with(&mut self, db: &Database, nodes: &[Node], choice: usize) -> Result<bool> {
        if self.phase != Phase::Pending {
            return Err(Error::NoPendingChoice);
        }
        let Some(level) = self.levels.last() else {
            return Err(Error::NoPendingChoice);
        };
        let Some(&picked) = level.alternatives.get(choice) else {
            return Err(Error::InvalidChoice {
                index: choice,
                count: level.alternatives.len(),
            });
        };
        debug!(
            "Choice {} of node {} child {} -> node {}",
            choice, level.node, level.child, picked
        );

        self.phase = Phase::Idle;
        let outcome = self.enter(db, nodes, picked).and_then(|_| self.run(db, nodes));
        if outcome.is_err() {
            self.restore(self.levels.len() - 1);
        }
        outcome
    }

    /// Step back to the previous choice
    ///
    /// Returns `false` when there is nothing to go back to.
    pub fn up(&mut self) -> bool {
        match self.phase {
            Phase::Pending if self.levels.len() > 1 => {
                self.levels.pop();
                self.restore(self.levels.len() - 1);
                true
            }
            Phase::Pending | Phase::Idle => false,
            Phase::Ended if self.levels.is_empty() => false,
            Phase::Ended => {
                self.restore(self.levels.len() - 1);
                true
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.phase == Phase::Pending
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Alternatives of the pending choice, empty when nothing is pending
    pub fn choices(&self) -> &[NodeId] {
        match (self.phase, self.levels.last()) {
            (Phase::Pending, Some(level)) => &level.alternatives,
            _ => &[],
        }
    }

    /// Actions collected so far
    pub fn list(&self) -> &[PlannedAction] {
        &self.list
    }

    fn restore(&mut self, level: usize) {
        let snapshot = &self.levels[level];
        self.stack = snapshot.stack.clone();
        self.finished.truncate(snapshot.finished_len);
        self.list.truncate(snapshot.list_len);
        self.finished_set = self.finished.iter().copied().collect();
        self.phase = Phase::Pending;
    }

    fn on_stack(&self, id: NodeId) -> bool {
        self.stack.iter().any(|f| f.node == id)
    }

    fn seen(&self, id: NodeId) -> bool {
        self.finished_set.contains(&id) || self.on_stack(id)
    }

    fn enter(&mut self, db: &Database, nodes: &[Node], id: NodeId) -> Result<()> {
        let Some(node) = nodes.get(id) else {
            return Err(Error::Resolution(SolverError::from_node(db, nodes, id)));
        };
        if node.error.is_some() {
            return Err(Error::Resolution(SolverError::from_node(db, nodes, id)));
        }
        if !self.seen(id) {
            self.stack.push(Frame {
                node: id,
                next_child: 0,
            });
        }
        Ok(())
    }

    fn run(&mut self, db: &Database, nodes: &[Node]) -> Result<bool> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.phase = Phase::Ended;
                return Ok(true);
            };
            let parent = frame.node;
            let children = &nodes[parent].children;

            if frame.next_child >= children.len() {
                self.stack.pop();
                self.finish(db, nodes, parent)?;
                continue;
            }

            let slot = frame.next_child;
            frame.next_child += 1;
            match &children[slot] {
                Child::Single(id) => self.enter(db, nodes, *id)?,
                Child::Alternatives(ids) => {
                    if ids.iter().any(|&id| self.seen(id)) {
                        continue;
                    }
                    self.levels.push(Level {
                        node: parent,
                        child: slot,
                        alternatives: ids.clone(),
                        stack: self.stack.clone(),
                        finished_len: self.finished.len(),
                        list_len: self.list.len(),
                    });
                    self.phase = Phase::Pending;
                    return Ok(false);
                }
            }
        }
    }

    fn finish(&mut self, db: &Database, nodes: &[Node], id: NodeId) -> Result<()> {
        self.finished.push(id);
        self.finished_set.insert(id);

        let node = &nodes[id];
        let Some(package) = node.package else {
            return Ok(());
        };
        if !node.wanted {
            return Ok(());
        }
        let Some(record) = db.package(package) else {
            return Err(Error::Resolution(SolverError::conflict(
                db,
                nodes,
                SolverErrorKind::InternalError,
                id,
                id,
            )));
        };

        for planned in &self.list {
            let Some(other) = db.package(planned.package) else {
                continue;
            };
            if other.name != record.name {
                continue;
            }
            let same_version = db.str(other.version) == db.str(record.version);
            let kind = if same_version && planned.action.is_removal() != node.action.is_removal() {
                SolverErrorKind::SameNameSameVersionDifferentAction
            } else if !same_version && planned.action.is_install() && node.action.is_install() {
                SolverErrorKind::SameNameSameActionDifferentVersion
            } else {
                continue;
            };
            return Err(Error::Resolution(SolverError::conflict(
                db,
                nodes,
                kind,
                id,
                planned.node,
            )));
        }

        self.list.push(PlannedAction {
            node: id,
            package,
            action: node.action,
        });
        Ok(())
    }
}
