// src/resolver/weight.rs

//! Subtree cost estimates
//!
//! A [`Weigher`] assigns every node its own weight. [`propagate`] then folds
//! weights and package sizes bottom-up into each node's `min` and `max`
//! totals, taking the cheapest or priciest alternative at every choice.

use super::graph::{Child, Node, NodeId, Totals, ROOT};
use crate::db::Database;

/// Assigns `Node::weight` for every node
pub trait Weigher {
    fn weigh(&self, nodes: &mut [Node]);
}

impl<F> Weigher for F
where
    F: Fn(&mut [Node]),
{
    fn weigh(&self, nodes: &mut [Node]) {
        self(nodes)
    }
}

/// Prefers fewer changes, and installing over removing
///
/// A wanted install costs 1, a wanted removal 3, a no-op nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultWeigher;

impl Weigher for DefaultWeigher {
    fn weigh(&self, nodes: &mut [Node]) {
        for node in nodes.iter_mut() {
            node.weight = match (node.is_root(), node.wanted) {
                (true, _) | (_, false) => 0,
                _ if node.action.is_removal() => 3,
                _ => 1,
            };
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Fresh,
    Active,
    Done,
}

/// Fill in `min` and `max` for every node reachable from the root
///
/// Nodes reached again while still on the current path contribute nothing,
/// which keeps cycles finite. Nodes shared by several parents are counted
/// once per parent.
pub fn propagate(db: &Database, nodes: &mut [Node]) {
    let mut state = vec![Visit::Fresh; nodes.len()];
    for node in nodes.iter_mut() {
        node.weighted = false;
    }
    if !nodes.is_empty() {
        visit(db, nodes, &mut state, ROOT);
    }
}

fn own_totals(db: &Database, node: &Node) -> Totals {
    if node.is_root() || !node.wanted || node.error.is_some() {
        return Totals {
            weight: node.weight,
            ..Totals::default()
        };
    }
    let record = node.package.and_then(|p| db.package(p));
    let (download, install) = record
        .map(|r| (i64::from(r.download_size), i64::from(r.install_size)))
        .unwrap_or((0, 0));

    if node.action.is_removal() {
        Totals {
            weight: node.weight,
            download_size: 0,
            install_size: -install,
        }
    } else {
        Totals {
            weight: node.weight,
            download_size: download,
            install_size: install,
        }
    }
}

fn visit(db: &Database, nodes: &mut [Node], state: &mut [Visit], id: NodeId) -> (Totals, Totals) {
    match state[id] {
        Visit::Done => return (nodes[id].min, nodes[id].max),
        Visit::Active => return (Totals::default(), Totals::default()),
        Visit::Fresh => {}
    }
    state[id] = Visit::Active;

    let own = own_totals(db, &nodes[id]);
    let (mut min, mut max) = (own, own);

    let children = nodes[id].children.clone();
    for child in &children {
        match child {
            Child::Single(c) => {
                let (cmin, cmax) = visit(db, nodes, state, *c);
                min += cmin;
                max += cmax;
            }
            Child::Alternatives(ids) => {
                let results: Vec<(Totals, Totals)> =
                    ids.iter().map(|&c| visit(db, nodes, state, c)).collect();
                if let Some(best) = results.iter().map(|r| r.0).min_by_key(Totals::key) {
                    min += best;
                }
                if let Some(worst) = results.iter().map(|r| r.1).max_by_key(Totals::key) {
                    max += worst;
                }
            }
        }
    }

    let node = &mut nodes[id];
    node.min = min;
    node.max = max;
    node.weighted = true;
    state[id] = Visit::Done;
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Action;

    #[test]
    fn test_default_weigher() {
        let mut nodes = vec![
            Node::root(),
            Node::new(Some(0), Action::Install),
            Node::new(Some(1), Action::Remove),
            Node::new(Some(2), Action::Purge),
            Node::new(Some(3), Action::Install),
        ];
        nodes[4].wanted = false;

        DefaultWeigher.weigh(&mut nodes);
        let weights: Vec<i64> = nodes.iter().map(|n| n.weight).collect();
        assert_eq!(weights, vec![0, 1, 3, 3, 0]);
    }

    #[test]
    fn test_closure_weigher() {
        let mut nodes = vec![Node::root(), Node::new(Some(0), Action::Install)];
        let flat = |nodes: &mut [Node]| {
            for node in nodes.iter_mut() {
                node.weight = 7;
            }
        };
        flat.weigh(&mut nodes);
        assert!(nodes.iter().all(|n| n.weight == 7));
    }
}
