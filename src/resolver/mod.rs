// src/resolver/mod.rs

//! Dependency resolution
//!
//! The [`Solver`] turns user requests into a hypergraph of `(package,
//! action)` nodes ([`graph`]), estimates the cost of every subtree
//! ([`weight`]), and walks the graph into an ordered action list, stopping
//! at each choice the caller has to make ([`plan`]).
//!
//! ```text
//! add_request* -> solve -> weight -> begin_list -> (choices -> continue_list)* -> list
//! ```

pub mod error;
pub mod graph;
pub mod plan;
pub mod weight;

pub use error::{NodeError, SolverError, SolverErrorKind};
pub use graph::{describe, Action, Child, Node, NodeId, Totals, ROOT};
pub use plan::{PlannedAction, Traversal};
pub use weight::{propagate, DefaultWeigher, Weigher};

use crate::db::{package_flags, DependKind, Dependency, Database, PackageRecord};
use crate::error::{Error, Result};
use crate::version::{compare_versions, depend_string, DependOp, VersionPattern};
use std::collections::HashMap;
use tracing::{debug, info};

/// Resolution switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverOptions {
    /// Treat `Suggests` like `Depends`
    pub install_suggests: bool,
    /// Prune actions that would not change the installed state
    pub use_installed: bool,
    /// Expand dependencies at all
    pub use_deps: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            install_suggests: false,
            use_installed: true,
            use_deps: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Request {
    pattern: VersionPattern,
    action: Action,
}

pub struct Solver<'db> {
    db: &'db Database,
    options: SolverOptions,
    requests: Vec<Request>,
    nodes: Vec<Node>,
    lookup: HashMap<(u32, Action), NodeId>,
    traversal: Traversal,
    failed: Option<NodeId>,
}

impl<'db> Solver<'db> {
    pub fn new(db: &'db Database, options: SolverOptions) -> Self {
        Self {
            db,
            options,
            requests: Vec::new(),
            nodes: Vec::new(),
            lookup: HashMap::new(),
            traversal: Traversal::new(),
            failed: None,
        }
    }

    pub fn options(&self) -> SolverOptions {
        self.options
    }

    /// Queue a request like `libfoo>=1.2` for the next [`Self::solve`]
    pub fn add_request(&mut self, pattern: &str, action: Action) -> Result<()> {
        let pattern = VersionPattern::parse(pattern)
            .ok_or_else(|| Error::InvalidPattern(pattern.to_string()))?;
        debug!("Request: {} {}", action, pattern);
        self.requests.push(Request { pattern, action });
        Ok(())
    }

    /// Build the node graph for all queued requests
    ///
    /// Errors stay attached to their nodes; the first one reachable from the
    /// root is returned, unwrapped to the node that caused it.
    pub fn solve(&mut self) -> Result<()> {
        self.nodes.clear();
        self.lookup.clear();
        self.traversal = Traversal::new();
        self.failed = None;
        self.nodes.push(Node::root());

        let requests = self.requests.clone();
        for request in &requests {
            match self.request_children(request) {
                Ok(children) => self.nodes[ROOT].children.extend(children),
                Err(error) => {
                    self.nodes[ROOT].error = Some(error);
                    break;
                }
            }
        }

        info!("Solved {} requests into {} nodes", requests.len(), self.nodes.len());

        if self.nodes[ROOT].error.is_some() {
            let error = SolverError::from_node(self.db, &self.nodes, ROOT);
            self.failed = Some(error.node);
            return Err(Error::Resolution(error));
        }
        Ok(())
    }

    /// Assign node weights and fold them into subtree totals
    pub fn weight(&mut self, weigher: &dyn Weigher) {
        weigher.weigh(&mut self.nodes);
        propagate(self.db, &mut self.nodes);
    }

    /// Start walking the graph; `Ok(false)` means a choice is pending
    pub fn begin_list(&mut self) -> Result<bool> {
        let outcome = self.traversal.begin(self.db, &self.nodes);
        self.note_failure(outcome)
    }

    /// Pick alternative `choice` of the pending choice
    pub fn continue_list(&mut self, choice: usize) -> Result<bool> {
        let outcome = self.traversal.continue_with(self.db, &self.nodes, choice);
        self.note_failure(outcome)
    }

    /// Go back one choice; `false` when there is none to go back to
    pub fn up_list(&mut self) -> bool {
        self.traversal.up()
    }

    /// Alternatives of the pending choice
    pub fn choices(&self) -> &[NodeId] {
        self.traversal.choices()
    }

    /// Index into [`Self::choices`] of the alternative with the lowest
    /// minimum totals
    pub fn cheapest_choice(&self) -> Option<usize> {
        self.choices()
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| self.nodes[**id].min.key())
            .map(|(i, _)| i)
    }

    /// Ordered actions collected so far
    pub fn list(&self) -> &[PlannedAction] {
        self.traversal.list()
    }

    pub fn is_complete(&self) -> bool {
        self.traversal.is_complete()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Node behind the last reported error
    pub fn failed_node(&self) -> Option<NodeId> {
        self.failed
    }

    pub fn describe(&self, id: NodeId) -> String {
        self.nodes
            .get(id)
            .map(|n| describe(self.db, n))
            .unwrap_or_default()
    }

    fn note_failure(&mut self, outcome: Result<bool>) -> Result<bool> {
        if let Err(Error::Resolution(error)) = &outcome {
            self.failed = Some(error.node);
        }
        outcome
    }

    fn record(&self, pkg: u32) -> Option<PackageRecord> {
        self.db.package(pkg)
    }

    fn is_installed(&self, pkg: u32) -> bool {
        self.record(pkg).is_some_and(|r| r.is_installed())
    }

    /// Candidates newest first, ties in index order
    fn newest_first(&self, mut candidates: Vec<u32>) -> Vec<u32> {
        candidates.sort_by(|&a, &b| {
            let va = self.record(a).map(|r| self.db.str(r.version)).unwrap_or("");
            let vb = self.record(b).map(|r| self.db.str(r.version)).unwrap_or("");
            compare_versions(vb, va).then(a.cmp(&b))
        });
        candidates
    }

    fn request_children(&mut self, request: &Request) -> std::result::Result<Vec<Child>, NodeError> {
        let mut candidates: Vec<u32> = self.db.packages_by_version_string(&request.pattern).collect();
        candidates.sort_unstable();
        candidates.dedup();
        let mut children = Vec::new();

        match request.action {
            Action::Install => {
                if candidates.is_empty() {
                    return Err(NodeError::no_deps(request.pattern.to_string()));
                }
                let candidates = self.newest_first(candidates);
                children.push(self.install_child(&candidates)?);
            }
            Action::Remove | Action::Purge => {
                for pkg in candidates {
                    if self.options.use_installed && !self.is_installed(pkg) {
                        continue;
                    }
                    children.push(self.single(pkg, request.action)?);
                }
                if children.is_empty() {
                    info!("Nothing installed matches {}", request.pattern);
                }
            }
            Action::Update => {
                for pkg in candidates {
                    if !self.is_installed(pkg) {
                        continue;
                    }
                    match self.newest_sibling(pkg) {
                        Some(newer) => children.push(self.single(newer, Action::Install)?),
                        None => debug!("Package {} is already up to date", pkg),
                    }
                }
            }
        }
        Ok(children)
    }

    /// Newest same-name, same-distribution version above `pkg`'s
    fn newest_sibling(&self, pkg: u32) -> Option<u32> {
        let current = self.record(pkg)?;
        let current_version = self.db.str(current.version);
        let siblings = self
            .db
            .same_name_siblings(pkg)
            .filter(|&other| {
                self.record(other).is_some_and(|r| {
                    compare_versions(self.db.str(r.version), current_version).is_gt()
                })
            })
            .collect();
        self.newest_first(siblings).into_iter().next()
    }

    fn single(&mut self, pkg: u32, action: Action) -> std::result::Result<Child, NodeError> {
        let id = self.add_node(pkg, action);
        if self.nodes[id].error.is_some() {
            return Err(NodeError::with_other(SolverErrorKind::ChildError, id));
        }
        Ok(Child::Single(id))
    }

    /// Child satisfied by installing any of `candidates`
    ///
    /// An installed candidate satisfies it outright. Failing alternatives are
    /// dropped; the child fails only when none is left.
    fn install_child(&mut self, candidates: &[u32]) -> std::result::Result<Child, NodeError> {
        if self.options.use_installed {
            if let Some(&installed) = candidates.iter().find(|&&c| self.is_installed(c)) {
                return self.single(installed, Action::Install);
            }
        }
        let ids: Vec<NodeId> = candidates
            .iter()
            .map(|&c| self.add_node(c, Action::Install))
            .collect();
        self.alternatives(ids)
    }

    fn alternatives(&self, ids: Vec<NodeId>) -> std::result::Result<Child, NodeError> {
        if let [only] = ids.as_slice() {
            if self.nodes[*only].error.is_some() {
                return Err(NodeError::with_other(SolverErrorKind::ChildError, *only));
            }
        }
        let ok: Vec<NodeId> = ids
            .into_iter()
            .filter(|&id| self.nodes[id].error.is_none())
            .collect();
        match ok.len() {
            0 => Err(NodeError::new(SolverErrorKind::ChildError)),
            1 => Ok(Child::Single(ok[0])),
            _ => Ok(Child::Alternatives(ok)),
        }
    }

    /// Node for `(pkg, action)`, created and expanded on first use
    fn add_node(&mut self, pkg: u32, action: Action) -> NodeId {
        if let Some(&id) = self.lookup.get(&(pkg, action)) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node::new(Some(pkg), action));
        self.lookup.insert((pkg, action), id);

        match self.expand(pkg, action) {
            Ok(Some(children)) => self.nodes[id].children = children,
            Ok(None) => self.nodes[id].wanted = false,
            Err(error) => {
                debug!("Node {} ({} {}) failed: {:?}", id, action, pkg, error.kind);
                self.nodes[id].error = Some(error);
            }
        }
        id
    }

    /// Children of a new node, `None` when the node is a no-op
    fn expand(&mut self, pkg: u32, action: Action) -> std::result::Result<Option<Vec<Child>>, NodeError> {
        let record = self
            .record(pkg)
            .ok_or_else(|| NodeError::new(SolverErrorKind::InternalError))?;

        if action.is_install() && record.has_flag(package_flags::DONT_INSTALL) {
            return Err(NodeError::new(SolverErrorKind::UninstallablePackageInstalled));
        }
        if action.is_removal() && record.has_flag(package_flags::DONT_REMOVE) {
            return Err(NodeError::new(SolverErrorKind::UnremovablePackageRemoved));
        }

        if self.options.use_installed && record.is_installed() == action.is_install() {
            return Ok(None);
        }

        let mut children = Vec::new();

        if action.is_install() {
            let installed: Vec<u32> = self
                .db
                .same_name_siblings(pkg)
                .filter(|&other| self.is_installed(other))
                .collect();
            for other in installed {
                if self
                    .record(other)
                    .is_some_and(|r| r.has_flag(package_flags::DONT_UPDATE))
                {
                    return Err(NodeError {
                        kind: SolverErrorKind::UnupdatablePackageUpdated,
                        other: None,
                        pattern: Some(self.package_label(other)),
                    });
                }
                children.push(self.single(other, Action::Remove)?);
            }
        }

        if !self.options.use_deps {
            return Ok(Some(children));
        }

        let dependencies: Vec<Dependency> = self.db.dependencies(pkg).collect();
        for dependency in dependencies {
            match dependency {
                Dependency::Ordinary {
                    kind,
                    op,
                    name,
                    version,
                } => match kind {
                    DependKind::Depend if action.is_install() => {
                        children.push(self.dependency_child(pkg, name, version, op)?);
                    }
                    DependKind::Suggest if action.is_install() && self.options.install_suggests => {
                        match self.dependency_child(pkg, name, version, op) {
                            Ok(child) => children.push(child),
                            Err(_) => debug!(
                                "Skipping unsatisfiable suggestion {}",
                                self.pattern_label(name, op, version)
                            ),
                        }
                    }
                    DependKind::Conflict | DependKind::Replace if action.is_install() => {
                        let targets: Vec<u32> = self
                            .db
                            .packages_of_string(version, name, op)
                            .filter(|&c| c != pkg)
                            .filter(|&c| !self.options.use_installed || self.is_installed(c))
                            .collect();
                        for target in targets {
                            let child = self.single(target, Action::Remove)?;
                            if !children.contains(&child) {
                                children.push(child);
                            }
                        }
                    }
                    _ => {}
                },
                Dependency::ReverseOf { dependent } if action.is_removal() => {
                    if let Some(child) = self.reverse_child(pkg, dependent)? {
                        children.push(child);
                    }
                }
                Dependency::ReverseOf { .. } => {}
            }
        }

        Ok(Some(children))
    }

    fn dependency_child(
        &mut self,
        pkg: u32,
        name: u32,
        version: u32,
        op: DependOp,
    ) -> std::result::Result<Child, NodeError> {
        let candidates: Vec<u32> = self
            .db
            .packages_of_string(version, name, op)
            .filter(|&c| c != pkg)
            .collect();
        if candidates.is_empty() {
            return Err(NodeError::no_deps(self.pattern_label(name, op, version)));
        }
        let candidates = self.newest_first(candidates);
        self.install_child(&candidates)
    }

    /// Child keeping `dependent` consistent when `pkg` goes away
    ///
    /// Either the dependent is removed too, or another provider of what it
    /// needed is installed. `None` when another installed provider already
    /// covers it.
    fn reverse_child(&mut self, pkg: u32, dependent: u32) -> std::result::Result<Option<Child>, NodeError> {
        if self.options.use_installed && !self.is_installed(dependent) {
            return Ok(None);
        }

        let mut needed = false;
        let mut replacements = Vec::new();
        for dependency in self.db.dependencies(dependent) {
            let Dependency::Ordinary {
                kind: DependKind::Depend,
                op,
                name,
                version,
            } = dependency
            else {
                continue;
            };
            let candidates: Vec<u32> = self.db.packages_of_string(version, name, op).collect();
            if !candidates.contains(&pkg) {
                continue;
            }
            let others: Vec<u32> = candidates
                .into_iter()
                .filter(|&c| c != pkg && c != dependent)
                .collect();
            if self.options.use_installed && others.iter().any(|&c| self.is_installed(c)) {
                continue;
            }
            needed = true;
            for other in others {
                if !replacements.contains(&other) {
                    replacements.push(other);
                }
            }
        }
        if !needed {
            return Ok(None);
        }

        let mut ids = vec![self.add_node(dependent, Action::Remove)];
        for other in self.newest_first(replacements) {
            ids.push(self.add_node(other, Action::Install));
        }
        self.alternatives(ids).map(Some)
    }

    fn package_label(&self, pkg: u32) -> String {
        self.record(pkg)
            .map(|r| format!("{}~{}", self.db.str(r.name), self.db.str(r.version)))
            .unwrap_or_default()
    }

    fn pattern_label(&self, name: u32, op: DependOp, version: u32) -> String {
        depend_string(self.db.str(name), op, self.db.str(version))
    }
}
