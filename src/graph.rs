//! The source set DAG.
//!
//! Every platform node owns a MAIN source set, and every node declaring tests
//! additionally owns a TEST source set. Source sets live in a single arena (a
//! petgraph [`DiGraph`]) and are addressed by their stable [`NodeIndex`];
//! edges point from a child to the parent it depends on.
//!
//! ## Parent order
//!
//! A source set may have several parents, which makes the graph a DAG
//! rather than a tree. Parents are always visited in [`Inherit`] order:
//!
//! 1. the primary parent from the family tree,
//! 2. cross-cutting parents, in the order their tags were declared,
//! 3. parents added later through [`SourceSetGraph::depends_on`],
//! 4. for TEST source sets, the MAIN source set of the same platform.
//!
//! This is what makes merge orders deterministic, and it lets declarations
//! from the primary lineage win name collisions.
//!
//! ## Pruning
//!
//! Source sets are never destroyed. A pruned source set is only marked
//! inactive and loses every edge that touched it, so the indices of the
//! remaining nodes stay valid.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use camino::Utf8PathBuf;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use serde::{Deserialize, Serialize};

use crate::core::ArcStr;
use crate::error::{ConfigurationFrozenError, CycleError, GraphError};
use crate::topology::{Dependency, Kind, PlatformTopology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Main,
    Test,
}

impl Role {
    pub fn suffix(self) -> &'static str {
        match self {
            Role::Main => "Main",
            Role::Test => "Test",
        }
    }
}

/// The reason a `dependsOn` edge exists. The derived order is the order in
/// which parents are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Inherit {
    Primary,
    CrossCutting(u32),
    Declared,
    Companion,
}

/// A named bundle of source belonging to one platform node.
#[derive(Debug, Clone)]
pub struct SourceSet {
    /// `<platform><Role>`, e.g. `linuxX64Main`.
    pub id: ArcStr,
    pub platform: ArcStr,
    pub kind: Kind,
    pub role: Role,
    /// Flag deciding whether this source set survives pruning.
    pub flag: Option<ArcStr>,
    pub dirs: Vec<Utf8PathBuf>,
    pub deps: Vec<Dependency>,
    /// Opt-in annotations of the language settings.
    pub opt_ins: Vec<ArcStr>,
    pub options: BTreeMap<ArcStr, ArcStr>,
    pub(crate) active: bool,
}

impl SourceSet {
    pub fn name(platform: &str, role: Role) -> String {
        format!("{platform}{}", role.suffix())
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == Kind::Leaf
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[derive(Debug, Clone)]
pub struct SourceSetGraph {
    pub(crate) graph: DiGraph<SourceSet, Inherit>,
    index: HashMap<ArcStr, NodeIndex>,
    root: NodeIndex,
    frozen: bool,
}

impl SourceSetGraph {
    /// Builds the full, unpruned graph for `topology`. The result does not
    /// depend on any activation flag.
    pub fn build(topology: &PlatformTopology) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(topology.len() * 2, topology.len() * 4);
        let mut index = HashMap::new();

        let mut add = |graph: &mut DiGraph<SourceSet, Inherit>, platform: &ArcStr, role| {
            let node = topology
                .get(platform)
                .ok_or_else(|| GraphError::UnknownSourceSet(platform.clone()))?;

            let id: ArcStr = SourceSet::name(platform, role).into();
            let mut dirs = vec![Utf8PathBuf::from(format!("src/{id}/kotlin"))];
            dirs.extend(
                node.dirs
                    .iter()
                    .filter(|(r, _)| *r == role)
                    .map(|(_, dir)| dir.clone()),
            );

            let deps = node
                .deps
                .iter()
                .filter(|(r, _)| *r == role)
                .map(|(_, dep)| dep.clone())
                .collect();

            let i = graph.add_node(SourceSet {
                id: id.clone(),
                platform: platform.clone(),
                kind: node.kind,
                role,
                flag: topology.governing_flag(platform).cloned(),
                dirs,
                deps,
                opt_ins: topology.opt_ins().to_vec(),
                options: node.options.clone(),
                active: true,
            });
            index.insert(id, i);
            Ok::<_, GraphError>(i)
        };

        let mut mains = HashMap::new();
        for node in topology.nodes() {
            let i = add(&mut graph, &node.id, Role::Main)?;
            mains.insert(node.id.clone(), i);
        }

        let mut tests = HashMap::new();
        for node in topology.nodes().filter(|node| node.tests) {
            let i = add(&mut graph, &node.id, Role::Test)?;
            tests.insert(node.id.clone(), i);
        }

        let mut this = Self {
            graph,
            index,
            root: mains[&topology.root().id],
            frozen: false,
        };

        for node in topology.nodes() {
            let child = mains[&node.id];

            if let Some(parent) = topology.primary_parent(&node.id) {
                this.insert_edge(child, mains[&parent.id], Inherit::Primary)?;
            }

            for (tag, parent) in topology.cross_cutting_parents(&node.id) {
                this.insert_edge(child, mains[&parent.id], Inherit::CrossCutting(tag.order))?;
            }
        }

        let by_main = this.tested_mains();

        for node in topology.nodes().filter(|node| node.tests) {
            let main = mains[&node.id];
            let test = tests[&node.id];

            for (inherit, parent) in this.nearest_tested(main, &by_main) {
                this.insert_edge(test, by_main[&parent], inherit)?;
            }

            this.insert_edge(test, main, Inherit::Companion)?;
        }

        tracing::debug!(
            source_sets = this.graph.node_count(),
            edges = this.graph.edge_count(),
            "built source set graph"
        );

        Ok(this)
    }

    /// Declares that `child` depends on `parent`. Inserting an edge that
    /// already exists is a no-op.
    pub fn depends_on(&mut self, child: &str, parent: &str) -> Result<(), GraphError> {
        if self.frozen {
            return Err(ConfigurationFrozenError::new(format!(
                "add edge '{child}' -> '{parent}'"
            ))
            .into());
        }

        let c = self.lookup(child)?;
        let p = self.lookup(parent)?;
        let (c_set, p_set) = (&self.graph[c], &self.graph[p]);
        let companion = c_set.platform == p_set.platform;

        let crosses = match (c_set.role, p_set.role) {
            (Role::Main, Role::Test) => true,
            (Role::Test, Role::Main) => !companion,
            _ => false,
        };
        if crosses {
            return Err(GraphError::RoleMismatch {
                child: c_set.id.clone(),
                parent: p_set.id.clone(),
            });
        }

        if p_set.is_leaf() && !companion {
            return Err(GraphError::LeafParent {
                child: c_set.id.clone(),
                parent: p_set.id.clone(),
            });
        }

        let inherit = if companion {
            Inherit::Companion
        } else {
            Inherit::Declared
        };

        let Some(edge) = self.insert_edge(c, p, inherit)? else {
            return Ok(());
        };

        if self.graph[c].role == Role::Main {
            if let Err(e) = self.mirror_tests(c) {
                self.graph.remove_edge(edge);
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Adds the TEST edges implied by a new MAIN edge out of `main`, for
    /// `main` and every MAIN source set below it. Nothing is added on error.
    fn mirror_tests(&mut self, main: NodeIndex) -> Result<(), CycleError> {
        let tested = self.tested_mains();

        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, main);
        let mut wanted = Vec::new();

        while let Some(i) = dfs.next(reversed) {
            if let Some(&test) = tested.get(&i) {
                for (_, parent) in self.nearest_tested(i, &tested) {
                    wanted.push((test, tested[&parent]));
                }
            }
        }

        let mut added = Vec::new();
        for (test, parent) in wanted {
            match self.insert_edge(test, parent, Inherit::Declared) {
                Ok(Some(edge)) => added.push(edge),
                Ok(None) => {}
                Err(e) => {
                    // Newest first, so every removed edge is the last one.
                    for edge in added.into_iter().rev() {
                        self.graph.remove_edge(edge);
                    }
                    return Err(e);
                }
            }
        }

        if !added.is_empty() {
            tracing::debug!(edges = added.len(), "mirrored declared edge into test source sets");
        }

        Ok(())
    }

    /// Returns the new edge, or `None` if it already existed.
    fn insert_edge(
        &mut self,
        child: NodeIndex,
        parent: NodeIndex,
        inherit: Inherit,
    ) -> Result<Option<EdgeIndex>, CycleError> {
        if self.graph.find_edge(child, parent).is_some() {
            return Ok(None);
        }

        // The parent must not already reach the child through its own closure.
        if child == parent || has_path_connecting(&self.graph, parent, child, None) {
            return Err(CycleError {
                child: self.graph[child].id.clone(),
                parent: self.graph[parent].id.clone(),
            });
        }

        Ok(Some(self.graph.add_edge(child, parent, inherit)))
    }

    /// Every active MAIN source set that has a TEST companion, mapped to it.
    fn tested_mains(&self) -> HashMap<NodeIndex, NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&i| self.graph[i].active && self.graph[i].role == Role::Test)
            .filter_map(|test| {
                let main = SourceSet::name(&self.graph[test].platform, Role::Main);
                Some((self.index_of(&main)?, test))
            })
            .collect()
    }

    /// For each MAIN parent of `main`, the closest ancestor that owns a TEST
    /// source set, tagged with the edge kind of the first hop. Ancestors
    /// already reachable through another candidate are left out.
    fn nearest_tested(
        &self,
        main: NodeIndex,
        tests: &HashMap<NodeIndex, NodeIndex>,
    ) -> Vec<(Inherit, NodeIndex)> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        for (inherit, parent) in self.sorted_parents(main) {
            let mut stack = vec![parent];

            while let Some(i) = stack.pop() {
                if !seen.insert(i) {
                    continue;
                }
                if tests.contains_key(&i) {
                    found.push((inherit, i));
                    continue;
                }
                let mut next: Vec<_> = self
                    .sorted_parents(i)
                    .into_iter()
                    .map(|(_, p)| p)
                    .collect();
                next.reverse();
                stack.extend(next);
            }
        }

        let covers: Vec<_> = found.iter().map(|&(_, i)| self.closure(i)).collect();

        found
            .iter()
            .enumerate()
            .filter(|&(k, (_, i))| {
                !covers
                    .iter()
                    .enumerate()
                    .any(|(j, closure)| j != k && closure.contains(i))
            })
            .map(|(_, &candidate)| candidate)
            .collect()
    }

    pub(crate) fn sorted_parents(&self, i: NodeIndex) -> Vec<(Inherit, NodeIndex)> {
        let mut parents: Vec<_> = self
            .graph
            .edges(i)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect();
        parents.sort_by_key(|&(inherit, p)| (inherit, p.index()));
        parents
    }

    pub(crate) fn lookup(&self, id: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(id)
            .copied()
            .filter(|&i| self.graph[i].active)
            .ok_or_else(|| GraphError::UnknownSourceSet(id.into()))
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub(crate) fn root_index(&self) -> NodeIndex {
        self.root
    }

    /// Every node reachable from `i` through parent edges, `i` included.
    pub(crate) fn closure(&self, i: NodeIndex) -> HashSet<NodeIndex> {
        let mut dfs = Dfs::new(&self.graph, i);
        let mut seen = HashSet::new();
        while let Some(next) = dfs.next(&self.graph) {
            seen.insert(next);
        }
        seen
    }

    /// Marks every node outside of `keep` as inactive and drops the edges
    /// touching them. Returns the ids of newly pruned nodes.
    pub(crate) fn retain(&mut self, keep: &HashSet<NodeIndex>) -> Vec<ArcStr> {
        let mut pruned = Vec::new();

        for i in self.graph.node_indices() {
            let node = &mut self.graph[i];
            if node.active && !keep.contains(&i) {
                node.active = false;
                pruned.push(node.id.clone());
            }
        }

        let graph = &self.graph;
        let live: HashSet<_> = graph
            .node_indices()
            .filter(|&i| graph[i].active)
            .collect();

        self.graph.retain_edges(|g, e| {
            g.edge_endpoints(e)
                .is_some_and(|(a, b)| live.contains(&a) && live.contains(&b))
        });

        pruned
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Marks a single node inactive while leaving its edges in place.
    #[cfg(test)]
    pub(crate) fn deactivate(&mut self, id: &str) {
        if let Some(i) = self.index_of(id) {
            self.graph[i].active = false;
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn root(&self) -> &SourceSet {
        &self.graph[self.root]
    }

    pub fn get(&self, id: &str) -> Option<&SourceSet> {
        self.lookup(id).ok().map(|i| &self.graph[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_ok()
    }

    pub fn main_of(&self, platform: &str) -> Option<&SourceSet> {
        self.get(&SourceSet::name(platform, Role::Main))
    }

    pub fn test_of(&self, platform: &str) -> Option<&SourceSet> {
        self.get(&SourceSet::name(platform, Role::Test))
    }

    /// Active source sets in creation order.
    pub fn active(&self) -> impl Iterator<Item = &SourceSet> {
        self.graph.node_weights().filter(|set| set.active)
    }

    /// Active MAIN source sets of concrete targets.
    pub fn leaves(&self) -> impl Iterator<Item = &SourceSet> {
        self.active()
            .filter(|set| set.is_leaf() && set.role == Role::Main)
    }

    pub fn len(&self) -> usize {
        self.active().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active `dependsOn` edges as `(child, parent, inherit)`, sorted.
    pub fn edges(&self) -> Vec<(ArcStr, ArcStr, Inherit)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].id.clone(),
                    self.graph[edge.target()].id.clone(),
                    *edge.weight(),
                )
            })
            .collect();
        edges.sort();
        edges
    }

    /// Direct parents, in visiting order.
    pub fn parents(&self, id: &str) -> Result<Vec<&SourceSet>, GraphError> {
        let i = self.lookup(id)?;
        Ok(self
            .sorted_parents(i)
            .into_iter()
            .map(|(_, p)| &self.graph[p])
            .collect())
    }

    /// Transitive parents, ancestors before descendants.
    pub fn ancestors(&self, id: &str) -> Result<Vec<&SourceSet>, GraphError> {
        let mut order = self.merge_order(id)?;
        order.pop();
        Ok(order)
    }

    /// The source set and all of its ancestors, ancestors before
    /// descendants. Parents are visited in [`Inherit`] order, so the result
    /// is deterministic.
    pub fn merge_order(&self, id: &str) -> Result<Vec<&SourceSet>, GraphError> {
        let i = self.lookup(id)?;
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        self.post_order(i, &mut seen, &mut order);
        Ok(order.into_iter().map(|i| &self.graph[i]).collect())
    }

    fn post_order(&self, i: NodeIndex, seen: &mut HashSet<NodeIndex>, out: &mut Vec<NodeIndex>) {
        if !seen.insert(i) {
            return;
        }
        for (_, parent) in self.sorted_parents(i) {
            self.post_order(parent, seen, out);
        }
        out.push(i);
    }

    /// Lookup order for resolving a name declared by more than one inherited
    /// source set: the source set itself, its primary lineage up to the root,
    /// then every other ancestor in parent order.
    pub fn precedence(&self, id: &str) -> Result<Vec<&SourceSet>, GraphError> {
        let i = self.lookup(id)?;

        let mut lineage = vec![i];
        let mut cursor = i;
        while let Some((_, parent)) = self
            .sorted_parents(cursor)
            .into_iter()
            .find(|(inherit, _)| *inherit == Inherit::Primary)
        {
            lineage.push(parent);
            cursor = parent;
        }

        let mut seen: HashSet<_> = lineage.iter().copied().collect();
        let mut order = lineage;
        let mut stack = vec![i];
        let mut visited = HashSet::new();

        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            if seen.insert(next) {
                order.push(next);
            }
            let mut parents: Vec<_> = self
                .sorted_parents(next)
                .into_iter()
                .map(|(_, p)| p)
                .collect();
            parents.reverse();
            stack.extend(parents);
        }

        Ok(order.into_iter().map(|i| &self.graph[i]).collect())
    }
}

/// Renders the active graph as a Mermaid diagram. Solid arrows follow the
/// family tree, dotted arrows are cross-cutting or declared edges and thick
/// arrows link a TEST source set to its MAIN companion.
impl fmt::Display for SourceSetGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for i in self.graph.node_indices() {
            let set = &self.graph[i];
            if set.active {
                let name = set.id.replace('"', "\\\"");
                writeln!(f, "    {}[\"{}\"]", i.index(), name)?;
            }
        }

        for edge in self.graph.edge_references() {
            let arrow = match edge.weight() {
                Inherit::Primary => "-->",
                Inherit::CrossCutting(_) | Inherit::Declared => "-.->",
                Inherit::Companion => "==>",
            };
            writeln!(
                f,
                "    {} {} {}",
                edge.target().index(),
                arrow,
                edge.source().index()
            )?;
        }

        Ok(())
    }
}
