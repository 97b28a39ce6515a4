//! Static declaration of the platform hierarchy.
//!
//! A [`PlatformTopology`] is a tree of platform families with a single
//! universal root. Every leaf of the tree is a concrete compile target.
//! On top of the tree, cross-cutting tags add extra inheritance edges that
//! ignore the tree shape, e.g. every target with a 64-bit `size_t` shares
//! the `sizet64` family no matter which branch it lives on.
//!
//! ```text
//!   common
//!   '-- native
//!       |-- unix
//!       |   |-- apple ----.
//!       |   |   '-- iosX64 |  sizet64
//!       |   '-- linux ----'
//!       |       '-- linuxX64
//!       '-- mingw
//!           '-- mingwX64
//! ```

pub mod preset;

use std::collections::{BTreeMap, HashMap};

use camino::Utf8PathBuf;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::core::ArcStr;
use crate::error::TopologyError;
use crate::graph::Role;

/// Whether a platform node groups other nodes or is a real target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Abstract grouping of targets sharing some source.
    Family,
    /// Concrete compile target.
    Leaf,
}

/// How a declared dependency is exposed to the compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    /// Visible to consumers of the source set.
    Api,
    Implementation,
    /// Present at compile time only.
    CompileOnly,
}

/// An external library, or a sibling project when the notation starts
/// with `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
    pub scope: Scope,
    pub notation: ArcStr,
}

impl Dependency {
    pub fn new(scope: Scope, notation: impl Into<ArcStr>) -> Self {
        Self {
            scope,
            notation: notation.into(),
        }
    }

    pub fn is_project(&self) -> bool {
        self.notation.starts_with(':')
    }
}

/// A single node of the platform hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformNode {
    pub id: ArcStr,
    pub kind: Kind,
    /// Activation flag declared directly on this node.
    pub flag: Option<ArcStr>,
    /// Whether this node has a test source set.
    pub tests: bool,
    /// Extra source directories, appended after the default one.
    pub dirs: Vec<(Role, Utf8PathBuf)>,
    pub deps: Vec<(Role, Dependency)>,
    /// Compiler options for every compilation of this node.
    pub options: BTreeMap<ArcStr, ArcStr>,
}

impl PlatformNode {
    fn new(id: ArcStr, kind: Kind) -> Self {
        Self {
            id,
            kind,
            flag: None,
            tests: false,
            dirs: Vec::new(),
            deps: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == Kind::Leaf
    }
}

/// A cross-cutting tag. The tag shares its name with the family node it
/// points at; `order` is the position in which the tag was declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrossCuttingTag {
    pub name: ArcStr,
    pub order: u32,
}

#[derive(Debug)]
pub struct PlatformTopology {
    nodes: Vec<PlatformNode>,
    index: HashMap<ArcStr, usize>,
    primary: Vec<Option<usize>>,
    cross: Vec<Vec<(CrossCuttingTag, usize)>>,
    opt_ins: Vec<ArcStr>,
    root: usize,
}

impl PlatformTopology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    pub fn root(&self) -> &PlatformNode {
        &self.nodes[self.root]
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &PlatformNode> {
        self.nodes.iter()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &PlatformNode> {
        self.nodes.iter().filter(|node| node.is_leaf())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PlatformNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn primary_parent(&self, id: &str) -> Option<&PlatformNode> {
        let i = *self.index.get(id)?;
        self.primary[i].map(|p| &self.nodes[p])
    }

    /// Cross-cutting parents of a node, in tag declaration order.
    pub fn cross_cutting_parents(&self, id: &str) -> Vec<(&CrossCuttingTag, &PlatformNode)> {
        match self.index.get(id) {
            Some(&i) => self.cross[i]
                .iter()
                .map(|(tag, p)| (tag, &self.nodes[*p]))
                .collect(),
            None => Vec::new(),
        }
    }

    /// The node itself followed by its primary ancestors, ending at the root.
    pub fn primary_chain(&self, id: &str) -> Vec<&PlatformNode> {
        let mut chain = Vec::new();
        let mut cursor = self.index.get(id).copied();

        while let Some(i) = cursor {
            chain.push(&self.nodes[i]);
            cursor = self.primary[i];
        }

        chain
    }

    /// Opt-in annotations enabled for every source set.
    pub fn opt_ins(&self) -> &[ArcStr] {
        &self.opt_ins
    }

    /// The nearest activation flag on the primary chain, self first.
    pub fn governing_flag(&self, id: &str) -> Option<&ArcStr> {
        self.primary_chain(id)
            .into_iter()
            .find_map(|node| node.flag.as_ref())
    }
}

/// Collects the declaration of a [`PlatformTopology`] and validates it in
/// [`TopologyBuilder::finish`].
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    decls: Vec<(PlatformNode, Option<ArcStr>)>,
    flags: Vec<(ArcStr, ArcStr)>,
    tests: Vec<ArcStr>,
    dirs: Vec<(ArcStr, Role, Utf8PathBuf)>,
    deps: Vec<(ArcStr, Role, Dependency)>,
    options: Vec<(ArcStr, ArcStr, ArcStr)>,
    cross: Vec<(ArcStr, Vec<ArcStr>)>,
    opt_ins: Vec<ArcStr>,
}

impl TopologyBuilder {
    pub fn root(mut self, id: impl Into<ArcStr>) -> Self {
        self.decls
            .push((PlatformNode::new(id.into(), Kind::Family), None));
        self
    }

    pub fn family(mut self, id: impl Into<ArcStr>, parent: impl Into<ArcStr>) -> Self {
        self.decls
            .push((PlatformNode::new(id.into(), Kind::Family), Some(parent.into())));
        self
    }

    pub fn leaf(mut self, id: impl Into<ArcStr>, parent: impl Into<ArcStr>) -> Self {
        self.decls
            .push((PlatformNode::new(id.into(), Kind::Leaf), Some(parent.into())));
        self
    }

    pub fn leaves<I, S>(mut self, ids: I, parent: impl Into<ArcStr>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        let parent = parent.into();
        for id in ids {
            self = self.leaf(id, parent.clone());
        }
        self
    }

    /// Governs `node` and its primary descendants by `flag`.
    pub fn flag(mut self, node: impl Into<ArcStr>, flag: impl Into<ArcStr>) -> Self {
        self.flags.push((node.into(), flag.into()));
        self
    }

    pub fn tests<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        self.tests.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn source_dir(
        mut self,
        node: impl Into<ArcStr>,
        role: Role,
        dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        self.dirs.push((node.into(), role, dir.into()));
        self
    }

    pub fn dependency(
        mut self,
        node: impl Into<ArcStr>,
        role: Role,
        scope: Scope,
        notation: impl Into<ArcStr>,
    ) -> Self {
        self.deps
            .push((node.into(), role, Dependency::new(scope, notation)));
        self
    }

    /// Sets a compiler option on `node`. Options of nearer source sets
    /// override inherited ones.
    pub fn option(
        mut self,
        node: impl Into<ArcStr>,
        key: impl Into<ArcStr>,
        value: impl Into<ArcStr>,
    ) -> Self {
        self.options.push((node.into(), key.into(), value.into()));
        self
    }

    /// Enables an opt-in annotation in the language settings of every
    /// source set.
    pub fn opt_in(mut self, annotation: impl Into<ArcStr>) -> Self {
        let annotation = annotation.into();
        if !self.opt_ins.contains(&annotation) {
            self.opt_ins.push(annotation);
        }
        self
    }

    /// Attaches the family `tag` as an additional parent of every consumer.
    pub fn cross_cutting<I, S>(mut self, tag: impl Into<ArcStr>, consumers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        let tag = tag.into();
        let consumers = consumers.into_iter().map(Into::into);

        match self.cross.iter_mut().find(|(name, _)| *name == tag) {
            Some((_, existing)) => existing.extend(consumers),
            None => self.cross.push((tag, consumers.collect())),
        }
        self
    }

    pub fn finish(self) -> Result<PlatformTopology, TopologyError> {
        let mut nodes = Vec::with_capacity(self.decls.len());
        let mut parents = Vec::with_capacity(self.decls.len());
        let mut index = HashMap::new();

        for (node, parent) in self.decls {
            if index.insert(node.id.clone(), nodes.len()).is_some() {
                return Err(TopologyError::Duplicate(node.id));
            }
            nodes.push(node);
            parents.push(parent);
        }

        let lookup = |id: &ArcStr| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| TopologyError::UnknownNode(id.clone()))
        };

        let mut primary = Vec::with_capacity(nodes.len());
        let mut root = None;

        for (i, parent) in parents.iter().enumerate() {
            let Some(parent) = parent else {
                match root {
                    None => root = Some(i),
                    Some(r) => {
                        return Err(TopologyError::MultipleRoots(
                            nodes[r].id.clone(),
                            nodes[i].id.clone(),
                        ));
                    }
                }
                primary.push(None);
                continue;
            };

            let p = lookup(parent)?;
            if nodes[p].is_leaf() {
                return Err(TopologyError::LeafParent {
                    node: nodes[i].id.clone(),
                    parent: parent.clone(),
                });
            }
            primary.push(Some(p));
        }

        let root = root.ok_or(TopologyError::MissingRoot)?;

        // Any chain longer than the node count has to loop.
        for start in 0..nodes.len() {
            let mut cursor = start;
            let mut steps = 0;
            while let Some(p) = primary[cursor] {
                cursor = p;
                steps += 1;
                if steps > nodes.len() {
                    return Err(TopologyError::NoPathToRoot(nodes[start].id.clone()));
                }
            }
        }

        for (node, flag) in self.flags {
            let i = lookup(&node)?;
            nodes[i].flag = Some(flag);
        }

        for node in self.tests {
            let i = lookup(&node)?;
            nodes[i].tests = true;
        }

        for (node, role, dir) in self.dirs {
            let i = lookup(&node)?;
            nodes[i].dirs.push((role, dir));
        }

        for (node, role, dep) in self.deps {
            let i = lookup(&node)?;
            if !nodes[i].deps.contains(&(role, dep.clone())) {
                nodes[i].deps.push((role, dep));
            }
        }

        for (node, key, value) in self.options {
            let i = lookup(&node)?;
            nodes[i].options.insert(key, value);
        }

        let mut cross: Vec<Vec<(CrossCuttingTag, usize)>> = vec![Vec::new(); nodes.len()];

        for (order, (name, consumers)) in self.cross.into_iter().enumerate() {
            let Some(&target) = index.get(&name) else {
                return Err(TopologyError::UnknownCrossCutting {
                    node: consumers.first().cloned().unwrap_or_else(|| name.clone()),
                    tag: name,
                });
            };

            if nodes[target].is_leaf() {
                return Err(TopologyError::LeafCrossCutting { tag: name });
            }

            let tag = CrossCuttingTag {
                name,
                order: order as u32,
            };

            for consumer in consumers {
                let c = lookup(&consumer)?;
                if !cross[c].iter().any(|(_, t)| *t == target) {
                    cross[c].push((tag.clone(), target));
                }
            }
        }

        check_acyclic(&nodes, &primary, &cross)?;

        Ok(PlatformTopology {
            nodes,
            index,
            primary,
            cross,
            opt_ins: self.opt_ins,
            root,
        })
    }
}

fn check_acyclic(
    nodes: &[PlatformNode],
    primary: &[Option<usize>],
    cross: &[Vec<(CrossCuttingTag, usize)>],
) -> Result<(), TopologyError> {
    let mut graph = DiGraph::<usize, ()>::with_capacity(nodes.len(), nodes.len());
    for i in 0..nodes.len() {
        graph.add_node(i);
    }

    for (i, parent) in primary.iter().enumerate() {
        if let Some(p) = parent {
            graph.add_edge(NodeIndex::new(i), NodeIndex::new(*p), ());
        }
    }

    for (i, parents) in cross.iter().enumerate() {
        for (_, p) in parents {
            graph.add_edge(NodeIndex::new(i), NodeIndex::new(*p), ());
        }
    }

    petgraph::algo::toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| TopologyError::Cycle(nodes[graph[cycle.node_id()]].id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> TopologyBuilder {
        PlatformTopology::builder()
            .root("common")
            .family("native", "common")
            .family("unix", "native")
            .family("apple", "unix")
            .family("linux", "unix")
            .family("mingw", "native")
            .family("sizet64", "native")
            .leaf("leafA", "apple")
            .leaf("leafB", "linux")
            .leaf("leafC", "mingw")
            .flag("native", "nativeEnabled")
            .cross_cutting("sizet64", ["apple", "linux"])
    }

    #[test]
    fn test_primary_chain_reaches_root() {
        let topology = scenario().finish().unwrap();
        let chain: Vec<_> = topology
            .primary_chain("leafA")
            .iter()
            .map(|n| n.id.to_string())
            .collect();

        assert_eq!(chain, ["leafA", "apple", "unix", "native", "common"]);
        assert_eq!(topology.root().id.as_ref(), "common");
    }

    #[test]
    fn test_cross_cutting_parents() {
        let topology = scenario().finish().unwrap();
        let parents = topology.cross_cutting_parents("linux");

        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].0.name.as_ref(), "sizet64");
        assert_eq!(parents[0].1.id.as_ref(), "sizet64");
        assert!(topology.cross_cutting_parents("leafC").is_empty());
    }

    #[test]
    fn test_governing_flag_is_inherited() {
        let topology = scenario().finish().unwrap();

        assert_eq!(
            topology.governing_flag("leafB").map(|f| f.as_ref()),
            Some("nativeEnabled")
        );
        assert_eq!(topology.governing_flag("common"), None);
    }

    #[test]
    fn test_dependencies_and_options() {
        let topology = scenario()
            .dependency("common", Role::Main, Scope::Api, "org.example:stdlib")
            .dependency("common", Role::Main, Scope::Api, "org.example:stdlib")
            .dependency("common", Role::Test, Scope::Implementation, ":fakes")
            .option("leafA", "sourceMap", "false")
            .option("leafA", "sourceMap", "true")
            .opt_in("kotlin.RequiresOptIn")
            .opt_in("kotlin.RequiresOptIn")
            .finish()
            .unwrap();

        let common = topology.root();
        assert_eq!(common.deps.len(), 2);
        assert!(!common.deps[0].1.is_project());
        assert!(common.deps[1].1.is_project());

        let leaf_a = topology.get("leafA").unwrap();
        assert_eq!(leaf_a.options["sourceMap"].as_ref(), "true");
        assert_eq!(topology.opt_ins().len(), 1);

        let err = scenario()
            .dependency("wasm", Role::Main, Scope::Api, "org.example:stdlib")
            .finish()
            .unwrap_err();
        assert_eq!(err, TopologyError::UnknownNode("wasm".into()));
    }

    #[test]
    fn test_unknown_parent() {
        let err = scenario().leaf("leafD", "wasm").finish().unwrap_err();
        assert_eq!(err, TopologyError::UnknownNode("wasm".into()));
    }

    #[test]
    fn test_multiple_roots() {
        let err = scenario().root("other").finish().unwrap_err();
        assert!(matches!(err, TopologyError::MultipleRoots(..)));
    }

    #[test]
    fn test_missing_root() {
        let err = PlatformTopology::builder()
            .family("a", "b")
            .family("b", "a")
            .finish()
            .unwrap_err();
        assert_eq!(err, TopologyError::MissingRoot);
    }

    #[test]
    fn test_primary_loop_has_no_path_to_root() {
        let err = PlatformTopology::builder()
            .root("common")
            .family("a", "b")
            .family("b", "a")
            .finish()
            .unwrap_err();
        assert!(matches!(err, TopologyError::NoPathToRoot(_)));
    }

    #[test]
    fn test_leaf_cannot_be_parent() {
        let err = scenario().leaf("leafD", "leafA").finish().unwrap_err();
        assert!(matches!(err, TopologyError::LeafParent { .. }));
    }

    #[test]
    fn test_cross_cutting_target_must_exist() {
        let err = scenario()
            .cross_cutting("sizet32", ["leafA"])
            .finish()
            .unwrap_err();
        assert_eq!(
            err,
            TopologyError::UnknownCrossCutting {
                tag: "sizet32".into(),
                node: "leafA".into()
            }
        );
    }

    #[test]
    fn test_cross_cutting_target_must_be_family() {
        let err = scenario()
            .cross_cutting("leafA", ["leafB"])
            .finish()
            .unwrap_err();
        assert_eq!(err, TopologyError::LeafCrossCutting { tag: "leafA".into() });
        assert!(err.to_string().contains("must name a family"));
    }

    #[test]
    fn test_cross_cutting_cycle() {
        let err = scenario()
            .cross_cutting("sizet64", ["native"])
            .finish()
            .unwrap_err();
        assert!(matches!(err, TopologyError::Cycle(_)));
    }

    #[test]
    fn test_duplicate() {
        let err = scenario().leaf("leafA", "linux").finish().unwrap_err();
        assert_eq!(err, TopologyError::Duplicate("leafA".into()));
    }
}
