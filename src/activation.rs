//! Enabling and disabling whole target families.
//!
//! Activation never changes how the graph is built. [`prune`] runs over the
//! already complete graph, drops every leaf whose governing flag is off,
//! and then drops every family nobody needs anymore. A family survives as
//! long as at least one surviving leaf inherits from it, through the tree
//! or through a cross-cutting tag.

use std::collections::BTreeMap;

use tracing::Level;

use crate::core::ArcStr;
use crate::error::ConfigurationFrozenError;
use crate::graph::SourceSetGraph;

/// Named boolean switches supplied by the surrounding build invocation.
///
/// Flags can be written until the first [`prune`], after which they are
/// read-only. A flag that was never set reads as enabled.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    values: BTreeMap<ArcStr, bool>,
    frozen: bool,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_flag(
        &mut self,
        name: impl Into<ArcStr>,
        value: bool,
    ) -> Result<(), ConfigurationFrozenError> {
        let name = name.into();

        if self.frozen {
            return Err(ConfigurationFrozenError::new(format!("set flag '{name}'")));
        }

        tracing::debug!(flag = %name, value, "set activation flag");
        self.values.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.values.get(name).copied()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).unwrap_or(true)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(k, v)| (k.as_ref(), *v))
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }
}

impl<K> FromIterator<(K, bool)> for Flags
where
    K: Into<ArcStr>,
{
    fn from_iter<T: IntoIterator<Item = (K, bool)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            frozen: false,
        }
    }
}

/// Removes every disabled target and every source set left without an
/// active consumer. The root is always kept. Freezes both `flags` and the
/// returned graph.
///
/// Pruning an already pruned graph with the same flags is a no-op.
pub fn prune(mut graph: SourceSetGraph, flags: &mut Flags) -> SourceSetGraph {
    let span = tracing::span!(Level::INFO, "prune");
    let _enter = span.enter();

    flags.freeze();

    let root = graph.root_index();
    let mut keep = graph.closure(root);

    if let Some(test) = graph
        .test_of(&graph.root().platform)
        .and_then(|set| graph.index_of(&set.id))
    {
        keep.extend(graph.closure(test));
    }

    for i in graph.graph.node_indices() {
        let set = &graph.graph[i];
        if !set.active || !set.is_leaf() {
            continue;
        }

        if set.flag.as_deref().is_none_or(|flag| flags.is_enabled(flag)) {
            keep.extend(graph.closure(i));
        }
    }

    let pruned = graph.retain(&keep);

    for id in &pruned {
        tracing::debug!(source_set = %id, "pruned");
    }

    tracing::info!(
        pruned = pruned.len(),
        remaining = graph.len(),
        "pruned source set graph"
    );

    graph.freeze();
    graph
}
