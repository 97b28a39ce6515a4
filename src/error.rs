use std::borrow::Cow;

pub use anyhow::Error as HookFailure;
use thiserror::Error;

use crate::core::ArcStr;
use crate::session::Phase;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Platform '{0}' is declared more than once")]
    Duplicate(ArcStr),

    #[error("Platform '{0}' is referenced but never declared")]
    UnknownNode(ArcStr),

    #[error("Topology has no root family")]
    MissingRoot,

    #[error("Topology has more than one root: '{0}' and '{1}'")]
    MultipleRoots(ArcStr, ArcStr),

    #[error("Platform '{node}' names '{parent}' as its parent, but '{parent}' is a leaf")]
    LeafParent { node: ArcStr, parent: ArcStr },

    #[error("Platform '{0}' has no primary path to the root")]
    NoPathToRoot(ArcStr),

    #[error("Cross-cutting tag '{tag}' on '{node}' targets no declared family")]
    UnknownCrossCutting { tag: ArcStr, node: ArcStr },

    #[error("Cross-cutting tag '{tag}' names a leaf platform, tags must name a family")]
    LeafCrossCutting { tag: ArcStr },

    #[error("Inheritance cycle through platform '{0}'")]
    Cycle(ArcStr),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Adding '{child}' -> '{parent}' would create a cycle")]
pub struct CycleError {
    pub child: ArcStr,
    pub parent: ArcStr,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Configuration is frozen, cannot {operation}")]
pub struct ConfigurationFrozenError {
    pub operation: Cow<'static, str>,
}

impl ConfigurationFrozenError {
    pub(crate) fn new(operation: impl Into<Cow<'static, str>>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Frozen(#[from] ConfigurationFrozenError),

    #[error("Source set '{0}' does not exist or was pruned")]
    UnknownSourceSet(ArcStr),

    #[error("Source set '{child}' cannot depend on '{parent}', roles differ")]
    RoleMismatch { child: ArcStr, parent: ArcStr },

    #[error("Source set '{child}' cannot depend on '{parent}', which belongs to a leaf")]
    LeafParent { child: ArcStr, parent: ArcStr },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Leaf source set '{0}' cannot reach the root")]
    OrphanLeaf(ArcStr),

    #[error("Source set '{node}' references removed parent '{parent}'")]
    DanglingEdge { node: ArcStr, parent: ArcStr },
}

/// A finalizer hook failed. The remaining hooks for `target` were skipped.
#[derive(Debug, Error)]
#[error("Target '{target}', hook '{hook}':\n{cause}")]
pub struct FinalizationError {
    pub target: ArcStr,
    pub hook: Cow<'static, str>,
    pub cause: HookFailure,
}

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("Target '{0}' is not a leaf of the resolved graph")]
    UnknownTarget(ArcStr),

    #[error("Artifact of target '{artifact}' was handed to the finalizer of '{target}'")]
    TargetMismatch { target: ArcStr, artifact: ArcStr },

    #[error("Artifact of target '{0}' has already been finalized")]
    AlreadyFinalized(ArcStr),

    #[error(transparent)]
    Hook(#[from] FinalizationError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read configuration file.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't parse topology declaration.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid flag on line {line}: '{text}'")]
    Property { line: usize, text: String },

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Couldn't encode report.\n{0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("Couldn't decode report.\n{0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Operation '{operation}' is not allowed in phase {actual:?}")]
    Phase {
        operation: &'static str,
        actual: Phase,
    },

    #[error(transparent)]
    Frozen(#[from] ConfigurationFrozenError),

    #[error("Error while building the source set graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while resolving targets:\n{0}")]
    Resolve(#[from] ResolveError),

    #[error("Error while finalizing artifacts:\n{0}")]
    Finalize(#[from] FinalizeError),
}
