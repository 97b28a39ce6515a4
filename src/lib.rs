#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod activation;
pub mod config;
mod core;
pub mod error;
pub mod finalizer;
pub mod graph;
#[cfg(feature = "logging")]
mod logging;
pub mod report;
mod session;
pub mod topology;
mod utils;

pub use crate::activation::{Flags, prune};
pub use crate::core::{ArcStr, Hash32};
pub use crate::error::*;
pub use crate::finalizer::{ArtifactFinalizer, ArtifactHandle, FinalizerHook, HookResult};
pub use crate::graph::{Inherit, Role, SourceSet, SourceSetGraph};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::report::{Report, TargetResolution, validate};
pub use crate::session::{Phase, Session};
pub use crate::topology::{
    CrossCuttingTag, Dependency, Kind, PlatformNode, PlatformTopology, Scope, TopologyBuilder,
};
