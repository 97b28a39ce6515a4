use std::sync::Arc;
use std::time::Instant;

use crate::activation::{self, Flags};
use crate::core::ArcStr;
use crate::error::{ConfigurationFrozenError, FinalizeError, SessionError};
use crate::finalizer::{ArtifactFinalizer, ArtifactHandle, FinalizerHook};
use crate::graph::SourceSetGraph;
use crate::report::{self, Report};
use crate::topology::PlatformTopology;
use crate::utils::as_overhead;

/// Where a build session currently is. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Configuring,
    GraphBuilt,
    Resolved,
    Finalizing,
    Done,
}

/// One resolution run over a topology: flags, graph, report and finalizers
/// in the order the surrounding build has to call them.
///
/// ```rust
/// use eda::{Session, finalizer::bundle, topology::preset};
///
/// let mut session = Session::new(preset::multiplatform().unwrap());
/// session.set_flag(preset::JS_ENABLED, false).unwrap();
/// session.register("jvm", bundle("Export-Package: okio")).unwrap();
/// session.build_graph().unwrap();
///
/// let report = session.resolve().unwrap();
/// assert!(report.get("js").is_none());
/// ```
#[derive(Debug)]
pub struct Session {
    phase: Phase,
    topology: Arc<PlatformTopology>,
    flags: Flags,
    graph: Option<SourceSetGraph>,
    report: Option<Report>,
    finalizer: ArtifactFinalizer,
}

impl Session {
    pub fn new(topology: impl Into<Arc<PlatformTopology>>) -> Self {
        Self {
            phase: Phase::Configuring,
            topology: topology.into(),
            flags: Flags::new(),
            graph: None,
            report: None,
            finalizer: ArtifactFinalizer::new(),
        }
    }

    /// Starts a session with flags that were already collected elsewhere.
    pub fn with_flags(topology: impl Into<Arc<PlatformTopology>>, flags: Flags) -> Self {
        Self {
            flags,
            ..Self::new(topology)
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn topology(&self) -> &PlatformTopology {
        &self.topology
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn graph(&self) -> Option<&SourceSetGraph> {
        self.graph.as_ref()
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    fn require(&self, operation: &'static str, allowed: &[Phase]) -> Result<(), SessionError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SessionError::Phase {
                operation,
                actual: self.phase,
            })
        }
    }

    fn advance(&mut self, phase: Phase) {
        if phase != self.phase {
            tracing::info!(from = ?self.phase, to = ?phase, "session phase");
            self.phase = phase;
        }
    }

    pub fn set_flag(&mut self, name: impl Into<ArcStr>, value: bool) -> Result<(), SessionError> {
        Ok(self.flags.set_flag(name, value)?)
    }

    pub fn build_graph(&mut self) -> Result<&SourceSetGraph, SessionError> {
        self.require("build graph", &[Phase::Configuring])?;

        let s = Instant::now();
        let graph = SourceSetGraph::build(&self.topology)?;
        tracing::info!("built {} source sets {}", graph.len(), as_overhead(s));

        self.advance(Phase::GraphBuilt);
        Ok(self.graph.insert(graph))
    }

    pub fn depends_on(&mut self, child: &str, parent: &str) -> Result<(), SessionError> {
        if self.phase >= Phase::Resolved {
            return Err(ConfigurationFrozenError::new(format!(
                "add edge '{child}' -> '{parent}'"
            ))
            .into());
        }

        match &mut self.graph {
            Some(graph) => Ok(graph.depends_on(child, parent)?),
            None => Err(SessionError::Phase {
                operation: "add edge",
                actual: self.phase,
            }),
        }
    }

    /// Prunes the graph with the current flags and validates the result.
    /// Flags and graph are read-only from here on.
    pub fn resolve(&mut self) -> Result<&Report, SessionError> {
        self.require("resolve", &[Phase::GraphBuilt])?;

        let Some(graph) = self.graph.take() else {
            return Err(SessionError::Phase {
                operation: "resolve",
                actual: self.phase,
            });
        };

        let s = Instant::now();
        let graph = self.graph.insert(activation::prune(graph, &mut self.flags));
        let report = report::validate(graph)?;
        tracing::info!("resolved {} targets {}", report.len(), as_overhead(s));

        self.finalizer.bind(&report);
        self.advance(Phase::Resolved);
        Ok(self.report.insert(report))
    }

    /// Hooks may be registered up until finalization starts. Hooks for
    /// targets that get pruned are dropped on [`Session::resolve`].
    pub fn register(
        &mut self,
        target: impl Into<ArcStr>,
        hook: FinalizerHook,
    ) -> Result<(), SessionError> {
        self.require(
            "register hook",
            &[Phase::Configuring, Phase::GraphBuilt, Phase::Resolved],
        )?;
        Ok(self.finalizer.register(target, hook)?)
    }

    pub fn finalize(
        &mut self,
        target: &str,
        artifact: ArtifactHandle,
    ) -> Result<ArtifactHandle, SessionError> {
        self.require("finalize", &[Phase::Resolved, Phase::Finalizing])?;
        self.advance(Phase::Finalizing);
        Ok(self.finalizer.finalize(target, artifact)?)
    }

    pub fn finalize_all(
        &mut self,
        artifacts: Vec<ArtifactHandle>,
    ) -> Result<Vec<(ArcStr, Result<ArtifactHandle, FinalizeError>)>, SessionError> {
        self.require("finalize", &[Phase::Resolved, Phase::Finalizing])?;
        self.advance(Phase::Finalizing);
        Ok(self.finalizer.finalize_all(artifacts))
    }

    pub fn finish(&mut self) -> Result<(), SessionError> {
        self.require("finish", &[Phase::Resolved, Phase::Finalizing])?;
        self.advance(Phase::Done);
        Ok(())
    }
}
