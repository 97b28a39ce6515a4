//! Post-build hooks applied to a target's artifact before publication.
//!
//! Hooks for one target form a pipeline: each receives the artifact produced
//! by the previous hook and they never overlap. Different targets share
//! nothing, so [`ArtifactFinalizer::finalize_all`] runs them in parallel and
//! a failure in one target leaves the others untouched.

mod bundle;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};

use camino::Utf8PathBuf;
use indicatif::ProgressStyle;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{ArcStr, Hash32};
use crate::error::{FinalizationError, FinalizeError};
use crate::report::Report;

pub use bundle::bundle;

/// Result returned by a single hook.
pub type HookResult<T> = anyhow::Result<T>;

type HookFnPtr = Arc<dyn Fn(ArtifactHandle) -> HookResult<ArtifactHandle> + Send + Sync>;

static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("#>-")
});

/// Reference to a build artifact produced by the compiler driver.
///
/// The `digest` fingerprints the primary compiled content. Hooks are free to
/// rewrite `metadata`, which ends up in the packaging manifest, but they are
/// expected to leave the digest alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    pub target: ArcStr,
    pub path: Utf8PathBuf,
    pub digest: Hash32,
    pub metadata: BTreeMap<String, String>,
    finalized: bool,
}

impl ArtifactHandle {
    pub fn new(target: impl Into<ArcStr>, path: impl Into<Utf8PathBuf>, digest: Hash32) -> Self {
        Self {
            target: target.into(),
            path: path.into(),
            digest,
            metadata: BTreeMap::new(),
            finalized: false,
        }
    }

    pub fn from_bytes(
        target: impl Into<ArcStr>,
        path: impl Into<Utf8PathBuf>,
        content: impl AsRef<[u8]>,
    ) -> Self {
        Self::new(target, path, Hash32::hash(content))
    }

    pub fn from_file(
        target: impl Into<ArcStr>,
        path: impl Into<Utf8PathBuf>,
    ) -> std::io::Result<Self> {
        let path = path.into();
        let digest = Hash32::hash_file(&path)?;
        Ok(Self::new(target, path, digest))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// A named transformation over an artifact.
#[derive(Clone)]
pub struct FinalizerHook {
    name: Cow<'static, str>,
    func: HookFnPtr,
}

impl FinalizerHook {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(ArtifactHandle) -> HookResult<ArtifactHandle> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for FinalizerHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FinalizerHook({})", self.name)
    }
}

#[derive(Debug, Default)]
pub struct ArtifactFinalizer {
    hooks: HashMap<ArcStr, Vec<FinalizerHook>>,
    /// When bound to a report, only its targets accept hooks.
    targets: Option<HashSet<ArcStr>>,
}

impl ArtifactFinalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A finalizer that only accepts the targets resolved in `report`.
    pub fn for_report(report: &Report) -> Self {
        let mut finalizer = Self::default();
        finalizer.bind(report);
        finalizer
    }

    /// Restricts the finalizer to the targets of `report`, dropping hooks
    /// registered for targets that did not survive.
    pub(crate) fn bind(&mut self, report: &Report) {
        let targets: HashSet<ArcStr> = report.targets().map(|t| t.target.clone()).collect();

        self.hooks.retain(|target, hooks| {
            let keep = targets.contains(target);
            if !keep {
                tracing::debug!(
                    platform = %target,
                    hooks = hooks.len(),
                    "dropped hooks of pruned target"
                );
            }
            keep
        });

        self.targets = Some(targets);
    }

    fn check_target(&self, target: &str) -> Result<(), FinalizeError> {
        match &self.targets {
            Some(targets) if !targets.contains(target) => {
                Err(FinalizeError::UnknownTarget(target.into()))
            }
            _ => Ok(()),
        }
    }

    /// Appends `hook` to the pipeline of `target`.
    pub fn register(
        &mut self,
        target: impl Into<ArcStr>,
        hook: FinalizerHook,
    ) -> Result<(), FinalizeError> {
        let target = target.into();
        self.check_target(&target)?;

        tracing::debug!(platform = %target, hook = %hook.name, "registered finalizer hook");
        self.hooks.entry(target).or_default().push(hook);
        Ok(())
    }

    pub fn hooks(&self, target: &str) -> &[FinalizerHook] {
        self.hooks.get(target).map(Vec::as_slice).unwrap_or_default()
    }

    /// Runs every hook of `target` in registration order. The first failing
    /// hook stops the pipeline.
    pub fn finalize(
        &self,
        target: &str,
        artifact: ArtifactHandle,
    ) -> Result<ArtifactHandle, FinalizeError> {
        self.check_target(target)?;

        if artifact.target.as_ref() != target {
            return Err(FinalizeError::TargetMismatch {
                target: target.into(),
                artifact: artifact.target,
            });
        }

        if artifact.finalized {
            return Err(FinalizeError::AlreadyFinalized(artifact.target));
        }

        let span = tracing::span!(Level::INFO, "finalize", platform = target);
        let _enter = span.enter();

        let mut current = artifact;

        for hook in self.hooks(target) {
            let digest = current.digest;

            current = (hook.func)(current).map_err(|cause| FinalizationError {
                target: target.into(),
                hook: hook.name.clone(),
                cause,
            })?;

            if current.digest != digest {
                tracing::warn!(
                    hook = %hook.name,
                    "hook changed the primary content of the artifact"
                );
            }
            tracing::debug!(hook = %hook.name, "finished hook");
        }

        current.finalized = true;
        Ok(current)
    }

    /// Finalizes many artifacts, keyed by their own target. Targets run in
    /// parallel; artifacts sharing a target go through its pipeline one
    /// after another. The results keep the order of `artifacts`.
    pub fn finalize_all(
        &self,
        artifacts: Vec<ArtifactHandle>,
    ) -> Vec<(ArcStr, Result<ArtifactHandle, FinalizeError>)> {
        let span = tracing::span!(Level::INFO, "finalizing");
        span.pb_set_length(artifacts.len() as u64);
        span.pb_set_style(&PROGRESS_STYLE);
        span.pb_set_message("Finalizing artifacts...");
        let _enter = span.enter();

        let mut groups: Vec<(ArcStr, Vec<(usize, ArtifactHandle)>)> = Vec::new();
        for (n, artifact) in artifacts.into_iter().enumerate() {
            match groups.iter_mut().find(|(target, _)| *target == artifact.target) {
                Some((_, group)) => group.push((n, artifact)),
                None => groups.push((artifact.target.clone(), vec![(n, artifact)])),
            }
        }

        let mut results: Vec<_> = groups
            .into_par_iter()
            .map(|(target, group)| {
                group
                    .into_iter()
                    .map(|(n, artifact)| {
                        let result = self.finalize(&target, artifact);

                        if let Err(e) = &result {
                            tracing::error!(platform = %target, "{e}");
                        }

                        span.pb_inc(1);
                        (n, target.clone(), result)
                    })
                    .collect::<Vec<_>>()
            })
            .flatten()
            .collect();

        results.sort_by_key(|(n, _, _)| *n);
        let results: Vec<_> = results
            .into_iter()
            .map(|(_, target, result)| (target, result))
            .collect();

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        tracing::info!(
            finalized = results.len() - failed,
            failed,
            "finalized artifacts"
        );

        results
    }
}
