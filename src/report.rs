use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8PathBuf;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::core::ArcStr;
use crate::error::{ReportError, ResolveError};
use crate::graph::{SourceSet, SourceSetGraph};
use crate::topology::Dependency;

/// Everything the compiler driver needs to know about a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResolution {
    pub target: ArcStr,
    /// MAIN source sets in merge order, ancestors first.
    pub main: Vec<ArcStr>,
    /// TEST source sets in merge order, if the target declares tests.
    pub test: Option<Vec<ArcStr>>,
    /// Lookup order for names declared by more than one source set.
    pub precedence: Vec<ArcStr>,
    /// Source directories of `main`, flattened in merge order.
    pub dirs: Vec<Utf8PathBuf>,
    /// Declared dependencies of `main` in merge order, without repeats.
    pub dependencies: Vec<Dependency>,
    /// Dependencies of the test compilation, MAIN ones included.
    pub test_dependencies: Vec<Dependency>,
    pub opt_ins: Vec<ArcStr>,
    /// Compiler options; the nearest source set wins.
    pub options: BTreeMap<ArcStr, ArcStr>,
}

impl TargetResolution {
    /// The source set whose declaration wins, given a predicate telling
    /// which source sets declare the name.
    pub fn resolve<F>(&self, mut declares: F) -> Option<&ArcStr>
    where
        F: FnMut(&str) -> bool,
    {
        self.precedence.iter().find(|id| declares(id))
    }
}

/// The validated, immutable result of resolution, one entry per active
/// target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    targets: BTreeMap<ArcStr, TargetResolution>,
}

impl Report {
    pub fn get(&self, target: &str) -> Option<&TargetResolution> {
        self.targets.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetResolution> {
        self.targets.values()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.targets.contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>, ReportError> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer)?;
        Ok(buffer)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, ReportError> {
        Ok(ciborium::from_reader(bytes)?)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for resolution in self.targets.values() {
            writeln!(f, "{}: {}", resolution.target, resolution.main.join(" -> "))?;
        }
        Ok(())
    }
}

/// Walks the pruned graph and produces a [`Report`].
///
/// Fails when a retained source set still points at a pruned parent, or
/// when a target cannot reach the root. Both mean the compiler driver must
/// not be started.
pub fn validate(graph: &SourceSetGraph) -> Result<Report, ResolveError> {
    for edge in graph.graph.edge_references() {
        let (node, parent) = (&graph.graph[edge.source()], &graph.graph[edge.target()]);
        if node.is_active() && !parent.is_active() {
            return Err(ResolveError::DanglingEdge {
                node: node.id.clone(),
                parent: parent.id.clone(),
            });
        }
    }

    let root = graph.root_index();
    let mut targets = BTreeMap::new();

    for leaf in graph.leaves() {
        let orphan = || ResolveError::OrphanLeaf(leaf.id.clone());

        let reaches_root = graph
            .index_of(&leaf.id)
            .is_some_and(|i| graph.closure(i).contains(&root));
        if !graph.root().is_active() || !reaches_root {
            return Err(orphan());
        }

        let ids = |sets: Vec<&SourceSet>| -> Vec<ArcStr> {
            sets.into_iter().map(|set| set.id.clone()).collect()
        };

        let main = graph.merge_order(&leaf.id).map_err(|_| orphan())?;
        let precedence = graph.precedence(&leaf.id).map_err(|_| orphan())?;
        let test = match graph.test_of(&leaf.platform) {
            Some(test) => Some(graph.merge_order(&test.id).map_err(|_| orphan())?),
            None => None,
        };

        let dirs = main.iter().flat_map(|set| set.dirs.iter().cloned()).collect();
        let dependencies = distinct(main.iter().flat_map(|set| &set.deps));
        let test_dependencies = match &test {
            Some(test) => distinct(test.iter().flat_map(|set| &set.deps)),
            None => Vec::new(),
        };
        let opt_ins = distinct(main.iter().flat_map(|set| &set.opt_ins));
        let options = main
            .iter()
            .flat_map(|set| &set.options)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        targets.insert(
            leaf.platform.clone(),
            TargetResolution {
                target: leaf.platform.clone(),
                main: ids(main),
                test: test.map(ids),
                precedence: ids(precedence),
                dirs,
                dependencies,
                test_dependencies,
                opt_ins,
                options,
            },
        );
    }

    tracing::info!(targets = targets.len(), "validated source set graph");

    Ok(Report { targets })
}

/// Keeps the first occurrence of every item.
fn distinct<'a, T>(items: impl IntoIterator<Item = &'a T>) -> Vec<T>
where
    T: PartialEq + Clone + 'a,
{
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::activation::{Flags, prune};
    use crate::graph::Role;
    use crate::topology::{PlatformTopology, Scope, preset};

    fn scenario() -> PlatformTopology {
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
            .tests(["common", "leafA"])
            .cross_cutting("sizet64", ["apple", "linux"])
            .finish()
            .unwrap()
    }

    fn resolve(flags: &[(&str, bool)]) -> Report {
        let mut flags = Flags::from_iter(flags.iter().copied());
        let graph = prune(SourceSetGraph::build(&scenario()).unwrap(), &mut flags);
        validate(&graph).unwrap()
    }

    #[test]
    fn test_all_targets_resolve() {
        let report = resolve(&[("nativeEnabled", true)]);

        assert_eq!(report.len(), 3);
        for target in ["leafA", "leafB"] {
            let main = &report.get(target).unwrap().main;
            assert!(main.iter().any(|id| id.as_ref() == "sizet64Main"));
            assert_eq!(main.first().map(|id| id.as_ref()), Some("commonMain"));
        }

        let leaf_c = report.get("leafC").unwrap();
        assert!(!leaf_c.main.iter().any(|id| id.as_ref() == "sizet64Main"));
        assert_eq!(leaf_c.test, None);
    }

    #[test]
    fn test_merge_order_puts_ancestors_first() {
        let report = resolve(&[]);
        let leaf_a = report.get("leafA").unwrap();

        let position = |id: &str| leaf_a.main.iter().position(|x| x.as_ref() == id).unwrap();
        assert!(position("commonMain") < position("nativeMain"));
        assert!(position("nativeMain") < position("sizet64Main"));
        assert!(position("sizet64Main") < position("appleMain"));
        assert_eq!(leaf_a.main.last().map(|id| id.as_ref()), Some("leafAMain"));

        let test = leaf_a.test.as_ref().unwrap();
        assert_eq!(test.last().map(|id| id.as_ref()), Some("leafATest"));
        assert!(test.iter().any(|id| id.as_ref() == "commonTest"));
    }

    #[test]
    fn test_resolve_prefers_primary_lineage() {
        let report = resolve(&[]);
        let leaf_b = report.get("leafB").unwrap();

        let winner = leaf_b.resolve(|id| id == "sizet64Main" || id == "unixMain");
        assert_eq!(winner.map(|id| id.as_ref()), Some("unixMain"));
    }

    #[test]
    fn test_disabled_native_reports_nothing() {
        let report = resolve(&[("nativeEnabled", false)]);
        assert!(report.is_empty());
    }

    #[test]
    fn test_dangling_edge() {
        let mut graph = SourceSetGraph::build(&scenario()).unwrap();
        graph.deactivate("unixMain");

        assert_eq!(
            validate(&graph).unwrap_err(),
            ResolveError::DanglingEdge {
                node: "appleMain".into(),
                parent: "unixMain".into()
            }
        );
    }

    #[test]
    fn test_orphan_leaf() {
        let mut graph = SourceSetGraph::build(&scenario()).unwrap();
        let keep: HashSet<_> = graph
            .graph
            .node_indices()
            .filter(|&i| graph.graph[i].id.as_ref() != "nativeMain")
            .collect();
        graph.retain(&keep);

        assert_eq!(
            validate(&graph).unwrap_err(),
            ResolveError::OrphanLeaf("leafAMain".into())
        );
    }

    #[test]
    fn test_report_handoff() {
        let mut flags = Flags::from_iter([(preset::JS_ENABLED, false)]);
        let topology = preset::multiplatform().unwrap();
        let graph = prune(SourceSetGraph::build(&topology).unwrap(), &mut flags);
        let report = validate(&graph).unwrap();

        assert!(!report.contains("js"));
        assert_eq!(Report::from_cbor(&report.to_cbor().unwrap()).unwrap(), report);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"linuxX64\""));
        assert!(json.contains("src/hashFunctions/kotlin"));

        let jvm = report.get("jvm").unwrap();
        let notations = |deps: &[Dependency]| -> Vec<String> {
            deps.iter().map(|dep| dep.notation.to_string()).collect()
        };
        assert_eq!(
            notations(&jvm.dependencies),
            [
                "org.jetbrains.kotlin:kotlin-stdlib-common",
                "org.jetbrains.kotlin:kotlin-stdlib-jdk8",
                "org.codehaus.mojo:animal-sniffer-annotations"
            ]
        );
        let test_deps = notations(&jvm.test_dependencies);
        assert!(jvm.dependencies.iter().all(|dep| jvm.test_dependencies.contains(dep)));
        assert!(test_deps.iter().any(|n| n == ":okio-fakefilesystem"));
        assert!(test_deps.iter().any(|n| n == "junit:junit"));
        assert!(!test_deps.iter().any(|n| n == ":okio-nodefilesystem"));
        assert_eq!(jvm.opt_ins, [ArcStr::from("kotlin.RequiresOptIn")]);

        let linux = report.get("linuxX64").unwrap();
        assert_eq!(
            notations(&linux.dependencies),
            ["org.jetbrains.kotlin:kotlin-stdlib-common"]
        );
        assert!(linux.options.is_empty());
    }

    #[test]
    fn test_nearest_option_wins() {
        let topology = PlatformTopology::builder()
            .root("common")
            .family("native", "common")
            .leaf("linuxX64", "native")
            .option("common", "metaInfo", "true")
            .option("native", "sourceMap", "false")
            .option("linuxX64", "sourceMap", "true")
            .dependency("common", Role::Main, Scope::Api, "org.example:core")
            .dependency("native", Role::Main, Scope::Api, "org.example:core")
            .finish()
            .unwrap();
        let mut flags = Flags::new();
        let graph = prune(SourceSetGraph::build(&topology).unwrap(), &mut flags);
        let report = validate(&graph).unwrap();

        let linux = report.get("linuxX64").unwrap();
        assert_eq!(linux.options["sourceMap"].as_ref(), "true");
        assert_eq!(linux.options["metaInfo"].as_ref(), "true");
        assert_eq!(linux.dependencies.len(), 1);
        assert!(linux.test_dependencies.is_empty());
    }

    #[test]
    fn test_display() {
        let report = resolve(&[]);
        let text = report.to_string();

        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("leafC: commonMain -> nativeMain -> mingwMain -> leafCMain"));
    }
}
