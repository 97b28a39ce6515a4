//! Declarative configuration: topologies from JSON and flags from
//! `gradle.properties`-style files.
//!
//! ```json
//! {
//!   "nodes": [
//!     { "name": "common", "tests": true },
//!     { "name": "native", "parent": "common", "flag": "nativeEnabled" },
//!     { "name": "linuxX64", "parent": "native", "kind": "leaf",
//!       "mainDependencies": [{ "scope": "api", "notation": "org.example:posix" }],
//!       "options": { "sourceMap": "true" } }
//!   ],
//!   "crossCutting": [{ "tag": "sizet64", "consumers": ["linuxX64"] }],
//!   "optIns": ["kotlin.RequiresOptIn"]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::activation::Flags;
use crate::error::{ConfigError, TopologyError};
use crate::graph::Role;
use crate::topology::{Dependency, Kind, PlatformTopology};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeDecl {
    pub name: String,
    /// Primary parent, absent only for the root.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "family")]
    pub kind: Kind,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub tests: bool,
    #[serde(default)]
    pub main_dirs: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub test_dirs: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub main_dependencies: Vec<Dependency>,
    #[serde(default)]
    pub test_dependencies: Vec<Dependency>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn family() -> Kind {
    Kind::Family
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TagDecl {
    pub tag: String,
    pub consumers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TopologyDecl {
    pub nodes: Vec<NodeDecl>,
    #[serde(default)]
    pub cross_cutting: Vec<TagDecl>,
    /// Opt-in annotations for every source set.
    #[serde(default)]
    pub opt_ins: Vec<String>,
}

impl TopologyDecl {
    pub fn into_topology(self) -> Result<PlatformTopology, TopologyError> {
        let mut builder = PlatformTopology::builder();

        for node in self.nodes {
            let name = node.name.as_str();

            builder = match (node.parent.as_deref(), node.kind) {
                (None, Kind::Family) => builder.root(name),
                (None, Kind::Leaf) => return Err(TopologyError::NoPathToRoot(name.into())),
                (Some(parent), Kind::Family) => builder.family(name, parent),
                (Some(parent), Kind::Leaf) => builder.leaf(name, parent),
            };

            if let Some(flag) = node.flag.as_deref() {
                builder = builder.flag(name, flag);
            }
            if node.tests {
                builder = builder.tests([name]);
            }
            for dir in node.main_dirs {
                builder = builder.source_dir(name, Role::Main, dir);
            }
            for dir in node.test_dirs {
                builder = builder.source_dir(name, Role::Test, dir);
            }
            for dep in node.main_dependencies {
                builder = builder.dependency(name, Role::Main, dep.scope, dep.notation);
            }
            for dep in node.test_dependencies {
                builder = builder.dependency(name, Role::Test, dep.scope, dep.notation);
            }
            for (key, value) in node.options {
                builder = builder.option(name, key, value);
            }
        }

        for annotation in self.opt_ins {
            builder = builder.opt_in(annotation);
        }

        for tag in self.cross_cutting {
            builder = builder.cross_cutting(tag.tag, tag.consumers);
        }

        builder.finish()
    }
}

pub fn parse_topology(json: &str) -> Result<PlatformTopology, ConfigError> {
    let decl: TopologyDecl = serde_json::from_str(json)?;
    Ok(decl.into_topology()?)
}

pub fn load_topology(path: impl AsRef<Utf8Path>) -> Result<PlatformTopology, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    tracing::debug!(%path, "loaded topology declaration");
    parse_topology(&text)
}

impl Flags {
    /// Parses `key=value` (or `key: value`) lines. Blank lines and lines
    /// starting with `#` or `!` are skipped; values must be `true` or `false`.
    pub fn from_properties(text: &str) -> Result<Self, ConfigError> {
        let mut flags = Flags::new();

        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let invalid = || ConfigError::Property {
                line: n + 1,
                text: line.to_string(),
            };

            let (key, value) = line
                .split_once(['=', ':'])
                .map(|(k, v)| (k.trim(), v.trim()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(invalid)?;

            let value = match value.to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => return Err(invalid()),
            };

            // A fresh map is never frozen.
            flags.set_flag(key, value).map_err(|_| invalid())?;
        }

        Ok(flags)
    }

    pub fn load_properties(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        Self::from_properties(&fs::read_to_string(path.as_ref())?)
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;
    use crate::core::ArcStr;
    use crate::graph::SourceSetGraph;
    use crate::topology::Scope;

    const SCENARIO: &str = r#"{
        "nodes": [
            { "name": "common", "tests": true },
            { "name": "native", "parent": "common", "flag": "nativeEnabled" },
            { "name": "sizet64", "parent": "native" },
            { "name": "linux", "parent": "native" },
            { "name": "linuxX64", "parent": "linux", "kind": "leaf", "tests": true,
              "mainDirs": ["src/posix/kotlin"],
              "mainDependencies": [
                  { "scope": "compileOnly", "notation": "org.example:annotations" }
              ],
              "testDependencies": [{ "scope": "implementation", "notation": ":fakes" }],
              "options": { "sourceMap": "true" } }
        ],
        "crossCutting": [{ "tag": "sizet64", "consumers": ["linuxX64"] }],
        "optIns": ["kotlin.RequiresOptIn"]
    }"#;

    #[test]
    fn test_parse_topology() {
        let topology = parse_topology(SCENARIO).unwrap();

        assert_eq!(topology.root().id.as_ref(), "common");
        assert_eq!(topology.leaves().count(), 1);
        assert_eq!(
            topology.governing_flag("linuxX64").map(|f| f.as_ref()),
            Some("nativeEnabled")
        );

        let graph = SourceSetGraph::build(&topology).unwrap();
        let main = graph.main_of("linuxX64").unwrap();
        assert_eq!(main.dirs.last(), Some(&Utf8PathBuf::from("src/posix/kotlin")));
        assert!(graph.test_of("linuxX64").is_some());
        assert_eq!(
            main.deps,
            [Dependency::new(Scope::CompileOnly, "org.example:annotations")]
        );
        assert!(graph.test_of("linuxX64").unwrap().deps[0].is_project());
        assert_eq!(main.options["sourceMap"].as_ref(), "true");
        assert_eq!(topology.opt_ins(), [ArcStr::from("kotlin.RequiresOptIn")]);
    }

    #[test]
    fn test_parse_topology_reports_topology_errors() {
        let json = r#"{ "nodes": [{ "name": "common" }, { "name": "x", "parent": "nope" }] }"#;
        assert!(matches!(
            parse_topology(json),
            Err(ConfigError::Topology(TopologyError::UnknownNode(_)))
        ));
    }

    #[test]
    fn test_parse_topology_rejects_unknown_fields() {
        let json = r#"{ "nodes": [{ "name": "common", "color": "red" }] }"#;
        assert!(matches!(parse_topology(json), Err(ConfigError::Json(_))));
    }

    fn temp_file(name: &str, content: &str) -> Utf8PathBuf {
        let path = env::temp_dir().join(format!("eda-{}-{name}", std::process::id()));
        let path = Utf8PathBuf::from_path_buf(path).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_topology() {
        let path = temp_file("topology.json", SCENARIO);
        let topology = load_topology(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(topology.len(), 5);
        assert!(matches!(load_topology(&path), Err(ConfigError::FileSystem(_))));
    }

    #[test]
    fn test_load_properties() {
        let path = temp_file("gradle.properties", "jsEnabled=false\n");
        let flags = Flags::load_properties(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(flags.get("jsEnabled"), Some(false));
        assert_eq!(flags.get("nativeEnabled"), None);
    }

    #[test]
    fn test_flags_from_properties() {
        let flags = Flags::from_properties(
            "# build switches\njsEnabled=false\n! legacy comment\nnativeEnabled : TRUE\n",
        )
        .unwrap();

        assert_eq!(flags.get("jsEnabled"), Some(false));
        assert_eq!(flags.get("nativeEnabled"), Some(true));
        assert!(!flags.is_frozen());
    }

    #[test]
    fn test_flags_from_properties_rejects_garbage() {
        let err = Flags::from_properties("jsEnabled=false\nnativeEnabled=maybe").unwrap_err();
        match err {
            ConfigError::Property { line, text } => {
                assert_eq!(line, 2);
                assert_eq!(text, "nativeEnabled=maybe");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
