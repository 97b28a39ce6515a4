use crate::error::TopologyError;
use crate::graph::Role;
use crate::topology::{PlatformTopology, Scope, TopologyBuilder};

/// Activation flag governing the JavaScript target.
pub const JS_ENABLED: &str = "jsEnabled";
/// Activation flag governing every native target.
pub const NATIVE_ENABLED: &str = "nativeEnabled";

const APPLE_64: [&str; 5] = ["iosX64", "iosArm64", "macosX64", "tvosArm64", "tvosX64"];
// size_t is 32-bit on every watchOS architecture, arm64 included.
const APPLE_32: [&str; 3] = ["watchosArm32", "watchosArm64", "watchosX86"];

const KOTLIN: &str = "org.jetbrains.kotlin";

/// `(node, role, scope, artifact)`; artifacts without a group are Kotlin's.
const DEPENDENCIES: &[(&str, Role, Scope, &str)] = &[
    ("common", Role::Main, Scope::Api, "kotlin-stdlib-common"),
    ("common", Role::Test, Scope::Implementation, "kotlin-test-common"),
    ("common", Role::Test, Scope::Implementation, "kotlin-test-annotations-common"),
    ("common", Role::Test, Scope::Implementation, "org.jetbrains.kotlinx:kotlinx-datetime"),
    ("common", Role::Test, Scope::Implementation, ":okio-fakefilesystem"),
    ("jvm", Role::Main, Scope::Api, "kotlin-stdlib-jdk8"),
    ("jvm", Role::Main, Scope::CompileOnly, "org.codehaus.mojo:animal-sniffer-annotations"),
    ("jvm", Role::Test, Scope::Implementation, "junit:junit"),
    ("jvm", Role::Test, Scope::Implementation, "org.assertj:assertj-core"),
    ("jvm", Role::Test, Scope::Implementation, "kotlin-test-junit"),
    ("js", Role::Main, Scope::Api, "kotlin-stdlib-js"),
    ("js", Role::Test, Scope::Implementation, "kotlin-test-js"),
    ("js", Role::Test, Scope::Implementation, ":okio-nodefilesystem"),
];

fn dependencies(mut builder: TopologyBuilder) -> TopologyBuilder {
    for &(node, role, scope, artifact) in DEPENDENCIES {
        let notation = if artifact.contains(':') {
            artifact.to_string()
        } else {
            format!("{KOTLIN}:{artifact}")
        };
        builder = builder.dependency(node, role, scope, notation);
    }
    builder
}

/// The multiplatform hierarchy of a typical I/O library:
///
/// ```text
///   common
///   |-- jvm
///   |-- js
///   '-- native
///       |- unix
///       |   |-- apple
///       |   |   |-- iosArm64, iosX64, macosX64, tvosArm64, tvosX64
///       |   |   '-- watchosArm32, watchosArm64, watchosX86
///       |   '-- linux
///       |       '-- linuxX64
///       '-- mingw
///           '-- mingwX64
/// ```
///
/// Besides the tree, `sizet32`/`sizet64` split the native targets by pointer
/// width, and `nonJvm`/`nonJs` hold code shared by every platform except one.
/// The hash functions ship as main source on every non-JVM platform and as
/// test source on the JVM.
///
/// Every source set opts into `kotlin.RequiresOptIn`, the JavaScript target
/// compiles to a UMD module with source maps, and the usual standard library
/// and test dependencies are declared on `common`, `jvm` and `js`.
pub fn multiplatform() -> Result<PlatformTopology, TopologyError> {
    dependencies(PlatformTopology::builder())
        .root("common")
        .family("nonJvm", "common")
        .family("nonJs", "common")
        .leaf("jvm", "common")
        .leaf("js", "common")
        .family("native", "common")
        .family("sizet32", "native")
        .family("sizet64", "native")
        .family("unix", "native")
        .family("apple", "unix")
        .leaves(APPLE_64, "apple")
        .leaves(APPLE_32, "apple")
        .family("linux", "unix")
        .leaf("linuxX64", "linux")
        .family("mingw", "native")
        .leaf("mingwX64", "mingw")
        .flag("js", JS_ENABLED)
        .flag("native", NATIVE_ENABLED)
        .tests(["common", "jvm", "js", "native", "apple"])
        .tests(APPLE_64)
        .tests(APPLE_32)
        .tests(["linuxX64", "mingwX64"])
        .source_dir("nonJvm", Role::Main, "src/hashFunctions/kotlin")
        .source_dir("jvm", Role::Test, "src/hashFunctions/kotlin")
        .cross_cutting("nonJs", ["jvm", "native"])
        .cross_cutting("nonJvm", ["js", "native"])
        .cross_cutting("sizet32", APPLE_32)
        .cross_cutting("sizet64", APPLE_64)
        .cross_cutting("sizet64", ["linuxX64"])
        .opt_in("kotlin.RequiresOptIn")
        .option("js", "moduleKind", "umd")
        .option("js", "sourceMap", "true")
        .option("js", "metaInfo", "true")
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Dependency;

    #[test]
    fn test_multiplatform_is_valid() {
        let topology = multiplatform().unwrap();

        assert_eq!(topology.leaves().count(), 12);
        assert_eq!(topology.root().id.as_ref(), "common");
    }

    #[test]
    fn test_watchos_is_32_bit() {
        let topology = multiplatform().unwrap();

        for leaf in APPLE_32 {
            let tags: Vec<_> = topology
                .cross_cutting_parents(leaf)
                .into_iter()
                .map(|(tag, _)| tag.name.to_string())
                .collect();
            assert_eq!(tags, ["sizet32"]);
        }
    }

    #[test]
    fn test_native_shares_non_jvm_and_non_js() {
        let topology = multiplatform().unwrap();
        let tags: Vec<_> = topology
            .cross_cutting_parents("native")
            .into_iter()
            .map(|(tag, _)| tag.name.to_string())
            .collect();

        assert_eq!(tags, ["nonJs", "nonJvm"]);
    }

    #[test]
    fn test_declared_dependencies() {
        let topology = multiplatform().unwrap();
        let common = topology.root();

        assert_eq!(
            common.deps[0],
            (
                Role::Main,
                Dependency::new(Scope::Api, "org.jetbrains.kotlin:kotlin-stdlib-common")
            )
        );
        let projects: Vec<_> = topology
            .nodes()
            .flat_map(|node| &node.deps)
            .filter(|(_, dep)| dep.is_project())
            .map(|(role, dep)| (*role, dep.notation.to_string()))
            .collect();
        assert_eq!(
            projects,
            [
                (Role::Test, ":okio-fakefilesystem".to_string()),
                (Role::Test, ":okio-nodefilesystem".to_string())
            ]
        );

        let jvm = topology.get("jvm").unwrap();
        let sniffer = Dependency::new(
            Scope::CompileOnly,
            "org.codehaus.mojo:animal-sniffer-annotations",
        );
        assert!(jvm.deps.contains(&(Role::Main, sniffer)));
        assert_eq!(topology.get("js").unwrap().options.len(), 3);
    }
}
