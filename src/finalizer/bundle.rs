use anyhow::bail;

use crate::finalizer::{ArtifactHandle, FinalizerHook, HookResult};

const MANIFEST_VERSION: &str = "Bundle-ManifestVersion";

/// The packaging hook. Turns bnd-style instructions into manifest metadata
/// of the artifact, e.g.
///
/// ```text
/// Export-Package: okio
/// Automatic-Module-Name: okio
/// Bundle-SymbolicName: com.squareup.okio
/// ```
///
/// Instructions are parsed when the hook runs, so a malformed line fails the
/// finalization of the target instead of the registration.
pub fn bundle(instructions: impl Into<String>) -> FinalizerHook {
    let instructions = instructions.into();

    FinalizerHook::new("bundle", move |mut artifact: ArtifactHandle| {
        for (key, value) in parse(&instructions)? {
            artifact.metadata.insert(key, value);
        }

        artifact
            .metadata
            .entry(MANIFEST_VERSION.into())
            .or_insert_with(|| "2".into());

        Ok(artifact)
    })
}

fn parse(instructions: &str) -> HookResult<Vec<(String, String)>> {
    let mut entries = Vec::new();

    for (n, line) in instructions.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                entries.push((key.trim().to_string(), value.trim().to_string()));
            }
            _ => bail!("malformed bundle instruction on line {}: '{}'", n + 1, line),
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FinalizeError;
    use crate::finalizer::ArtifactFinalizer;

    #[test]
    fn test_bundle_writes_manifest() {
        let mut finalizer = ArtifactFinalizer::new();
        finalizer
            .register(
                "jvm",
                bundle(
                    r#"
                    Export-Package: okio
                    Automatic-Module-Name: okio
                    Bundle-SymbolicName: com.squareup.okio
                    "#,
                ),
            )
            .unwrap();

        let artifact = ArtifactHandle::from_bytes("jvm", "build/libs/okio-jvm.jar", b"classes");
        let digest = artifact.digest;
        let out = finalizer.finalize("jvm", artifact).unwrap();

        assert_eq!(out.metadata["Export-Package"], "okio");
        assert_eq!(out.metadata["Bundle-SymbolicName"], "com.squareup.okio");
        assert_eq!(out.metadata[MANIFEST_VERSION], "2");
        assert_eq!(out.digest, digest);
    }

    #[test]
    fn test_bundle_rejects_malformed_line() {
        let mut finalizer = ArtifactFinalizer::new();
        finalizer
            .register("jvm", bundle("Export-Package okio"))
            .unwrap();

        let artifact = ArtifactHandle::from_bytes("jvm", "okio.jar", b"classes");
        let err = finalizer.finalize("jvm", artifact).unwrap_err();

        match err {
            FinalizeError::Hook(err) => {
                assert_eq!(err.hook, "bundle");
                assert!(err.cause.to_string().contains("line 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_skips_comments() {
        let entries = parse("# exported\nExport-Package: okio, okio.internal\n").unwrap();
        assert_eq!(
            entries,
            [("Export-Package".to_string(), "okio, okio.internal".to_string())]
        );
    }
}
