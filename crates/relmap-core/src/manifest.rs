//! Version extraction from Cargo manifests and lockfiles.

use serde::Deserialize;

use crate::source::VersionMap;

/// `package.version` of a `Cargo.toml`.
///
/// Returns `None` for unparsable manifests and for workspace-inherited
/// versions (`version.workspace = true`), which carry no version string.
pub fn package_version(manifest: &str) -> Option<String> {
    let value: toml::Value = toml::from_str(manifest).ok()?;
    value
        .get("package")?
        .get("version")?
        .as_str()
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct Lockfile {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

#[derive(Debug, Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
}

/// Versions of the `tracked` packages pinned in a `Cargo.lock`.
///
/// When a package is locked at several versions the last entry in lock order
/// wins. Unparsable lockfiles yield an empty map.
pub fn locked_versions(lockfile: &str, tracked: &[String]) -> VersionMap {
    let parsed: Lockfile = match toml::from_str(lockfile) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse lockfile");
            return VersionMap::new();
        }
    };

    let mut versions = VersionMap::new();
    for pkg in parsed.package {
        if tracked.iter().any(|t| t == &pkg.name) {
            versions.insert(pkg.name, pkg.version);
        }
    }
    versions
}
