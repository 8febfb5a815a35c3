use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Protocol line an older engine installation may still speak; used when no
/// installation matches the host's own protocol major.
pub const FALLBACK_COMPAT_MAJOR: u64 = 2;

/// Manifest every engine installation carries at its root.
const INSTALL_MANIFEST: &str = "engine.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for EngineVersion {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = input.trim().splitn(3, '.');
        let mut next = |name: &str| -> Result<u64, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing {name} component in '{input}'"))?
                .parse::<u64>()
                .map_err(|e| format!("bad {name} component in '{input}': {e}"))
        };
        Ok(Self {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
        })
    }
}

/// Where an engine installation was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOrigin {
    /// Pointed at directly via `DROVER_ENGINE_PATH`.
    EnvOverride,
    /// Found under the user's data directory.
    UserInstall,
    /// Found under a system-wide library directory.
    System,
}

impl fmt::Display for DiscoveryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryOrigin::EnvOverride => write!(f, "env-override"),
            DiscoveryOrigin::UserInstall => write!(f, "user-install"),
            DiscoveryOrigin::System => write!(f, "system"),
        }
    }
}

/// One discovered engine installation (toolset directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInstall {
    pub version: EngineVersion,
    /// The installation directory itself; worker hosts live under
    /// `<path>/bin/`.
    pub path: PathBuf,
    pub origin: DiscoveryOrigin,
    /// The search root the installation was found under.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InstallManifest {
    version: String,
}

/// Enumerate engine installations from the standard search roots, ordered by
/// origin precedence and, within a root, newest version first.
pub fn discover_installs() -> Vec<EngineInstall> {
    discover_installs_under(&default_roots())
}

fn default_roots() -> Vec<(PathBuf, DiscoveryOrigin)> {
    let mut roots = Vec::new();
    if let Ok(path) = std::env::var("DROVER_ENGINE_PATH") {
        if !path.trim().is_empty() {
            roots.push((PathBuf::from(path), DiscoveryOrigin::EnvOverride));
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        roots.push((
            PathBuf::from(home).join(".local/share/drover/engines"),
            DiscoveryOrigin::UserInstall,
        ));
    }
    roots.push((
        PathBuf::from("/usr/lib/drover/engines"),
        DiscoveryOrigin::System,
    ));
    roots.push((
        PathBuf::from("/usr/local/lib/drover/engines"),
        DiscoveryOrigin::System,
    ));
    roots
}

pub(crate) fn discover_installs_under(
    roots: &[(PathBuf, DiscoveryOrigin)],
) -> Vec<EngineInstall> {
    let mut installs = Vec::new();
    for (root, origin) in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        let mut found: Vec<EngineInstall> = entries
            .flatten()
            .filter_map(|entry| read_install(&entry.path(), *origin, root))
            .collect();
        found.sort_by(|a, b| b.version.cmp(&a.version));
        installs.extend(found);
    }
    installs
}

fn read_install(
    path: &Path,
    origin: DiscoveryOrigin,
    root: &Path,
) -> Option<EngineInstall> {
    if !path.is_dir() {
        return None;
    }
    let manifest_path = path.join(INSTALL_MANIFEST);
    let content = match std::fs::read_to_string(&manifest_path) {
        Ok(content) => content,
        Err(e) => {
            debug!("skipping {}: {e}", manifest_path.display());
            return None;
        }
    };
    let manifest: InstallManifest = match toml::from_str(&content) {
        Ok(manifest) => manifest,
        Err(e) => {
            debug!("skipping {}: {e}", manifest_path.display());
            return None;
        }
    };
    let version = match manifest.version.parse::<EngineVersion>() {
        Ok(version) => version,
        Err(e) => {
            debug!("skipping {}: {e}", manifest_path.display());
            return None;
        }
    };
    Some(EngineInstall {
        version,
        path: path.to_path_buf(),
        origin,
        root: root.to_path_buf(),
    })
}

/// Pick the installation to register for this process: the first whose major
/// version matches the host's worker protocol, else the first on the
/// fallback compatibility line. `None` means the operator has to be shown
/// every candidate and the process cannot build.
pub fn select_install(installs: &[EngineInstall]) -> Option<EngineInstall> {
    let host_major = u64::from(drover_engine::PROTOCOL_MAJOR);
    installs
        .iter()
        .find(|install| install.version.major == host_major)
        .or_else(|| {
            installs
                .iter()
                .find(|install| install.version.major == FALLBACK_COMPAT_MAJOR)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_install(root: &Path, dir_name: &str, version: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(INSTALL_MANIFEST),
            format!("version = \"{version}\"\n"),
        )
        .unwrap();
    }

    #[test]
    fn version_parsing() {
        let version: EngineVersion = "3.1.4".parse().unwrap();
        assert_eq!(
            version,
            EngineVersion {
                major: 3,
                minor: 1,
                patch: 4
            }
        );
        assert!("3.1".parse::<EngineVersion>().is_err());
        assert!("a.b.c".parse::<EngineVersion>().is_err());
    }

    #[test]
    fn discovers_and_orders_installs() {
        let root = tempfile::tempdir().unwrap();
        write_install(root.path(), "engine-3.0.1", "3.0.1");
        write_install(root.path(), "engine-3.2.0", "3.2.0");
        write_install(root.path(), "engine-2.9.0", "2.9.0");

        let installs = discover_installs_under(&[(
            root.path().to_path_buf(),
            DiscoveryOrigin::UserInstall,
        )]);
        assert_eq!(installs.len(), 3);
        // Newest first within a root.
        assert_eq!(installs[0].version.to_string(), "3.2.0");
        assert!(installs
            .iter()
            .all(|i| i.origin == DiscoveryOrigin::UserInstall));
        assert!(installs.iter().all(|i| i.root == root.path()));
    }

    #[test]
    fn malformed_installs_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        write_install(root.path(), "good", "3.0.0");

        let no_manifest = root.path().join("no-manifest");
        std::fs::create_dir_all(&no_manifest).unwrap();

        let bad = root.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(INSTALL_MANIFEST), "version = 42\n").unwrap();

        let installs = discover_installs_under(&[(
            root.path().to_path_buf(),
            DiscoveryOrigin::System,
        )]);
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].version.to_string(), "3.0.0");
    }

    #[test]
    fn selects_exact_protocol_major_first() {
        let root = tempfile::tempdir().unwrap();
        write_install(root.path(), "old", "2.5.0");
        write_install(root.path(), "current", "3.0.0");

        let installs = discover_installs_under(&[(
            root.path().to_path_buf(),
            DiscoveryOrigin::UserInstall,
        )]);
        let selected = select_install(&installs).unwrap();
        assert_eq!(
            selected.version.major,
            u64::from(drover_engine::PROTOCOL_MAJOR)
        );
    }

    #[test]
    fn falls_back_to_the_compat_line() {
        let root = tempfile::tempdir().unwrap();
        write_install(root.path(), "old", "2.5.0");
        write_install(root.path(), "ancient", "1.0.0");

        let installs = discover_installs_under(&[(
            root.path().to_path_buf(),
            DiscoveryOrigin::UserInstall,
        )]);
        let selected = select_install(&installs).unwrap();
        assert_eq!(selected.version.major, FALLBACK_COMPAT_MAJOR);
    }

    #[test]
    fn no_compatible_install_yields_none() {
        let root = tempfile::tempdir().unwrap();
        write_install(root.path(), "ancient", "1.0.0");

        let installs = discover_installs_under(&[(
            root.path().to_path_buf(),
            DiscoveryOrigin::System,
        )]);
        assert!(select_install(&installs).is_none());
        assert!(select_install(&[]).is_none());
    }
}
