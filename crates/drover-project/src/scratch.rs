use crate::ProjectError;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of a drover project manifest.
pub const PROJECT_FILE_NAME: &str = "drover.toml";

const SCRATCH_MANIFEST: &str = r#"manifest_version = 1
project = "scratch-a"

[properties]
configuration = "debug"

[targets.restore]
run = []
"#;

/// Create the throwaway project fed into a build session.
///
/// Recreates `<root>/projects/scratch-a/` from scratch so stale state from a
/// previous run never leaks into the build, writes a minimal manifest with a
/// no-op `restore` target, and returns the manifest path.
pub fn create_scratch_project(root: &Path) -> Result<PathBuf, ProjectError> {
    let projects_dir = root.join("projects");
    if projects_dir.exists() {
        fs::remove_dir_all(&projects_dir)?;
    }

    let project_dir = projects_dir.join("scratch-a");
    fs::create_dir_all(&project_dir)?;

    let manifest_path = project_dir.join(PROJECT_FILE_NAME);
    fs::write(&manifest_path, SCRATCH_MANIFEST)?;

    Ok(manifest_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_project_file;

    #[test]
    fn creates_parseable_scratch_project() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = create_scratch_project(dir.path()).unwrap();

        assert!(manifest_path.exists());
        let manifest = parse_project_file(&manifest_path).unwrap();
        assert_eq!(manifest.project, "scratch-a");
        assert!(manifest.targets.contains_key("restore"));
        assert!(manifest.targets["restore"].run.is_empty());
    }

    #[test]
    fn recreation_removes_stale_state() {
        let dir = tempfile::tempdir().unwrap();
        let first = create_scratch_project(dir.path()).unwrap();

        let stale = first.parent().unwrap().join("stale.txt");
        fs::write(&stale, "leftover").unwrap();

        let second = create_scratch_project(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(!stale.exists());
    }
}
