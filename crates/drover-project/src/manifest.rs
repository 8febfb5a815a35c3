use crate::ProjectError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectManifest {
    pub manifest_version: u32,
    pub project: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    /// Shell command lines executed in order. An empty list is a no-op target.
    #[serde(default)]
    pub run: Vec<String>,
}

impl ProjectManifest {
    /// Project properties with the global property mapping layered on top.
    /// Global keys win over manifest keys; key order is irrelevant.
    pub fn merged_properties(
        &self,
        global: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut merged = self.properties.clone();
        for (key, value) in global {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

pub fn parse_project_str(input: &str) -> Result<ProjectManifest, ProjectError> {
    let manifest: ProjectManifest = toml::from_str(input)?;
    if manifest.manifest_version != 1 {
        return Err(ProjectError::UnsupportedVersion(manifest.manifest_version));
    }
    if manifest.project.trim().is_empty() {
        return Err(ProjectError::EmptyProjectName);
    }
    if manifest.targets.keys().any(|name| name.trim().is_empty()) {
        return Err(ProjectError::EmptyTargetName);
    }
    Ok(manifest)
}

pub fn parse_project_file(path: impl AsRef<Path>) -> Result<ProjectManifest, ProjectError> {
    let content = fs::read_to_string(path)?;
    parse_project_str(&content)
}
