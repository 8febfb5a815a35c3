//! Project descriptions for the drover build engine.
//!
//! This crate implements the schema layer: versioned TOML project manifests
//! with named targets and a property table, `${name}` property expansion for
//! target commands, and the throwaway scratch-project generator used by the
//! orchestrator.

pub mod manifest;
pub mod properties;
pub mod scratch;

pub use manifest::{parse_project_file, parse_project_str, ProjectManifest, TargetSpec};
pub use properties::expand_properties;
pub use scratch::create_scratch_project;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("failed to read project file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse project file: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("project name must not be empty")]
    EmptyProjectName,
    #[error("target name must not be empty")]
    EmptyTargetName,
}
