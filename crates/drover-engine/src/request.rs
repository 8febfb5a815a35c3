use crate::events::SubmissionId;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// One build request: a project, the targets to build in order, and global
/// properties layered over the project's own property table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub project_path: PathBuf,
    pub targets: Vec<String>,
    pub global_properties: BTreeMap<String, String>,
}

impl BuildRequest {
    pub fn new(project_path: impl Into<PathBuf>, targets: &[&str]) -> Self {
        Self {
            project_path: project_path.into(),
            targets: targets.iter().map(|t| (*t).to_owned()).collect(),
            global_properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResultCode {
    Success,
    Failure,
    Aborted,
}

impl fmt::Display for BuildResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildResultCode::Success => write!(f, "success"),
            BuildResultCode::Failure => write!(f, "failure"),
            BuildResultCode::Aborted => write!(f, "aborted"),
        }
    }
}

/// Result delivered exactly once through the completion callback of a
/// submission. Engine-level faults are folded into `error`, never unwound
/// across the callback boundary.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub submission_id: SubmissionId,
    pub code: BuildResultCode,
    pub error: Option<String>,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.code == BuildResultCode::Success
    }
}
