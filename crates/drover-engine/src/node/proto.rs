use crate::events::{BuildEvent, SubmissionId, Verbosity};
use crate::node::TargetWork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One target handed to a worker node. Commands are already
/// property-expanded; the property table still travels along so the worker
/// can export it into the command environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct NodeAssignment {
    pub submission_id: SubmissionId,
    pub project_name: String,
    pub target: String,
    pub commands: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    /// Forwarding verbosity: the worker drops events below this level
    /// instead of shipping them over the pipe.
    pub verbosity: Verbosity,
}

impl NodeAssignment {
    pub fn into_work(self) -> TargetWork {
        TargetWork {
            submission_id: self.submission_id,
            project_name: self.project_name,
            target: self.target,
            commands: self.commands,
            properties: self.properties,
            working_dir: self.working_dir,
        }
    }
}

/// Host-to-node messages, one JSON document per line on the node's stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) enum HostToNode {
    Assign(NodeAssignment),
    Shutdown,
}

/// Node-to-host messages, one JSON document per line on the node's stdout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) enum NodeToHost {
    /// Handshake, emitted once immediately after startup.
    Ready { protocol_major: u32, pid: u32 },
    Event { event: BuildEvent },
    TargetDone {
        succeeded: bool,
        error: Option<String>,
    },
}
