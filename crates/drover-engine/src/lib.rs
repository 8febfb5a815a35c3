//! The drover build engine.
//!
//! This crate implements the execution layer driven by the orchestration
//! harness: build sessions (`BuildManager::begin_build` / `end_build`),
//! asynchronous build submissions executed on engine-owned threads, project
//! evaluation with a result cache, and node management: an in-process
//! executor node plus an out-of-process node provider that spawns worker
//! processes and relays their events back over a JSON-lines pipe protocol.

pub mod events;
pub mod manager;
pub mod node;
pub mod params;
pub mod request;
pub mod submission;

pub use events::{
    BuildEvent, EventSink, ForwardingLoggerRecord, ForwardingLoggerSpec, MessageImportance,
    SubmissionId, Verbosity,
};
pub use manager::BuildManager;
pub use params::BuildParameters;
pub use request::{BuildRequest, BuildResult, BuildResultCode};
pub use submission::{BuildSubmission, SubmissionStatus};

use thiserror::Error;

/// Major version of the worker-node wire protocol. Checked during the node
/// handshake and matched against engine installations by the harness.
pub const PROTOCOL_MAJOR: u32 = 3;

/// Major version of the engine's internal object layout. Compatibility shims
/// that reach past the supported API surface must match this exactly.
pub const ENGINE_API_MAJOR: u32 = 3;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("project error: {0}")]
    Project(#[from] drover_project::ProjectError),
    #[error("a build session is already open; nested sessions are not supported")]
    NestedSession,
    #[error("no build session is open")]
    NoSession,
    #[error("engine work dir is locked by another session: {0}")]
    WorkDirLocked(String),
    #[error("submission {0} was already executed")]
    AlreadyExecuted(SubmissionId),
    #[error("failed to launch worker node: {0}")]
    NodeLaunch(String),
    #[error("worker node protocol error: {0}")]
    NodeProtocol(String),
    #[error("wire serialization error: {0}")]
    Wire(#[from] serde_json::Error),
}
