//! Orchestration harness for the drover build engine.
//!
//! This crate ties the engine to an operator-facing build flow: the
//! `BuildSessionCoordinator` drives one begin/submit/await/end lifecycle and
//! always produces a `BuildOutcome`; the compatibility shim redirects the
//! engine's worker-node launcher to a caller-chosen host executable; the
//! `MuxLogger` fans events from concurrent submissions out to per-submission
//! sinks; the diagnostics reporter snapshots the process's loaded modules on
//! failure; and install discovery locates a compatible engine toolset.

pub mod concurrency;
pub mod diagnostics;
pub mod discovery;
pub mod muxlog;
pub mod session;
pub mod shim;

pub use concurrency::{install_signal_handler, shutdown_requested};
pub use diagnostics::{snapshot_loaded_modules, LoadedModule};
pub use discovery::{discover_installs, select_install, DiscoveryOrigin, EngineInstall};
pub use muxlog::MuxLogger;
pub use session::{
    BuildOutcome, BuildSessionCoordinator, BuildStatus, SessionConfig, SessionState,
    SubmissionHandle,
};
pub use shim::override_worker_host;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("engine error: {0}")]
    Engine(#[from] drover_engine::EngineError),
    #[error("project error: {0}")]
    Project(#[from] drover_project::ProjectError),
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("build session was never started; begin() must come before end()")]
    SessionNotStarted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
