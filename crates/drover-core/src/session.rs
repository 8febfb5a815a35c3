use crate::diagnostics::{snapshot_loaded_modules, LoadedModule};
use crate::discovery::EngineInstall;
use crate::muxlog::MuxLogger;
use crate::{concurrency, shim, CoreError};
use drover_engine::{
    BuildManager, BuildParameters, BuildRequest, BuildResult, BuildResultCode, EventSink,
    ForwardingLoggerRecord, SubmissionId,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Begun,
    Submitted,
    Completed,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Begun => "begun",
            SessionState::Submitted => "submitted",
            SessionState::Completed => "completed",
            SessionState::Ended => "ended",
        };
        write!(f, "{name}")
    }
}

pub fn validate_transition(from: SessionState, to: SessionState) -> Result<(), CoreError> {
    use SessionState::{Begun, Completed, Ended, Idle, Submitted};
    let valid = matches!(
        (from, to),
        (Idle, Begun)
            | (Begun | Submitted | Completed, Submitted)
            | (Submitted | Completed, Completed)
            | (Begun | Submitted | Completed, Ended)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Configuration for one coordinated build session; owned by the coordinator
/// from `begin` until the session ends.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub disable_in_proc_node: bool,
    pub node_reuse: bool,
    pub max_node_count: usize,
    pub reset_caches: bool,
    /// Executable to relaunch worker nodes with. Applied through the
    /// engine-compatibility shim right before submission; failure to apply
    /// is logged and never fails the build.
    pub worker_host_override: Option<PathBuf>,
    /// The registered engine installation backing this session.
    pub install: Option<EngineInstall>,
    pub work_dir: PathBuf,
}

impl SessionConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            disable_in_proc_node: false,
            node_reuse: false,
            max_node_count: 1,
            reset_caches: true,
            worker_host_override: None,
            install: None,
            work_dir: work_dir.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Succeeded,
    Failed,
    Aborted,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Succeeded => write!(f, "succeeded"),
            BuildStatus::Failed => write!(f, "failed"),
            BuildStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Overall result of one coordinated session. The loaded-module snapshot is
/// only taken for failures that carry a description.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub description: Option<String>,
    pub loaded_modules: Vec<LoadedModule>,
}

impl BuildOutcome {
    fn from_result(result: &BuildResult) -> Self {
        let status = match result.code {
            BuildResultCode::Success => BuildStatus::Succeeded,
            BuildResultCode::Failure => BuildStatus::Failed,
            BuildResultCode::Aborted => BuildStatus::Aborted,
        };
        let description = result.error.clone();
        let loaded_modules = if status == BuildStatus::Failed
            && description.as_ref().is_some_and(|d| !d.is_empty())
        {
            snapshot_loaded_modules()
        } else {
            Vec::new()
        };
        Self {
            status,
            description,
            loaded_modules,
        }
    }

    fn failure(description: String) -> Self {
        Self {
            status: BuildStatus::Failed,
            loaded_modules: snapshot_loaded_modules(),
            description: Some(description),
        }
    }
}

/// Completion handle for one submission: resolved exactly once by the
/// engine's completion callback.
pub struct SubmissionHandle {
    pub id: SubmissionId,
    receiver: oneshot::Receiver<BuildResult>,
}

/// Drives one build session against the engine: `begin` → `submit` →
/// `await_completion` → `end`, with the worker-host override applied in the
/// window where it can take effect and every engine failure folded into a
/// `BuildOutcome` instead of propagating.
///
/// A coordinator instance runs one session; `begin` cannot be called twice.
pub struct BuildSessionCoordinator {
    manager: BuildManager,
    mux: Arc<MuxLogger>,
    config: Option<SessionConfig>,
    state: SessionState,
}

impl BuildSessionCoordinator {
    pub fn new(name: impl Into<String>, mux: Arc<MuxLogger>) -> Self {
        Self {
            manager: BuildManager::new(name),
            mux,
            config: None,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn manager(&self) -> &BuildManager {
        &self.manager
    }

    /// Open the session. The engine rejects nesting, and so does the
    /// coordinator's state machine.
    pub fn begin(&mut self, config: SessionConfig) -> Result<(), CoreError> {
        validate_transition(self.state, SessionState::Begun)?;

        let params = BuildParameters {
            disable_in_proc_node: config.disable_in_proc_node,
            node_reuse: config.node_reuse,
            max_node_count: config.max_node_count,
            reset_caches: config.reset_caches,
            forwarding_loggers: vec![ForwardingLoggerRecord {
                spec: self.mux.forwarding_description(),
                sink: Arc::clone(&self.mux) as Arc<dyn EventSink>,
            }],
            install_root: config.install.as_ref().map(|i| i.path.clone()),
            work_dir: config.work_dir.clone(),
            cancel_requested: concurrency::shutdown_requested,
        };
        self.manager.begin_build(params)?;
        self.config = Some(config);
        self.state = SessionState::Begun;
        Ok(())
    }

    /// Pend a build request, register its sinks, apply the worker-host
    /// override, and start execution. Worker nodes spawn lazily on first
    /// use, so applying the override here is early enough.
    pub fn submit(
        &mut self,
        project_path: &Path,
        targets: &[&str],
        global_properties: BTreeMap<String, String>,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Result<SubmissionHandle, CoreError> {
        validate_transition(self.state, SessionState::Submitted)?;

        let mut request = BuildRequest::new(project_path, targets);
        request.global_properties = global_properties;
        let submission = self.manager.pend_build_request(request)?;
        let id = submission.id();

        for sink in sinks {
            self.mux.register(id, sink);
        }

        if let Some(host) = self
            .config
            .as_ref()
            .and_then(|config| config.worker_host_override.clone())
        {
            if shim::override_worker_host(&self.manager, &host) {
                info!("worker nodes will relaunch via {}", host.display());
            } else {
                info!(
                    "worker host override not applied ({}); using the engine default",
                    host.display()
                );
            }
        }

        let (tx, receiver) = oneshot::channel();
        let mux = Arc::clone(&self.mux);
        submission.execute_async(move |result| {
            // Resolve the completion signal first, then cut off routing; the
            // callback runs on an engine thread and must not linger.
            let _ = tx.send(result.clone());
            mux.unregister(result.submission_id);
        })?;

        self.state = SessionState::Submitted;
        Ok(SubmissionHandle { id, receiver })
    }

    /// Suspend until the engine's completion callback resolves the handle.
    pub async fn await_completion(
        &mut self,
        handle: SubmissionHandle,
    ) -> Result<BuildResult, CoreError> {
        validate_transition(self.state, SessionState::Completed)?;
        let result = match handle.receiver.await {
            Ok(result) => result,
            Err(_) => BuildResult {
                submission_id: handle.id,
                code: BuildResultCode::Failure,
                error: Some("engine dropped the completion signal".to_owned()),
            },
        };
        self.state = SessionState::Completed;
        Ok(result)
    }

    /// Close the session and release engine resources (worker-node pool,
    /// logger pipes). Must be called exactly once; calling it without a
    /// prior `begin` is an error.
    pub fn end(&mut self) -> Result<(), CoreError> {
        if self.state == SessionState::Idle {
            return Err(CoreError::SessionNotStarted);
        }
        validate_transition(self.state, SessionState::Ended)?;
        self.state = SessionState::Ended;
        self.config = None;
        self.manager.end_build()?;
        Ok(())
    }

    /// The scripted flow: begin, submit, await, end. `end` runs even when
    /// submission or the await fails, and its errors never overwrite the
    /// build outcome. Build failures come back inside the outcome; only
    /// configuration-level faults (e.g. the session cannot open) are errors.
    pub async fn run_session(
        &mut self,
        config: SessionConfig,
        project_path: &Path,
        targets: &[&str],
        global_properties: BTreeMap<String, String>,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Result<BuildOutcome, CoreError> {
        self.begin(config)?;
        let outcome = self
            .drive(project_path, targets, global_properties, sinks)
            .await;
        if let Err(e) = self.end() {
            warn!("build session teardown failed: {e}");
        }
        Ok(outcome)
    }

    async fn drive(
        &mut self,
        project_path: &Path,
        targets: &[&str],
        global_properties: BTreeMap<String, String>,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> BuildOutcome {
        let handle = match self.submit(project_path, targets, global_properties, sinks) {
            Ok(handle) => handle,
            Err(e) => return BuildOutcome::failure(format!("failed to submit build: {e}")),
        };
        match self.await_completion(handle).await {
            Ok(result) => BuildOutcome::from_result(&result),
            Err(e) => BuildOutcome::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use SessionState::{Begun, Completed, Ended, Idle, Submitted};
        assert!(validate_transition(Idle, Begun).is_ok());
        assert!(validate_transition(Begun, Submitted).is_ok());
        assert!(validate_transition(Submitted, Submitted).is_ok()); // multiple submissions
        assert!(validate_transition(Submitted, Completed).is_ok());
        assert!(validate_transition(Completed, Completed).is_ok()); // several awaited handles
        assert!(validate_transition(Completed, Submitted).is_ok());
        assert!(validate_transition(Completed, Ended).is_ok());
        assert!(validate_transition(Begun, Ended).is_ok()); // no submissions
        assert!(validate_transition(Submitted, Ended).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        use SessionState::{Begun, Completed, Ended, Idle, Submitted};
        assert!(validate_transition(Idle, Submitted).is_err());
        assert!(validate_transition(Idle, Ended).is_err());
        assert!(validate_transition(Begun, Begun).is_err()); // no nested begin
        assert!(validate_transition(Ended, Begun).is_err()); // one session per coordinator
        assert!(validate_transition(Ended, Submitted).is_err());
        assert!(validate_transition(Completed, Begun).is_err());
        assert!(validate_transition(Begun, Completed).is_err());
    }

    fn coordinator() -> BuildSessionCoordinator {
        let mux = Arc::new(MuxLogger::new(drover_engine::Verbosity::Diagnostic));
        BuildSessionCoordinator::new("session-test", mux)
    }

    #[test]
    fn end_without_begin_is_a_defined_error() {
        let mut coordinator = coordinator();
        assert!(matches!(
            coordinator.end(),
            Err(CoreError::SessionNotStarted)
        ));
    }

    #[test]
    fn begin_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator();
        coordinator
            .begin(SessionConfig::new(dir.path()))
            .unwrap();
        assert!(matches!(
            coordinator.begin(SessionConfig::new(dir.path())),
            Err(CoreError::InvalidTransition { .. })
        ));
        coordinator.end().unwrap();
    }

    #[test]
    fn submit_before_begin_is_rejected() {
        let mut coordinator = coordinator();
        let result = coordinator.submit(
            Path::new("/nonexistent/drover.toml"),
            &["restore"],
            BTreeMap::new(),
            Vec::new(),
        );
        assert!(matches!(
            result,
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn begin_then_immediate_end_releases_resources() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = coordinator();
        first
            .begin(SessionConfig::new(dir.path()))
            .unwrap();
        first.end().unwrap();
        assert_eq!(first.state(), SessionState::Ended);

        // The work dir lock is free again for a fresh coordinator.
        let mut next = coordinator();
        next.begin(SessionConfig::new(dir.path())).unwrap();
        next.end().unwrap();
    }

    #[test]
    fn end_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator();
        coordinator
            .begin(SessionConfig::new(dir.path()))
            .unwrap();
        coordinator.end().unwrap();
        assert!(matches!(
            coordinator.end(),
            Err(CoreError::InvalidTransition { .. })
        ));
    }
}
