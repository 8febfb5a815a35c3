use crate::events::{BuildEvent, SubmissionId};
use crate::manager::SessionCore;
use crate::node::TargetWork;
use crate::request::{BuildRequest, BuildResult, BuildResultCode};
use crate::EngineError;
use chrono::Utc;
use drover_project::expand_properties;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Succeeded,
    Failed,
    Aborted,
}

/// One pended build request. Inert until `execute_async` hands it to an
/// engine-owned thread; the completion callback fires exactly once with the
/// result, on that thread.
pub struct BuildSubmission {
    id: SubmissionId,
    core: Arc<SessionCore>,
    request: Mutex<Option<BuildRequest>>,
    status: Mutex<SubmissionStatus>,
}

impl BuildSubmission {
    pub(crate) fn pend(
        id: SubmissionId,
        request: BuildRequest,
        core: Arc<SessionCore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            core,
            request: Mutex::new(Some(request)),
            status: Mutex::new(SubmissionStatus::Pending),
        })
    }

    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn status(&self) -> SubmissionStatus {
        *lock(&self.status)
    }

    /// Run the submission asynchronously. The callback must not block for
    /// long; it runs on the engine thread that executed the build.
    pub fn execute_async<F>(self: &Arc<Self>, callback: F) -> Result<(), EngineError>
    where
        F: FnOnce(&BuildResult) + Send + 'static,
    {
        let request = lock(&self.request)
            .take()
            .ok_or(EngineError::AlreadyExecuted(self.id))?;

        let submission = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("drover-submission-{}", self.id))
            .spawn(move || {
                let result = run_submission(&submission, &request);
                *lock(&submission.status) = match result.code {
                    BuildResultCode::Success => SubmissionStatus::Succeeded,
                    BuildResultCode::Failure => SubmissionStatus::Failed,
                    BuildResultCode::Aborted => SubmissionStatus::Aborted,
                };
                callback(&result);
            })?;
        self.core.track_thread(handle);
        Ok(())
    }
}

/// Fault barrier around one submission: engine errors and panics are folded
/// into the result so the completion callback always fires.
fn run_submission(submission: &BuildSubmission, request: &BuildRequest) -> BuildResult {
    let id = submission.id;
    let core = &submission.core;
    match catch_unwind(AssertUnwindSafe(|| execute(core, id, request))) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            core.dispatch(id, &BuildEvent::BuildFinished { succeeded: false });
            BuildResult {
                submission_id: id,
                code: BuildResultCode::Failure,
                error: Some(e.to_string()),
            }
        }
        Err(payload) => {
            warn!("submission {id} hit the engine's fault barrier");
            BuildResult {
                submission_id: id,
                code: BuildResultCode::Failure,
                error: Some(format!("engine fault: {}", panic_message(&payload))),
            }
        }
    }
}

fn execute(
    core: &SessionCore,
    id: SubmissionId,
    request: &BuildRequest,
) -> Result<BuildResult, EngineError> {
    let manifest = core.evaluate_project(&request.project_path)?;
    let properties = manifest.merged_properties(&request.global_properties);
    let working_dir = request
        .project_path
        .canonicalize()?
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    core.dispatch(
        id,
        &BuildEvent::BuildStarted {
            timestamp: Utc::now().to_rfc3339(),
        },
    );

    let mut code = BuildResultCode::Success;
    let mut error = None;

    // Targets run strictly in request order; the first failure stops the
    // submission.
    for target_name in &request.targets {
        if (core.params.cancel_requested)() {
            debug!("submission {id} aborted before target '{target_name}'");
            error = Some(format!(
                "build of '{}' aborted before target '{target_name}'",
                manifest.project
            ));
            code = BuildResultCode::Aborted;
            break;
        }

        core.dispatch(
            id,
            &BuildEvent::TargetStarted {
                target: target_name.clone(),
            },
        );

        let Some(spec) = manifest.targets.get(target_name) else {
            let text = format!(
                "target '{target_name}' is not defined in project '{}'",
                manifest.project
            );
            core.dispatch(id, &BuildEvent::Error { text: text.clone() });
            core.dispatch(
                id,
                &BuildEvent::TargetFinished {
                    target: target_name.clone(),
                    succeeded: false,
                },
            );
            error = Some(text);
            code = BuildResultCode::Failure;
            break;
        };

        let work = TargetWork {
            submission_id: id,
            project_name: manifest.project.clone(),
            target: target_name.clone(),
            commands: spec
                .run
                .iter()
                .map(|command| expand_properties(command, &properties))
                .collect(),
            properties: properties.clone(),
            working_dir: working_dir.clone(),
        };
        let outcome = core
            .node_manager
            .run_target(&work, &|event| core.dispatch(id, event))?;

        core.dispatch(
            id,
            &BuildEvent::TargetFinished {
                target: target_name.clone(),
                succeeded: outcome.succeeded,
            },
        );
        if !outcome.succeeded {
            error = outcome
                .error
                .or_else(|| Some(format!("target '{target_name}' failed")));
            code = BuildResultCode::Failure;
            break;
        }
    }

    core.dispatch(
        id,
        &BuildEvent::BuildFinished {
            succeeded: code == BuildResultCode::Success,
        },
    );

    Ok(BuildResult {
        submission_id: id,
        code,
        error,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
