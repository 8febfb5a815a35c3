use crate::events::{BuildEvent, MessageImportance, SubmissionId};
use crate::params::BuildParameters;
use crate::EngineError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

mod in_proc;
pub mod out_of_proc;
mod proto;
pub mod worker;

pub use out_of_proc::OutOfProcNodeProvider;

/// A unit of node work: one target of one project, with commands already
/// property-expanded by the executor.
#[derive(Debug, Clone)]
pub(crate) struct TargetWork {
    pub submission_id: SubmissionId,
    pub project_name: String,
    pub target: String,
    pub commands: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TargetOutcome {
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Routes target execution to the configured node kind. Constructed when a
/// session opens; the out-of-process provider exists only when in-process
/// execution is disabled.
pub struct NodeManager {
    out_of_proc_provider: Option<OutOfProcNodeProvider>,
}

impl NodeManager {
    pub(crate) fn new(params: &BuildParameters) -> Self {
        let out_of_proc_provider = params.disable_in_proc_node.then(|| {
            let worker_verbosity = params
                .forwarding_loggers
                .iter()
                .map(|record| record.spec.verbosity)
                .max()
                .unwrap_or_default();
            OutOfProcNodeProvider::new(
                params.node_reuse,
                params.max_node_count,
                params.install_root.clone(),
                worker_verbosity,
            )
        });
        Self {
            out_of_proc_provider,
        }
    }

    pub(crate) fn run_target(
        &self,
        work: &TargetWork,
        dispatch: &dyn Fn(&BuildEvent),
    ) -> Result<TargetOutcome, EngineError> {
        match &self.out_of_proc_provider {
            Some(provider) => provider.run_target(work, dispatch),
            None => in_proc::run_target(work, dispatch),
        }
    }

    pub(crate) fn shutdown(&self) {
        if let Some(provider) = &self.out_of_proc_provider {
            provider.shutdown_nodes();
        }
    }

    /// Worker nodes currently alive (pooled or executing).
    pub fn live_node_count(&self) -> usize {
        self.out_of_proc_provider
            .as_ref()
            .map_or(0, OutOfProcNodeProvider::live_node_count)
    }

    /// Internal launcher reference for the engine-compatibility shim. Not
    /// part of the supported API surface; layout guarded by
    /// [`ENGINE_API_MAJOR`](crate::ENGINE_API_MAJOR).
    #[doc(hidden)]
    pub fn out_of_proc_provider_for_shim(&self) -> Option<&OutOfProcNodeProvider> {
        self.out_of_proc_provider.as_ref()
    }
}

/// Run the commands of one target through `sh -c`, emitting progress events.
/// Shared by the in-process node and the worker-node loop so both produce
/// identical event streams.
pub(crate) fn run_commands(
    work: &TargetWork,
    emit: &mut dyn FnMut(BuildEvent),
) -> TargetOutcome {
    for command in &work.commands {
        emit(BuildEvent::Message {
            importance: MessageImportance::Low,
            text: format!("$ {command}"),
        });

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&work.working_dir);
        for (key, value) in &work.properties {
            cmd.env(format!("DROVER_PROP_{}", key.to_uppercase()), value);
        }

        let output = match cmd.output() {
            Ok(output) => output,
            Err(e) => {
                let text = format!("failed to run '{command}': {e}");
                emit(BuildEvent::Error { text: text.clone() });
                return TargetOutcome {
                    succeeded: false,
                    error: Some(text),
                };
            }
        };

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            emit(BuildEvent::Message {
                importance: MessageImportance::Normal,
                text: line.to_owned(),
            });
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            emit(BuildEvent::Message {
                importance: MessageImportance::High,
                text: line.to_owned(),
            });
        }

        if !output.status.success() {
            let detail = describe_exit(&output.status);
            let text = format!("command '{command}' {detail}");
            emit(BuildEvent::Error { text: text.clone() });
            return TargetOutcome {
                succeeded: false,
                error: Some(text),
            };
        }
        debug!("command finished: {command}");
    }

    TargetOutcome {
        succeeded: true,
        error: None,
    }
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("was killed by signal {signal}");
        }
    }
    "failed with unknown status".to_owned()
}
