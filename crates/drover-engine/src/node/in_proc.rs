use crate::events::BuildEvent;
use crate::node::{run_commands, TargetOutcome, TargetWork};
use crate::EngineError;
use tracing::debug;

/// Execute a target on the in-process node: same command semantics as a
/// worker node, minus the process boundary.
pub(crate) fn run_target(
    work: &TargetWork,
    dispatch: &dyn Fn(&BuildEvent),
) -> Result<TargetOutcome, EngineError> {
    debug!(
        "running target '{}' of '{}' on the in-process node",
        work.target, work.project_name
    );
    let mut emit = |event: BuildEvent| dispatch(&event);
    Ok(run_commands(work, &mut emit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[test]
    fn dispatches_events_for_executed_commands() {
        let work = TargetWork {
            submission_id: crate::events::SubmissionId(1),
            project_name: "demo".to_owned(),
            target: "noise".to_owned(),
            commands: vec!["echo in-proc".to_owned()],
            properties: BTreeMap::new(),
            working_dir: std::env::temp_dir(),
        };

        let seen: Mutex<Vec<BuildEvent>> = Mutex::new(Vec::new());
        let dispatch = |event: &BuildEvent| {
            let mut guard = match seen.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.push(event.clone());
        };

        let outcome = run_target(&work, &dispatch).unwrap();
        assert!(outcome.succeeded);
        let events = seen.into_inner().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, BuildEvent::Message { text, .. } if text == "in-proc")));
    }
}
