use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier assigned to a build submission, unique within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub u32);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Quiet,
    Minimal,
    #[default]
    Normal,
    Detailed,
    Diagnostic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageImportance {
    High,
    Normal,
    Low,
}

/// A build-progress event emitted while executing a submission.
///
/// Events for one submission are delivered in emission order; there is no
/// ordering guarantee across submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildEvent {
    BuildStarted {
        timestamp: String,
    },
    TargetStarted {
        target: String,
    },
    Message {
        importance: MessageImportance,
        text: String,
    },
    Warning {
        text: String,
    },
    Error {
        text: String,
    },
    TargetFinished {
        target: String,
        succeeded: bool,
    },
    BuildFinished {
        succeeded: bool,
    },
}

impl BuildEvent {
    /// Whether a logger at the given verbosity should see this event.
    /// Errors and warnings are always visible.
    pub fn visible_at(&self, verbosity: Verbosity) -> bool {
        match self {
            BuildEvent::Error { .. } | BuildEvent::Warning { .. } => true,
            BuildEvent::BuildStarted { .. } | BuildEvent::BuildFinished { .. } => {
                verbosity >= Verbosity::Minimal
            }
            BuildEvent::TargetStarted { .. } | BuildEvent::TargetFinished { .. } => {
                verbosity >= Verbosity::Normal
            }
            BuildEvent::Message { importance, .. } => match importance {
                MessageImportance::High => verbosity >= Verbosity::Minimal,
                MessageImportance::Normal => verbosity >= Verbosity::Normal,
                MessageImportance::Low => verbosity >= Verbosity::Detailed,
            },
        }
    }
}

/// Receiver for build events, keyed by the submission they belong to.
pub trait EventSink: Send + Sync {
    fn log_event(&self, id: SubmissionId, event: &BuildEvent);
}

/// Description of a forwarding logger, consumed by out-of-process worker
/// nodes so their events are relayed back into the orchestrating process.
/// Only the verbosity travels over the wire; no type reference is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingLoggerSpec {
    pub verbosity: Verbosity,
}

/// A forwarding logger description paired with the sink that receives the
/// forwarded events in the orchestrating process.
#[derive(Clone)]
pub struct ForwardingLoggerRecord {
    pub spec: ForwardingLoggerSpec,
    pub sink: Arc<dyn EventSink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_visible_at_every_verbosity() {
        let event = BuildEvent::Error {
            text: "boom".to_owned(),
        };
        assert!(event.visible_at(Verbosity::Quiet));
        assert!(event.visible_at(Verbosity::Diagnostic));
    }

    #[test]
    fn low_importance_needs_detailed() {
        let event = BuildEvent::Message {
            importance: MessageImportance::Low,
            text: "$ true".to_owned(),
        };
        assert!(!event.visible_at(Verbosity::Normal));
        assert!(event.visible_at(Verbosity::Detailed));
    }

    #[test]
    fn target_events_hidden_when_quiet() {
        let event = BuildEvent::TargetStarted {
            target: "restore".to_owned(),
        };
        assert!(!event.visible_at(Verbosity::Quiet));
        assert!(!event.visible_at(Verbosity::Minimal));
        assert!(event.visible_at(Verbosity::Normal));
    }

    #[test]
    fn verbosity_is_ordered() {
        assert!(Verbosity::Quiet < Verbosity::Minimal);
        assert!(Verbosity::Normal < Verbosity::Diagnostic);
    }
}
