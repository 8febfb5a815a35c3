use drover_engine::{BuildEvent, EventSink, ForwardingLoggerSpec, SubmissionId, Verbosity};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Fans build events from concurrent submissions out to the sinks registered
/// for each submission id. Ids fully partition the event stream: a sink only
/// ever sees events of the submission it was registered for.
///
/// Correct callers register at submission time and unregister from the
/// submission's completion callback; unregistering earlier loses events.
pub struct MuxLogger {
    verbosity: Verbosity,
    registrations: Mutex<HashMap<SubmissionId, Vec<Arc<dyn EventSink>>>>,
}

impl MuxLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Forwarding-logger description handed to the engine so out-of-process
    /// worker events reach this sink at all. Carries only the verbosity.
    pub fn forwarding_description(&self) -> ForwardingLoggerSpec {
        ForwardingLoggerSpec {
            verbosity: self.verbosity,
        }
    }

    pub fn register(&self, id: SubmissionId, sink: Arc<dyn EventSink>) {
        self.lock().entry(id).or_default().push(sink);
    }

    /// Remove every sink registered for the submission. Events arriving
    /// afterwards are dropped silently.
    pub fn unregister(&self, id: SubmissionId) {
        if self.lock().remove(&id).is_some() {
            debug!("unregistered loggers for submission {id}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubmissionId, Vec<Arc<dyn EventSink>>>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for MuxLogger {
    fn log_event(&self, id: SubmissionId, event: &BuildEvent) {
        // Holding the lock across delivery keeps per-submission order intact
        // and makes unregistration a clean cut-off point.
        let registrations = self.lock();
        if let Some(sinks) = registrations.get(&id) {
            for sink in sinks {
                sink.log_event(id, event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CaptureSink {
        events: Mutex<Vec<(SubmissionId, BuildEvent)>>,
    }

    impl CaptureSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<(SubmissionId, BuildEvent)> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl EventSink for CaptureSink {
        fn log_event(&self, id: SubmissionId, event: &BuildEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((id, event.clone()));
        }
    }

    fn message(text: &str) -> BuildEvent {
        BuildEvent::Message {
            importance: drover_engine::MessageImportance::Normal,
            text: text.to_owned(),
        }
    }

    #[test]
    fn events_route_only_to_the_matching_submission() {
        let mux = MuxLogger::new(Verbosity::Diagnostic);
        let sink_a = CaptureSink::new();
        let sink_b = CaptureSink::new();
        let id_a = SubmissionId(1);
        let id_b = SubmissionId(2);
        mux.register(id_a, Arc::clone(&sink_a) as Arc<dyn EventSink>);
        mux.register(id_b, Arc::clone(&sink_b) as Arc<dyn EventSink>);

        mux.log_event(id_a, &message("for-a"));
        mux.log_event(id_b, &message("for-b"));
        mux.log_event(id_a, &message("also-for-a"));

        let a = sink_a.events();
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|(id, _)| *id == id_a));

        let b = sink_b.events();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].0, id_b);
    }

    #[test]
    fn isolation_holds_under_concurrent_submissions() {
        let mux = Arc::new(MuxLogger::new(Verbosity::Diagnostic));
        let sink_a = CaptureSink::new();
        let sink_b = CaptureSink::new();
        let id_a = SubmissionId(10);
        let id_b = SubmissionId(11);
        mux.register(id_a, Arc::clone(&sink_a) as Arc<dyn EventSink>);
        mux.register(id_b, Arc::clone(&sink_b) as Arc<dyn EventSink>);

        let threads: Vec<_> = [(id_a, "a"), (id_b, "b")]
            .into_iter()
            .map(|(id, tag)| {
                let mux = Arc::clone(&mux);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        mux.log_event(id, &message(&format!("{tag}-{i}")));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let a = sink_a.events();
        assert_eq!(a.len(), 100);
        assert!(a.iter().all(|(id, _)| *id == id_a));
        // Per-submission emission order survives the interleaving.
        for (i, (_, event)) in a.iter().enumerate() {
            assert_eq!(event, &message(&format!("a-{i}")));
        }
        assert!(sink_b.events().iter().all(|(id, _)| *id == id_b));
    }

    #[test]
    fn unregistered_submissions_drop_events() {
        let mux = MuxLogger::new(Verbosity::Diagnostic);
        let sink = CaptureSink::new();
        let id = SubmissionId(5);
        mux.register(id, Arc::clone(&sink) as Arc<dyn EventSink>);
        mux.log_event(id, &message("kept"));
        mux.unregister(id);
        mux.log_event(id, &message("dropped"));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, message("kept"));
    }

    #[test]
    fn multiple_sinks_per_submission_all_fire() {
        let mux = MuxLogger::new(Verbosity::Diagnostic);
        let first = CaptureSink::new();
        let second = CaptureSink::new();
        let id = SubmissionId(7);
        mux.register(id, Arc::clone(&first) as Arc<dyn EventSink>);
        mux.register(id, Arc::clone(&second) as Arc<dyn EventSink>);

        mux.log_event(id, &message("both"));
        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }

    #[test]
    fn forwarding_description_carries_the_mux_verbosity() {
        let mux = MuxLogger::new(Verbosity::Diagnostic);
        assert_eq!(
            mux.forwarding_description().verbosity,
            Verbosity::Diagnostic
        );
    }
}
