use console::Style;
use drover_engine::{BuildEvent, EventSink, SubmissionId, Verbosity};

/// Streams build events to the terminal at a fixed verbosity. Registered
/// per submission with the multiplexer, so it only ever sees one
/// submission's events.
pub struct ConsoleLogger {
    verbosity: Verbosity,
}

impl ConsoleLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

impl EventSink for ConsoleLogger {
    fn log_event(&self, _id: SubmissionId, event: &BuildEvent) {
        if !event.visible_at(self.verbosity) {
            return;
        }
        match event {
            BuildEvent::BuildStarted { timestamp } => {
                println!("build started at {timestamp}");
            }
            BuildEvent::TargetStarted { target } => {
                println!("{} {target}", Style::new().cyan().apply_to("▸"));
            }
            BuildEvent::Message { text, .. } => println!("{text}"),
            BuildEvent::Warning { text } => {
                eprintln!("{} {text}", Style::new().yellow().apply_to("warning:"));
            }
            BuildEvent::Error { text } => {
                eprintln!("{} {text}", Style::new().red().apply_to("error:"));
            }
            BuildEvent::TargetFinished { target, succeeded } => {
                if *succeeded {
                    println!("{} {target}", Style::new().green().apply_to("✓"));
                } else {
                    println!("{} {target}", Style::new().red().apply_to("✗"));
                }
            }
            BuildEvent::BuildFinished { succeeded } => {
                if *succeeded {
                    println!("{}", Style::new().green().apply_to("build succeeded"));
                } else {
                    println!("{}", Style::new().red().apply_to("build failed"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_every_event_kind_without_panicking() {
        let logger = ConsoleLogger::new(Verbosity::Diagnostic);
        let id = SubmissionId(1);
        for event in [
            BuildEvent::BuildStarted {
                timestamp: "2026-01-01T00:00:00Z".to_owned(),
            },
            BuildEvent::TargetStarted {
                target: "restore".to_owned(),
            },
            BuildEvent::Message {
                importance: drover_engine::MessageImportance::Low,
                text: "$ true".to_owned(),
            },
            BuildEvent::Warning {
                text: "careful".to_owned(),
            },
            BuildEvent::Error {
                text: "broken".to_owned(),
            },
            BuildEvent::TargetFinished {
                target: "restore".to_owned(),
                succeeded: true,
            },
            BuildEvent::BuildFinished { succeeded: false },
        ] {
            logger.log_event(id, &event);
        }
    }
}
