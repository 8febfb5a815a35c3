use crate::node::proto::{HostToNode, NodeToHost};
use crate::node::run_commands;
use crate::PROTOCOL_MAJOR;
use serde::Serialize;
use std::io::{self, BufRead, Write};

/// Worker-node main loop, run by the `drover-node` binary after the engine
/// relaunches it.
///
/// Speaks the JSON-lines protocol on stdin/stdout: emits a `Ready` handshake,
/// then executes one assignment at a time until `Shutdown` or EOF. Events
/// below the assignment's forwarding verbosity are dropped here instead of
/// crossing the pipe.
pub fn run(args: &[String]) -> u8 {
    if args.first().map(String::as_str) != Some("worker-node") {
        return 1;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let ready = NodeToHost::Ready {
        protocol_major: PROTOCOL_MAJOR,
        pid: std::process::id(),
    };
    if write_line(&mut out, &ready).is_err() {
        return 1;
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        // The host owns the pipe; anything unparseable is skipped, not fatal.
        let Ok(message) = serde_json::from_str::<HostToNode>(&line) else {
            continue;
        };
        match message {
            HostToNode::Shutdown => break,
            HostToNode::Assign(assignment) => {
                let verbosity = assignment.verbosity;
                let work = assignment.into_work();
                let mut pipe_broken = false;
                let outcome = run_commands(&work, &mut |event| {
                    if pipe_broken || !event.visible_at(verbosity) {
                        return;
                    }
                    if write_line(&mut out, &NodeToHost::Event { event }).is_err() {
                        pipe_broken = true;
                    }
                });
                let done = NodeToHost::TargetDone {
                    succeeded: outcome.succeeded,
                    error: outcome.error,
                };
                if pipe_broken || write_line(&mut out, &done).is_err() {
                    break;
                }
            }
        }
    }

    0
}

fn write_line(out: &mut impl Write, message: &impl Serialize) -> io::Result<()> {
    let line = serde_json::to_string(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(out, "{line}")?;
    out.flush()
}
