use crate::events::{BuildEvent, Verbosity};
use crate::node::proto::{HostToNode, NodeAssignment, NodeToHost};
use crate::node::{TargetOutcome, TargetWork};
use crate::{EngineError, PROTOCOL_MAJOR};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{mpsc, Condvar, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// File name of the worker-node host bundled with an engine installation.
pub const WORKER_HOST_BIN: &str = "drover-node";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Process-wide override of the executable used to launch worker nodes.
///
/// Once set it persists across sessions until replaced (last write wins) and
/// affects every subsequent worker launch in the process. Written through
/// [`OutOfProcNodeProvider::set_current_host`]; the engine exposes no
/// supported configuration surface for it.
static CURRENT_HOST: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Current worker-host override, if any. Internal observation point for
/// compatibility shims and their tests.
#[doc(hidden)]
pub fn current_worker_host() -> Option<PathBuf> {
    let guard = match CURRENT_HOST.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.clone()
}

struct WorkerNode {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    pid: u32,
}

struct PoolState {
    idle: Vec<WorkerNode>,
    active: usize,
}

/// Spawns and pools out-of-process worker nodes and relays their event
/// streams back to the session's forwarding loggers. Nodes are launched
/// lazily, on the first target that needs one.
pub struct OutOfProcNodeProvider {
    node_reuse: bool,
    max_node_count: usize,
    install_root: Option<PathBuf>,
    worker_verbosity: Verbosity,
    pool: Mutex<PoolState>,
    available: Condvar,
}

impl OutOfProcNodeProvider {
    pub(crate) fn new(
        node_reuse: bool,
        max_node_count: usize,
        install_root: Option<PathBuf>,
        worker_verbosity: Verbosity,
    ) -> Self {
        Self {
            node_reuse,
            max_node_count: max_node_count.max(1),
            install_root,
            worker_verbosity,
            pool: Mutex::new(PoolState {
                idle: Vec::new(),
                active: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Overwrite the process-wide worker-host path. Internal extension point
    /// for compatibility shims; layout guarded by
    /// [`ENGINE_API_MAJOR`](crate::ENGINE_API_MAJOR).
    #[doc(hidden)]
    pub fn set_current_host(&self, path: &Path) {
        let mut guard = match CURRENT_HOST.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(path.to_path_buf());
    }

    pub(crate) fn run_target(
        &self,
        work: &TargetWork,
        dispatch: &dyn Fn(&BuildEvent),
    ) -> Result<TargetOutcome, EngineError> {
        let mut node = self.checkout()?;
        match self.drive_node(&mut node, work, dispatch) {
            Ok(outcome) => {
                self.checkin(node);
                Ok(outcome)
            }
            Err(e) => {
                // Protocol failure leaves the node in an unknown state.
                self.discard(node);
                Err(e)
            }
        }
    }

    fn drive_node(
        &self,
        node: &mut WorkerNode,
        work: &TargetWork,
        dispatch: &dyn Fn(&BuildEvent),
    ) -> Result<TargetOutcome, EngineError> {
        let assignment = NodeAssignment {
            submission_id: work.submission_id,
            project_name: work.project_name.clone(),
            target: work.target.clone(),
            commands: work.commands.clone(),
            properties: work.properties.clone(),
            working_dir: work.working_dir.clone(),
            verbosity: self.worker_verbosity,
        };
        let line = serde_json::to_string(&HostToNode::Assign(assignment))?;
        writeln!(node.stdin, "{line}")?;
        node.stdin.flush()?;

        loop {
            let line = node.lines.recv().map_err(|_| {
                EngineError::NodeProtocol(format!(
                    "worker node {} closed its event stream mid-target",
                    node.pid
                ))
            })?;
            match serde_json::from_str::<NodeToHost>(&line)? {
                NodeToHost::Event { event } => dispatch(&event),
                NodeToHost::TargetDone { succeeded, error } => {
                    return Ok(TargetOutcome { succeeded, error });
                }
                // A stray handshake repeat is harmless.
                NodeToHost::Ready { .. } => {}
            }
        }
    }

    fn checkout(&self) -> Result<WorkerNode, EngineError> {
        let mut state = lock_pool(&self.pool);
        loop {
            if let Some(node) = state.idle.pop() {
                state.active += 1;
                return Ok(node);
            }
            if state.active + state.idle.len() < self.max_node_count {
                state.active += 1;
                break;
            }
            state = match self.available.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        drop(state);

        match self.spawn_node() {
            Ok(node) => Ok(node),
            Err(e) => {
                lock_pool(&self.pool).active -= 1;
                self.available.notify_one();
                Err(e)
            }
        }
    }

    fn checkin(&self, node: WorkerNode) {
        let mut state = lock_pool(&self.pool);
        state.active -= 1;
        if self.node_reuse {
            state.idle.push(node);
            drop(state);
        } else {
            drop(state);
            shutdown_node(node);
        }
        self.available.notify_one();
    }

    fn discard(&self, node: WorkerNode) {
        lock_pool(&self.pool).active -= 1;
        self.available.notify_one();
        shutdown_node(node);
    }

    /// Tear down every pooled node. Active nodes are the callers' problem:
    /// the manager joins all submission threads before calling this.
    pub(crate) fn shutdown_nodes(&self) {
        let idle = std::mem::take(&mut lock_pool(&self.pool).idle);
        for node in idle {
            shutdown_node(node);
        }
    }

    pub(crate) fn live_node_count(&self) -> usize {
        let state = lock_pool(&self.pool);
        state.idle.len() + state.active
    }

    fn spawn_node(&self) -> Result<WorkerNode, EngineError> {
        let host = resolve_worker_host(self.install_root.as_deref())?;
        debug!("launching worker node via {}", host.display());

        let mut child = Command::new(&host)
            .arg("worker-node")
            .arg("--protocol")
            .arg(PROTOCOL_MAJOR.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                EngineError::NodeLaunch(format!("failed to spawn {}: {e}", host.display()))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            EngineError::NodeLaunch("worker node stdin was not captured".to_owned())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            EngineError::NodeLaunch("worker node stdout was not captured".to_owned())
        })?;

        let (tx, lines) = mpsc::channel();
        std::thread::Builder::new()
            .name("drover-node-reader".to_owned())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            })?;

        let handshake = match lines.recv_timeout(HANDSHAKE_TIMEOUT) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::NodeLaunch(format!(
                    "worker node {} did not complete the handshake",
                    host.display()
                )));
            }
        };

        match serde_json::from_str::<NodeToHost>(&handshake) {
            Ok(NodeToHost::Ready { protocol_major, pid }) => {
                if protocol_major == PROTOCOL_MAJOR {
                    debug!("worker node {pid} ready (protocol {protocol_major})");
                    Ok(WorkerNode {
                        child,
                        stdin,
                        lines,
                        pid,
                    })
                } else {
                    let _ = child.kill();
                    let _ = child.wait();
                    Err(EngineError::NodeLaunch(format!(
                        "worker node speaks protocol {protocol_major}, host expects {PROTOCOL_MAJOR}"
                    )))
                }
            }
            Ok(other) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(EngineError::NodeProtocol(format!(
                    "expected Ready handshake, got {other:?}"
                )))
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(EngineError::NodeProtocol(format!(
                    "malformed handshake line: {e}"
                )))
            }
        }
    }
}

fn lock_pool(pool: &Mutex<PoolState>) -> std::sync::MutexGuard<'_, PoolState> {
    match pool.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Resolve the executable used to launch the next worker node: the
/// process-wide override when set, else the host bundled with the registered
/// engine installation, else this very executable. The last step is why the
/// orchestrator binary refuses to build when invoked with arguments.
pub(crate) fn resolve_worker_host(install_root: Option<&Path>) -> Result<PathBuf, EngineError> {
    if let Some(host) = current_worker_host() {
        return Ok(host);
    }
    if let Some(root) = install_root {
        let bundled = root.join("bin").join(WORKER_HOST_BIN);
        if bundled.exists() {
            return Ok(bundled);
        }
    }
    Ok(std::env::current_exe()?)
}

fn shutdown_node(node: WorkerNode) {
    let WorkerNode {
        mut child,
        mut stdin,
        lines,
        pid,
    } = node;

    if let Ok(line) = serde_json::to_string(&HostToNode::Shutdown) {
        let _ = writeln!(stdin, "{line}");
        let _ = stdin.flush();
    }
    // Closing stdin doubles as EOF for workers mid-read.
    drop(stdin);
    drop(lines);

    if wait_for_exit(&mut child, SHUTDOWN_GRACE) {
        return;
    }

    warn!("worker node {pid} did not exit after shutdown request, sending SIGTERM");
    if let Ok(pid_i32) = i32::try_from(pid) {
        // SAFETY: kill() with a pid we spawned ourselves and a valid signal
        // is well-defined; the child is reaped below.
        #[allow(unsafe_code)]
        let ret = unsafe { libc::kill(pid_i32, libc::SIGTERM) };
        if ret == 0 && wait_for_exit(&mut child, KILL_GRACE) {
            return;
        }
    }

    warn!("worker node {pid} ignored SIGTERM, killing it");
    let _ = child.kill();
    let _ = child.wait();
}

fn wait_for_exit(child: &mut Child, grace: Duration) -> bool {
    let deadline = std::time::Instant::now() + grace;
    while std::time::Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}
