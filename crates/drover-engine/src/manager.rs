use crate::events::{BuildEvent, SubmissionId};
use crate::node::NodeManager;
use crate::params::BuildParameters;
use crate::request::BuildRequest;
use crate::submission::BuildSubmission;
use crate::EngineError;
use drover_project::ProjectManifest;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Exclusive lock on the engine work directory, held between `begin_build`
/// and `end_build`. Guards the worker-node pool and logger pipes against a
/// second session, in this process or another.
struct WorkDirLock {
    lock_file: File,
}

impl WorkDirLock {
    fn acquire(lock_path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        file.try_lock_exclusive()
            .map_err(|e| EngineError::WorkDirLocked(format!("{}: {e}", lock_path.display())))?;

        Ok(Self { lock_file: file })
    }
}

impl Drop for WorkDirLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Evaluated-project cache, shared across sessions of one manager. Cleared
/// at `begin_build` when the session asks for fresh caches.
struct ProjectCache {
    entries: Mutex<HashMap<PathBuf, Arc<ProjectManifest>>>,
}

impl ProjectCache {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn clear(&self) {
        lock(&self.entries).clear();
    }

    fn get_or_parse(&self, path: &Path) -> Result<Arc<ProjectManifest>, EngineError> {
        let canonical = path.canonicalize()?;
        if let Some(manifest) = lock(&self.entries).get(&canonical) {
            debug!("project cache hit: {}", canonical.display());
            return Ok(Arc::clone(manifest));
        }
        let manifest = Arc::new(drover_project::parse_project_file(&canonical)?);
        lock(&self.entries).insert(canonical, Arc::clone(&manifest));
        Ok(manifest)
    }
}

/// Everything a submission thread needs from its session. Dropped when the
/// session ends; the lock is released explicitly in `end_build` so release
/// does not depend on stray `Arc` clones.
pub(crate) struct SessionCore {
    pub(crate) params: BuildParameters,
    pub(crate) node_manager: Arc<NodeManager>,
    cache: Arc<ProjectCache>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    lock: Mutex<Option<WorkDirLock>>,
}

impl SessionCore {
    /// Deliver one event to every forwarding logger whose verbosity admits
    /// it, tagged with the submission it belongs to.
    pub(crate) fn dispatch(&self, id: SubmissionId, event: &BuildEvent) {
        for record in &self.params.forwarding_loggers {
            if event.visible_at(record.spec.verbosity) {
                record.sink.log_event(id, event);
            }
        }
    }

    pub(crate) fn evaluate_project(
        &self,
        path: &Path,
    ) -> Result<Arc<ProjectManifest>, EngineError> {
        self.cache.get_or_parse(path)
    }

    pub(crate) fn track_thread(&self, handle: JoinHandle<()>) {
        lock(&self.threads).push(handle);
    }
}

/// The build engine's session front door.
///
/// One session may be open at a time (`begin_build` rejects nesting); within
/// a session any number of build requests can be pended and executed
/// asynchronously on engine-owned threads. `end_build` joins them all and
/// tears down the worker-node pool.
pub struct BuildManager {
    name: String,
    next_submission_id: AtomicU32,
    cache: Arc<ProjectCache>,
    session: Mutex<Option<Arc<SessionCore>>>,
}

impl BuildManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_submission_id: AtomicU32::new(0),
            cache: Arc::new(ProjectCache::new()),
            session: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a build session. The internal node-management objects only exist
    /// from this point on.
    pub fn begin_build(&self, params: BuildParameters) -> Result<(), EngineError> {
        let mut session = lock(&self.session);
        if session.is_some() {
            return Err(EngineError::NestedSession);
        }

        std::fs::create_dir_all(&params.work_dir)?;
        let work_lock = WorkDirLock::acquire(&params.work_dir.join("engine.lock"))?;

        if params.reset_caches {
            self.cache.clear();
        }

        let node_manager = Arc::new(NodeManager::new(&params));
        info!(
            "build session opened for '{}' (max {} nodes, in-proc {})",
            self.name,
            params.max_node_count,
            if params.disable_in_proc_node {
                "disabled"
            } else {
                "enabled"
            }
        );

        *session = Some(Arc::new(SessionCore {
            params,
            node_manager,
            cache: Arc::clone(&self.cache),
            threads: Mutex::new(Vec::new()),
            lock: Mutex::new(Some(work_lock)),
        }));
        Ok(())
    }

    /// Enqueue a build request in the open session. The returned submission
    /// is inert until `execute_async` is called on it.
    pub fn pend_build_request(
        &self,
        request: BuildRequest,
    ) -> Result<Arc<BuildSubmission>, EngineError> {
        let core = self.active_session().ok_or(EngineError::NoSession)?;
        let id = SubmissionId(self.next_submission_id.fetch_add(1, Ordering::SeqCst) + 1);
        debug!("pended build request {id} for {}", request.project_path.display());
        Ok(BuildSubmission::pend(id, request, core))
    }

    /// Close the session: wait for in-flight submissions, tear down worker
    /// nodes, release the work-dir lock. A new session may be opened
    /// afterwards.
    pub fn end_build(&self) -> Result<(), EngineError> {
        let core = {
            let mut session = lock(&self.session);
            session.take().ok_or(EngineError::NoSession)?
        };

        let handles = std::mem::take(&mut *lock(&core.threads));
        for handle in handles {
            if handle.join().is_err() {
                warn!("a submission thread panicked past the engine's fault barrier");
            }
        }

        core.node_manager.shutdown();
        lock(&core.lock).take();
        info!("build session closed for '{}'", self.name);
        Ok(())
    }

    /// Node manager of the open session, if any. Internal entry point for
    /// the engine-compatibility shim; layout guarded by
    /// [`ENGINE_API_MAJOR`](crate::ENGINE_API_MAJOR).
    #[doc(hidden)]
    pub fn node_manager_for_shim(&self) -> Option<Arc<NodeManager>> {
        lock(&self.session)
            .as_ref()
            .map(|core| Arc::clone(&core.node_manager))
    }

    fn active_session(&self) -> Option<Arc<SessionCore>> {
        lock(&self.session).as_ref().map(Arc::clone)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
