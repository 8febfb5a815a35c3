use drover_engine::BuildManager;
use std::path::Path;
use tracing::debug;

/// Engine-internal layout this shim was written against. Bump together with
/// a review of the walked accessor chain whenever the engine is upgraded.
const SUPPORTED_ENGINE_API_MAJOR: u32 = 3;

/// Redirect the engine's worker-node launcher to `path`, process-wide.
///
/// The engine exposes no supported configuration surface for the worker-host
/// executable, so this walks its internal ownership chain instead: manager →
/// node manager → out-of-process launcher → the launcher's process-wide host
/// path. Every link is checked; a missing link (no open session, in-process
/// configuration, unexpected engine layout) or a nonexistent `path` makes
/// the call a no-op returning `false`. The write is the terminal step, so an
/// aborted walk leaves no partial state behind.
///
/// Must run after `begin_build` (the walked objects exist only then) and
/// before the first worker node spawns; nodes launch lazily on the first
/// submission, so immediately before submitting is the natural spot. Once
/// applied, the override outlives the session and governs every later worker
/// launch in the process; reapplying replaces it (last write wins).
///
/// Failure here is deliberately silent and never fails the build. Review
/// note: that silence also hides a genuinely misconfigured host path, in
/// which case the build proceeds on the engine's default host.
pub fn override_worker_host(manager: &BuildManager, path: &Path) -> bool {
    if !path.exists() {
        debug!(
            "worker host override skipped: {} does not exist",
            path.display()
        );
        return false;
    }
    if drover_engine::ENGINE_API_MAJOR != SUPPORTED_ENGINE_API_MAJOR {
        debug!(
            "worker host override skipped: engine layout {} unsupported (shim knows {})",
            drover_engine::ENGINE_API_MAJOR,
            SUPPORTED_ENGINE_API_MAJOR
        );
        return false;
    }

    let Some(node_manager) = manager.node_manager_for_shim() else {
        debug!("worker host override skipped: no node manager (session not begun?)");
        return false;
    };
    let Some(provider) = node_manager.out_of_proc_provider_for_shim() else {
        debug!("worker host override skipped: no out-of-process launcher");
        return false;
    };

    provider.set_current_host(path);
    debug!("worker host overridden to {}", path.display());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_engine::node::out_of_proc::current_worker_host;
    use drover_engine::BuildParameters;
    use std::sync::Mutex;

    // The override target is process-wide; serialize every test that reads
    // or writes it so the parallel test runner cannot interleave them.
    static HOST_STATE: Mutex<()> = Mutex::new(());

    fn begin(manager: &BuildManager, work_dir: &Path, out_of_proc: bool) {
        manager
            .begin_build(BuildParameters {
                disable_in_proc_node: out_of_proc,
                work_dir: work_dir.to_path_buf(),
                ..BuildParameters::default()
            })
            .unwrap();
    }

    #[test]
    fn nonexistent_path_is_rejected_without_touching_state() {
        let _guard = HOST_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let manager = BuildManager::new("shim-test");
        begin(&manager, dir.path(), true);

        let before = current_worker_host();
        assert!(!override_worker_host(
            &manager,
            &dir.path().join("no-such-host")
        ));
        assert_eq!(current_worker_host(), before);

        manager.end_build().unwrap();
    }

    #[test]
    fn walk_stops_before_begin_and_without_a_launcher() {
        let _guard = HOST_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let host = dir.path().join("host");
        std::fs::write(&host, "").unwrap();

        // No session yet: the first link of the chain is missing.
        let manager = BuildManager::new("shim-test");
        let before = current_worker_host();
        assert!(!override_worker_host(&manager, &host));
        assert_eq!(current_worker_host(), before);

        // In-process session: the node manager has no external launcher.
        begin(&manager, dir.path(), false);
        assert!(!override_worker_host(&manager, &host));
        assert_eq!(current_worker_host(), before);
        manager.end_build().unwrap();
    }

    #[test]
    fn successful_override_is_last_write_wins() {
        let _guard = HOST_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first-host");
        let second = dir.path().join("second-host");
        std::fs::write(&first, "").unwrap();
        std::fs::write(&second, "").unwrap();

        let manager = BuildManager::new("shim-test");
        begin(&manager, dir.path(), true);

        assert!(override_worker_host(&manager, &first));
        assert_eq!(current_worker_host().as_deref(), Some(first.as_path()));

        assert!(override_worker_host(&manager, &second));
        assert_eq!(current_worker_host().as_deref(), Some(second.as_path()));

        manager.end_build().unwrap();
    }
}
