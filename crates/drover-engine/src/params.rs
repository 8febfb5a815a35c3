use crate::events::ForwardingLoggerRecord;
use std::fmt;
use std::path::PathBuf;

fn never_cancelled() -> bool {
    false
}

/// Configuration for one build session, handed to
/// [`BuildManager::begin_build`](crate::BuildManager::begin_build) and
/// discarded when the session ends.
pub struct BuildParameters {
    /// Force every target onto out-of-process worker nodes.
    pub disable_in_proc_node: bool,
    /// Keep worker nodes alive across targets and submissions.
    pub node_reuse: bool,
    /// Upper bound on concurrently live worker nodes.
    pub max_node_count: usize,
    /// Clear the project evaluation cache when the session opens.
    pub reset_caches: bool,
    /// Sinks receiving every event of the session, each at its own verbosity.
    pub forwarding_loggers: Vec<ForwardingLoggerRecord>,
    /// Root of the registered engine installation; source of the bundled
    /// worker-node host executable.
    pub install_root: Option<PathBuf>,
    /// Directory holding the session lock and node scratch state. The engine
    /// owns this directory exclusively between `begin_build` and `end_build`.
    pub work_dir: PathBuf,
    /// Advisory cancellation probe, checked between targets.
    pub cancel_requested: fn() -> bool,
}

impl Default for BuildParameters {
    fn default() -> Self {
        Self {
            disable_in_proc_node: false,
            node_reuse: false,
            max_node_count: 1,
            reset_caches: true,
            forwarding_loggers: Vec::new(),
            install_root: None,
            work_dir: std::env::temp_dir().join("drover-engine"),
            cancel_requested: never_cancelled,
        }
    }
}

impl fmt::Debug for BuildParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildParameters")
            .field("disable_in_proc_node", &self.disable_in_proc_node)
            .field("node_reuse", &self.node_reuse)
            .field("max_node_count", &self.max_node_count)
            .field("reset_caches", &self.reset_caches)
            .field("forwarding_loggers", &self.forwarding_loggers.len())
            .field("install_root", &self.install_root)
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let params = BuildParameters::default();
        assert!(!params.disable_in_proc_node);
        assert!(!params.node_reuse);
        assert_eq!(params.max_node_count, 1);
        assert!(params.reset_caches);
        assert!(params.forwarding_loggers.is_empty());
        assert!(!(params.cancel_requested)());
    }
}
