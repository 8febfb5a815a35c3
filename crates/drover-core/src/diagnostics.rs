use std::path::PathBuf;

/// One loaded module of the running process: a stable identity (file name)
/// plus the location it was mapped from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub identity: String,
    pub location: PathBuf,
}

/// Forensic snapshot of the modules currently loaded into this process,
/// deduplicated by identity and sorted by identity for determinism.
///
/// Read-only and restartable; internal faults degrade to a smaller (possibly
/// empty) snapshot instead of an error, since diagnostics must never turn
/// into a process failure of their own.
pub fn snapshot_loaded_modules() -> Vec<LoadedModule> {
    let mut modules = collect_modules();
    modules.sort_by(|a, b| a.identity.cmp(&b.identity));
    modules.dedup_by(|a, b| a.identity == b.identity);
    modules
}

#[cfg(target_os = "linux")]
fn collect_modules() -> Vec<LoadedModule> {
    let Ok(maps) = std::fs::read_to_string("/proc/self/maps") else {
        return fallback_modules();
    };

    let mut modules = Vec::new();
    for line in maps.lines() {
        let mut fields = line.split_whitespace();
        let Some(_address) = fields.next() else {
            continue;
        };
        let Some(perms) = fields.next() else {
            continue;
        };
        // Only executable, file-backed mappings count as loaded modules;
        // pseudo entries ([heap], [vdso], ...) and anonymous JIT pages have
        // no backing location and are excluded.
        if !perms.contains('x') {
            continue;
        }
        let Some(path_start) = line.find('/') else {
            continue;
        };
        let path = &line[path_start..];
        if path.ends_with(" (deleted)") {
            continue;
        }
        let location = PathBuf::from(path);
        let Some(identity) = location
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
        else {
            continue;
        };
        modules.push(LoadedModule { identity, location });
    }

    if modules.is_empty() {
        return fallback_modules();
    }
    modules
}

#[cfg(not(target_os = "linux"))]
fn collect_modules() -> Vec<LoadedModule> {
    fallback_modules()
}

/// The current executable is the one module every process is guaranteed to
/// have loaded.
fn fallback_modules() -> Vec<LoadedModule> {
    let Ok(exe) = std::env::current_exe() else {
        return Vec::new();
    };
    let Some(identity) = exe
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
    else {
        return Vec::new();
    };
    vec![LoadedModule {
        identity,
        location: exe,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_non_empty_and_sorted() {
        let modules = snapshot_loaded_modules();
        assert!(!modules.is_empty());
        for pair in modules.windows(2) {
            assert!(pair[0].identity < pair[1].identity);
        }
    }

    #[test]
    fn snapshot_is_deduplicated_by_identity() {
        let modules = snapshot_loaded_modules();
        let mut identities: Vec<_> = modules.iter().map(|m| m.identity.clone()).collect();
        identities.dedup();
        assert_eq!(identities.len(), modules.len());
    }

    #[test]
    fn snapshot_is_restartable() {
        assert_eq!(snapshot_loaded_modules(), snapshot_loaded_modules());
    }

    #[test]
    fn locations_are_absolute_paths() {
        for module in snapshot_loaded_modules() {
            assert!(module.location.is_absolute());
        }
    }

    #[test]
    fn snapshot_contains_the_test_executable() {
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_string_lossy().into_owned();
        assert!(snapshot_loaded_modules()
            .iter()
            .any(|m| m.identity == name));
    }
}
