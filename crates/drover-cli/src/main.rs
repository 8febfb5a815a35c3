mod console_logger;

use console_logger::ConsoleLogger;
use drover_core::{
    discover_installs, install_signal_handler, select_install, BuildSessionCoordinator,
    BuildStatus, EngineInstall, MuxLogger, SessionConfig,
};
use drover_engine::node::out_of_proc::WORKER_HOST_BIN;
use drover_engine::{EventSink, Verbosity};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;

/// How long a mistakenly relaunched orchestrator idles before exiting, so
/// the stray node shows up in process listings.
const WORKER_GUARD_IDLE: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    // The argv surface of this binary is reserved: the engine relaunches its
    // worker host with node arguments, and if that host resolves to this
    // executable, running a build here would recurse. Idle briefly instead
    // and report failure to the spawning engine.
    if std::env::args().len() > 1 {
        std::thread::sleep(WORKER_GUARD_IDLE);
        return ExitCode::from(EXIT_FAILURE);
    }

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DROVER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let installs = discover_installs();
    let Some(install) = select_install(&installs) else {
        return report_no_install(&installs);
    };
    info!(
        "registered engine {} from {}",
        install.version,
        install.path.display()
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start the async runtime: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    ExitCode::from(runtime.block_on(run_build(install)))
}

async fn run_build(install: EngineInstall) -> u8 {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_FAILURE;
        }
    };
    let project = match drover_project::create_scratch_project(&cwd) {
        Ok(project) => project,
        Err(e) => {
            eprintln!("error: failed to prepare the scratch project: {e}");
            return EXIT_FAILURE;
        }
    };

    let mux = Arc::new(MuxLogger::new(Verbosity::Diagnostic));
    let mut coordinator = BuildSessionCoordinator::new("drover", Arc::clone(&mux));

    let mut config = SessionConfig::new(cwd.join("projects"));
    config.disable_in_proc_node = true;
    config.node_reuse = false;
    config.max_node_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    config.worker_host_override = Some(worker_host(&install));
    config.install = Some(install);

    let sinks = vec![Arc::new(ConsoleLogger::new(Verbosity::Normal)) as Arc<dyn EventSink>];

    let outcome = match coordinator
        .run_session(config, &project, &["restore"], BTreeMap::new(), sinks)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_FAILURE;
        }
    };

    match outcome.status {
        BuildStatus::Succeeded => EXIT_SUCCESS,
        BuildStatus::Failed | BuildStatus::Aborted => {
            if let Some(description) = outcome
                .description
                .as_ref()
                .filter(|description| !description.is_empty())
            {
                eprintln!("{description}");
                println!();
                println!("Loaded modules:");
                for module in &outcome.loaded_modules {
                    println!("{} / {}", module.identity, module.location.display());
                }
            }
            EXIT_FAILURE
        }
    }
}

/// The executable worker nodes relaunch under: `DROVER_WORKER_HOST` when the
/// operator sets it, else the host bundled with the registered installation.
/// If the path turns out not to exist, the override is skipped and the build
/// proceeds on the engine default.
fn worker_host(install: &EngineInstall) -> PathBuf {
    if let Ok(host) = std::env::var("DROVER_WORKER_HOST") {
        if !host.trim().is_empty() {
            return PathBuf::from(host);
        }
    }
    install.path.join("bin").join(WORKER_HOST_BIN)
}

fn report_no_install(installs: &[EngineInstall]) -> ExitCode {
    eprintln!("error: unable to find a compatible engine installation");
    if installs.is_empty() {
        eprintln!(
            "no installations were discovered; set DROVER_ENGINE_PATH or install an engine toolset"
        );
    } else {
        println!("Found the following installations:");
        for install in installs {
            println!("Version: {}", install.version);
            println!("Path: {}", install.path.display());
            println!("Origin: {}", install.origin);
            println!("Root: {}", install.root.display());
            println!("-------------------------------------------------------------");
        }
    }
    ExitCode::from(EXIT_FAILURE)
}
