use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use dispatch_core::config::DispatchConfig;
use dispatch_core::current_context;
use dispatch_core::execution::{SharedContext, TokioExecutionContext, job};
use dispatch_core::logging::init_logging;
use dispatch_core::models::{DispatchError, DispatchErrorKind, DispatchResult};
use dispatch_core::orchestration::{
    CompletionSignal, DebouncedCanceller, GroupTask, OperationGraph, TaskGroupCoordinator, TaskGroupHandle,
};
use tokio::runtime::Runtime;

#[derive(Parser)]
#[command(name = "dispatch-demo", about = "Replays task group and debounce scenarios")]
struct Cli {
    /// JSON config file; `DISPATCH_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Three long-running tasks joined by a finalizer.
    Group {
        #[arg(long, default_value_t = 1000)]
        unit_ms: u64,
    },
    /// Debounced search over a burst of keystrokes.
    Search {
        #[arg(long, value_delimiter = ',', default_values = ["s", "sw", "swi", "swif", "swift"])]
        queries: Vec<String>,
        #[arg(long, default_value_t = 80)]
        interval_ms: u64,
    },
    /// Serial queue with async and blocking submissions.
    Serial,
    /// Concurrent queue with jobs of different lengths.
    Concurrent,
    /// Barrier jobs between two batches on a concurrent queue.
    Barrier,
    /// Two operations feeding a combining operation.
    Graph,
    /// Reports writes to a file on the main queue until the duration elapses.
    Watch {
        path: PathBuf,
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
    },
    /// Awaits a slow result while the caller keeps going.
    Async {
        #[arg(long, default_value_t = 2000)]
        delay_ms: u64,
    },
    /// Prints the effective configuration.
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(kind = ?error.kind, message = %error.message, "demo failed");
            eprintln!("dispatch-demo: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> DispatchResult<()> {
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.log_filter)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            DispatchError::new(
                DispatchErrorKind::Internal,
                format!("failed to create tokio runtime: {error}"),
            )
        })?;
    let main: SharedContext = Arc::new(TokioExecutionContext::serial("main", runtime.handle()));
    let workers: SharedContext = Arc::new(TokioExecutionContext::worker(
        "workers",
        runtime.handle(),
        config.worker_max_concurrency,
    )?);

    match cli.command {
        Command::Group { unit_ms } => {
            group_demo(&runtime, &config, &main, &workers, Duration::from_millis(unit_ms))
        }
        Command::Search {
            queries,
            interval_ms,
        } => {
            search_demo(&runtime, &config, &main, queries, Duration::from_millis(interval_ms));
            Ok(())
        }
        Command::Serial => serial_demo(&main),
        Command::Concurrent => concurrent_demo(&runtime, &config, &workers),
        Command::Barrier => barrier_demo(&runtime),
        Command::Graph => graph_demo(&runtime, &config, &workers),
        Command::Watch {
            path,
            duration_secs,
        } => watch_demo(&runtime, &main, &path, Duration::from_secs(duration_secs)),
        Command::Async { delay_ms } => async_demo(&runtime, Duration::from_millis(delay_ms)),
        Command::Config => {
            let rendered = serde_json::to_string_pretty(&config).map_err(|error| {
                DispatchError::new(DispatchErrorKind::Internal, error.to_string())
            })?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> DispatchResult<DispatchConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|error| {
                DispatchError::new(
                    DispatchErrorKind::InvalidInput,
                    format!("failed to read config '{}': {error}", path.display()),
                )
            })?;
            DispatchConfig::from_json_str(&raw)?
        }
        None => DispatchConfig::default(),
    };
    config.with_env_overrides()
}

fn wait(runtime: &Runtime, config: &DispatchConfig, handle: &TaskGroupHandle) -> DispatchResult<()> {
    runtime.block_on(handle.wait_for_completion(config.group_timeout()))
}

fn context_name() -> String {
    current_context()
        .map(|label| label.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Completes `signal`, logging a rejected completion instead of failing the demo.
fn report_completion(signal: &CompletionSignal, task: usize) -> bool {
    match signal.complete() {
        Ok(()) => true,
        Err(error) => {
            tracing::error!(task, kind = ?error.kind, message = %error.message, "completion rejected");
            false
        }
    }
}

fn group_demo(
    runtime: &Runtime,
    config: &DispatchConfig,
    main: &SharedContext,
    workers: &SharedContext,
    unit: Duration,
) -> DispatchResult<()> {
    let tasks = [3u32, 2, 1]
        .into_iter()
        .enumerate()
        .map(|(index, units)| {
            let number = index + 1;
            let main = main.clone();
            GroupTask::new(workers.clone(), move |signal| {
                main.submit_after(
                    job(move || {
                        tracing::info!(
                            task = number,
                            context = %context_name(),
                            "long running task finished; enabling button"
                        );
                        report_completion(&signal, number);
                    }),
                    unit * units,
                );
            })
        })
        .collect();

    let background: SharedContext = Arc::new(TokioExecutionContext::concurrent(
        "background",
        runtime.handle(),
    ));
    let label_context = main.clone();
    let handle = TaskGroupCoordinator::run(
        tasks,
        move || {
            tracing::info!(context = %context_name(), "all tasks finished");
            label_context.submit(job(|| {
                tracing::info!(context = %context_name(), "loading label set to done");
            }));
        },
        background,
    );

    wait(runtime, config, &handle)?;
    // Flushes the label update queued on main by the finalizer.
    main.submit_and_wait(job(|| {}))
}

fn search_demo(
    runtime: &Runtime,
    config: &DispatchConfig,
    main: &SharedContext,
    queries: Vec<String>,
    interval: Duration,
) {
    let debouncer = DebouncedCanceller::new();
    for query in queries {
        tracing::info!(query = %query, "search text changed");
        let request = query.clone();
        debouncer.submit(
            "search",
            move || tracing::info!(query = %request, "run API call"),
            config.debounce_delay(),
            main.as_ref(),
        );
        std::thread::sleep(interval);
        if debouncer.is_cancelled(&"search") {
            tracing::debug!(query = %query, "previous search request cancelled");
        }
    }

    runtime.block_on(tokio::time::sleep(config.debounce_delay() + interval));
}

fn serial_demo(main: &SharedContext) -> DispatchResult<()> {
    main.submit(job(|| tracing::info!("serial queue test 1")));
    main.submit(job(|| {
        std::thread::sleep(Duration::from_secs(1));
        tracing::info!("serial queue test 2");
    }));
    main.submit_and_wait(job(|| tracing::info!("serial queue test 3")))?;
    main.submit_and_wait(job(|| tracing::info!("serial queue test 4")))
}

fn concurrent_demo(
    runtime: &Runtime,
    config: &DispatchConfig,
    workers: &SharedContext,
) -> DispatchResult<()> {
    let tasks = [0u64, 2, 1, 0]
        .into_iter()
        .enumerate()
        .map(|(index, seconds)| {
            GroupTask::new(workers.clone(), move |signal| {
                std::thread::sleep(Duration::from_secs(seconds));
                tracing::info!(test = index + 1, "concurrent queue test");
                report_completion(&signal, index + 1);
            })
        })
        .collect();
    let handle = TaskGroupCoordinator::run(tasks, || {}, workers.clone());
    wait(runtime, config, &handle)
}

fn barrier_demo(runtime: &Runtime) -> DispatchResult<()> {
    let queue: SharedContext = Arc::new(TokioExecutionContext::concurrent(
        "barrier",
        runtime.handle(),
    ));
    for index in 1..=3 {
        queue.submit(job(move || tracing::info!(job = index, "async task")));
    }
    for index in 4..=6 {
        queue.submit_barrier(job(move || tracing::info!(job = index, "barrier")));
    }
    for index in 7..=10 {
        queue.submit(job(move || tracing::info!(job = index, "task after barrier")));
    }

    queue.submit_barrier(job(|| {}));
    queue.submit_and_wait(job(|| {}))
}

fn graph_demo(
    runtime: &Runtime,
    config: &DispatchConfig,
    workers: &SharedContext,
) -> DispatchResult<()> {
    let mut graph = OperationGraph::new();
    let first = graph.add("task-1", || tracing::info!("task 1"));
    let second = graph.add("task-2", || tracing::info!("task 2"));
    let combine = graph.add("combine", || tracing::info!("task combine"));
    graph.add_dependency(combine, first)?;
    graph.add_dependency(combine, second)?;

    let handle = graph.submit(workers.clone())?;
    wait(runtime, config, &handle)
}

fn is_write(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any))
}

fn watch_demo(
    runtime: &Runtime,
    main: &SharedContext,
    path: &Path,
    duration: Duration,
) -> DispatchResult<()> {
    let events = Arc::new(AtomicUsize::new(0));
    let handler_main = main.clone();
    let handler_events = events.clone();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) if is_write(&event.kind) => {
                let events = handler_events.clone();
                handler_main.submit(job(move || {
                    let count = events.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(count, context = %context_name(), "event");
                }));
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(error = %error, "watch error"),
        }
    })
    .map_err(|error| {
        DispatchError::new(
            DispatchErrorKind::Internal,
            format!("failed to create watcher: {error}"),
        )
    })?;

    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|error| {
            DispatchError::new(
                DispatchErrorKind::InvalidInput,
                format!("failed to watch '{}': {error}", path.display()),
            )
        })?;
    tracing::info!(path = %path.display(), ?duration, "watching for writes");

    runtime.block_on(tokio::time::sleep(duration));
    drop(watcher);
    main.submit_and_wait(job(|| {}))?;
    tracing::info!(events = events.load(Ordering::SeqCst), "stopped watching");
    Ok(())
}

async fn make(delay: Duration) -> bool {
    tokio::time::sleep(delay).await;
    true
}

fn async_demo(runtime: &Runtime, delay: Duration) -> DispatchResult<()> {
    tracing::info!("task 1");
    let pending = runtime.spawn(async move {
        let result = make(delay).await;
        tracing::info!(result, "task 2");
    });
    tracing::info!("task 3");

    runtime.block_on(pending).map_err(|error| {
        DispatchError::new(
            DispatchErrorKind::Internal,
            format!("async demo task failed: {error}"),
        )
    })
}
