use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ralph_control::{BackendType, ControlConfig, ControlWatcher};
use ralph_executor::Executor;
use ralph_memory::{EventFilter, MemoryStore};
use ralph_orchestrator::Orchestrator;
use ralph_types::{RunStats, Session, SessionConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod process_backend;

use process_backend::ProcessBackend;

#[derive(Parser, Debug)]
#[command(name = "ralph")]
#[command(about = "Dispatches prompts to pluggable AI coding backends across iterations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a session against a control document until exhausted or cancelled.
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, conflicts_with = "prompt_file")]
        prompt: Option<String>,
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        sandbox: PathBuf,
        #[arg(long)]
        max_iterations: Option<u64>,
        #[arg(long, value_parser = parse_duration_secs)]
        timeout: Option<std::time::Duration>,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Parse and validate a control document without running a session.
    ValidateConfig { path: PathBuf },
    #[command(subcommand)]
    Memory(MemoryCommand),
}

#[derive(Subcommand, Debug)]
enum MemoryCommand {
    /// Full-text search over a session's recorded turns.
    Search {
        session_id: String,
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// Turn, event, and summary counts for a session.
    Stats {
        session_id: String,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

fn parse_duration_secs(s: &str) -> Result<std::time::Duration, String> {
    s.parse::<u64>()
        .map(std::time::Duration::from_secs)
        .map_err(|_| "timeout must be a whole number of seconds".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            prompt,
            prompt_file,
            sandbox,
            max_iterations,
            timeout,
            state_dir,
        } => run(config, prompt, prompt_file, sandbox, max_iterations, timeout, state_dir).await,
        Command::ValidateConfig { path } => validate_config(path).await,
        Command::Memory(MemoryCommand::Search { session_id, query, limit, state_dir }) => {
            memory_search(session_id, query, limit, state_dir).await
        }
        Command::Memory(MemoryCommand::Stats { session_id, state_dir }) => {
            memory_stats(session_id, state_dir).await
        }
    }
}

fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var("RALPH_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".ralph")
}

async fn build_backend_registry(config: &ControlConfig) -> ralph_backend::BackendRegistry {
    let registry = ralph_backend::BackendRegistry::new();
    for (name, backend_cfg) in &config.backends {
        if !backend_cfg.enabled {
            continue;
        }
        match backend_cfg.backend_type {
            BackendType::Internal => {
                tracing::warn!(backend = %name, "no built-in internal backend implementation; skipping");
            }
            BackendType::External => match ProcessBackend::new(name.clone(), backend_cfg) {
                Some(backend) => registry.register(Arc::new(backend)).await,
                None => tracing::warn!(backend = %name, "external backend has no command configured; skipping"),
            },
        }
    }
    registry
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config_path: PathBuf,
    prompt: Option<String>,
    prompt_file: Option<PathBuf>,
    sandbox: PathBuf,
    max_iterations: Option<u64>,
    overall_timeout: Option<std::time::Duration>,
    state_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let state_dir = resolve_state_dir(state_dir);
    let _guards = ralph_observability::init_logging(&state_dir.join("logs"))
        .context("failed to initialize logging")?;

    let prompt_text = match (&prompt, &prompt_file) {
        (Some(p), None) => p.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt file {}", path.display()))?,
        (Some(_), Some(_)) => anyhow::bail!("pass only one of --prompt or --prompt-file"),
        (None, None) => anyhow::bail!("one of --prompt or --prompt-file is required"),
    };

    let watcher = ControlWatcher::start(&config_path, None)
        .await
        .with_context(|| format!("failed to load control document at {}", config_path.display()))?;
    let initial_config = watcher.current().await;

    let registry = Arc::new(build_backend_registry(&initial_config).await);
    let orchestrator = Arc::new(Orchestrator::new(registry.clone(), initial_config.clone()));

    let reload_orchestrator = orchestrator.clone();
    let (_, mut config_updates) = watcher.subscribe().await;
    tokio::spawn(async move {
        while let Some(cfg) = config_updates.recv().await {
            info!("control document changed, applying updated policy");
            reload_orchestrator.update_config(cfg);
        }
    });

    let memory = if initial_config.memory.enabled {
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("failed to create state directory {}", state_dir.display()))?;
        let db_path = state_dir.join("memory.sqlite3");
        Some(Arc::new(MemoryStore::open(&db_path).await.context("failed to open memory store")?))
    } else {
        None
    };

    let executor = Executor::new(orchestrator, memory);

    let session_config = SessionConfig {
        prompt: prompt_text,
        prompt_file,
        sandbox_path: sandbox,
        overall_timeout,
        max_iterations,
    };
    let mut session = Session::new(session_config);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down after the current iteration");
            signal_cancel.cancel();
        }
    });

    let summary = executor.run(&mut session, cancel).await?;
    watcher.stop().await;

    info!(
        iterations = summary.iterations_run,
        stop_reason = ?summary.stop_reason,
        total_tokens = session.total_tokens,
        total_cost = session.total_cost,
        "session finished"
    );
    println!(
        "ran {} iteration(s), stopped because {:?}. total tokens: {}, total cost: {:.4}",
        summary.iterations_run, summary.stop_reason, session.total_tokens, session.total_cost
    );

    Ok(())
}

async fn validate_config(path: PathBuf) -> anyhow::Result<()> {
    let bytes = std::fs::read(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = ControlConfig::parse(&bytes).context("failed to parse control document")?;
    match config.validate() {
        Ok(()) => {
            println!("{}: valid ({} backend(s) configured)", path.display(), config.backends.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: invalid: {e}", path.display());
            std::process::exit(1);
        }
    }
}

async fn memory_search(
    session_id: String,
    query: String,
    limit: u32,
    state_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let state_dir = resolve_state_dir(state_dir);
    let store = MemoryStore::open(state_dir.join("memory.sqlite3"))
        .await
        .context("failed to open memory store")?;

    let turns = store.search_turns(&session_id, &query, limit).await?;
    for turn in &turns {
        println!("iteration {} [{}/{}]: {}", turn.iteration, turn.backend, turn.model, turn.prompt);
    }

    let summaries = store.search_summaries(&session_id, &query, limit).await?;
    for summary in &summaries {
        println!(
            "summary (iterations {}-{}): {}",
            summary.start_iteration, summary.end_iteration, summary.summary
        );
    }

    let events = store
        .search_events(&EventFilter { session_id: session_id.clone(), data_substring: Some(query), ..Default::default() })
        .await?;
    for event in &events {
        println!("event at iteration {}: {:?}", event.iteration, event.event_type);
    }

    Ok(())
}

async fn memory_stats(session_id: String, state_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let state_dir = resolve_state_dir(state_dir);
    let store = MemoryStore::open(state_dir.join("memory.sqlite3"))
        .await
        .context("failed to open memory store")?;

    let turns = store.get_turns_in_range(&session_id, 0, i64::MAX as u64).await?;
    let events = store
        .search_events(&EventFilter { session_id: session_id.clone(), ..Default::default() })
        .await?;
    let summaries = store.list_summaries(&session_id, None, u32::MAX).await?;

    let stats = RunStats::from_turns(&turns);

    println!("session {session_id}");
    println!("  iterations: {}", stats.total_iterations);
    println!("  events:     {}", events.len());
    println!("  summaries:  {}", summaries.len());
    println!("  tokens:     {}", stats.total_tokens);
    println!("  cost:       {:.4}", stats.total_cost);
    for (backend, usage) in &stats.per_backend {
        println!(
            "  {backend}: {} turn(s), {} error(s), cost {:.4}",
            usage.turns, usage.errors, usage.cost
        );
    }

    Ok(())
}
