mod doctor;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strata_core::config::{
    AppConfig, DatabaseConfig, GraphConfig, ModelConfig, RetrievalConfig, RouterConfig,
    RouterKind,
};
use strata_core::event::{EventBus, RunEvent};
use strata_core::format::{ExpectedFormat, FormatHints};
use strata_core::traits::Router;
use strata_core::types::Question;

use strata_agent::batch::{read_questions, write_records};
use strata_agent::{
    BatchRunner, Collaborators, GraphRunner, KeywordRouter, LlmAnswerModel, LlmQueryGenerator,
    LlmRouter, OutputRecord,
};
use strata_docs::DocIndex;
use strata_llm::LlmClient;
use strata_sql::{SqlCleaner, SqliteExecutor};

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Hybrid document + SQL question answering over retail data"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "strata.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question and print the result as JSON
    Ask {
        /// The question text
        #[arg(trailing_var_arg = true, required = true)]
        question: Vec<String>,
        /// Expected answer format (int, float, str, list[str], list[{name:type}])
        #[arg(long, default_value = "free")]
        format: String,
        /// Identifier echoed in the output
        #[arg(long, default_value = "cli")]
        id: String,
        /// Unit to strip from the answer before parsing (e.g. "%", "units")
        #[arg(long)]
        unit: Option<String>,
        /// Round float answers to this many decimal places
        #[arg(long)]
        decimals: Option<u32>,
        /// How far a float may sit from a whole number and still count as an integer
        #[arg(long)]
        tolerance: Option<f64>,
        /// Print node progress to stderr
        #[arg(long)]
        progress: bool,
    },
    /// Answer every question in a JSONL file
    Run {
        /// Input JSONL, one {"id","question","format_hint"} object per line
        input: PathBuf,
        /// Output JSONL (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Override graph.concurrency
        #[arg(long)]
        concurrency: Option<usize>,
        /// Print node progress to stderr
        #[arg(long)]
        progress: bool,
    },
    /// Show current configuration
    Config,
    /// Run system health checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strata=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "strata", &mut io::stdout());
        return Ok(());
    }

    let (config, base_dir) = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Doctor => {
            println!("strata doctor");
            println!();
            doctor::run_doctor(&config, &base_dir).await;
        }
        Commands::Ask {
            question,
            format,
            id,
            unit,
            decimals,
            tolerance,
            progress,
        } => {
            let events = Arc::new(EventBus::default());
            let runner = build_runner(&config, &base_dir, events.clone())?;
            if progress {
                spawn_progress_printer(&events);
            }

            let expected = ExpectedFormat::parse_hint(&format);
            let hints = FormatHints {
                tolerance,
                unit,
                decimals,
            };
            let question = Question::new(id, question.join(" "), expected).with_hints(hints);

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let output = runner.run_with_cancel(question, &cancel).await;
            let succeeded = output.is_success();
            let record = OutputRecord::from(output);
            println!("{}", serde_json::to_string_pretty(&record)?);
            if !succeeded {
                std::process::exit(1);
            }
        }
        Commands::Run {
            input,
            output,
            concurrency,
            progress,
        } => {
            let file = File::open(&input)
                .map_err(|e| anyhow::anyhow!("cannot open {}: {}", input.display(), e))?;
            let questions = read_questions(BufReader::new(file))?;
            info!(count = questions.len(), input = %input.display(), "Loaded questions");

            let events = Arc::new(EventBus::default());
            let runner = Arc::new(build_runner(&config, &base_dir, events.clone())?);
            if progress {
                spawn_progress_printer(&events);
            }

            let limit = concurrency.unwrap_or(config.graph.concurrency).max(1);
            let batch = BatchRunner::new(runner, limit);

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let outputs = batch.run_all(questions, &cancel).await;
            let succeeded = outputs.iter().filter(|o| o.is_success()).count();
            let total = outputs.len();

            match output {
                Some(path) => {
                    let file = File::create(&path)
                        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))?;
                    let mut writer = BufWriter::new(file);
                    write_records(&mut writer, outputs)?;
                    writer.flush()?;
                    info!(output = %path.display(), "Wrote results");
                }
                None => {
                    let stdout = io::stdout();
                    let mut lock = stdout.lock();
                    write_records(&mut lock, outputs)?;
                    lock.flush()?;
                }
            }

            eprintln!("{} of {} questions answered", succeeded, total);
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Load the config file, falling back to defaults when it does not exist.
/// Returns the config and the directory relative paths resolve against.
fn load_config(path: &Path) -> anyhow::Result<(AppConfig, PathBuf)> {
    if path.exists() {
        let config = AppConfig::load(path)?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        info!(path = %path.display(), "Loaded config");
        return Ok((config, base));
    }

    eprintln!(
        "Warning: {} not found, using defaults (local Ollama model)",
        path.display()
    );
    let config = create_env_config()?;
    Ok((config, PathBuf::from(".")))
}

fn create_env_config() -> anyhow::Result<AppConfig> {
    let model_id = std::env::var("STRATA_MODEL")
        .unwrap_or_else(|_| "phi3.5:3.8b-mini-instruct-q4_K_M".to_string());
    let config = AppConfig {
        model: ModelConfig {
            provider: "ollama".to_string(),
            model_id,
            api_key: None,
            base_url: std::env::var("STRATA_BASE_URL").ok(),
            max_tokens: 1024,
            temperature: 0.0,
            retry: None,
        },
        graph: GraphConfig::default(),
        router: RouterConfig::default(),
        retrieval: RetrievalConfig::default(),
        database: DatabaseConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Wire the concrete collaborators into a graph runner.
fn build_runner(
    config: &AppConfig,
    base_dir: &Path,
    events: Arc<EventBus>,
) -> anyhow::Result<GraphRunner> {
    let llm: Arc<dyn LlmClient> = Arc::from(strata_llm::create_client(&config.model));

    let db_path = config.resolve_path(base_dir, &config.database.path);
    let executor = SqliteExecutor::open(&db_path, config.database.compat_views)?;
    let schema = executor.schema()?;
    info!(path = %db_path.display(), "Database opened");

    let docs_dir = config.resolve_path(base_dir, &config.retrieval.docs_dir);
    let index = DocIndex::load_dir(&docs_dir, config.retrieval.top_k)?;

    let router: Arc<dyn Router> = match config.router.kind {
        RouterKind::Keyword => Arc::new(KeywordRouter::new()),
        RouterKind::Llm => Arc::new(LlmRouter::new(llm.clone(), config.model.clone())),
    };

    let collaborators = Collaborators {
        router,
        retriever: Arc::new(index),
        generator: Arc::new(LlmQueryGenerator::new(
            llm.clone(),
            config.model.clone(),
            schema,
        )),
        cleaner: Arc::new(SqlCleaner::new()),
        executor: Arc::new(executor),
        answer_model: Arc::new(LlmAnswerModel::new(llm, config.model.clone())),
    };

    Ok(GraphRunner::new(collaborators, &config.graph).with_events(events))
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling runs in flight");
            cancel.cancel();
        }
    });
}

fn spawn_progress_printer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut rx).await {
            match event {
                RunEvent::RunStarted { question_id } => {
                    eprintln!("[{}] started", question_id);
                }
                RunEvent::Routed {
                    question_id,
                    mode,
                    fallback,
                } => {
                    let note = if fallback { " (fallback)" } else { "" };
                    eprintln!("[{}] route: {}{}", question_id, mode, note);
                }
                RunEvent::NodeStarted { .. } => {}
                RunEvent::NodeFinished {
                    question_id,
                    node,
                    outcome,
                    elapsed_ms,
                } => {
                    eprintln!(
                        "[{}] {}: {} ({}ms)",
                        question_id,
                        node,
                        truncate(&outcome, 120),
                        elapsed_ms
                    );
                }
                RunEvent::RepairScheduled {
                    question_id,
                    attempt,
                    target,
                } => {
                    eprintln!("[{}] repair {} -> {}", question_id, attempt, target);
                }
                RunEvent::RunFinished {
                    question_id,
                    succeeded,
                    repair_attempts,
                } => {
                    let status = if succeeded { "ok" } else { "failed" };
                    eprintln!(
                        "[{}] {} after {} repairs",
                        question_id, status, repair_attempts
                    );
                }
            }
        }
    });
}

/// Next event for a display-only subscriber. Lagging drops the missed
/// events and keeps going; `None` once the bus is gone.
async fn next_event(rx: &mut broadcast::Receiver<RunEvent>) -> Option<RunEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Progress output fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_survives_a_lagged_receiver() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for n in 0..5 {
            bus.publish(RunEvent::RunStarted {
                question_id: format!("q{}", n),
            });
        }

        match next_event(&mut rx).await {
            Some(RunEvent::RunStarted { question_id }) => assert_eq!(question_id, "q3"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(next_event(&mut rx).await.is_some());

        drop(bus);
        assert!(next_event(&mut rx).await.is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
