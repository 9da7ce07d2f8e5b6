//! threadrun - turn orchestration for tool-using language model agents
//!
//! Drives multi-turn conversations between a model and a set of tools,
//! persisting messages, working memory and run snapshots in SQLite.

mod config;
mod conversation;
mod db;
mod llm;
mod memory;
mod recorder;
mod runtime;
mod tools;

use clap::{Parser, Subcommand};
use config::Config;
use db::{Database, RunStatus};
use llm::ToolChoice;
use recorder::RunRecorder;
use runtime::{ModelConfig, RunController, Session, SessionConfig, TurnConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tools::ToolCatalog;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "threadrun", version, about = "Run tool-using model conversations")]
struct Cli {
    /// Database path (overrides THREADRUN_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Give a conversation an objective and run it
    Run {
        objective: String,
        /// Continue an existing conversation instead of creating one
        #[arg(long)]
        thread: Option<String>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        model: Option<String>,
        /// auto, none, required or function:<name>
        #[arg(long)]
        tool_choice: Option<ToolChoice>,
    },
    /// Halt a conversation at its next checkpoint
    Stop {
        id: String,
        #[arg(long, default_value = "stopping")]
        status: RunStatus,
    },
    /// Lift a halt
    Resume { id: String },
    /// Print messages, working memory and recent runs
    Show { id: String },
    /// List conversations
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threadrun=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Command::Run {
            objective,
            thread,
            max_iterations,
            model,
            tool_choice,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(tool_choice) = tool_choice {
                config.tool_choice = tool_choice;
            }
            let budget = max_iterations.or(config.max_iterations);
            run(db, &config, &objective, thread.as_deref(), budget).await?;
        }
        Command::Stop { id, status } => {
            let snapshot = RunRecorder::new(db).request_stop(&id, status)?;
            println!("{id}: {} (snapshot {})", snapshot.status, snapshot.id);
        }
        Command::Resume { id } => {
            let snapshot = RunRecorder::new(db).resume(&id)?;
            println!("{id}: {} (snapshot {})", snapshot.status, snapshot.id);
        }
        Command::Show { id } => show(&db, &id)?,
        Command::List => {
            let log = conversation::ConversationLog::new(db);
            for conv in log.conversations()? {
                println!(
                    "{}  {}  {} messages",
                    conv.id,
                    conv.updated_at.to_rfc3339(),
                    conv.messages.len()
                );
            }
        }
    }

    Ok(())
}

async fn run(
    db: Database,
    config: &Config,
    objective: &str,
    thread: Option<&str>,
    max_iterations: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let llm = llm::build_service(&config.llm)?;
    let catalog = Arc::new(ToolCatalog::standard());
    tracing::info!(tools = ?catalog.names(), model = %config.model, "Tool catalog ready");
    let controller = Arc::new(RunController::new(db, catalog, llm));

    let mut model = ModelConfig::new(config.model.clone());
    model.temperature = config.temperature;
    model.max_tokens = config.max_tokens;
    model.tool_choice = config.tool_choice.clone();
    let mut turn = TurnConfig::new(model);
    turn.system_prompt.clone_from(&config.system_prompt);

    let mut session_config = SessionConfig::new(turn);
    session_config
        .continue_instructions
        .clone_from(&config.continue_instructions);
    let session = Session::new(controller, session_config);

    let stop = session.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current step");
            stop.cancel();
        }
    });

    let conversation_id = session.init(thread, objective).await?;
    let report = session.run(&conversation_id, max_iterations).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn show(db: &Database, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log = conversation::ConversationLog::new(db.clone());
    let memory = memory::MemoryStore::new(db.clone());
    let recorder = RunRecorder::new(db.clone());

    let conv = log.conversation(id)?;
    let runs = recorder.history(id)?;
    let recent: Vec<_> = runs
        .iter()
        .rev()
        .take(5)
        .map(|run| {
            serde_json::json!({
                "id": run.id,
                "status": run.status,
                "created_at": run.created_at,
                "messages": run.messages.len(),
            })
        })
        .collect();

    let view = serde_json::json!({
        "id": conv.id,
        "created_at": conv.created_at,
        "updated_at": conv.updated_at,
        "messages": conv.messages,
        "working_memory": memory.export_all(id)?,
        "halted": recorder.halt_status(id)?,
        "last_status": recorder.latest(id)?.map(|run| run.status),
        "pairing_issues": log.check_pairing(id)?.len(),
        "recent_runs": recent,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
