//! sshq: ask questions about an SSH auth log in plain language.
//!
//! Parses the log into a SQLite table (cached until the log changes), then
//! lets a local Ollama model answer questions by running SQL against it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sq_agent::config::ServiceConfig;
use sq_agent::service::{self, QueryService};
use sq_agent::{AnswerRecord, OllamaClient};
use sq_log_tools::FileLogSource;
use sq_table::{LoadedTable, SchemaFormat};

const DEFAULT_QUESTIONS: &[&str] = &[
    "What are the top 5 attacking IP addresses?",
    "Show me all failed login attempts from yesterday",
    "Are there any signs of brute force attacks?",
    "Which usernames are being targeted most frequently?",
    "How many total login attempts were recorded?",
];

#[derive(Parser, Debug)]
#[command(name = "sshq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file. Defaults are used when omitted.
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build (or reuse) the SQLite table for the configured log.
    Materialize,
    /// Print the table schema with sample values.
    Describe {
        #[arg(long, default_value = "text")]
        format: SchemaFormat,
    },
    /// Run one read-only SQL query and print CSV.
    Sql {
        #[arg(value_name = "SQL")]
        sql: String,
    },
    /// Answer one question and print the answer record as JSON.
    Ask {
        #[arg(value_name = "QUESTION", required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Answer several questions (the standard security set by default).
    RunQuestions {
        /// Write the JSON array here instead of stdout.
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
        #[arg(value_name = "QUESTION")]
        questions: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    // ── Load config ─────────────────────────────────────────────
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::from_file(&path.to_string_lossy())
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    config.apply_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log = %config.data.log_path,
        table = %config.data.table_path.display(),
        "sshq starting"
    );

    match cli.command {
        Command::Materialize => {
            let (table, stale) = service::materialize(&config, &FileLogSource).await?;
            println!(
                "{} rows in {} ({})",
                table.row_count,
                table.path.display(),
                if stale {
                    "stale"
                } else if table.rebuilt {
                    "rebuilt"
                } else {
                    "up to date"
                }
            );
        }
        Command::Describe { format } => {
            let loaded = load(&config).await?;
            println!("{}", loaded.schema.render(format));
        }
        Command::Sql { sql } => {
            let loaded = load(&config).await?;
            match loaded.relation.execute(&sql).await {
                Ok(result) => print!("{}", result.to_csv()),
                Err(e) => anyhow::bail!("SQL error: {}", e.message),
            }
        }
        Command::Ask { question } => {
            let service = start_service(&config).await?;
            let record = service.answer(&question.join(" ")).await;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::RunQuestions { out, questions } => {
            let service = start_service(&config).await?;
            let questions: Vec<String> = if questions.is_empty() {
                DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
            } else {
                questions
            };

            let mut records: Vec<AnswerRecord> = Vec::with_capacity(questions.len());
            for (i, question) in questions.iter().enumerate() {
                tracing::info!(index = i + 1, total = questions.len(), question = %question, "asking");
                records.push(service.answer(question).await);
            }

            let json = serde_json::to_string_pretty(&records)?;
            match out {
                Some(path) => {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), answers = records.len(), "answers written");
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}

async fn load(config: &ServiceConfig) -> anyhow::Result<LoadedTable> {
    let (table, _stale) = service::materialize(config, &FileLogSource).await?;
    let loaded = LoadedTable::load(table, config.relation_options()).await?;
    Ok(loaded)
}

async fn start_service(config: &ServiceConfig) -> anyhow::Result<QueryService> {
    tracing::info!(
        host = %config.ollama.host,
        model = %config.ollama.model,
        "using ollama"
    );
    let model = OllamaClient::new(config.ollama.clone())?;
    QueryService::start(config, Arc::new(model)).await
}
