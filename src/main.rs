//! # casegen CLI
//!
//! ## Usage
//!
//! ```bash
//! casegen --config ./config/casegen.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `casegen init` | Create the data directories, database and empty index |
//! | `casegen kb add <files...>` | Add files to the knowledge base |
//! | `casegen kb search "<query>"` | Search the knowledge base |
//! | `casegen kb status` | Index status and drift |
//! | `casegen kb files` | List knowledge files |
//! | `casegen kb remove <id> --yes` | Remove a knowledge file |
//! | `casegen kb rebuild --yes` | Rebuild the vector index from the files |
//! | `casegen generate <document>` | Run the full pipeline and export |
//! | `casegen records list\|show\|delete\|export` | Saved runs |
//! | `casegen ask "<question>"` | Ask the knowledge base |
//! | `casegen qa stats` | Daily Q&A votes and frequent questions |
//! | `casegen feedback export --start <date> --end <date>` | Feedback workbook |
//! | `casegen serve` | Start the HTTP API |

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use casegen::{config, generate_cmd, kb_cmd, migrate, records_cmd, server};

/// AI-assisted test-case generation with a retrieval-augmented knowledge base.
#[derive(Parser)]
#[command(name = "casegen", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/casegen.toml")]
    config: PathBuf,

    /// Log output format (logs go to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directories, database schema and an empty index.
    ///
    /// Idempotent.
    Init,

    /// Manage the knowledge base.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Run every stage on a requirements document, export the
    /// spreadsheet and save a record.
    Generate {
        /// Requirements document (txt, md, docx, pdf, xlsx, csv).
        document: PathBuf,

        /// Skip the validation call after each stage.
        #[arg(long)]
        no_validate: bool,

        /// Extra instructions appended to every stage prompt.
        #[arg(long)]
        prompt: Option<String>,

        /// Do not ground prompts with knowledge-base context.
        #[arg(long)]
        no_knowledge: bool,
    },

    /// Saved generation runs.
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },

    /// Ask a question answered from the knowledge base.
    Ask {
        question: String,

        /// Number of knowledge references to retrieve.
        #[arg(long)]
        references: Option<usize>,
    },

    /// Q&A history statistics.
    Qa {
        #[command(subcommand)]
        action: QaAction,
    },

    /// User feedback on generated test cases.
    Feedback {
        #[command(subcommand)]
        action: FeedbackAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum QaAction {
    /// Votes for one day's answers and the most asked questions.
    Stats {
        /// Day to report (YYYY-MM-DD, UTC). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Window for question frequency, ending today.
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

#[derive(Subcommand)]
enum FeedbackAction {
    /// Write feedback from a date range (inclusive) to an .xlsx workbook.
    Export {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Output path. Defaults to the outputs directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// Copy files into the knowledge base and index them.
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Similarity search.
    Search {
        query: String,
        #[arg(long)]
        k: Option<usize>,
        /// Minimum similarity percentage (0-100).
        #[arg(long)]
        min_similarity: Option<f64>,
    },
    /// Index status, including files missing from the index.
    Status,
    /// List knowledge files.
    Files,
    /// Remove a knowledge file. The index keeps its chunks until a rebuild.
    Remove {
        id: i64,
        #[arg(long)]
        yes: bool,
    },
    /// Discard the index and rebuild it from the knowledge files.
    Rebuild {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum RecordsAction {
    /// List records, newest first.
    List,
    /// Print every stage output of a record.
    Show { id: i64 },
    /// Delete a record and its spreadsheet.
    Delete {
        id: i64,
        #[arg(long)]
        yes: bool,
    },
    /// Print the spreadsheet path, regenerating the file if it is gone.
    Export { id: i64 },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            cfg.ensure_dirs()?;
            migrate::run_migrations(&cfg).await?;
            let provider = casegen::embedding::create_provider(&cfg.embedding)?;
            casegen::index::VectorIndex::initialize(cfg.vector_index_dir(), provider).await;
            println!("casegen initialized at {}", cfg.paths.data_dir.display());
        }
        Commands::Kb { action } => match action {
            KbAction::Add { files } => kb_cmd::run_add(&cfg, &files).await?,
            KbAction::Search {
                query,
                k,
                min_similarity,
            } => kb_cmd::run_search(&cfg, &query, k, min_similarity).await?,
            KbAction::Status => kb_cmd::run_status(&cfg).await?,
            KbAction::Files => kb_cmd::run_files(&cfg).await?,
            KbAction::Remove { id, yes } => kb_cmd::run_remove(&cfg, id, yes).await?,
            KbAction::Rebuild { yes } => kb_cmd::run_rebuild(&cfg, yes).await?,
        },
        Commands::Generate {
            document,
            no_validate,
            prompt,
            no_knowledge,
        } => {
            generate_cmd::run_generate(&cfg, &document, !no_validate, prompt, !no_knowledge).await?;
        }
        Commands::Records { action } => match action {
            RecordsAction::List => records_cmd::run_list(&cfg).await?,
            RecordsAction::Show { id } => records_cmd::run_show(&cfg, id).await?,
            RecordsAction::Delete { id, yes } => records_cmd::run_delete(&cfg, id, yes).await?,
            RecordsAction::Export { id } => records_cmd::run_export(&cfg, id).await?,
        },
        Commands::Ask {
            question,
            references,
        } => generate_cmd::run_ask(&cfg, &question, references).await?,
        Commands::Qa { action } => match action {
            QaAction::Stats { date, days } => records_cmd::run_qa_stats(&cfg, date, days).await?,
        },
        Commands::Feedback { action } => match action {
            FeedbackAction::Export { start, end, output } => {
                records_cmd::run_feedback_export(&cfg, start, end, output).await?
            }
        },
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}
