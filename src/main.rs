use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use recall::config::{load_config, Config};
use recall::engine::Engine;
use recall::models::{IngestOutcome, IngestStatus};

const DEFAULT_CONFIG_PATH: &str = "./config/recall.toml";

const DEFAULT_CONFIG_TEMPLATE: &str = r#"[db]
path = "./data/recall.sqlite"

[chunking]
chunk_chars = 2000
overlap_chars = 200

# provider: "hash" (local, deterministic) or "openai"
[embedding]
provider = "hash"
dims = 256

[index]
m = 16
ef_construction = 200
ef_search = 64

[retrieval]
similarity_weight = 0.7
recency_weight = 0.3
top_k = 10

# provider: "disabled" or "openai" (requires OPENAI_API_KEY)
[completion]
provider = "disabled"
"#;

#[derive(Parser)]
#[command(name = "rcl", about = "Versioned document ingestion and retrieval", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and database
    Init,
    /// Ingest one or more files, waiting for processing to finish
    Ingest {
        /// Files to ingest (pdf, docx, txt, md)
        paths: Vec<PathBuf>,
        /// Queue processing in the background instead of waiting
        #[arg(long)]
        background: bool,
    },
    /// Show the status of an ingestion task
    Tasks {
        /// Task id returned by ingest
        id: String,
    },
    /// List all stored document versions
    List,
    /// Semantic search over active documents
    Search {
        query: String,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Answer a question from the stored documents
    Ask { question: String },
    /// Check which requirements the corpus covers
    Check {
        /// Requirement phrases to check
        requirements: Vec<String>,
    },
    /// Show a stored document by id
    Get { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init(&cli.config).await,
        Commands::Ingest { paths, background } => {
            let engine = open_engine(&cli.config).await?;
            ingest(&engine, &paths, background).await
        }
        Commands::Tasks { id } => {
            let engine = open_engine(&cli.config).await?;
            show_task(&engine, &id).await
        }
        Commands::List => {
            let engine = open_engine(&cli.config).await?;
            list(&engine).await
        }
        Commands::Search { query, limit } => {
            let engine = open_engine(&cli.config).await?;
            search(&engine, &query, limit).await
        }
        Commands::Ask { question } => {
            let engine = open_engine(&cli.config).await?;
            ask(&engine, &question).await
        }
        Commands::Check { requirements } => {
            let engine = open_engine(&cli.config).await?;
            check(&engine, &requirements).await
        }
        Commands::Get { id } => {
            let engine = open_engine(&cli.config).await?;
            get(&engine, &id).await
        }
    }
}

async fn open_engine(config_path: &Path) -> Result<Engine> {
    let config = if config_path.exists() {
        load_config(config_path)?
    } else {
        Config::minimal("./data/recall.sqlite")
    };
    Engine::open(config).await
}

async fn init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, DEFAULT_CONFIG_TEMPLATE)?;
        println!("Created config: {}", config_path.display());
    }

    let config = load_config(config_path)?;
    let db_path = config.db.path.clone();
    Engine::open(config).await?;
    println!("Initialized database: {}", db_path.display());
    Ok(())
}

async fn ingest(engine: &Engine, paths: &[PathBuf], background: bool) -> Result<()> {
    if paths.is_empty() {
        anyhow::bail!("No files given. Usage: rcl ingest <file>...");
    }

    for path in paths {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid filename: {}", path.display()))?
            .to_string();
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

        let outcome = if background {
            engine.submit(&filename, bytes).await?
        } else {
            engine.ingest(&filename, bytes).await?
        };

        match outcome.status {
            IngestStatus::Duplicate => {
                println!(
                    "= {} unchanged (duplicate of version {})",
                    filename, outcome.version
                );
            }
            IngestStatus::Processing => {
                print_accepted(&filename, "ingested", &outcome, background);
            }
            IngestStatus::Updated => {
                print_accepted(
                    &filename,
                    &format!("updated to version {}", outcome.version),
                    &outcome,
                    background,
                );
            }
        }
    }
    Ok(())
}

fn print_accepted(filename: &str, what: &str, outcome: &IngestOutcome, background: bool) {
    if background {
        println!(
            "~ {} queued ({}), task {}",
            filename,
            what,
            outcome.task_id.as_deref().unwrap_or("-")
        );
    } else {
        println!("+ {} {} (document {})", filename, what, outcome.document_id);
    }
}

async fn show_task(engine: &Engine, id: &str) -> Result<()> {
    match engine.task_status(id).await? {
        None => println!("No task with id {}", id),
        Some(status) => {
            println!("Task {}", status.id);
            println!("  file:    {}", status.filename);
            println!("  status:  {}", status.state.as_str());
            if let Some(doc) = &status.document_id {
                println!("  document: {}", doc);
            }
            if let Some(version) = status.version {
                println!("  version: {}", version);
            }
            if let Some(error) = &status.error {
                println!("  error:   {}", error);
            }
        }
    }
    Ok(())
}

async fn list(engine: &Engine) -> Result<()> {
    let docs = engine.list_documents().await?;
    if docs.is_empty() {
        println!("No documents stored.");
        return Ok(());
    }

    println!(
        "{:<38} {:<30} {:>3} {:>7} {:>7}  {}",
        "ID", "FILENAME", "VER", "ACTIVE", "CHUNKS", "UPLOADED"
    );
    for doc in docs {
        println!(
            "{:<38} {:<30} {:>3} {:>7} {:>7}  {}",
            doc.id,
            doc.filename,
            doc.version,
            if doc.is_active { "yes" } else { "no" },
            doc.chunk_count,
            format_time(doc.uploaded_at),
        );
    }
    Ok(())
}

async fn search(engine: &Engine, query: &str, limit: Option<usize>) -> Result<()> {
    let results = engine.search(query, limit).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. {} (v{})  score {:.3}  sim {:.3}  rec {:.3}",
            i + 1,
            r.filename,
            r.version,
            r.score,
            r.similarity,
            r.recency
        );
        println!("   {}", snippet(&r.text, 160));
    }
    Ok(())
}

async fn ask(engine: &Engine, question: &str) -> Result<()> {
    let answer = engine.answer(question).await?;
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  - {} (chunk {})", source.filename, source.chunk_id);
        }
    }
    Ok(())
}

async fn check(engine: &Engine, requirements: &[String]) -> Result<()> {
    if requirements.is_empty() {
        anyhow::bail!("No requirements given. Usage: rcl check <requirement>...");
    }

    let report = engine.check_completeness(requirements).await?;
    for item in &report.requirements {
        let mark = if item.covered { "✓" } else { "✗" };
        match &item.best_source {
            Some(source) => println!(
                "{} {} (score {:.3}, best: {})",
                mark, item.requirement, item.score, source
            ),
            None => println!("{} {} (no matches)", mark, item.requirement),
        }
    }
    println!();
    println!(
        "Coverage: {}/{} ({:.0}%)",
        report.covered_count, report.total, report.percentage
    );
    Ok(())
}

async fn get(engine: &Engine, id: &str) -> Result<()> {
    match engine.get_document(id).await? {
        None => println!("No document with id {}", id),
        Some(doc) => {
            println!("Document {}", doc.id);
            println!("  file:     {}", doc.filename);
            println!("  version:  {}", doc.version);
            println!("  active:   {}", if doc.is_active { "yes" } else { "no" });
            println!("  hash:     {}", doc.content_hash);
            println!("  size:     {} bytes", doc.file_size);
            println!("  uploaded: {}", format_time(doc.uploaded_at));
            if let Some(replaced) = doc.replaced_at {
                println!("  replaced: {}", format_time(replaced));
            }
        }
    }
    Ok(())
}

fn format_time(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn snippet(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() <= max {
        return flat;
    }
    let mut end = max;
    while !flat.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &flat[..end])
}
