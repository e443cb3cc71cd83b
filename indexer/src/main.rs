use anyhow::Result;
use clap::{Parser, Subcommand};
use index_core::config::DEFAULT_SPILL_THRESHOLD;
use index_core::persist::{last_doc_id, load_meta, IndexPaths};
use index_core::report::{generate, write_report};
use index_core::{Indexer, IndexerConfig};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InputDoc {
    url: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build a bucketed inverted index in bounded memory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from JSON/JSONL document files under a dataset root
    Build {
        /// Dataset root (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long, default_value = "./index")]
        output: String,
        /// Postings buffered in memory before spilling a segment
        #[arg(long, default_value_t = DEFAULT_SPILL_THRESHOLD)]
        spill_threshold: usize,
        /// Delete the id log, buckets and segments of previous runs first
        #[arg(long, default_value_t = false)]
        reset: bool,
        /// Merge every segment into the buckets as soon as it is spilled
        #[arg(long, default_value_t = false)]
        merge_on_spill: bool,
        /// Bucket merge threads (0 = one per CPU)
        #[arg(long, default_value_t = 0)]
        merge_threads: usize,
    },
    /// Print analytics for an existing index
    Report {
        /// Index directory
        #[arg(long, default_value = "./index")]
        output: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            spill_threshold,
            reset,
            merge_on_spill,
            merge_threads,
        } => {
            let config = IndexerConfig {
                index_dir: PathBuf::from(&output),
                spill_threshold,
                reset,
                merge_on_spill,
                merge_threads,
            };
            build_index(Path::new(&input), config)
        }
        Commands::Report { output } => print_report(Path::new(&output)),
    }
}

fn build_index(input_path: &Path, config: IndexerConfig) -> Result<()> {
    let mut indexer = Indexer::open(config)?;

    for file in collect_files(input_path) {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            index_jsonl(&file, &mut indexer)?;
        } else {
            index_json(&file, &mut indexer)?;
        }
    }

    tracing::info!(num_docs = indexer.documents(), "ingested documents");
    let report = indexer.finalize()?;
    print!("{report}");
    Ok(())
}

fn print_report(index_dir: &Path) -> Result<()> {
    let paths = IndexPaths::new(index_dir);
    let documents = match load_meta(&paths) {
        Ok(meta) => meta.num_docs,
        Err(_) => last_doc_id(&paths.doc_log())?,
    };
    let report = generate(&paths, documents)?;
    write_report(&paths, &report)?;
    print!("{report}");
    Ok(())
}

/// JSON/JSONL files under `input_path`, in a stable order so document ids are reproducible.
fn collect_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        let entries = WalkDir::new(input_path).sort_by_file_name().into_iter();
        for entry in entries.filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }
    files
}

fn index_jsonl(file: &Path, indexer: &mut Indexer) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<InputDoc>(&line) {
            Ok(doc) => ingest_doc(doc, indexer)?,
            Err(e) => tracing::warn!(
                file = %file.display(),
                line = lineno + 1,
                error = %e,
                "skipping malformed record"
            ),
        }
    }
    Ok(())
}

fn index_json(file: &Path, indexer: &mut Indexer) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    let json: serde_json::Value = match serde_json::from_reader(reader) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(file = %file.display(), error = %e, "skipping unreadable file");
            return Ok(());
        }
    };
    let records = match json {
        serde_json::Value::Array(arr) => arr,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };
    for v in records {
        match serde_json::from_value::<InputDoc>(v) {
            Ok(doc) => ingest_doc(doc, indexer)?,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping malformed record")
            }
        }
    }
    Ok(())
}

fn ingest_doc(doc: InputDoc, indexer: &mut Indexer) -> Result<()> {
    let content = doc.content.unwrap_or_default();
    indexer.ingest(&doc.url, &content)?;
    Ok(())
}
