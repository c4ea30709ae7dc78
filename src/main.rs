//! # Tutor CLI (`tutor`)
//!
//! ## Usage
//!
//! ```bash
//! tutor --config ./config/tutor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor index [--rebuild]` | Build the index, or verify and load an existing one |
//! | `tutor retrieve "<query>" [-k N]` | Show the nearest chunks for a query |
//! | `tutor ask "<question>"` | Answer a single question |
//! | `tutor chat [--session ID]` | Interactive multi-turn conversation on stdin |
//! | `tutor serve` | Start the HTTP API |
//!
//! Provider API keys come from the environment (`GOOGLE_API_KEY`,
//! `OPENAI_API_KEY`); log verbosity from `RUST_LOG`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

use tutor_rag::config::{self, Config};
use tutor_rag::embedding::create_embedding_provider;
use tutor_rag::generation::create_generation_provider;
use tutor_rag::index::{IndexGate, IndexSettings};
use tutor_rag::mood::detect_mood;
use tutor_rag::rag::{RagService, RagSettings};
use tutor_rag::retriever::Retriever;
use tutor_rag::upstream::UpstreamPolicy;
use tutor_rag::{logging, server};
use tutor_rag_core::models::RetrievedChunk;
use tutor_rag_core::session::{SessionStore, DEFAULT_SESSION_ID};

/// AI tutor: grounded answers over a local document corpus.
///
/// All commands read a TOML configuration file. See
/// `config/tutor.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "tutor", version, about = "Retrieval-augmented AI tutor")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index from the corpus, or load and verify an
    /// existing one.
    Index {
        /// Discard any existing index and build from scratch.
        #[arg(long)]
        rebuild: bool,
    },

    /// Print the chunks most similar to a query.
    Retrieve {
        query: String,

        /// Number of chunks (defaults to `[retrieval].k`).
        #[arg(short)]
        k: Option<usize>,
    },

    /// Answer one question without conversation history.
    Ask { question: String },

    /// Multi-turn conversation. Reads one question per line; `exit` or EOF ends it.
    Chat {
        #[arg(long, default_value = DEFAULT_SESSION_ID)]
        session: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    let gate = IndexGate::new();

    match cli.command {
        Commands::Index { rebuild } => {
            let embedder = create_embedding_provider(&config.embedding)?;
            let settings = IndexSettings::from_config(&config, rebuild)?;
            let index = gate
                .get_or_init(&settings, &config.corpus, embedder.as_ref())
                .await?;
            let manifest = index.manifest();
            println!(
                "Index ready at {}: {} chunks from {} documents (model {}, {} dims, built {})",
                config.index.path.display(),
                index.len(),
                manifest.document_count,
                manifest.embedding_model,
                manifest.dims,
                manifest.built_at.to_rfc3339(),
            );
        }
        Commands::Retrieve { query, k } => {
            let retriever = build_retriever(&config, &gate).await?;
            let results = retriever
                .retrieve(&query, k.unwrap_or(config.retrieval.k))
                .await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. {} (similarity {:.3})",
                    i + 1,
                    source_label(r),
                    r.similarity
                );
                println!("   {}", r.chunk.text.replace('\n', "\n   "));
            }
        }
        Commands::Ask { question } => {
            let rag = build_service(&config, &gate).await?;
            let answer = rag.answer(&question).await?;
            println!("{}", answer.text);
            print_sources(&answer.chunks);
        }
        Commands::Chat { session } => {
            let rag = build_service(&config, &gate).await?;
            run_chat(&rag, &session).await?;
        }
        Commands::Serve => {
            let rag = build_service(&config, &gate).await?;
            server::run_server(&config, Arc::new(rag)).await?;
        }
    }

    Ok(())
}

async fn build_retriever(config: &Config, gate: &IndexGate) -> Result<Retriever> {
    let embedder = create_embedding_provider(&config.embedding)?;
    let settings = IndexSettings::from_config(config, false)?;
    let index = gate
        .get_or_init(&settings, &config.corpus, embedder.as_ref())
        .await?;
    Ok(Retriever::new(
        index,
        embedder,
        UpstreamPolicy::for_embedding(&config.embedding),
    ))
}

async fn build_service(config: &Config, gate: &IndexGate) -> Result<RagService> {
    let retriever = build_retriever(config, gate).await?;
    let generator = create_generation_provider(&config.generation)?;
    Ok(RagService::new(
        retriever,
        generator,
        Arc::new(SessionStore::new(config.sessions.policy())),
        RagSettings::from_config(config),
    ))
}

async fn run_chat(rag: &RagService, session: &str) -> Result<()> {
    println!("Chatting in session '{}'. Type 'exit' to quit.", session);
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        // A failed turn is reported and the conversation continues.
        match rag.chat(question, Some(session)).await {
            Ok(answer) => {
                println!("tutor ({:?})> {}", detect_mood(&answer.text), answer.text);
                print_sources(&answer.chunks);
            }
            Err(e) => eprintln!("error [{}]: {}", e.code(), e),
        }
    }
    Ok(())
}

fn print_sources(chunks: &[RetrievedChunk]) {
    if chunks.is_empty() {
        return;
    }
    let labels: Vec<String> = chunks.iter().map(source_label).collect();
    println!("Sources: {}", labels.join(", "));
}

fn source_label(r: &RetrievedChunk) -> String {
    format!("{}#{}", r.chunk.document_id, r.chunk.sequence_index)
}
