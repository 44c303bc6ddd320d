use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use log::{error, info};
use std::path::Path;

use study_rag::database::{QdrantConfig, VectorIndex};
use study_rag::document::Document;
use study_rag::openai::{OpenAiClient, OpenAiConfig};
use study_rag::rag::RagEngine;
use study_rag::storage::{ChunkStore, DocumentStatus};

/// A study assistant that indexes a document and answers questions about it
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the document to index (supports text and PDF)
    #[arg(index = 1)]
    file_path: String,

    /// SQLite database file holding documents and chunks
    #[arg(long, default_value = "study-rag.db")]
    db_path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    // Parse and validate command line arguments
    let args = Args::parse();

    info!("Processing file: {}", args.file_path);

    let path = Path::new(&args.file_path);
    if !path.exists() {
        error!("File not found: {}", args.file_path);
        return Err(anyhow::anyhow!("File not found"));
    }

    // Load configuration from environment
    let qdrant_config = QdrantConfig::from_env().context("Missing QDRANT_URL")?;
    let index = VectorIndex::new(qdrant_config).context("Failed to initialize Qdrant client")?;
    let openai = OpenAiClient::new(OpenAiConfig::from_env());
    let store = ChunkStore::open(&args.db_path).context("Failed to open chunk store")?;

    // Initialize RAG engine
    let engine = RagEngine::new(openai, index, store);

    // Extract the document text (plain text or PDF)
    let document = Document::from_file(path).context("Failed to process document")?;
    info!("Document type: {}", document.mime_type);

    // Only re-index when the document is not already indexed
    let document_id = match engine.store().find_document_by_filename(&document.filename)? {
        Some((id, DocumentStatus::Indexed)) => {
            info!("Using existing document: {}", id);
            id
        }
        Some((id, _)) => {
            engine
                .process_document(&id, &document.content)
                .await
                .context("Failed to index document")?;
            id
        }
        None => {
            let id = engine.store().insert_document(&document.filename)?;
            engine
                .process_document(&id, &document.content)
                .await
                .context("Failed to index document")?;
            id
        }
    };

    // Enter interactive Q&A loop
    engine
        .run_query_loop(&document_id)
        .await
        .context("Error in query loop")?;

    Ok(())
}
