use crate::cache::EmbeddingCache;
use crate::chunking;
use crate::database::VectorIndex;
use crate::openai::OpenAiClient;
use crate::storage::{ChunkStore, StoredChunk};
use anyhow::Result;
use log::{info, warn};
use std::io::{self, Write};

/// Sources retrieved per question.
pub const DEFAULT_TOP_K: u64 = 5;
/// Per-source budget inside the completion prompt.
const SOURCE_CONTEXT_CHARS: usize = 1200;
/// Per-source budget in previews surfaced to callers.
const SOURCE_PREVIEW_CHARS: usize = 180;

const GROUNDED_SYSTEM_PROMPT: &str = "You answer using only the provided sources.";
const FALLBACK_SYSTEM_PROMPT: &str =
    "You are a helpful study assistant. Answer the question based on your general knowledge.";

/// A retrieved chunk in document order: id, full text, and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChunk {
    pub id: String,
    pub text: String,
    pub position: usize,
}

/// A citation-sized projection of a retrieved chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePreview {
    pub id: String,
    pub position: usize,
    pub preview: String,
}

/// A generated answer together with the sources that grounded it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourcePreview>,
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine {
    openai: OpenAiClient,
    index: VectorIndex,
    store: ChunkStore,
    cache: EmbeddingCache,
}

impl RagEngine {
    /// Create a new RAG engine
    pub fn new(openai: OpenAiClient, index: VectorIndex, store: ChunkStore) -> Self {
        RagEngine {
            openai,
            index,
            store,
            cache: EmbeddingCache::default(),
        }
    }

    /// The underlying chunk store, for document bookkeeping.
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Chunk, persist, embed, and index a document's text.
    ///
    /// The document must already have a row in the store; its status guards
    /// against concurrent re-ingestion and records the outcome.
    pub async fn process_document(&self, document_id: &str, text: &str) -> Result<()> {
        if !self.store.mark_processing(document_id)? {
            anyhow::bail!("Document {} is already being processed", document_id);
        }

        match self.ingest(document_id, text).await {
            Ok(count) => {
                self.store.mark_indexed(document_id)?;
                info!("Indexed document {} ({} chunks)", document_id, count);
                Ok(())
            }
            Err(err) => {
                self.store.mark_failed(document_id, &format!("{err:#}"))?;
                Err(err)
            }
        }
    }

    async fn ingest(&self, document_id: &str, text: &str) -> Result<usize> {
        let chunks = chunking::chunk_text(text);
        self.store.insert_chunks(document_id, &chunks)?;

        // Read the rows back so vectors carry exactly the persisted ids.
        let rows = self.store.chunks_by_document(document_id)?;
        if rows.is_empty() {
            return Ok(0);
        }

        self.index.ensure_collection().await?;

        let mut vectors = Vec::with_capacity(rows.len());
        for row in &rows {
            let vector = self.embed_cached(&row.text).await?;
            if vector.is_empty() {
                anyhow::bail!("Embedding service returned no vector; document cannot be indexed");
            }
            vectors.push(vector);
        }

        self.index.upsert_chunks(document_id, &rows, vectors).await?;
        Ok(rows.len())
    }

    /// Resolve a query into chunk passages, ordered by document position.
    ///
    /// Degrades to an empty result when embeddings are unavailable or the
    /// index/store cannot be reached; it never fails a caller's request.
    pub async fn retrieve(
        &self,
        query: &str,
        document_id: Option<&str>,
        top_k: u64,
    ) -> Vec<SourceChunk> {
        let query_vector = match self.embed_cached(query).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!("Query embedding failed; returning no sources: {err:#}");
                return Vec::new();
            }
        };
        if query_vector.is_empty() {
            warn!("Embeddings unavailable; returning no sources");
            return Vec::new();
        }

        let ids = match self.index.search(query_vector, document_id, top_k).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!("Vector search failed; returning no sources: {err:#}");
                return Vec::new();
            }
        };
        if ids.is_empty() {
            return Vec::new();
        }

        let rows = match self.store.chunks_by_ids(&ids) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Chunk lookup failed; returning no sources: {err:#}");
                return Vec::new();
            }
        };

        order_sources(rows)
    }

    /// Retrieve citation previews for a free-text selection.
    pub async fn find_sources(
        &self,
        text: &str,
        document_id: Option<&str>,
        top_k: u64,
    ) -> Vec<SourcePreview> {
        self.retrieve(text, document_id, top_k)
            .await
            .iter()
            .map(preview_of)
            .collect()
    }

    /// Answer a question, grounded in the document's sources when one is
    /// given and any match; otherwise fall back to general knowledge.
    pub async fn answer(&self, question: &str, document_id: Option<&str>) -> Result<Answer> {
        let sources = match document_id {
            Some(id) => self.retrieve(question, Some(id), DEFAULT_TOP_K).await,
            None => Vec::new(),
        };

        let context_block = build_source_block(&sources);
        let (system, user) = if context_block.is_empty() {
            (
                FALLBACK_SYSTEM_PROMPT,
                format!("{question}\n\nNo specific document context provided."),
            )
        } else {
            (GROUNDED_SYSTEM_PROMPT, format!("{question}\n\n{context_block}"))
        };

        let text = self.openai.complete_text(system, &user).await?;

        Ok(Answer {
            text,
            sources: sources.iter().map(preview_of).collect(),
        })
    }

    /// Remove a document's chunk rows and vectors.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.store.delete_document(document_id)?;
        self.index.delete_document(document_id).await?;
        Ok(())
    }

    /// Run the interactive query loop for a document
    pub async fn run_query_loop(&self, document_id: &str) -> Result<()> {
        println!("Ready to answer questions about this document. Type 'exit' to quit.");

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();

        loop {
            print!("\nYour question: ");
            stdout.flush()?;

            buffer.clear();
            if stdin.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("exit") {
                println!("Goodbye!");
                break;
            }

            let answer = self.answer(question, Some(document_id)).await?;

            if answer.sources.is_empty() {
                println!("(no document sources matched; answering from general knowledge)");
            } else {
                println!("Sources:");
                for source in &answer.sources {
                    println!("  [{}] {}", source.position, source.preview);
                }
            }

            println!("\n{}", answer.text);
        }

        Ok(())
    }

    async fn embed_cached(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.cache.get(text) {
            return Ok(vector);
        }
        let vector = self.openai.embed_text(text).await?;
        if !vector.is_empty() {
            self.cache.put(text, vector.clone());
        }
        Ok(vector)
    }
}

/// Re-order resolved rows ascending by position: sources are shown in
/// document order, not similarity order, so adjacent passages read
/// coherently when several back one answer.
fn order_sources(mut rows: Vec<StoredChunk>) -> Vec<SourceChunk> {
    rows.sort_by_key(|row| row.position);
    rows.into_iter()
        .map(|StoredChunk { id, text, position }| SourceChunk { id, text, position })
        .collect()
}

fn build_source_block(sources: &[SourceChunk]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            format!(
                "SOURCE_{} (id:{}, pos:{}):\n{}",
                i + 1,
                source.id,
                source.position,
                truncate_chars(&source.text, SOURCE_CONTEXT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn preview_of(source: &SourceChunk) -> SourcePreview {
    SourcePreview {
        id: source.id.clone(),
        position: source.position,
        preview: truncate_chars(&source.text, SOURCE_PREVIEW_CHARS).to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{QdrantConfig, VectorIndex};
    use crate::openai::{OpenAiClient, OpenAiConfig};
    use crate::storage::ChunkStore;

    /// Engine with no API key, an unreachable (never contacted) index, and
    /// an empty in-memory store.
    fn offline_engine() -> RagEngine {
        let openai = OpenAiClient::new(OpenAiConfig {
            api_key: String::new(),
            base_url: "http://localhost:0".to_string(),
            embedding_model: "test-embedding".to_string(),
            chat_model: "test-chat".to_string(),
        });
        let index = VectorIndex::new(QdrantConfig {
            url: "http://localhost:6334".to_string(),
            api_key: None,
        })
        .unwrap();
        let store = ChunkStore::open_in_memory().unwrap();
        RagEngine::new(openai, index, store)
    }

    #[tokio::test]
    async fn retrieval_degrades_to_empty_without_embeddings() {
        let engine = offline_engine();
        let sources = engine.retrieve("photosynthesis", Some("doc-a"), 5).await;
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn retrieval_swallows_embedding_errors() {
        // A configured key pointed at an unreachable endpoint makes the
        // embedding call fail outright; retrieval must still return empty.
        let openai = OpenAiClient::new(OpenAiConfig {
            api_key: "test-key".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            embedding_model: "test-embedding".to_string(),
            chat_model: "test-chat".to_string(),
        });
        let index = VectorIndex::new(QdrantConfig {
            url: "http://localhost:6334".to_string(),
            api_key: None,
        })
        .unwrap();
        let store = ChunkStore::open_in_memory().unwrap();
        let engine = RagEngine::new(openai, index, store);

        let sources = engine.retrieve("photosynthesis", None, 5).await;
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn answer_without_document_falls_back_gracefully() {
        let engine = offline_engine();
        let answer = engine.answer("What is photosynthesis?", None).await.unwrap();
        assert!(answer.sources.is_empty());
    }

    #[test]
    fn sources_are_ordered_by_position_not_rank() {
        // Rank order from the index: c3 first, then c1.
        let rows = vec![
            StoredChunk {
                id: "c3".to_string(),
                text: "third".to_string(),
                position: 2,
            },
            StoredChunk {
                id: "c1".to_string(),
                text: "first".to_string(),
                position: 0,
            },
        ];

        let ordered = order_sources(rows);
        assert_eq!(ordered[0].id, "c1");
        assert_eq!(ordered[0].position, 0);
        assert_eq!(ordered[1].id, "c3");
        assert_eq!(ordered[1].position, 2);
    }

    #[test]
    fn source_block_numbers_and_truncates() {
        let sources = vec![
            SourceChunk {
                id: "a".to_string(),
                text: "x".repeat(2000),
                position: 0,
            },
            SourceChunk {
                id: "b".to_string(),
                text: "short".to_string(),
                position: 3,
            },
        ];

        let block = build_source_block(&sources);
        assert!(block.starts_with("SOURCE_1 (id:a, pos:0):\n"));
        assert!(block.contains("SOURCE_2 (id:b, pos:3):\nshort"));
        // First source is capped at the per-source budget.
        let first = block.split("\n\n").next().unwrap();
        assert_eq!(first.len(), "SOURCE_1 (id:a, pos:0):\n".len() + 1200);
    }

    #[test]
    fn empty_sources_produce_empty_block() {
        assert!(build_source_block(&[]).is_empty());
    }

    #[test]
    fn previews_are_capped() {
        let source = SourceChunk {
            id: "a".to_string(),
            text: "y".repeat(500),
            position: 1,
        };
        let preview = preview_of(&source);
        assert_eq!(preview.preview.len(), 180);
        assert_eq!(preview.position, 1);
    }
}
