use crate::storage::StoredChunk;
use anyhow::{Context, Result};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId,
    PointStruct, SearchPoints, UpsertPointsBuilder, Value, VectorParams,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use std::collections::HashMap;
use std::env;

/// All documents share one collection; scoping happens through the
/// `document_id` payload filter.
const COLLECTION_NAME: &str = "study_chunks";
const COLLECTION_VECTOR_SIZE: u64 = 1536; // text-embedding-3-small
/// Points per upsert request, keeping payloads under provider limits.
const UPSERT_BATCH: usize = 50;
const PAYLOAD_PREVIEW_CHARS: usize = 120;

/// Configuration for Qdrant
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = env::var("QDRANT_URL")?;
        let api_key = env::var("QDRANT_API_KEY").ok();

        Ok(QdrantConfig { url, api_key })
    }
}

/// Client for the vector index holding chunk embeddings
pub struct VectorIndex {
    client: Qdrant,
}

impl VectorIndex {
    /// Create a new vector index client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder.build()?;

        Ok(VectorIndex { client })
    }

    /// Create the chunk collection if it does not exist yet
    pub async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(COLLECTION_NAME)
            .await
            .context("Failed to check collection existence")?;
        if exists {
            return Ok(());
        }

        let create_collection =
            CreateCollectionBuilder::new(COLLECTION_NAME).vectors_config(VectorParams {
                size: COLLECTION_VECTOR_SIZE,
                distance: Distance::Cosine.into(),
                ..Default::default()
            });

        self.client
            .create_collection(create_collection)
            .await
            .with_context(|| format!("Failed to create collection {}", COLLECTION_NAME))?;

        Ok(())
    }

    /// Upsert chunk vectors in batches, keyed by the chunk row ids.
    ///
    /// `rows` and `vectors` must be the same length and in the same order.
    pub async fn upsert_chunks(
        &self,
        document_id: &str,
        rows: &[StoredChunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<()> {
        let points = rows
            .iter()
            .zip(vectors)
            .map(|(row, vector)| {
                let payload: HashMap<String, Value> = serde_json::from_value(json!({
                    "preview": truncate_chars(&row.text, PAYLOAD_PREVIEW_CHARS),
                    "document_id": document_id,
                    "position": row.position,
                }))
                .context("Failed to build point payload")?;

                Ok(PointStruct::new(
                    row.id.clone(),
                    vector,
                    Payload::from(payload),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        for batch in points.chunks(UPSERT_BATCH) {
            let upsert_request =
                UpsertPointsBuilder::new(COLLECTION_NAME, batch.to_vec()).build();

            self.client
                .upsert_points(upsert_request)
                .await
                .with_context(|| {
                    format!("Failed to upsert points in collection {}", COLLECTION_NAME)
                })?;
        }

        Ok(())
    }

    /// Return the ids of the `limit` chunks most similar to `query_vector`,
    /// in the index's relevance order, optionally scoped to one document.
    pub async fn search(
        &self,
        query_vector: Vec<f32>,
        document_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<String>> {
        let filter = document_id
            .map(|id| Filter::must([Condition::matches("document_id", id.to_string())]));

        let search_request = SearchPoints {
            collection_name: COLLECTION_NAME.to_string(),
            vector: query_vector,
            filter,
            limit,
            ..Default::default()
        };

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", COLLECTION_NAME))?;

        let ids = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| scored_point.id.and_then(point_id_to_string))
            .collect();

        Ok(ids)
    }

    /// Remove every vector belonging to a document
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let delete_request = DeletePointsBuilder::new(COLLECTION_NAME)
            .points(Filter::must([Condition::matches(
                "document_id",
                document_id.to_string(),
            )]))
            .build();

        self.client
            .delete_points(delete_request)
            .await
            .with_context(|| format!("Failed to delete vectors for document {}", document_id))?;

        Ok(())
    }
}

fn point_id_to_string(id: PointId) -> Option<String> {
    match id.point_id_options {
        Some(PointIdOptions::Uuid(value)) => Some(value),
        Some(PointIdOptions::Num(value)) => Some(value.to_string()),
        None => None,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
