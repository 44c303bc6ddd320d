//! SQLite persistence for documents and their chunk rows.
//!
//! The vector index only stores chunk ids and previews; the authoritative
//! chunk text lives here and is resolved by id after a similarity search.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::chunking::Chunk;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    last_error TEXT,
    processing_attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    position INTEGER NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, position);
"#;

/// A persisted chunk row, as resolved for retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub position: usize,
}

/// Ingestion lifecycle of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "indexed" => Ok(DocumentStatus::Indexed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(anyhow!("Unknown document status: {other}")),
        }
    }
}

/// Store for document records and chunk rows
pub struct ChunkStore {
    conn: Mutex<Connection>,
}

impl ChunkStore {
    /// Open or create the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open chunk database")?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .context("Failed to configure chunk database")?;
        Self::init(conn)
    }

    /// Open an in-memory store, used by tests and ephemeral runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to configure in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize chunk schema")?;
        Ok(ChunkStore {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new document record in `pending` status; returns its id.
    pub fn insert_document(&self, filename: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.prepare_cached("INSERT INTO documents (id, filename) VALUES (?1, ?2)")?
            .execute(params![id, filename])
            .context("Failed to insert document")?;
        Ok(id)
    }

    /// Look up a document by filename; returns its id and status.
    pub fn find_document_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<(String, DocumentStatus)>> {
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .prepare_cached(
                "SELECT id, status FROM documents WHERE filename = ?1
                 ORDER BY created_at DESC LIMIT 1",
            )?
            .query_row(params![filename], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
            .context("Failed to look up document")?;

        match row {
            Some((id, status)) => Ok(Some((id, DocumentStatus::parse(&status)?))),
            None => Ok(None),
        }
    }

    /// Current status of a document, if it exists.
    pub fn document_status(&self, document_id: &str) -> Result<Option<DocumentStatus>> {
        let conn = self.conn.lock();
        let status: Option<String> = conn
            .prepare_cached("SELECT status FROM documents WHERE id = ?1")?
            .query_row(params![document_id], |row| row.get(0))
            .optional()
            .context("Failed to read document status")?;

        status.as_deref().map(DocumentStatus::parse).transpose()
    }

    /// Transition a document into `processing`, guarding against concurrent
    /// re-ingestion. Returns false when the document is already processing
    /// or does not exist.
    pub fn mark_processing(&self, document_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn
            .prepare_cached(
                "UPDATE documents
                 SET status = 'processing',
                     processing_attempts = processing_attempts + 1,
                     last_error = NULL
                 WHERE id = ?1 AND status != 'processing'",
            )?
            .execute(params![document_id])
            .context("Failed to mark document processing")?;
        Ok(updated == 1)
    }

    /// Mark a document fully indexed.
    pub fn mark_indexed(&self, document_id: &str) -> Result<()> {
        self.set_status(document_id, DocumentStatus::Indexed, None)
    }

    /// Mark a document failed, recording the error message.
    pub fn mark_failed(&self, document_id: &str, error: &str) -> Result<()> {
        self.set_status(document_id, DocumentStatus::Failed, Some(error))
    }

    fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("UPDATE documents SET status = ?2, last_error = ?3 WHERE id = ?1")?
            .execute(params![document_id, status.as_str(), error])
            .context("Failed to update document status")?;
        Ok(())
    }

    /// Insert chunk rows for a document in one transaction; returns the
    /// generated ids in position order.
    pub fn insert_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let mut ids = Vec::with_capacity(chunks.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO chunks (id, document_id, text, position, start_offset, end_offset)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for chunk in chunks {
                let id = Uuid::new_v4().to_string();
                stmt.execute(params![
                    id,
                    document_id,
                    chunk.text,
                    chunk.position as i64,
                    chunk.span.start as i64,
                    chunk.span.end as i64,
                ])
                .context("Failed to insert chunk")?;
                ids.push(id);
            }
        }
        tx.commit().context("Failed to commit chunks")?;
        Ok(ids)
    }

    /// Fetch chunk rows by id set. Row order is not specified.
    pub fn chunks_by_ids(&self, ids: &[String]) -> Result<Vec<StoredChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT id, text, position FROM chunks WHERE id IN ({placeholders})");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)?))
            })
            .context("Failed to fetch chunks by id")?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, text, position) = row?;
            chunks.push(StoredChunk {
                id,
                text,
                position: position as usize,
            });
        }
        Ok(chunks)
    }

    /// Fetch every chunk of a document, ordered by position.
    pub fn chunks_by_document(&self, document_id: &str) -> Result<Vec<StoredChunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, text, position FROM chunks
             WHERE document_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)?))
            })
            .context("Failed to fetch document chunks")?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, text, position) = row?;
            chunks.push(StoredChunk {
                id,
                text,
                position: position as usize,
            });
        }
        Ok(chunks)
    }

    /// Delete a document; its chunk rows cascade.
    pub fn delete_document(&self, document_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached("DELETE FROM documents WHERE id = ?1")?
            .execute(params![document_id])
            .context("Failed to delete document")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::chunk_text_with;

    fn store_with_document() -> (ChunkStore, String) {
        let store = ChunkStore::open_in_memory().unwrap();
        let id = store.insert_document("notes.txt").unwrap();
        (store, id)
    }

    #[test]
    fn open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.db");
        let store = ChunkStore::open(&path).unwrap();
        store.insert_document("a.txt").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn new_documents_start_pending() {
        let (store, id) = store_with_document();
        assert_eq!(
            store.document_status(&id).unwrap(),
            Some(DocumentStatus::Pending)
        );
    }

    #[test]
    fn inserted_chunks_come_back_in_position_order() {
        let (store, id) = store_with_document();
        let chunks = chunk_text_with(&"One two. ".repeat(100), 200, 40);
        store.insert_chunks(&id, &chunks).unwrap();

        let rows = store.chunks_by_document(&id).unwrap();
        assert_eq!(rows.len(), chunks.len());
        for (expected, row) in rows.iter().enumerate() {
            assert_eq!(row.position, expected);
        }
    }

    #[test]
    fn chunks_by_ids_returns_requested_subset() {
        let (store, id) = store_with_document();
        let chunks = chunk_text_with(&"One two. ".repeat(100), 200, 40);
        let ids = store.insert_chunks(&id, &chunks).unwrap();

        let subset = vec![ids[2].clone(), ids[0].clone()];
        let rows = store.chunks_by_ids(&subset).unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.id == ids[0] && r.position == 0));
        assert!(rows.iter().any(|r| r.id == ids[2] && r.position == 2));
    }

    #[test]
    fn chunks_by_ids_with_no_ids_is_empty() {
        let (store, _) = store_with_document();
        assert!(store.chunks_by_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn mark_processing_guards_reentry() {
        let (store, id) = store_with_document();

        assert!(store.mark_processing(&id).unwrap());
        assert!(!store.mark_processing(&id).unwrap());

        store.mark_indexed(&id).unwrap();
        assert_eq!(
            store.document_status(&id).unwrap(),
            Some(DocumentStatus::Indexed)
        );
        // A fresh run may re-process an indexed document.
        assert!(store.mark_processing(&id).unwrap());
    }

    #[test]
    fn mark_failed_records_the_error() {
        let (store, id) = store_with_document();
        store.mark_failed(&id, "embedding service unavailable").unwrap();
        assert_eq!(
            store.document_status(&id).unwrap(),
            Some(DocumentStatus::Failed)
        );
    }

    #[test]
    fn deleting_a_document_cascades_to_chunks() {
        let (store, id) = store_with_document();
        let chunks = chunk_text_with(&"One two. ".repeat(100), 200, 40);
        let ids = store.insert_chunks(&id, &chunks).unwrap();

        store.delete_document(&id).unwrap();
        assert_eq!(store.document_status(&id).unwrap(), None);
        assert!(store.chunks_by_ids(&ids).unwrap().is_empty());
    }

    #[test]
    fn find_document_by_filename_returns_latest() {
        let store = ChunkStore::open_in_memory().unwrap();
        assert!(store.find_document_by_filename("a.txt").unwrap().is_none());

        let id = store.insert_document("a.txt").unwrap();
        let (found, status) = store.find_document_by_filename("a.txt").unwrap().unwrap();
        assert_eq!(found, id);
        assert_eq!(status, DocumentStatus::Pending);
    }
}
