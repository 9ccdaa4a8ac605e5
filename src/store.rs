//! Persistence for documents and their chunk+embedding records.
//!
//! Every read is scoped to an owning user — the API has no operation that
//! crosses user boundaries, which is the security invariant the retrieval
//! layer leans on. Writes are per-document and atomic: a document and its
//! full chunk set become visible together or not at all, so readers never
//! observe a partially populated document.

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{KnowledgeError, Result};
use crate::models::{
    ChunkWithProvenance, DocumentChunk, FileType, KnowledgeDocument, NewChunk, NewDocument,
};

#[derive(Clone)]
pub struct KnowledgeStore {
    pool: SqlitePool,
}

impl KnowledgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a document together with its full chunk batch in one
    /// transaction. A failure anywhere rolls the whole document back.
    pub async fn save_document(&self, doc: &NewDocument, chunks: &[NewChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (id, user_id, title, content, file_type, file_size, source_url,
                 metadata_json, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.user_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(doc.file_type.as_str())
        .bind(doc.file_size as i64)
        .bind(&doc.source_url)
        .bind(doc.metadata.to_string())
        .bind(&doc.content_hash)
        .bind(doc.created_at)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            let blob = chunk.embedding.as_deref().map(vec_to_blob);
            let dims = chunk.embedding.as_ref().map(|v| v.len() as i64);

            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, embedding, dims, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&doc.id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(blob)
            .bind(dims)
            .bind(chunk.metadata.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All chunks owned by a user, joined with their parent document's
    /// title for provenance, ordered by (document, chunk index).
    pub async fn chunks_for_user(&self, user_id: &str) -> Result<Vec<ChunkWithProvenance>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, c.embedding, c.dims,
                   c.metadata_json, d.title AS document_title
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.user_id = ?
            ORDER BY c.document_id, c.chunk_index
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let chunks = rows
            .iter()
            .map(|row| ChunkWithProvenance {
                chunk: chunk_from_row(row),
                document_title: row.get("document_title"),
            })
            .collect();

        Ok(chunks)
    }

    /// A user's documents, newest first.
    pub async fn documents_for_user(&self, user_id: &str) -> Result<Vec<KnowledgeDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, content, file_type, file_size, source_url,
                   metadata_json, created_at
            FROM documents
            WHERE user_id = ?
            ORDER BY created_at DESC, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    /// One document, still scoped by owner — a valid id belonging to a
    /// different user behaves exactly like a missing one.
    pub async fn document_for_user(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<KnowledgeDocument>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, title, content, file_type, file_size, source_url,
                   metadata_json, created_at
            FROM documents
            WHERE user_id = ? AND id = ?
            "#,
        )
        .bind(user_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn count_documents_for_user(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete a document and (via cascade) its chunks. Returns whether a
    /// row was actually removed. This is the only deletion path — chunks
    /// never outlive their document.
    pub async fn delete_document(&self, user_id: &str, document_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Merge new keys into a document's metadata map. The only mutation a
    /// document supports after creation.
    pub async fn enrich_metadata(
        &self,
        user_id: &str,
        document_id: &str,
        extra: &serde_json::Value,
    ) -> Result<bool> {
        let Some(doc) = self.document_for_user(user_id, document_id).await? else {
            return Ok(false);
        };

        let mut merged = doc.metadata;
        if let (Some(map), Some(extra_map)) = (merged.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_map {
                map.insert(k.clone(), v.clone());
            }
        }

        let result = sqlx::query("UPDATE documents SET metadata_json = ? WHERE user_id = ? AND id = ?")
            .bind(merged.to_string())
            .bind(user_id)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> DocumentChunk {
    let blob: Option<Vec<u8>> = row.get("embedding");
    let dims: Option<i64> = row.get("dims");
    let metadata_json: String = row.get("metadata_json");

    // A stored vector whose length disagrees with its declared
    // dimensionality is structurally invalid: surfaced as "no embedding"
    // so ranking skips it, never as a scoring error.
    let embedding = blob.map(|b| blob_to_vec(&b)).filter(|v| {
        !v.is_empty() && dims.map(|d| d as usize == v.len()).unwrap_or(true)
    });

    DocumentChunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        embedding,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeDocument> {
    let file_type: String = row.get("file_type");
    let file_type: FileType = file_type.parse().map_err(|_| {
        KnowledgeError::Storage(sqlx::Error::Decode(
            format!("unknown file_type in documents table: {}", file_type).into(),
        ))
    })?;
    let metadata_json: String = row.get("metadata_json");
    let file_size: i64 = row.get("file_size");

    Ok(KnowledgeDocument {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        content: row.get("content"),
        file_type,
        file_size: file_size as u64,
        source_url: row.get("source_url"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        created_at: row.get("created_at"),
    })
}
