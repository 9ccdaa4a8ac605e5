//! Ingestion pipeline orchestration.
//!
//! Coordinates the full upload flow: size validation → extraction →
//! sanitization → chunking → embedding → storage. Chunk embeddings for one
//! document run concurrently under a bounded worker pool; a single chunk's
//! embedding failure degrades that chunk to "no embedding" instead of
//! failing the document. The document and its chunk batch are committed in
//! one transaction at the end, so a crash mid-ingestion leaves no trace.

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{KnowledgeError, Result};
use crate::extract;
use crate::models::{FileType, NewChunk, NewDocument};
use crate::sanitize::{sanitize_collapse, sanitize_metadata, sanitize_preserve};
use crate::store::KnowledgeStore;

/// Outcome of a successful ingestion, returned to the upload caller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub title: String,
    pub file_type: FileType,
    pub file_size: u64,
    pub chunk_count: usize,
    /// Chunks that received an embedding vector.
    pub embedded_chunks: usize,
    /// Chunks persisted without one after an embedding failure.
    pub failed_embeddings: usize,
    pub summary: String,
    pub first_page_content: String,
}

/// Ingest one uploaded file for the given user.
///
/// Fails with `Unauthenticated` before touching anything if no user is
/// supplied; all other failure modes are extraction/validation errors or a
/// storage failure on the final commit. Embedding failures are not
/// failure modes of this function.
pub async fn ingest_file(
    config: &Config,
    store: &KnowledgeStore,
    embedder: Arc<dyn Embedder>,
    user_id: Option<&str>,
    bytes: &[u8],
    filename: &str,
) -> Result<IngestReport> {
    let user_id = user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or(KnowledgeError::Unauthenticated)?;

    let extracted = extract::extract_with_limit(
        bytes,
        filename,
        config.extraction.max_file_size_bytes(),
    )?;

    let content = sanitize_preserve(&extracted.content);
    if content.trim().is_empty() {
        return Err(KnowledgeError::EmptyContent);
    }
    let title = sanitize_collapse(&extracted.title);

    let passages = chunk_text(&content, &config.chunking);
    tracing::info!(
        user = user_id,
        file = filename,
        chunks = passages.len(),
        "ingesting document"
    );

    let embeddings = embed_passages(
        embedder,
        passages.iter().map(|p| p.text.clone()).collect(),
        config.embedding.concurrency,
    )
    .await;

    let document_id = Uuid::new_v4().to_string();
    let embedded_chunks = embeddings.iter().filter(|e| e.is_some()).count();
    let failed_embeddings = passages.len() - embedded_chunks;
    if failed_embeddings > 0 {
        tracing::warn!(
            document = document_id.as_str(),
            failed = failed_embeddings,
            "some chunks were persisted without embeddings"
        );
    }

    let chunks: Vec<NewChunk> = passages
        .iter()
        .zip(embeddings)
        .map(|(passage, embedding)| NewChunk {
            id: Uuid::new_v4().to_string(),
            chunk_index: passage.index,
            text: passage.text.clone(),
            embedding,
            metadata: serde_json::json!({ "char_offset": passage.char_start }),
        })
        .collect();

    // Best-effort retention of the original upload. Never blocks or
    // invalidates ingestion.
    let source_url = store_blob(config, &document_id, filename, bytes);

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(content.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    let metadata = sanitize_metadata(&serde_json::json!({
        "source_filename": filename,
        "preview": extract::preview(&content),
    }));

    let doc = NewDocument {
        id: document_id.clone(),
        user_id: user_id.to_string(),
        title: title.clone(),
        content: content.clone(),
        file_type: extracted.file_type,
        file_size: extracted.file_size,
        source_url,
        metadata,
        content_hash,
        created_at: chrono::Utc::now().timestamp(),
    };

    store.save_document(&doc, &chunks).await?;

    Ok(IngestReport {
        document_id,
        title,
        file_type: extracted.file_type,
        file_size: extracted.file_size,
        chunk_count: chunks.len(),
        embedded_chunks,
        failed_embeddings,
        summary: extract::summarize(&content),
        first_page_content: extract::preview(&content),
    })
}

/// Embed each passage through a bounded worker pool, collecting a
/// `(vector | failure)` result per chunk. One chunk failing — timeout,
/// provider error, disabled provider — never aborts its siblings.
async fn embed_passages(
    embedder: Arc<dyn Embedder>,
    texts: Vec<String>,
    concurrency: usize,
) -> Vec<Option<Vec<f32>>> {
    let total = texts.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, text) in texts.into_iter().enumerate() {
        let embedder = embedder.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            // The semaphore lives for the whole pool; acquisition only
            // fails if it were closed, which nothing here does.
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, None),
            };
            match crate::embedding::embed_one(embedder.as_ref(), &text).await {
                Ok(vector) => (index, Some(vector)),
                Err(e) => {
                    tracing::warn!(chunk = index, error = %e, "chunk embedding failed");
                    (index, None)
                }
            }
        });
    }

    let mut results: Vec<Option<Vec<f32>>> = Vec::new();
    let mut collected: Vec<(usize, Option<Vec<f32>>)> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(pair) => collected.push(pair),
            Err(e) => tracing::warn!(error = %e, "embedding worker panicked"),
        }
    }
    collected.sort_by_key(|(index, _)| *index);

    let mut next = 0usize;
    for (index, vector) in collected {
        // Panicked workers leave holes; fill them with failures.
        while next < index {
            results.push(None);
            next += 1;
        }
        results.push(vector);
        next += 1;
    }
    while results.len() < total {
        results.push(None);
    }
    results
}

fn store_blob(config: &Config, document_id: &str, filename: &str, bytes: &[u8]) -> Option<String> {
    let blob_dir = config.storage.blob_dir.as_ref()?;

    let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let path = blob_dir.join(format!("{}-{}", document_id, basename));

    let write = std::fs::create_dir_all(blob_dir).and_then(|_| std::fs::write(&path, bytes));
    match write {
        Ok(()) => Some(path.display().to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "failed to retain original upload; continuing");
            None
        }
    }
}

/// CLI entry point — ingest a file from disk and print the report.
pub async fn run_ingest(
    config: &Config,
    store: &KnowledgeStore,
    embedder: Arc<dyn Embedder>,
    user: &str,
    file_path: &Path,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file_path)?;
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");

    match ingest_file(config, store, embedder, Some(user), &bytes, filename).await {
        Ok(report) => {
            println!("ingest {}", filename);
            println!("  document: {}", report.document_id);
            println!("  title: {}", report.title);
            println!("  type: {} ({} bytes)", report.file_type, report.file_size);
            println!("  chunks: {}", report.chunk_count);
            println!("  embedded: {}", report.embedded_chunks);
            if report.failed_embeddings > 0 {
                println!("  missing embeddings: {}", report.failed_embeddings);
            }
            println!("ok");
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
