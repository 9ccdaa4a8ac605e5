//! Document listing, inspection, and deletion for the CLI.
//!
//! Every operation is scoped to the supplied user — a document id that
//! belongs to someone else behaves exactly like a missing one.

use anyhow::Result;

use crate::store::KnowledgeStore;

/// List a user's documents, newest first.
pub async fn run_documents(store: &KnowledgeStore, user: &str) -> Result<()> {
    let documents = store.documents_for_user(user).await?;

    if documents.is_empty() {
        println!("No documents for user {}.", user);
        return Ok(());
    }

    println!("documents for {} ({})", user, documents.len());
    for doc in &documents {
        let date = chrono::DateTime::from_timestamp(doc.created_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!(
            "  {}  {}  {} ({} bytes)  {}",
            doc.id, date, doc.file_type, doc.file_size, doc.title
        );
    }

    Ok(())
}

/// Print one document's metadata, body, and chunks.
pub async fn run_get(store: &KnowledgeStore, user: &str, id: &str) -> Result<()> {
    let doc = match store.document_for_user(user, id).await? {
        Some(d) => d,
        None => {
            eprintln!("Error: document not found: {}", id);
            std::process::exit(1);
        }
    };

    let chunks = store.chunks_for_user(user).await?;
    let chunks: Vec<_> = chunks
        .into_iter()
        .filter(|c| c.chunk.document_id == id)
        .collect();

    println!("--- Document ---");
    println!("id:         {}", doc.id);
    println!("title:      {}", doc.title);
    println!("type:       {}", doc.file_type);
    println!("size:       {} bytes", doc.file_size);
    println!("created_at: {}", format_ts_iso(doc.created_at));
    if let Some(ref url) = doc.source_url {
        println!("source:     {}", url);
    }
    println!("metadata:   {}", doc.metadata);
    println!();

    println!("--- Chunks ({}) ---", chunks.len());
    for c in &chunks {
        let embedded = if c.chunk.embedding.is_some() {
            "embedded"
        } else {
            "no embedding"
        };
        println!("[chunk {} — {}]", c.chunk.chunk_index, embedded);
        println!("{}", c.chunk.text);
        println!();
    }

    Ok(())
}

/// Delete a document and its chunks. The only deletion path in the system.
pub async fn run_delete(store: &KnowledgeStore, user: &str, id: &str) -> Result<()> {
    if store.delete_document(user, id).await? {
        println!("deleted {}", id);
    } else {
        eprintln!("Error: document not found: {}", id);
        std::process::exit(1);
    }
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
