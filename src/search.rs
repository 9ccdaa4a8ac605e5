//! Retrieval orchestration — the user-facing search operation.
//!
//! Validates the request, embeds the query, scans the caller's stored
//! chunks, ranks them, and packages an explainable result bundle. The
//! conversational tool layer sitting above this cannot recover from a
//! thrown error mid-conversation, so every failure past authentication is
//! caught here and converted into a structured "search failed" response —
//! [`search_knowledge`] only ever errors for an unauthenticated caller.

use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::embedding::{embed_one, Embedder};
use crate::error::{KnowledgeError, Result as KnowledgeResult};
use crate::models::SearchResult;
use crate::rank;
use crate::store::KnowledgeStore;

/// Maximum number of query-refinement suggestions offered on a miss.
const MAX_SUGGESTIONS: usize = 3;

/// Parameters of one search call, as received from the tool layer.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Desired result count; clamped to [1, 10].
    #[serde(default)]
    pub limit: Option<usize>,
    /// Base similarity threshold; clamped to [0.0, 1.0].
    #[serde(default)]
    pub min_similarity: Option<f32>,
    /// Adjust the threshold for query length before ranking.
    #[serde(default)]
    pub dynamic_threshold: bool,
}

/// The JSON-serializable result bundle handed back to the tool layer.
/// Always well-formed: on failure `error` is set and `results` is empty.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub total_results: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResponse {
    fn empty(query: &str, message: impl Into<String>) -> Self {
        Self {
            query: query.to_string(),
            results: Vec::new(),
            summary: None,
            total_results: 0,
            message: message.into(),
            suggestions: None,
            error: None,
        }
    }

    fn failed(query: &str, error: &KnowledgeError) -> Self {
        let mut response = Self::empty(
            query,
            "The knowledge base search failed. Please try again in a moment.",
        );
        response.error = Some(error.to_string());
        response
    }
}

/// Run a knowledge search for one user.
///
/// The only error this returns is [`KnowledgeError::Unauthenticated`],
/// raised before any store access. Everything downstream — embedding the
/// query, scanning the store, ranking — is caught and reported inside the
/// response bundle.
pub async fn search_knowledge(
    store: &KnowledgeStore,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    user_id: Option<&str>,
    request: &SearchRequest,
) -> KnowledgeResult<SearchResponse> {
    let user_id = user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or(KnowledgeError::Unauthenticated)?;

    let query = request.query.trim();
    if query.is_empty() {
        return Ok(SearchResponse::empty(
            query,
            "Please provide a search query.",
        ));
    }

    let limit = rank::clamp_limit(request.limit.unwrap_or(retrieval.default_limit));
    let base_threshold = rank::clamp_similarity(
        request
            .min_similarity
            .unwrap_or(retrieval.default_min_similarity),
    );
    let threshold = if request.dynamic_threshold {
        rank::adaptive_threshold(query, base_threshold)
    } else {
        base_threshold
    };
    tracing::debug!(
        user = user_id,
        limit,
        threshold,
        dynamic = request.dynamic_threshold,
        "searching knowledge base"
    );

    let query_vector = match embed_one(embedder, query).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed");
            return Ok(SearchResponse::failed(query, &e));
        }
    };

    let candidates = match store.chunks_for_user(user_id).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "candidate fetch failed");
            return Ok(SearchResponse::failed(query, &e));
        }
    };

    let results = rank::rank(
        &query_vector,
        &candidates,
        threshold,
        limit,
        &retrieval.relevance_bands,
    );

    if results.is_empty() {
        // Distinguish "nothing uploaded yet" from "nothing matched".
        let document_count = match store.count_documents_for_user(user_id).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "document count failed");
                return Ok(SearchResponse::failed(query, &e));
            }
        };
        if document_count == 0 {
            return Ok(SearchResponse::empty(
                query,
                "Your knowledge base is empty. Upload documents to start searching them.",
            ));
        }
        let mut response = SearchResponse::empty(
            query,
            "No stored passages matched this query. Try rephrasing, or one of the suggested variants.",
        );
        let suggestions = refine_query(query);
        if !suggestions.is_empty() {
            response.suggestions = Some(suggestions);
        }
        return Ok(response);
    }

    let total_results = results.len();
    let summary = summarize_results(&results, &retrieval.relevance_bands);
    Ok(SearchResponse {
        query: query.to_string(),
        message: format!(
            "Found {} relevant passage{}.",
            total_results,
            if total_results == 1 { "" } else { "s" }
        ),
        summary: Some(summary),
        total_results,
        results,
        suggestions: None,
        error: None,
    })
}

/// Build up to three refinement suggestions from the query terms: drop the
/// first token, drop the last token, or join all terms conjunctively.
/// Variants that collapse back into the original query are discarded, as
/// are duplicates.
fn refine_query(query: &str) -> Vec<String> {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    if tokens.len() < 2 {
        return Vec::new();
    }

    let mut suggestions: Vec<String> = Vec::new();
    let mut push_unique = |candidate: String| {
        if !candidate.is_empty()
            && candidate != query
            && !suggestions.contains(&candidate)
            && suggestions.len() < MAX_SUGGESTIONS
        {
            suggestions.push(candidate);
        }
    };

    push_unique(tokens[1..].join(" "));
    push_unique(tokens[..tokens.len() - 1].join(" "));
    push_unique(tokens.join(" AND "));

    suggestions
}

/// One-paragraph overview naming the distinct source documents and
/// counting the hits in the top relevance band.
fn summarize_results(results: &[SearchResult], bands: &[f32]) -> String {
    let mut titles: Vec<&str> = Vec::new();
    for r in results {
        if !titles.contains(&r.document_title.as_str()) {
            titles.push(&r.document_title);
        }
    }

    let top_band = bands.first().copied().unwrap_or(0.8);
    let highly_relevant = results.iter().filter(|r| r.similarity >= top_band).count();

    let sources = match titles.as_slice() {
        [only] => format!("\"{}\"", only),
        [first, second] => format!("\"{}\" and \"{}\"", first, second),
        [first, rest @ ..] => format!("\"{}\" and {} other documents", first, rest.len()),
        [] => "your documents".to_string(),
    };

    if highly_relevant > 0 {
        format!(
            "Drawn from {}; {} of the {} passages are highly relevant to the query.",
            sources,
            highly_relevant,
            results.len()
        )
    } else {
        format!(
            "Drawn from {}; no passage exceeded the top relevance band, so treat these as approximate matches.",
            sources
        )
    }
}

/// CLI entry point — run a search and print the bundle.
pub async fn run_search(
    store: &KnowledgeStore,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    user: &str,
    request: &SearchRequest,
) -> anyhow::Result<()> {
    let response = search_knowledge(store, embedder, retrieval, Some(user), request).await?;

    if let Some(ref error) = response.error {
        eprintln!("search failed: {}", error);
        std::process::exit(1);
    }

    if response.results.is_empty() {
        println!("{}", response.message);
        if let Some(ref suggestions) = response.suggestions {
            println!("Suggestions:");
            for s in suggestions {
                println!("  - {}", s);
            }
        }
        return Ok(());
    }

    println!("{}", response.message);
    if let Some(ref summary) = response.summary {
        println!("{}", summary);
    }
    println!();
    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} — {} (chunk {})",
            i + 1,
            result.similarity,
            result.relevance,
            result.document_title,
            result.chunk_index
        );
        let excerpt: String = result.content.chars().take(240).collect();
        println!("    \"{}\"", excerpt.replace('\n', " "));
        println!("    document: {}", result.document_id);
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::{DisabledEmbedder, HashEmbedder};
    use crate::migrate::apply_schema;
    use crate::models::{FileType, NewChunk, NewDocument};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn memory_store() -> KnowledgeStore {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        KnowledgeStore::new(pool)
    }

    fn hash_embedder() -> HashEmbedder {
        HashEmbedder::new(&EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(64),
            ..EmbeddingConfig::default()
        })
        .unwrap()
    }

    async fn seed_document(
        store: &KnowledgeStore,
        embedder: &HashEmbedder,
        user: &str,
        doc_id: &str,
        title: &str,
        passages: &[&str],
    ) {
        let chunks: Vec<NewChunk> = build_chunks(passages, embedder).await;
        let doc = NewDocument {
            id: doc_id.to_string(),
            user_id: user.to_string(),
            title: title.to_string(),
            content: passages.join("\n\n"),
            file_type: FileType::Txt,
            file_size: 100,
            source_url: None,
            metadata: serde_json::json!({}),
            content_hash: doc_id.to_string(),
            created_at: 1_700_000_000,
        };
        store.save_document(&doc, &chunks).await.unwrap();
    }

    async fn build_chunks(passages: &[&str], embedder: &HashEmbedder) -> Vec<NewChunk> {
        let texts: Vec<String> = passages.iter().map(|p| p.to_string()).collect();
        let vectors = embedder.embed_batch(&texts).await.unwrap();
        texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, vector))| NewChunk {
                id: format!("c-{}", i),
                chunk_index: i as i64,
                text,
                embedding: Some(vector),
                metadata: serde_json::json!({}),
            })
            .collect()
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            limit: None,
            min_similarity: None,
            dynamic_threshold: false,
        }
    }

    #[tokio::test]
    async fn unauthenticated_caller_rejected_before_store_access() {
        let store = memory_store().await;
        let embedder = hash_embedder();
        let err = search_knowledge(
            &store,
            &embedder,
            &RetrievalConfig::default(),
            None,
            &request("anything"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KnowledgeError::Unauthenticated));

        let blank = search_knowledge(
            &store,
            &embedder,
            &RetrievalConfig::default(),
            Some("  "),
            &request("anything"),
        )
        .await;
        assert!(blank.is_err());
    }

    #[tokio::test]
    async fn empty_library_asks_for_uploads_without_suggestions() {
        let store = memory_store().await;
        let embedder = hash_embedder();
        let response = search_knowledge(
            &store,
            &embedder,
            &RetrievalConfig::default(),
            Some("alice"),
            &request("project deadlines"),
        )
        .await
        .unwrap();

        assert_eq!(response.total_results, 0);
        assert!(response.message.contains("Upload"));
        assert!(response.suggestions.is_none());
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn no_match_offers_deduplicated_suggestions() {
        let store = memory_store().await;
        let embedder = hash_embedder();
        seed_document(
            &store,
            &embedder,
            "alice",
            "doc-1",
            "Gardening Notes",
            &["tomato seedlings need regular watering"],
        )
        .await;

        let mut no_match = request("quantum chromodynamics lattice");
        no_match.min_similarity = Some(0.8);
        let response = search_knowledge(
            &store,
            &embedder,
            &RetrievalConfig::default(),
            Some("alice"),
            &no_match,
        )
        .await
        .unwrap();

        assert_eq!(response.total_results, 0);
        assert!(response.message.contains("matched"));
        let suggestions = response.suggestions.unwrap();
        assert!(!suggestions.is_empty() && suggestions.len() <= 3);
        let mut deduped = suggestions.clone();
        deduped.dedup();
        assert_eq!(deduped, suggestions);
    }

    #[tokio::test]
    async fn matching_query_returns_labeled_results_and_summary() {
        let store = memory_store().await;
        let embedder = hash_embedder();
        seed_document(
            &store,
            &embedder,
            "alice",
            "doc-1",
            "Deployment Runbook",
            &[
                "kubernetes deployment rollout procedure",
                "database backup schedule and retention",
            ],
        )
        .await;

        let response = search_knowledge(
            &store,
            &embedder,
            &RetrievalConfig::default(),
            Some("alice"),
            &request("kubernetes deployment rollout procedure"),
        )
        .await
        .unwrap();

        assert!(response.total_results >= 1);
        let top = &response.results[0];
        assert!(top.similarity > 0.9, "identical text should score ~1.0");
        assert_eq!(top.relevance, "Highly Relevant");
        assert_eq!(top.document_title, "Deployment Runbook");
        let summary = response.summary.unwrap();
        assert!(summary.contains("Deployment Runbook"));
        assert!(summary.contains("highly relevant"));
    }

    #[tokio::test]
    async fn results_are_scoped_to_the_requesting_user() {
        let store = memory_store().await;
        let embedder = hash_embedder();
        seed_document(
            &store,
            &embedder,
            "bob",
            "doc-bob",
            "Bob's Secrets",
            &["the launch codes are in the drawer"],
        )
        .await;

        let response = search_knowledge(
            &store,
            &embedder,
            &RetrievalConfig::default(),
            Some("alice"),
            &request("launch codes drawer"),
        )
        .await
        .unwrap();

        assert_eq!(response.total_results, 0);
        assert!(response.message.contains("empty"));
    }

    #[tokio::test]
    async fn embedding_failure_becomes_structured_response() {
        let store = memory_store().await;
        seed_document(
            &store,
            &hash_embedder(),
            "alice",
            "doc-1",
            "Notes",
            &["some indexed text"],
        )
        .await;

        let response = search_knowledge(
            &store,
            &DisabledEmbedder,
            &RetrievalConfig::default(),
            Some("alice"),
            &request("some indexed text"),
        )
        .await
        .unwrap();

        assert_eq!(response.total_results, 0);
        assert!(response.error.is_some());
        assert!(response.message.contains("failed"));
    }

    #[tokio::test]
    async fn blank_query_gets_guidance_not_an_error() {
        let store = memory_store().await;
        let embedder = hash_embedder();
        let response = search_knowledge(
            &store,
            &embedder,
            &RetrievalConfig::default(),
            Some("alice"),
            &request("   "),
        )
        .await
        .unwrap();
        assert_eq!(response.total_results, 0);
        assert!(response.error.is_none());
    }

    #[test]
    fn refine_drops_tokens_and_builds_conjunction() {
        let suggestions = refine_query("rust async runtime");
        assert_eq!(
            suggestions,
            vec![
                "async runtime".to_string(),
                "rust async".to_string(),
                "rust AND async AND runtime".to_string(),
            ]
        );
    }

    #[test]
    fn refine_two_tokens_deduplicates() {
        let suggestions = refine_query("alpha alpha");
        // Dropping first and last collapse to the same variant.
        assert_eq!(
            suggestions,
            vec!["alpha".to_string(), "alpha AND alpha".to_string()]
        );
    }

    #[test]
    fn refine_single_token_yields_nothing() {
        assert!(refine_query("alpha").is_empty());
    }

    #[test]
    fn response_serializes_without_empty_optionals() {
        let response = SearchResponse::empty("q", "message");
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("suggestions").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["total_results"], 0);
    }
}
