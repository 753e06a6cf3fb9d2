use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::retry::{CallError, RetryPolicy};
use super::token_counter::count_tokens;
use crate::application::ports::{
    CollectionConfig, Embedder, EmbedderError, LlmClient, LlmClientError, LlmTokenStream,
    TextSplitter, TextSplitterError, VectorStore, VectorStoreError,
};
use crate::domain::{ChunkId, DocumentId, Provenance};

const ANSWER_INSTRUCTIONS: &str = "You answer questions about the invoice product using only the numbered context passages below. \
Cite passages as [n]. If the passages do not contain the answer, say that you do not know.";

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub score_threshold: f32,
    /// Candidates fetched per requested result before reranking.
    pub candidate_multiplier: usize,
    /// Weight of query-term overlap in the rerank score.
    pub lexical_weight: f32,
    pub max_context_tokens: usize,
    pub insufficient_context_message: String,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_threshold: 0.5,
            candidate_multiplier: 3,
            lexical_weight: 0.15,
            max_context_tokens: 3000,
            insufficient_context_message:
                "I could not find anything in the documentation that answers this.".to_string(),
        }
    }
}

/// One section of a knowledge-base document.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    pub heading: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceDocument {
    pub source: String,
    pub title: String,
    pub sections: Vec<SourceSection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub index: usize,
    pub source: String,
    pub title: String,
    pub section: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: ChunkId,
    pub text: String,
    pub provenance: Provenance,
    pub vector_score: f32,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub enum RagAnswer {
    Answered {
        answer: String,
        citations: Vec<Citation>,
    },
    InsufficientContext {
        message: String,
    },
}

pub enum RagStream {
    Streaming {
        citations: Vec<Citation>,
        tokens: LlmTokenStream,
    },
    InsufficientContext {
        message: String,
    },
}

/// Knowledge-base retrieval over a vector collection. Answers are grounded
/// in the passages handed to the model, and only those passages are cited.
pub struct RetrievalService {
    embedder: Arc<dyn Embedder>,
    llm_client: Arc<dyn LlmClient>,
    vector_store: Arc<dyn VectorStore>,
    text_splitter: Arc<dyn TextSplitter>,
    settings: RetrievalSettings,
    retry: RetryPolicy,
}

impl RetrievalService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm_client: Arc<dyn LlmClient>,
        vector_store: Arc<dyn VectorStore>,
        text_splitter: Arc<dyn TextSplitter>,
        settings: RetrievalSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            llm_client,
            vector_store,
            text_splitter,
            settings,
            retry,
        }
    }

    /// Splits and embeds the corpus, creating the collection on first use.
    /// Re-indexing a source replaces its earlier chunks once every new chunk
    /// is stored; a failed pass leaves the previous chunks searchable.
    pub async fn index(
        &self,
        corpus: &[SourceDocument],
        collection: &CollectionConfig,
    ) -> Result<IndexReport, RetrievalError> {
        if !self.vector_store.collection_exists().await? {
            self.vector_store.create_collection(collection).await?;
        }

        let mut chunk_count = 0;
        for document in corpus {
            let document_id = DocumentId::new();
            for section in &document.sections {
                let provenance = Provenance {
                    source: document.source.clone(),
                    title: document.title.clone(),
                    section: section.heading.clone(),
                };
                let chunks = self
                    .text_splitter
                    .split(&section.text, document_id, &provenance)
                    .await?;
                if chunks.is_empty() {
                    continue;
                }

                let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
                let embeddings = self
                    .retry
                    .call("corpus_embed", || self.embedder.embed_batch(&texts))
                    .await
                    .map_err(RetrievalError::Embedding)?;
                self.vector_store.upsert(&chunks, &embeddings).await?;
                chunk_count += chunks.len();
            }
            self.vector_store
                .delete_stale(&document.source, document_id)
                .await?;
            tracing::debug!(source = %document.source, "Knowledge document indexed");
        }

        tracing::info!(documents = corpus.len(), chunks = chunk_count, "Knowledge base indexed");
        Ok(IndexReport {
            documents: corpus.len(),
            chunks: chunk_count,
        })
    }

    /// Top `k` chunks above the score threshold, reranked by query-term
    /// overlap.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let query_embedding = self
            .retry
            .call("query_embed", || self.embedder.embed(query))
            .await
            .map_err(RetrievalError::Embedding)?;

        let fetch = k.max(1) * self.settings.candidate_multiplier.max(1);
        let results = self
            .retry
            .call("knowledge_search", || {
                self.vector_store.search(&query_embedding, fetch)
            })
            .await
            .map_err(RetrievalError::Search)?;

        let terms = query_terms(query);
        let mut ranked: Vec<RetrievedChunk> = results
            .into_iter()
            .filter(|r| r.score >= self.settings.score_threshold)
            .map(|r| {
                let overlap = term_overlap(&terms, &r.chunk.text);
                let w = self.settings.lexical_weight.clamp(0.0, 1.0);
                RetrievedChunk {
                    chunk_id: r.chunk.id,
                    score: (1.0 - w) * r.score + w * overlap,
                    vector_score: r.score,
                    text: r.chunk.text,
                    provenance: r.chunk.provenance,
                }
            })
            .collect();

        // Stable: equal scores keep the store's order.
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(k);
        Ok(ranked)
    }

    pub async fn answer(&self, query: &str) -> Result<RagAnswer, RetrievalError> {
        let Some((context, citations)) = self.build_context(query).await? else {
            return Ok(RagAnswer::InsufficientContext {
                message: self.settings.insufficient_context_message.clone(),
            });
        };

        let system = format!("{}\n\n{}", ANSWER_INSTRUCTIONS, context);
        let answer = self
            .retry
            .call("rag_answer", || self.llm_client.complete(query, &system))
            .await
            .map_err(RetrievalError::Completion)?;

        Ok(RagAnswer::Answered { answer, citations })
    }

    pub async fn answer_stream(&self, query: &str) -> Result<RagStream, RetrievalError> {
        let Some((context, citations)) = self.build_context(query).await? else {
            return Ok(RagStream::InsufficientContext {
                message: self.settings.insufficient_context_message.clone(),
            });
        };

        let system = format!("{}\n\n{}", ANSWER_INSTRUCTIONS, context);
        let tokens = self
            .retry
            .call("rag_answer_stream", || {
                self.llm_client.complete_stream(query, &system)
            })
            .await
            .map_err(RetrievalError::Completion)?;

        Ok(RagStream::Streaming { citations, tokens })
    }

    /// Numbered passages that fit the token budget, with one citation per
    /// passage actually included.
    async fn build_context(
        &self,
        query: &str,
    ) -> Result<Option<(String, Vec<Citation>)>, RetrievalError> {
        let chunks = self.search(query, self.settings.top_k).await?;

        let mut context = String::new();
        let mut citations = Vec::new();
        let mut used_tokens = 0;
        for chunk in chunks {
            let index = citations.len() + 1;
            let heading = match &chunk.provenance.section {
                Some(section) => format!("[{}] {} / {}", index, chunk.provenance.title, section),
                None => format!("[{}] {}", index, chunk.provenance.title),
            };
            let passage = format!("{}\n{}\n\n", heading, chunk.text);
            let tokens = count_tokens(&passage);
            if used_tokens + tokens > self.settings.max_context_tokens {
                break;
            }
            used_tokens += tokens;
            context.push_str(&passage);
            citations.push(Citation {
                index,
                source: chunk.provenance.source,
                title: chunk.provenance.title,
                section: chunk.provenance.section,
                score: chunk.score,
            });
        }

        if citations.is_empty() {
            tracing::debug!("No passage cleared the score threshold or token budget");
            return Ok(None);
        }
        Ok(Some((context, citations)))
    }
}

fn query_terms(query: &str) -> HashSet<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms present in `text`.
fn term_overlap(terms: &HashSet<String>, text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let words: HashSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .collect();
    let hits = terms.iter().filter(|t| words.contains(*t)).count();
    hits as f32 / terms.len() as f32
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding: {0}")]
    Embedding(CallError<EmbedderError>),
    #[error("search: {0}")]
    Search(CallError<VectorStoreError>),
    #[error("vector store: {0}")]
    VectorStore(#[from] VectorStoreError),
    #[error("text splitting: {0}")]
    Splitting(#[from] TextSplitterError),
    #[error("completion: {0}")]
    Completion(CallError<LlmClientError>),
}
