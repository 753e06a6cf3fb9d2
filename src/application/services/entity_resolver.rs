use std::sync::Arc;

use super::retry::{CallError, RetryPolicy};
use crate::application::ports::{
    CatalogIndex, CatalogRepository, Embedder, EmbedderError, RepositoryError, VectorStoreError,
};
use crate::domain::{EntityKind, MatchKind, Resolution, normalize_name};

#[derive(Debug, Clone, Copy)]
pub struct ResolutionThresholds {
    /// At or above: accepted as a similarity match.
    pub accept: f32,
    /// At or above (and below `accept`): kept as a candidate for review.
    pub candidate: f32,
}

impl Default for ResolutionThresholds {
    fn default() -> Self {
        Self {
            accept: 0.80,
            candidate: 0.60,
        }
    }
}

/// Maps free text from an invoice onto catalog entities by embedding
/// similarity, falling back to an exact normalized-name lookup. Read-only:
/// resolving never creates entities.
pub struct EntityResolver {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn CatalogIndex>,
    repository: Arc<dyn CatalogRepository>,
    thresholds: ResolutionThresholds,
    retry: RetryPolicy,
}

impl EntityResolver {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn CatalogIndex>,
        repository: Arc<dyn CatalogRepository>,
        thresholds: ResolutionThresholds,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            index,
            repository,
            thresholds,
            retry,
        }
    }

    pub fn thresholds(&self) -> ResolutionThresholds {
        self.thresholds
    }

    pub async fn resolve(&self, kind: EntityKind, text: &str) -> Result<Resolution, ResolutionError> {
        let query = text.trim();
        if normalize_name(query).is_empty() {
            return Ok(Resolution::no_match(kind, query, 0.0));
        }

        let embedding = self
            .retry
            .call("resolver_embed", || self.embedder.embed(query))
            .await
            .map_err(ResolutionError::Embedding)?;

        let nearest = self
            .retry
            .call("resolver_nearest", || self.index.nearest(kind, &embedding, 1))
            .await
            .map_err(ResolutionError::Search)?;

        let resolution = match nearest.first() {
            Some(best) if best.score >= self.thresholds.accept => Resolution {
                kind,
                query: query.to_string(),
                entity_id: Some(best.entity_id),
                score: best.score,
                match_kind: MatchKind::Similarity,
            },
            best => {
                // Vector missed (stale or not yet indexed); the name key may
                // still hit.
                if let Some(exact) = self.exact_match(kind, query).await? {
                    exact
                } else {
                    match best {
                        Some(best) if best.score >= self.thresholds.candidate => Resolution {
                            kind,
                            query: query.to_string(),
                            entity_id: Some(best.entity_id),
                            score: best.score,
                            match_kind: MatchKind::Candidate,
                        },
                        Some(best) => Resolution::no_match(kind, query, best.score),
                        None => Resolution::no_match(kind, query, 0.0),
                    }
                }
            }
        };

        tracing::debug!(
            kind = %kind,
            query = %query,
            match_kind = ?resolution.match_kind,
            score = resolution.score,
            "Entity resolved"
        );
        Ok(resolution)
    }

    async fn exact_match(
        &self,
        kind: EntityKind,
        query: &str,
    ) -> Result<Option<Resolution>, ResolutionError> {
        let key = normalize_name(query);
        let found = self.repository.find_by_name(kind, &key).await?;
        Ok(found.map(|entity| Resolution {
            kind,
            query: query.to_string(),
            entity_id: Some(entity.id),
            score: 1.0,
            match_kind: MatchKind::Exact,
        }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("embedding: {0}")]
    Embedding(CallError<EmbedderError>),
    #[error("similarity search: {0}")]
    Search(CallError<VectorStoreError>),
    #[error("catalog lookup: {0}")]
    Catalog(#[from] RepositoryError),
}
