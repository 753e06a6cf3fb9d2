use serde::{Deserialize, Serialize};

use super::{CatalogEntityId, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Normalized name equals an existing entity.
    Exact,
    /// Nearest neighbour at or above the acceptance threshold.
    Similarity,
    /// Nearest neighbour in the intermediate band; needs manual review.
    Candidate,
    /// Nothing close enough; a new catalog entry may be created on commit.
    NoMatch,
}

/// Outcome of resolving a free-text reference against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub kind: EntityKind,
    pub query: String,
    pub entity_id: Option<CatalogEntityId>,
    pub score: f32,
    pub match_kind: MatchKind,
}

impl Resolution {
    pub fn no_match(kind: EntityKind, query: impl Into<String>, score: f32) -> Self {
        Self {
            kind,
            query: query.into(),
            entity_id: None,
            score,
            match_kind: MatchKind::NoMatch,
        }
    }

    pub fn accepted_entity(&self) -> Option<CatalogEntityId> {
        match self.match_kind {
            MatchKind::Exact | MatchKind::Similarity => self.entity_id,
            MatchKind::Candidate | MatchKind::NoMatch => None,
        }
    }

    pub fn candidate_entity(&self) -> Option<CatalogEntityId> {
        match self.match_kind {
            MatchKind::Candidate => self.entity_id,
            _ => None,
        }
    }

    pub fn matched_by_embedding(&self) -> bool {
        self.match_kind == MatchKind::Similarity
    }
}
