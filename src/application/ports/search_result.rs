use crate::domain::{CatalogEntityId, Chunk};

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityMatch {
    pub entity_id: CatalogEntityId,
    pub score: f32,
}
