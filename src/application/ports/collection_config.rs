/// Shape of a vector collection. Every collection is searched by cosine
/// similarity; `keyword_fields` are the payload fields filtered on by
/// exact match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    pub vector_dimensions: u64,
    pub keyword_fields: Vec<&'static str>,
}

impl CollectionConfig {
    /// Knowledge-base chunks, filterable by provenance.
    pub fn for_chunks(vector_dimensions: u64) -> Self {
        Self {
            vector_dimensions,
            keyword_fields: vec!["document_id", "source", "title"],
        }
    }

    /// Catalog entity vectors, searched with a filter on entity kind.
    pub fn for_catalog(vector_dimensions: u64) -> Self {
        Self {
            vector_dimensions,
            keyword_fields: vec!["kind", "entity_id"],
        }
    }
}
