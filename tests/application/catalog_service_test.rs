use std::sync::Arc;

use invoice_copilot::application::ports::{CatalogIndex, CatalogRepository, Embedder};
use invoice_copilot::application::services::{CatalogError, CatalogService};
use invoice_copilot::domain::{CatalogEntity, EntityKind};
use invoice_copilot::infrastructure::persistence::{InMemoryCatalogIndex, InMemoryCatalogRepository};

use crate::helpers::{SwitchableEmbedder, test_retry};

struct Catalog {
    repository: Arc<InMemoryCatalogRepository>,
    index: Arc<InMemoryCatalogIndex>,
    embedder: Arc<SwitchableEmbedder>,
    service: CatalogService,
}

fn catalog() -> Catalog {
    let repository = Arc::new(InMemoryCatalogRepository::new());
    let index = Arc::new(InMemoryCatalogIndex::new());
    let embedder = Arc::new(SwitchableEmbedder::new());
    let service = CatalogService::new(
        repository.clone(),
        index.clone(),
        embedder.clone(),
        test_retry(),
    );
    Catalog {
        repository,
        index,
        embedder,
        service,
    }
}

impl Catalog {
    /// Similarity between the entity's current text and its indexed vector.
    async fn indexed_score(&self, entity: &CatalogEntity) -> f32 {
        let query = self.embedder.embed(&entity.embedding_text()).await.unwrap();
        let matches = self.index.nearest(entity.kind, &query, 1).await.unwrap();
        assert_eq!(matches[0].entity_id, entity.id);
        matches[0].score
    }
}

#[tokio::test]
async fn given_embedder_down_when_editing_entity_then_row_keeps_previous_text() {
    let catalog = catalog();
    let original = catalog
        .service
        .upsert_entity(EntityKind::Product, "Widget", None)
        .await
        .unwrap();

    catalog.embedder.set_down(true);
    let result = catalog
        .service
        .upsert_entity(EntityKind::Product, "Widget", Some("blue gadget".to_string()))
        .await;

    assert!(matches!(result, Err(CatalogError::Embedding(_))));
    let stored = catalog.repository.get(original.id).await.unwrap().unwrap();
    assert_eq!(stored.description, None);
    assert_eq!(stored.content_hash, original.content_hash);
    catalog.embedder.set_down(false);
    assert!(catalog.indexed_score(&stored).await > 0.99);
}

#[tokio::test]
async fn given_failed_edit_when_retrying_then_entity_is_reembedded() {
    let catalog = catalog();
    catalog
        .service
        .upsert_entity(EntityKind::Product, "Widget", None)
        .await
        .unwrap();
    catalog.embedder.set_down(true);
    let _ = catalog
        .service
        .upsert_entity(EntityKind::Product, "Widget", Some("blue gadget".to_string()))
        .await;

    catalog.embedder.set_down(false);
    let updated = catalog
        .service
        .upsert_entity(EntityKind::Product, "Widget", Some("blue gadget".to_string()))
        .await
        .unwrap();

    assert_eq!(updated.description.as_deref(), Some("blue gadget"));
    let stored = catalog.repository.get(updated.id).await.unwrap().unwrap();
    assert_eq!(stored.content_hash, updated.content_hash);
    assert!(catalog.indexed_score(&updated).await > 0.99);
}

#[tokio::test]
async fn given_unchanged_text_when_upserting_then_entity_is_returned_as_is() {
    let catalog = catalog();
    let first = catalog
        .service
        .upsert_entity(EntityKind::Company, "Acme Supplies", Some("bolts".to_string()))
        .await
        .unwrap();
    catalog.embedder.set_down(true);

    let again = catalog
        .service
        .upsert_entity(EntityKind::Company, "Acme Supplies", Some("bolts".to_string()))
        .await
        .unwrap();

    assert_eq!(again.id, first.id);
    assert_eq!(again.updated_at, first.updated_at);
}

#[tokio::test]
async fn given_embedder_down_when_creating_by_name_then_row_is_still_stored() {
    let catalog = catalog();
    catalog.embedder.set_down(true);

    let (entity, created) = catalog
        .service
        .create_or_get(EntityKind::Company, "  Initech ")
        .await
        .unwrap();

    assert!(created);
    assert_eq!(entity.name, "Initech");
    assert_eq!(catalog.service.list(EntityKind::Company).await.unwrap().len(), 1);
}

#[tokio::test]
async fn given_blank_name_when_upserting_then_rejected() {
    let catalog = catalog();

    let result = catalog
        .service
        .upsert_entity(EntityKind::Product, "   ", None)
        .await;

    assert!(matches!(result, Err(CatalogError::EmptyName)));
}
