use invoice_copilot::domain::{CatalogEntity, EntityKind, normalize_name};

#[test]
fn given_names_differing_in_case_and_punctuation_when_normalizing_then_keys_match() {
    assert_eq!(normalize_name("  ACME, Supplies. "), "acme supplies");
    assert_eq!(normalize_name("Acme   Supplies"), normalize_name("acme-supplies"));
}

#[test]
fn given_entity_with_changed_description_when_checking_hash_then_embedding_is_stale() {
    let original = CatalogEntity::new(EntityKind::Product, "Widget A", None);
    let updated = CatalogEntity::new(
        EntityKind::Product,
        "Widget A",
        Some("Blue, 10 mm".to_string()),
    );

    assert!(updated.is_embedding_stale(&original.content_hash));
    assert!(!original.is_embedding_stale(&original.content_hash));
    assert_eq!(updated.embedding_text(), "Widget A\nBlue, 10 mm");
}
