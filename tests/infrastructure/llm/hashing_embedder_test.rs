use invoice_copilot::application::ports::Embedder;
use invoice_copilot::infrastructure::llm::HashingEmbedder;

#[tokio::test]
async fn given_same_text_when_embedding_twice_then_vectors_are_identical() {
    let embedder = HashingEmbedder::new(64);

    let a = embedder.embed("Widget A").await.unwrap();
    let b = embedder.embed("widget  a").await.unwrap();

    assert_eq!(a, b);
    assert!((a.cosine_similarity(&b) - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn given_related_names_when_embedding_then_closer_than_unrelated() {
    let embedder = HashingEmbedder::new(256);

    let base = embedder.embed("Acme Industrial Supplies").await.unwrap();
    let near = embedder.embed("Acme Industrial Supply").await.unwrap();
    let far = embedder.embed("Blue Harbor Catering").await.unwrap();

    assert!(base.cosine_similarity(&near) > base.cosine_similarity(&far));
}
