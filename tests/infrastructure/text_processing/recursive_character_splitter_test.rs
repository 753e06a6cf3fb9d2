use invoice_copilot::application::ports::{TextSplitter, TextSplitterError};
use invoice_copilot::domain::{DocumentId, Provenance};
use invoice_copilot::infrastructure::text_processing::RecursiveCharacterSplitter;

fn provenance() -> Provenance {
    Provenance {
        source: "faq.md".to_string(),
        title: "FAQ".to_string(),
        section: Some("Uploads".to_string()),
    }
}

#[tokio::test]
async fn given_short_text_when_splitting_then_single_chunk_with_provenance() {
    let splitter = RecursiveCharacterSplitter::new(100, 10);

    let chunks = splitter
        .split("Upload a PDF.", DocumentId::new(), &provenance())
        .await
        .unwrap();

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].offset, 0);
    assert_eq!(chunks[0].provenance.section.as_deref(), Some("Uploads"));
}

#[tokio::test]
async fn given_paragraphs_when_splitting_then_cuts_on_paragraph_boundary() {
    let splitter = RecursiveCharacterSplitter::new(40, 0);
    let text = "First paragraph about uploads.\n\nSecond paragraph about totals.";

    let chunks = splitter
        .split(text, DocumentId::new(), &provenance())
        .await
        .unwrap();

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "First paragraph about uploads.");
    assert_eq!(chunks[1].text, "Second paragraph about totals.");
}

#[tokio::test]
async fn given_overlap_not_smaller_than_size_when_splitting_then_invalid_configuration() {
    let splitter = RecursiveCharacterSplitter::new(10, 10);

    let result = splitter.split("text", DocumentId::new(), &provenance()).await;

    assert!(matches!(result, Err(TextSplitterError::InvalidConfiguration(_))));
}

#[tokio::test]
async fn given_multibyte_text_when_splitting_then_offsets_count_characters() {
    let splitter = RecursiveCharacterSplitter::new(5, 1);

    let chunks = splitter
        .split("ææææææææææ", DocumentId::new(), &provenance())
        .await
        .unwrap();

    assert_eq!(chunks[0].offset, 0);
    assert_eq!(chunks[1].offset, 4);
    assert!(chunks.iter().all(|c| c.text.chars().count() <= 5));
}
