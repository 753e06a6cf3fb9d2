use std::path::PathBuf;

use invoice_copilot::application::ports::{DocumentStore, DocumentStoreError};
use invoice_copilot::domain::DocumentRef;
use invoice_copilot::infrastructure::storage::LocalDocumentStore;

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("invoice-copilot-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn given_existing_file_when_fetching_then_bytes_are_returned() {
    let root = scratch_dir();
    std::fs::write(root.join("invoice.txt"), b"Widget A").unwrap();
    let store = LocalDocumentStore::new(&root);

    let bytes = store
        .fetch(&DocumentRef::new("invoice.txt", "text/plain"))
        .await
        .unwrap();

    assert_eq!(bytes, b"Widget A");
}

#[tokio::test]
async fn given_missing_file_when_fetching_then_not_found() {
    let store = LocalDocumentStore::new(scratch_dir());

    let result = store.fetch(&DocumentRef::new("absent.pdf", "application/pdf")).await;

    assert!(matches!(result, Err(DocumentStoreError::NotFound(_))));
}

#[tokio::test]
async fn given_traversing_handle_when_fetching_then_invalid_handle() {
    let store = LocalDocumentStore::new(scratch_dir());

    for handle in ["../etc/passwd", "/etc/passwd", ""] {
        let result = store.fetch(&DocumentRef::new(handle, "text/plain")).await;
        assert!(matches!(result, Err(DocumentStoreError::InvalidHandle(_))), "{handle}");
    }
}
