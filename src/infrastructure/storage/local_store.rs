use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::application::ports::{DocumentStore, DocumentStoreError};
use crate::domain::DocumentRef;

/// Document store backed by a directory; handles are paths relative to it.
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, handle: &str) -> Result<PathBuf, DocumentStoreError> {
        let relative = Path::new(handle.trim_start_matches("file://"));
        if handle.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(DocumentStoreError::InvalidHandle(handle.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn fetch(&self, document: &DocumentRef) -> Result<Vec<u8>, DocumentStoreError> {
        let path = self.resolve(&document.handle)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(handle = %document.handle, bytes = bytes.len(), "Document fetched");
                Ok(bytes)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DocumentStoreError::NotFound(document.handle.clone()))
            }
            Err(e) => Err(DocumentStoreError::ReadFailed(e.to_string())),
        }
    }
}
