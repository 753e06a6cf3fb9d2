use async_trait::async_trait;

use crate::application::ports::{TextSplitter, TextSplitterError};
use crate::domain::{Chunk, DocumentId, Provenance};

/// Boundaries tried in order when a window has to be cut.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Splits text into windows of at most `chunk_size` characters, cutting on
/// the coarsest boundary found in the back half of each window. Consecutive
/// windows share `chunk_overlap` characters.
pub struct RecursiveCharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveCharacterSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    fn validate(&self) -> Result<(), TextSplitterError> {
        if self.chunk_size == 0 {
            return Err(TextSplitterError::InvalidConfiguration(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(TextSplitterError::InvalidConfiguration(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// End of the window starting at `start`, in characters.
    fn window_end(&self, chars: &[char], start: usize) -> usize {
        let hard_end = (start + self.chunk_size).min(chars.len());
        if hard_end == chars.len() {
            return hard_end;
        }

        let floor = start + self.chunk_size / 2;
        let window: String = chars[start..hard_end].iter().collect();
        for separator in SEPARATORS {
            if let Some(byte_pos) = window.rfind(separator) {
                let cut = start + window[..byte_pos].chars().count() + separator.chars().count();
                if cut > floor {
                    return cut;
                }
            }
        }
        hard_end
    }
}

#[async_trait]
impl TextSplitter for RecursiveCharacterSplitter {
    async fn split(
        &self,
        text: &str,
        document_id: DocumentId,
        provenance: &Provenance,
    ) -> Result<Vec<Chunk>, TextSplitterError> {
        self.validate()?;

        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = self.window_end(&chars, start);
            let chunk_text: String = chars[start..end].iter().collect();
            if !chunk_text.trim().is_empty() {
                chunks.push(Chunk::new(
                    chunk_text.trim().to_string(),
                    document_id,
                    provenance.clone(),
                    start,
                ));
            }

            if end == chars.len() {
                break;
            }
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        Ok(chunks)
    }
}
