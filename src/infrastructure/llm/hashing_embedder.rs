use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::application::ports::{Embedder, EmbedderError};
use crate::domain::{Embedding, normalize_name};

/// Deterministic feature-hashing embedder over words and character
/// trigrams. Needs no model download or network, so identical text always
/// maps to the identical unit vector and near-identical names land close.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let raw = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        let index = (raw % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dimensions];
        let normalized = normalize_name(text);

        for word in normalized.split_whitespace() {
            let (index, sign) = self.bucket(&format!("w:{}", word));
            values[index] += 2.0 * sign;

            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                let (index, sign) = self.bucket(&format!("t:{}", trigram));
                values[index] += sign;
            }
        }

        Embedding::new(values).normalized()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedderError> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbedderError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
