//! Embedder trait used by relationship-type normalization.

use async_trait::async_trait;

use crate::error::KgResult;

/// Text embedding function supplied by the caller.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> KgResult<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch).
    ///
    /// The output has one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> KgResult<Vec<Vec<f32>>> {
        // Default implementation: sequential embedding
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get the dimension of the embeddings.
    fn dimension(&self) -> usize;

    /// Get the model name.
    fn model_name(&self) -> &str;
}

/// Dot product of two vectors. Mismatched lengths compare the common prefix.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product() {
        assert_eq!(dot_product(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(dot_product(&[], &[1.0]), 0.0);
    }
}
