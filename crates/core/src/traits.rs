use crate::{IndexError, SearchResult, TextChunk};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn upsert(&self, key: &str, chunk: &TextChunk, vector: &[f32]) -> Result<(), IndexError>;

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError>;

    async fn delete(&self, key: &str) -> Result<bool, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    async fn clear(&self) -> Result<(), IndexError>;
}

pub(crate) fn check_dimensions(expected: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}
