use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::traits::{check_dimensions, VectorIndex};
use crate::{IndexError, IndexedEntry, SearchResult, TextChunk};

#[derive(Debug, Default)]
struct Entries {
    ordered: Vec<IndexedEntry>,
    positions: HashMap<String, usize>,
}

impl Entries {
    fn reindex(&mut self) {
        self.positions = self
            .ordered
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.key.clone(), position))
            .collect();
    }
}

#[derive(Debug)]
pub struct MemoryIndex {
    dimensions: usize,
    entries: RwLock<Entries>,
}

impl MemoryIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<IndexedEntry> {
        let entries = self.entries.read().await;
        entries
            .positions
            .get(key)
            .map(|position| entries.ordered[*position].clone())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, key: &str, chunk: &TextChunk, vector: &[f32]) -> Result<(), IndexError> {
        check_dimensions(self.dimensions, vector)?;

        let entry = IndexedEntry {
            key: key.to_string(),
            chunk: chunk.clone(),
            vector: vector.to_vec(),
        };

        let mut entries = self.entries.write().await;
        match entries.positions.get(key).copied() {
            Some(position) => entries.ordered[position] = entry,
            None => {
                let position = entries.ordered.len();
                entries.ordered.push(entry);
                entries.positions.insert(key.to_string(), position);
            }
        }
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        check_dimensions(self.dimensions, query_vector)?;

        let entries = self.entries.read().await;
        let mut scored: Vec<SearchResult> = entries
            .ordered
            .iter()
            .map(|entry| SearchResult {
                key: entry.key.clone(),
                content: entry.chunk.content.clone(),
                source: entry.chunk.source.clone(),
                ordinal: entry.chunk.ordinal,
                similarity: cosine_similarity(query_vector, &entry.vector),
            })
            .collect();

        scored.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete(&self, key: &str) -> Result<bool, IndexError> {
        let mut entries = self.entries.write().await;
        let Some(position) = entries.positions.remove(key) else {
            return Ok(false);
        };
        entries.ordered.remove(position);
        entries.reindex();
        Ok(true)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.entries.read().await.ordered.len())
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let mut entries = self.entries.write().await;
        entries.ordered.clear();
        entries.positions.clear();
        Ok(())
    }
}

/// Cosine similarity in f64. A zero-length vector has no direction and scores 0.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let (mut dot, mut left_sq, mut right_sq) = (0f64, 0f64, 0f64);
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_sq += a * a;
        right_sq += b * b;
    }

    if left_sq == 0.0 || right_sq == 0.0 {
        return 0.0;
    }
    dot / (left_sq.sqrt() * right_sq.sqrt())
}
