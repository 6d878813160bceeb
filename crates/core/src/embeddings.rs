const DEFAULT: usize = 384;
const HASH_MODULUS: u64 = 1_000_000;
const NORM_EPSILON: f32 = 1e-4;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Placeholder embedding built from a rolling character hash.
#[derive(Debug, Clone, Copy)]
pub struct RollingHashEmbedder {
    pub dimensions: usize,
}

impl Default for RollingHashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for RollingHashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let mut hash = 0u64;

        for (index, character) in text.chars().enumerate() {
            hash = (hash * 31 + u64::from(character)) % HASH_MODULUS;
            match vector.get_mut(index) {
                Some(slot) => *slot = (hash % 100) as f32 / 100.0,
                None => break,
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        let denominator = magnitude + NORM_EPSILON;
        for value in &mut vector {
            *value /= denominator;
        }

        vector
    }
}
