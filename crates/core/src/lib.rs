pub mod backends;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod stores;
pub mod traits;

pub use backends::{
    AnthropicBackend, BackendRegistry, ChatCompletionsBackend, GeminiBackend, GenerationBackend,
    Provider,
};
pub use chunking::{Chunker, ChunkingConfig};
pub use config::ChatConfig;
pub use embeddings::{Embedder, RollingHashEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{BackendError, IndexError, IngestError, QueryError};
pub use index::{cosine_similarity, MemoryIndex};
pub use ingest::{discover_text_files, index_chunks, load_documents, IndexReport, SkippedChunk};
pub use models::{
    BackendHandle, ConversationTurn, IndexedEntry, Message, Role, SearchResult, TextChunk,
};
pub use orchestrator::{build_prompt, QueryOrchestrator, Retrieval};
pub use session::{ConversationSession, SessionPhase};
pub use stores::QdrantStore;
pub use traits::VectorIndex;
