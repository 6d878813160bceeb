use crate::chunking::Chunker;
use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{IngestError, TextChunk};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                TEXT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub async fn load_documents(chunker: &Chunker, paths: &[PathBuf]) -> Result<Vec<TextChunk>, IngestError> {
    if paths.is_empty() {
        return Err(IngestError::InvalidArgument("no documents to load".to_string()));
    }

    let mut chunks = Vec::new();
    for path in paths {
        let text = tokio::fs::read_to_string(path).await?;
        let source = path.to_string_lossy();
        let file_chunks = chunker.chunk(&text, &source);
        info!(source = %source, chunk_count = file_chunks.len(), "document chunked");
        chunks.extend(file_chunks);
    }
    Ok(chunks)
}

pub struct SkippedChunk {
    pub chunk_id: String,
    pub reason: String,
}

pub struct IndexReport {
    pub stored: usize,
    pub skipped: Vec<SkippedChunk>,
}

// best-effort: a failing chunk is recorded and the rest are still stored
pub async fn index_chunks(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    chunks: &[TextChunk],
) -> IndexReport {
    let mut stored = 0;
    let mut skipped = Vec::new();

    for chunk in chunks {
        let vector = embedder.embed(&chunk.content);
        match index.upsert(&chunk.chunk_id, chunk, &vector).await {
            Ok(()) => stored += 1,
            Err(error) => {
                warn!(chunk_id = %chunk.chunk_id, %error, "failed to store chunk");
                skipped.push(SkippedChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    IndexReport { stored, skipped }
}
