use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::embeddings::Embedder;
use crate::session::ConversationSession;
use crate::traits::VectorIndex;
use crate::{QueryError, SearchResult};

#[derive(Clone)]
pub struct Retrieval {
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub top_k: usize,
}

pub struct QueryOrchestrator {
    session: Arc<ConversationSession>,
    retrieval: Option<Retrieval>,
}

impl QueryOrchestrator {
    pub fn new(session: Arc<ConversationSession>, retrieval: Option<Retrieval>) -> Self {
        Self { session, retrieval }
    }

    pub fn session(&self) -> &Arc<ConversationSession> {
        &self.session
    }

    pub fn retrieval_enabled(&self) -> bool {
        self.retrieval.is_some()
    }

    pub async fn answer(&self, question: &str) -> Result<String, QueryError> {
        self.answer_with_cancel(question, std::future::pending()).await
    }

    pub async fn answer_with_cancel<F>(&self, question: &str, cancel: F) -> Result<String, QueryError>
    where
        F: Future<Output = ()> + Send,
    {
        let results = self.retrieve(question).await?;
        let prompt = build_prompt(question, &results);
        debug!(
            context_chunks = results.len(),
            prompt_chars = prompt.len(),
            "prompt assembled"
        );
        Ok(self.session.query_with_cancel(&prompt, cancel).await?)
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchResult>, QueryError> {
        let Some(retrieval) = &self.retrieval else {
            return Ok(Vec::new());
        };
        let query_vector = retrieval.embedder.embed(question);
        Ok(retrieval.index.search(&query_vector, retrieval.top_k).await?)
    }
}

pub fn build_prompt(question: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return question.to_string();
    }

    let mut prompt = String::from("Use the following context to answer the question.\n\nContext:\n");
    for (position, result) in results.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] source={} similarity={:.3}\n{}\n",
            position + 1,
            result.source,
            result.similarity,
            result.content
        );
    }
    let _ = write!(prompt, "Question: {question}");
    prompt
}
