use std::cmp::Ordering;

use anyhow::Result;

use crate::models::RetrievalResult;
use crate::ollama::OllamaClient;
use crate::qdrant_store::QdrantStore;

#[derive(Clone)]
pub struct Retriever {
    qdrant: QdrantStore,
    ollama: OllamaClient,
    embedding_model: String,
}

impl Retriever {
    pub fn new(qdrant: QdrantStore, ollama: OllamaClient, embedding_model: impl Into<String>) -> Self {
        Self {
            qdrant,
            ollama,
            embedding_model: embedding_model.into(),
        }
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        let embedding = self.ollama.embed(&self.embedding_model, query).await?;
        let hits = self.qdrant.search(&embedding, top_k).await?;

        let mut out: Vec<RetrievalResult> = hits
            .into_iter()
            .map(|hit| RetrievalResult {
                chunk: hit.chunk,
                score: hit.score,
            })
            .collect();

        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        out.truncate(top_k);
        Ok(out)
    }
}
