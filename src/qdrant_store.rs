use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::models::Chunk;

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Read-only view of a collection populated offline.
#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
        }
    }

    pub async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );

        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during search")?
            .error_for_status()
            .context("qdrant search returned non-success status")?
            .json::<QdrantSearchResponse>()
            .await
            .context("failed to decode qdrant search response")?;

        Ok(response
            .result
            .into_iter()
            .filter_map(QdrantResultPoint::into_hit)
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QdrantPayload {
    pub chunk_id: Option<String>,
    #[serde(alias = "text", alias = "page_content")]
    pub content: Option<String>,
    pub source: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    id: serde_json::Value,
    score: f32,
    payload: Option<QdrantPayload>,
}

impl QdrantResultPoint {
    /// Points without chunk text are useless as context and are dropped.
    fn into_hit(self) -> Option<VectorHit> {
        let payload = self.payload?;
        let content = payload.content.filter(|c| !c.trim().is_empty())?;
        let id = payload.chunk_id.unwrap_or_else(|| match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        Some(VectorHit {
            chunk: Chunk {
                id,
                content,
                source: payload.source,
                page: payload.page,
            },
            score: self.score,
        })
    }
}
