use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::db::Database;
use crate::history::{from_stored, load_stored, save_stored, to_stored};
use crate::models::{AskRequest, AskResponse, HistoryResponse, MessageResponse, Turn};
use crate::rag::QaChain;

pub const NO_HISTORY_MESSAGE: &str = "No chat history found for this session_id.";

/// Request sequences behind the HTTP endpoints.
///
/// History is read, extended and written back without any per-session lock:
/// two concurrent asks on one session both read the same prior turns and the
/// later write wins, dropping the other turn pair.
#[derive(Clone)]
pub struct ChatService {
    db: Database,
    chain: Arc<dyn QaChain>,
}

impl ChatService {
    pub fn new(db: Database, chain: Arc<dyn QaChain>) -> Self {
        Self { db, chain }
    }

    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let started = Instant::now();
        let mut stored = load_stored(&self.db, &request.session_id).await?;
        let history = from_stored(&stored);

        let standalone = if history.is_empty() {
            request.query.clone()
        } else {
            self.chain.reformulate(&request.query, &history).await?
        };

        let output = self.chain.answer(&standalone, &history).await?;

        stored.extend(to_stored(&[
            Turn::user(request.query),
            Turn::assistant(output.answer.clone()),
        ]));
        let message_count = stored.len();
        save_stored(&self.db, &request.session_id, stored).await?;

        let source_ids: Vec<&str> = output
            .sources
            .iter()
            .map(|source| source.chunk.id.as_str())
            .collect();
        tracing::info!(
            session_id = %request.session_id,
            messages = message_count,
            sources = ?source_ids,
            latency_ms = started.elapsed().as_millis() as u64,
            "answered query"
        );

        Ok(AskResponse {
            answer: output.answer,
        })
    }

    pub async fn history(&self, session_id: &str) -> Result<HistoryResponse> {
        let Some(record) = self.db.find_session(session_id).await? else {
            return Ok(HistoryResponse::Empty {
                message: NO_HISTORY_MESSAGE.to_string(),
            });
        };

        Ok(HistoryResponse::History {
            chat_history: from_stored(&record.history),
        })
    }

    pub async fn delete(&self, session_id: &str) -> Result<MessageResponse> {
        let message = if self.db.delete_session(session_id).await? {
            tracing::info!(session_id, "deleted chat history");
            format!("Chat history for session_id {session_id} deleted successfully.")
        } else {
            format!("No chat history found for session_id {session_id}.")
        };

        Ok(MessageResponse { message })
    }
}
