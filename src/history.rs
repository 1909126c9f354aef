use anyhow::Result;

use crate::db::Database;
use crate::models::{MessageData, Role, SessionRecord, StoredMessage, Turn};

/// Raw stored messages for a session, system entries included.
pub async fn load_stored(db: &Database, session_id: &str) -> Result<Vec<StoredMessage>> {
    let record = db.find_session(session_id).await?;
    Ok(record.map(|r| r.history).unwrap_or_default())
}

/// Overwrites the session record with `messages`.
pub async fn save_stored(db: &Database, session_id: &str, messages: Vec<StoredMessage>) -> Result<()> {
    let record = SessionRecord {
        id: session_id.to_string(),
        history: messages,
    };
    db.upsert_session(&record).await
}

pub fn to_stored(turns: &[Turn]) -> Vec<StoredMessage> {
    turns
        .iter()
        .map(|turn| {
            let data = MessageData {
                content: turn.content.clone(),
            };
            match turn.role {
                Role::User => StoredMessage::Human(data),
                Role::Assistant => StoredMessage::Ai(data),
            }
        })
        .collect()
}

/// System messages carry no user-visible turn and are skipped.
pub fn from_stored(messages: &[StoredMessage]) -> Vec<Turn> {
    messages
        .iter()
        .filter_map(|message| match message {
            StoredMessage::Human(data) => Some(Turn::user(data.content.clone())),
            StoredMessage::Ai(data) => Some(Turn::assistant(data.content.clone())),
            StoredMessage::System(_) => None,
        })
        .collect()
}
