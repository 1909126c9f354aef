use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use bible_qa::chat::ChatService;
use bible_qa::db::Database;
use bible_qa::rag::RagChain;
use bible_qa::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    let db = Database::new(&config).await?;
    let chain = RagChain::from_config(&config);
    let chat = ChatService::new(db, Arc::new(chain));

    tracing::info!(
        answer_model = %config.models.answer_model,
        collection = %config.qdrant_collection,
        "bible-qa starting"
    );
    run_server(config, chat).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
