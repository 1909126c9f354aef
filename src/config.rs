use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub answer_model: String,
    pub embedding_model: String,
}

#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub retrieval_top_k: usize,
    pub max_output_tokens: usize,
    pub temperature: f32,
    pub concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub ollama_base_url: String,
    pub qdrant_base_url: String,
    pub qdrant_collection: String,
    pub models: ModelConfig,
    pub generation: GenerationConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("BIBLE_QA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Self {
            bind_addr: env::var("BIBLE_QA_BIND").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            data_dir,
            database_url: env::var("BIBLE_QA_DATABASE_URL").ok(),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            qdrant_base_url: env::var("QDRANT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            qdrant_collection: env::var("QDRANT_COLLECTION")
                .unwrap_or_else(|_| "combined_index".to_string()),
            models: ModelConfig {
                answer_model: env::var("ANSWER_MODEL").unwrap_or_else(|_| "llama2:7b".to_string()),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "llama2:7b".to_string()),
            },
            generation: GenerationConfig {
                retrieval_top_k: parse_env("RETRIEVAL_TOP_K").unwrap_or(4),
                max_output_tokens: parse_env("MAX_OUTPUT_TOKENS").unwrap_or(512),
                temperature: parse_env("ANSWER_TEMPERATURE").unwrap_or(0.1),
                concurrency: parse_env::<usize>("GENERATION_CONCURRENCY")
                    .unwrap_or(1)
                    .max(1),
            },
        }
    }

    pub fn sqlite_dsn(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite://{}",
                self.data_dir.join("chat_history.sqlite3").display()
            ),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
