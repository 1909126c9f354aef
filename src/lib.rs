pub mod chat;
pub mod config;
pub mod db;
pub mod history;
pub mod models;
pub mod ollama;
pub mod qdrant_store;
pub mod rag;
pub mod retrieval;
pub mod server;

pub use config::AppConfig;
pub use server::{build_router, run_server};
