use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use bible_qa::build_router;
use bible_qa::chat::ChatService;
use bible_qa::db::Database;
use bible_qa::models::{ChainOutput, Turn};
use bible_qa::rag::QaChain;

struct EchoChain;

#[async_trait]
impl QaChain for EchoChain {
    async fn reformulate(&self, question: &str, history: &[Turn]) -> Result<String> {
        Ok(format!("{question} (after {} turns)", history.len()))
    }

    async fn answer(&self, question: &str, _history: &[Turn]) -> Result<ChainOutput> {
        Ok(ChainOutput {
            answer: format!("echo: {question}"),
            sources: vec![],
        })
    }
}

struct BrokenChain;

#[async_trait]
impl QaChain for BrokenChain {
    async fn reformulate(&self, question: &str, _history: &[Turn]) -> Result<String> {
        Ok(question.to_string())
    }

    async fn answer(&self, _question: &str, _history: &[Turn]) -> Result<ChainOutput> {
        Err(anyhow::anyhow!("connection refused").context("failed to call ollama generate endpoint"))
    }
}

async fn app(chain: Arc<dyn QaChain>) -> Router {
    let db = Database::in_memory().await.unwrap();
    build_router(ChatService::new(db, chain))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn ask_then_read_history() {
    let app = app(Arc::new(EchoChain)).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/ask_query",
        Some(json!({"query": "Who was Moses?", "session_id": "s1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"answer": "echo: Who was Moses?"}));

    let (status, body) = send(
        &app,
        Method::POST,
        "/ask_query",
        Some(json!({"query": "What did he do?", "session_id": "s1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"answer": "echo: What did he do? (after 2 turns)"}));

    let (status, body) = send(&app, Method::GET, "/get_chat_history?session_id=s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"chat_history": [
            {"role": "user", "content": "Who was Moses?"},
            {"role": "assistant", "content": "echo: Who was Moses?"},
            {"role": "user", "content": "What did he do?"},
            {"role": "assistant", "content": "echo: What did he do? (after 2 turns)"}
        ]})
    );
}

#[tokio::test]
async fn unknown_session_history_is_a_message() {
    let app = app(Arc::new(EchoChain)).await;
    let (status, body) = send(&app, Method::GET, "/get_chat_history?session_id=nobody", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"message": "No chat history found for this session_id."})
    );
}

#[tokio::test]
async fn delete_existing_and_missing_sessions() {
    let app = app(Arc::new(EchoChain)).await;
    send(
        &app,
        Method::POST,
        "/ask_query",
        Some(json!({"query": "Who was Ruth?", "session_id": "s2"})),
    )
    .await;

    let (status, body) = send(&app, Method::DELETE, "/delete_chat_history?session_id=s2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"message": "Chat history for session_id s2 deleted successfully."})
    );

    let (status, body) = send(&app, Method::DELETE, "/delete_chat_history?session_id=s2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"message": "No chat history found for session_id s2."})
    );

    let (_, body) = send(&app, Method::GET, "/get_chat_history?session_id=s2", None).await;
    assert_eq!(
        body,
        json!({"message": "No chat history found for this session_id."})
    );
}

#[tokio::test]
async fn chain_failure_is_a_500_with_detail() {
    let app = app(Arc::new(BrokenChain)).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/ask_query",
        Some(json!({"query": "Who was Elijah?", "session_id": "s3"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({"detail": "failed to call ollama generate endpoint: connection refused"})
    );

    let (_, body) = send(&app, Method::GET, "/get_chat_history?session_id=s3", None).await;
    assert_eq!(
        body,
        json!({"message": "No chat history found for this session_id."})
    );
}

#[tokio::test]
async fn missing_body_field_is_rejected_before_the_chain() {
    let app = app(Arc::new(BrokenChain)).await;
    let (status, _) = send(&app, Method::POST, "/ask_query", Some(json!({"query": "hi"}))).await;
    assert!(status.is_client_error());
}
