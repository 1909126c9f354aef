//! Two-stage retrieval-augmented answering.
//!
//! Stage one rewrites a follow-up question into a standalone one using the
//! prior turns; stage two retrieves scripture chunks for the standalone
//! question and answers from them. [`QaChain`] is the seam the rest of the
//! service depends on; [`RagChain`] backs it with Ollama and Qdrant.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::models::{ChainOutput, RetrievalResult, Role, Turn};
use crate::ollama::{GenerateOptions, OllamaClient};
use crate::qdrant_store::QdrantStore;
use crate::retrieval::Retriever;

const CONTEXTUALIZE_SYSTEM_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which can be \
understood without the chat history. Do NOT answer the question, just reformulate it if needed \
and otherwise return it as is.";

const ANSWER_SYSTEM_PROMPT: &str = "Use the following pieces of context to answer the question. \
If you don't know the answer, just say that you don't know, don't try to make up an answer. \
Don't exaggerate the answer and keep the answer as concise as possible. \
Do not include the question in the answer or use phrases like 'Thank you for your question' or \
'The question you provided'. Do not add introductory or closing phrases, and respond to the query \
without mentioning the context or the passage. Never say 'The passage you provided' or \
'In the passage'. The context is the Bible: answer by quoting it directly. \
Just start directly with the answer.";

#[async_trait]
pub trait QaChain: Send + Sync {
    /// Rewrites `question` so it can be understood without `history`.
    async fn reformulate(&self, question: &str, history: &[Turn]) -> Result<String>;

    /// Answers a standalone question from retrieved context.
    async fn answer(&self, question: &str, history: &[Turn]) -> Result<ChainOutput>;
}

#[derive(Clone)]
pub struct RagChain {
    config: AppConfig,
    ollama: OllamaClient,
    retriever: Retriever,
    generation_limit: Arc<Semaphore>,
}

impl RagChain {
    pub fn new(
        config: AppConfig,
        ollama: OllamaClient,
        retriever: Retriever,
        generation_limit: Arc<Semaphore>,
    ) -> Self {
        Self {
            config,
            ollama,
            retriever,
            generation_limit,
        }
    }

    /// Wires the Ollama and Qdrant clients named in `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let ollama = OllamaClient::new(config.ollama_base_url.clone());
        let qdrant = QdrantStore::new(
            config.qdrant_base_url.clone(),
            config.qdrant_collection.clone(),
        );
        let retriever = Retriever::new(qdrant, ollama.clone(), config.models.embedding_model.clone());
        let generation_limit = Arc::new(Semaphore::new(config.generation.concurrency));

        Self::new(config.clone(), ollama, retriever, generation_limit)
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let _permit = self.generation_limit.acquire().await?;
        let text = self
            .ollama
            .generate_text(
                &self.config.models.answer_model,
                prompt,
                GenerateOptions {
                    num_predict: self.config.generation.max_output_tokens,
                    temperature: self.config.generation.temperature,
                },
            )
            .await?;
        Ok(sanitize_model_output(text))
    }
}

#[async_trait]
impl QaChain for RagChain {
    async fn reformulate(&self, question: &str, history: &[Turn]) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let prompt = build_reformulation_prompt(question, history);
        let standalone = standalone_or_original(question, &self.generate(&prompt).await?);

        tracing::debug!(original = question, standalone = %standalone, "reformulated question");
        Ok(standalone)
    }

    async fn answer(&self, question: &str, history: &[Turn]) -> Result<ChainOutput> {
        let sources = self
            .retriever
            .retrieve(question, self.config.generation.retrieval_top_k)
            .await?;
        for source in &sources {
            tracing::debug!(
                chunk_id = %source.chunk.id,
                source = ?source.chunk.source,
                page = ?source.chunk.page,
                score = source.score,
                "retrieved context chunk"
            );
        }

        let context = build_context(&sources);
        let prompt = build_answer_prompt(question, &context, history);
        let answer = self.generate(&prompt).await?;

        Ok(ChainOutput { answer, sources })
    }
}

fn render_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "Human",
                Role::Assistant => "AI",
            };
            format!("{speaker}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_reformulation_prompt(question: &str, history: &[Turn]) -> String {
    format!(
        "System: {CONTEXTUALIZE_SYSTEM_PROMPT}\n{}\nHuman: {question}\nStandalone question:",
        render_history(history)
    )
}

/// Chunks are stuffed in retrieval order, separated by blank lines.
fn build_context(sources: &[RetrievalResult]) -> String {
    sources
        .iter()
        .map(|source| source.chunk.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_answer_prompt(question: &str, context: &str, history: &[Turn]) -> String {
    let mut prompt = format!("System: {ANSWER_SYSTEM_PROMPT}\n\n{context}\n");
    if !history.is_empty() {
        prompt.push_str(&render_history(history));
        prompt.push('\n');
    }
    prompt.push_str(&format!("Human: {question}\nAI:"));
    prompt
}

fn sanitize_model_output(answer: String) -> String {
    let mut text = answer.trim().to_string();
    if text.starts_with("```") {
        let fenced = Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```$")
            .ok()
            .and_then(|re| re.captures(&text).and_then(|caps| caps.get(1)))
            .map(|body| body.as_str().trim().to_string());
        text = fenced.unwrap_or_else(|| text.replace("```", "").trim().to_string());
    }
    text
}

fn strip_reformulation_label(text: &str) -> String {
    let stripped = match Regex::new(r"(?i)^(standalone|reformulated)?\s*question\s*:\s*") {
        Ok(re) => re.replace(text.trim(), "").into_owned(),
        Err(_) => text.trim().to_string(),
    };
    stripped.trim().trim_matches('"').trim().to_string()
}

/// Empty model output (or a bare label) keeps the caller's question.
fn standalone_or_original(question: &str, model_output: &str) -> String {
    let rewritten = strip_reformulation_label(model_output);
    if rewritten.is_empty() {
        question.to_string()
    } else {
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn result(content: &str) -> RetrievalResult {
        RetrievalResult {
            chunk: Chunk {
                id: "c".to_string(),
                content: content.to_string(),
                source: None,
                page: None,
            },
            score: 0.5,
        }
    }

    #[test]
    fn reformulation_prompt_carries_history_before_question() {
        let history = vec![
            Turn::user("Who was Moses?"),
            Turn::assistant("The prophet who led Israel out of Egypt."),
        ];
        let prompt = build_reformulation_prompt("What did he do?", &history);

        assert!(prompt.starts_with("System: Given a chat history"));
        let human = prompt.find("Human: Who was Moses?").unwrap();
        let ai = prompt.find("AI: The prophet").unwrap();
        let follow_up = prompt.find("Human: What did he do?").unwrap();
        assert!(human < ai && ai < follow_up);
    }

    #[test]
    fn answer_prompt_stuffs_context_in_order() {
        let context = build_context(&[result(" In the beginning "), result("And God said")]);
        assert_eq!(context, "In the beginning\n\nAnd God said");

        let prompt = build_answer_prompt("Who spoke?", &context, &[]);
        assert!(prompt.contains("quoting it directly"));
        assert!(prompt.contains("In the beginning\n\nAnd God said\n"));
        assert!(prompt.ends_with("Human: Who spoke?\nAI:"));
    }

    #[test]
    fn answer_prompt_includes_prior_turns() {
        let history = vec![Turn::user("Who was Noah?"), Turn::assistant("He built the ark.")];
        let prompt = build_answer_prompt("How long did it rain?", "ctx", &history);
        assert!(prompt.contains("Human: Who was Noah?\nAI: He built the ark.\nHuman: How long"));
    }

    #[test]
    fn strips_markdown_fences() {
        let text = "```markdown\nJesus wept.\n```".to_string();
        assert_eq!(sanitize_model_output(text), "Jesus wept.");
    }

    #[test]
    fn strips_reformulation_labels() {
        assert_eq!(
            strip_reformulation_label("Standalone question: \"What did Moses do?\""),
            "What did Moses do?"
        );
        assert_eq!(
            strip_reformulation_label("What did Moses do?"),
            "What did Moses do?"
        );
    }

    #[test]
    fn empty_reformulation_keeps_original_question() {
        let question = "What did he do?";
        assert_eq!(standalone_or_original(question, ""), question);
        assert_eq!(standalone_or_original(question, "  \n "), question);
        assert_eq!(standalone_or_original(question, "Standalone question:"), question);
        assert_eq!(
            standalone_or_original(question, "Standalone question: What did Moses do?"),
            "What did Moses do?"
        );
    }

    #[tokio::test]
    async fn reformulate_without_history_never_calls_the_model() {
        let mut config = AppConfig::from_env();
        // nothing listens on the discard port; any model call would fail
        config.ollama_base_url = "http://127.0.0.1:9".to_string();
        let chain = RagChain::from_config(&config);

        let standalone = chain.reformulate("Who was Moses?", &[]).await.unwrap();
        assert_eq!(standalone, "Who was Moses?");
    }
}
