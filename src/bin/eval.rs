use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use bible_qa::chat::ChatService;
use bible_qa::config::AppConfig;
use bible_qa::db::Database;
use bible_qa::models::AskRequest;
use bible_qa::rag::RagChain;

#[derive(Parser, Debug)]
#[command(name = "eval")]
#[command(about = "Run a prompt file through the question-answering pipeline")]
struct Cli {
    #[arg(long, default_value = "eval/prompts.jsonl")]
    file: String,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Deserialize)]
struct EvalPrompt {
    id: String,
    question: String,
    /// Prompts sharing a label run in order on one session.
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    expect_contains: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let db = Database::new(&config).await?;
    let chat = ChatService::new(db, Arc::new(RagChain::from_config(&config)));

    let prompts = load_prompts(&cli.file)?;
    if prompts.is_empty() {
        anyhow::bail!("no prompts found in {}", cli.file);
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let tally = run_eval(&chat, &prompts, &run_id, cli.verbose).await?;

    println!("Eval prompts: {}", tally.total);
    println!(
        "Contains/expected accuracy: {:.1}%",
        ratio(tally.passed, tally.total) * 100.0
    );

    Ok(())
}

#[derive(Debug, Default)]
struct Tally {
    total: usize,
    passed: usize,
}

/// Runs every prompt, then deletes the run's sessions whether or not a prompt failed.
async fn run_eval(
    chat: &ChatService,
    prompts: &[EvalPrompt],
    run_id: &str,
    verbose: bool,
) -> Result<Tally> {
    let mut sessions: HashMap<String, String> = HashMap::new();
    let outcome = ask_prompts(chat, prompts, run_id, verbose, &mut sessions).await;

    let mut cleanup = Ok(());
    for session_id in sessions.values() {
        if let Err(err) = chat.delete(session_id).await {
            tracing::warn!(session_id = %session_id, "failed to delete eval session: {:#}", err);
            cleanup = Err(err);
        }
    }

    let tally = outcome?;
    cleanup?;
    Ok(tally)
}

async fn ask_prompts(
    chat: &ChatService,
    prompts: &[EvalPrompt],
    run_id: &str,
    verbose: bool,
    sessions: &mut HashMap<String, String>,
) -> Result<Tally> {
    let mut tally = Tally::default();

    for prompt in prompts {
        tally.total += 1;
        let label = prompt.session.clone().unwrap_or_else(|| prompt.id.clone());
        let session_id = sessions
            .entry(label.clone())
            .or_insert_with(|| format!("eval-{run_id}-{label}"))
            .clone();

        let response = chat
            .ask(AskRequest {
                query: prompt.question.clone(),
                session_id,
            })
            .await
            .with_context(|| format!("failed eval prompt {}", prompt.id))?;

        let answer_lower = response.answer.to_ascii_lowercase();
        let contains_pass = prompt
            .expect_contains
            .iter()
            .all(|needle| answer_lower.contains(&needle.to_ascii_lowercase()));
        if contains_pass {
            tally.passed += 1;
        }

        if verbose {
            println!("--- {} ---", prompt.id);
            println!("Q: {}", prompt.question);
            println!("A: {}", response.answer.replace('\n', " "));
            println!("Pass: {contains_pass}");
            println!();
        }
    }

    Ok(tally)
}

fn load_prompts(path: &str) -> Result<Vec<EvalPrompt>> {
    let file = File::open(path).with_context(|| format!("failed opening {}", path))?;
    let reader = BufReader::new(file);
    let mut prompts = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parsed: EvalPrompt = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON at {} line {}", path, idx + 1))?;
        prompts.push(parsed);
    }

    Ok(prompts)
}

fn ratio(n: usize, d: usize) -> f32 {
    if d == 0 {
        return 0.0;
    }
    n as f32 / d as f32
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
