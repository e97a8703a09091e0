//! Send a chat-completion request and print the response.
//!
//! Endpoint, credential, and model come from `LLM_BASE_URL`, `LLM_API_KEY`,
//! and `LLM_MODEL`; the matching flags override them.
//!
//! # Examples
//!
//! ```sh
//! # Basic request
//! courier --user "Summarize this thread"
//!
//! # With system prompt and model selection
//! courier --system "You are a terse reviewer." \
//!   --user "Review this paragraph." \
//!   --model vendor/model-x
//!
//! # Pipe content from stdin and print deltas as they arrive
//! cat draft.md | courier --system "Edit this draft." --stdin --stream
//!
//! # Ask for JSON and print the recovered value
//! courier --user "List three primes as {\"primes\": [...]}" --extract
//!
//! # Run a file of prompts one after another
//! courier --system "Answer in one line." --batch prompts.json
//! ```

use clap::Parser;
use futures::StreamExt;
use llm_courier::{ClientConfig, CompletionRequest, LlmClient, Message, ResponseShape};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Send a chat-completion request and print the response.
///
/// Reads LLM_API_KEY, LLM_BASE_URL, LLM_MODEL and LLM_DEBUG from the
/// environment; flags take precedence.
#[derive(Parser, Debug)]
#[command(name = "courier")]
struct Cli {
    // ── Message content ────────────────────────────────────────
    /// System prompt to set the assistant's behavior
    #[arg(long)]
    system: Option<String>,

    /// User message to send
    #[arg(long)]
    user: Option<String>,

    /// Read user content from stdin
    #[arg(long)]
    stdin: bool,

    // ── Model and sampling ─────────────────────────────────────
    /// Model identifier (overrides LLM_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature (defaults to 0.7)
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum tokens in the response (raised to at least 16)
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Ask the model to reason before answering
    #[arg(long)]
    reasoning: bool,

    /// Request a JSON-object response format
    #[arg(long)]
    json_object: bool,

    // ── Output mode ────────────────────────────────────────────
    /// Print text deltas as they arrive
    #[arg(long, conflicts_with_all = ["extract", "batch"])]
    stream: bool,

    /// Recover JSON from the response and pretty-print it
    #[arg(long, conflicts_with = "batch")]
    extract: bool,

    /// Path to a JSON array of user prompts, run one after another
    #[arg(long)]
    batch: Option<PathBuf>,

    // ── Connection ─────────────────────────────────────────────
    /// Chat-completions endpoint URL (overrides LLM_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// API key (overrides LLM_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Log request and response summaries to stderr
    #[arg(long)]
    debug: bool,
}

// ── Helpers ────────────────────────────────────────────────────────

fn init_logging(debug: bool) {
    let default = if debug { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn read_stdin_content() -> Result<String, String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    Ok(buf)
}

fn build_user_content(cli: &Cli) -> Result<String, String> {
    let stdin_text = if cli.stdin {
        Some(read_stdin_content()?)
    } else {
        None
    };

    match (&cli.user, stdin_text) {
        (Some(msg), Some(piped)) => Ok(format!("{msg}\n\n{piped}")),
        (Some(msg), None) => Ok(msg.clone()),
        (None, Some(piped)) => Ok(piped),
        (None, None) => Err("provide --user, --stdin, or --batch".to_string()),
    }
}

/// Load the prompts for `--batch`: a JSON array of strings.
fn load_batch_prompts(path: &Path) -> Result<Vec<String>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read batch file '{}': {e}", path.display()))?;
    let prompts: Vec<String> = serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse batch file '{}': {e}", path.display()))?;
    if prompts.is_empty() {
        return Err(format!("batch file '{}' has no prompts", path.display()));
    }
    Ok(prompts)
}

/// Environment configuration with flag overrides applied.
fn build_config(cli: &Cli) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(key) = &cli.api_key {
        config.api_key = key.clone();
    }
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    if let Some(model) = &cli.model {
        config.model = Some(model.clone());
    }
    config.debug |= cli.debug;
    config
}

/// Build a CompletionRequest for one user prompt from CLI flags.
fn build_request(cli: &Cli, model: &str, user_content: String) -> CompletionRequest {
    let mut messages = Vec::new();
    if let Some(sys) = &cli.system {
        messages.push(Message::system(sys.as_str()));
    }
    messages.push(Message::user(user_content));

    let mut request = CompletionRequest::new(model, messages);
    if let Some(temperature) = cli.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(max_tokens) = cli.max_tokens {
        request = request.with_max_output_tokens(max_tokens);
    }
    if cli.reasoning {
        request = request.with_reasoning(true);
    }
    if cli.json_object {
        request = request.with_response_shape(ResponseShape::JsonObject);
    }
    request
}

async fn print_stream(client: &LlmClient, request: CompletionRequest) -> Result<(), String> {
    let stream = client.stream(request).await.map_err(|e| e.to_string())?;
    let mut deltas = Box::pin(stream.into_stream());
    let mut stdout = io::stdout();
    while let Some(delta) = deltas.next().await {
        let delta = delta.map_err(|e| e.to_string())?;
        stdout
            .write_all(delta.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|e| format!("failed to write output: {e}"))?;
    }
    println!();
    Ok(())
}

async fn run(cli: &Cli) -> Result<(), String> {
    let config = build_config(cli);
    let model = config
        .model
        .clone()
        .ok_or_else(|| "no model configured (pass --model or set LLM_MODEL)".to_string())?;
    let client = LlmClient::new(config).map_err(|e| e.to_string())?;

    // ── Batch mode ──────────────────────────────────────────────
    if let Some(path) = &cli.batch {
        let prompts = load_batch_prompts(path)?;
        let requests = prompts
            .into_iter()
            .map(|prompt| build_request(cli, &model, prompt));
        let results = client
            .complete_batch(requests)
            .await
            .map_err(|e| e.to_string())?;
        for (i, result) in results.iter().enumerate() {
            println!("--- [{}/{}] ---", i + 1, results.len());
            println!("{}", result.content);
        }
        return Ok(());
    }

    let request = build_request(cli, &model, build_user_content(cli)?);

    // ── Streaming mode ──────────────────────────────────────────
    if cli.stream {
        return print_stream(&client, request).await;
    }

    // ── Structured mode ─────────────────────────────────────────
    if cli.extract {
        let value: serde_json::Value = client
            .extract_json(request)
            .await
            .map_err(|e| e.to_string())?;
        let pretty = serde_json::to_string_pretty(&value)
            .map_err(|e| format!("failed to format JSON: {e}"))?;
        println!("{pretty}");
        return Ok(());
    }

    // ── Single-shot mode ────────────────────────────────────────
    let result = client.complete(request).await.map_err(|e| e.to_string())?;
    if result.is_truncated() {
        eprintln!("  Warning: response was cut off at the token limit");
    }
    println!("{}", result.content);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_courier::MessageContent;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("courier").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn batch_prompts_loaded_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["first", "second", "third"]"#).unwrap();
        let prompts = load_batch_prompts(file.path()).unwrap();
        assert_eq!(prompts, vec!["first", "second", "third"]);
    }

    #[test]
    fn batch_file_must_be_non_empty_string_array() {
        let mut empty = tempfile::NamedTempFile::new().unwrap();
        write!(empty, "[]").unwrap();
        assert!(load_batch_prompts(empty.path()).unwrap_err().contains("no prompts"));

        let mut wrong = tempfile::NamedTempFile::new().unwrap();
        write!(wrong, r#"{{"prompt": "x"}}"#).unwrap();
        assert!(load_batch_prompts(wrong.path()).unwrap_err().contains("failed to parse"));

        let missing = Path::new("/nonexistent/prompts.json");
        assert!(load_batch_prompts(missing).unwrap_err().contains("failed to read"));
    }

    #[test]
    fn request_carries_only_given_flags() {
        let cli = parse(&["--user", "hi"]);
        let request = build_request(&cli, "m", "hi".into());
        assert_eq!(request.model, "m");
        assert_eq!(request.messages.len(), 1);
        assert!(request.temperature.is_none());
        assert!(request.max_output_tokens.is_none());
        assert!(request.reasoning_enabled.is_none());
        assert!(request.response_shape.is_none());
    }

    #[test]
    fn request_from_full_flags() {
        let cli = parse(&[
            "--system",
            "sys",
            "--user",
            "hi",
            "--temperature",
            "0.2",
            "--max-tokens",
            "300",
            "--reasoning",
            "--json-object",
        ]);
        let request = build_request(&cli, "m", "hi".into());
        assert_eq!(request.messages[0].content, MessageContent::Text("sys".into()));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_output_tokens, Some(300));
        assert_eq!(request.reasoning_enabled, Some(true));
        assert_eq!(request.response_shape, Some(ResponseShape::JsonObject));
    }

    #[test]
    fn flags_override_environment() {
        let cli = parse(&[
            "--user",
            "hi",
            "--api-key",
            "sk-flag",
            "--base-url",
            "http://localhost:1/v1/chat/completions",
            "--model",
            "flag/model",
            "--debug",
        ]);
        let config = build_config(&cli);
        assert_eq!(config.api_key, "sk-flag");
        assert_eq!(config.base_url, "http://localhost:1/v1/chat/completions");
        assert_eq!(config.model.as_deref(), Some("flag/model"));
        assert!(config.debug);
    }

    #[test]
    fn stream_conflicts_with_extract() {
        let result = Cli::try_parse_from(["courier", "--user", "x", "--stream", "--extract"]);
        assert!(result.is_err());
    }
}
