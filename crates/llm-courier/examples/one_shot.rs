//! One-shot completion with truncation tracking and typed JSON extraction.
//!
//! # Usage
//!
//! ```bash
//! LLM_API_KEY=sk-... LLM_BASE_URL=https://host/v1/chat/completions \
//!   cargo run --example one_shot
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use llm_courier::prelude::*;
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Deserialize, JsonSchema, Debug)]
struct Review {
    sentiment: String,
    score: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Build a client from the environment, counting truncated answers.
    let truncations = Arc::new(AtomicUsize::new(0));
    let counter = truncations.clone();
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(FnEventHandler::new(move |event: &ClientEvent<'_>| {
            if matches!(event, ClientEvent::Truncated { .. }) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }));
    let client = LlmClient::new(ClientConfig::from_env())?.with_event_handler(Arc::new(handler));

    // 2. Plain text completion.
    let request = CompletionRequest::new(
        "openai/gpt-4o-mini",
        vec![
            Message::system("You are a concise assistant."),
            Message::user("Explain exponential backoff in two sentences."),
        ],
    )
    .with_max_output_tokens(200);
    let result = client.complete(request).await?;
    println!("{}\n(finish: {})", result.content, result.finish_reason);
    if let Some(usage) = result.usage {
        println!("tokens: {} in / {} out", usage.prompt_tokens, usage.completion_tokens);
    }

    // 3. Typed JSON with an advisory schema.
    let request = CompletionRequest::new(
        "openai/gpt-4o-mini",
        vec![Message::user(
            "Rate this review: 'Arrived late but works great.' \
             Return sentiment and a 1-10 score.",
        )],
    )
    .with_response_shape(ResponseShape::json_schema_for::<Review>("review"));
    let review: Review = client.extract_json(request).await?;
    println!("{review:?}");

    println!("truncated responses: {}", truncations.load(Ordering::Relaxed));
    Ok(())
}
