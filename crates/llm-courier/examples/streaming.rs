//! Print a completion as it streams in.
//!
//! # Usage
//!
//! ```bash
//! LLM_API_KEY=sk-... LLM_BASE_URL=https://host/v1/chat/completions \
//!   cargo run --example streaming
//! ```

use std::io::Write;

use llm_courier::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = LlmClient::new(ClientConfig::from_env())?;

    let request = CompletionRequest::new(
        "openai/gpt-4o-mini",
        vec![Message::user("Write a haiku about retry loops.")],
    );
    let mut stream = client.stream(request).await?;

    let mut stdout = std::io::stdout();
    while let Some(delta) = stream.next_delta().await? {
        stdout.write_all(delta.as_bytes())?;
        stdout.flush()?;
    }
    println!();

    if let Some(reason) = stream.finish_reason() {
        eprintln!("[{}] finish: {reason}", stream.request_id());
    }
    Ok(())
}
