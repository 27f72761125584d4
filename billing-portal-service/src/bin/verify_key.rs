//! Checks that the configured OpenRouter key accepts a minimal completion.
//! Usage: OPENROUTER_API_KEY=... cargo run --bin verify_key

use coverage_flow::{ExtractionGateway, OpenRouterGateway};

#[tokio::main]
async fn main() {
    let gateway = match OpenRouterGateway::from_env() {
        Ok(gateway) => gateway,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    match gateway.invoke("Reply with the single word: ok", None).await {
        Ok(text) => println!("key accepted, model replied: {}", text.trim()),
        Err(e) => {
            eprintln!("key rejected: {}", e);
            std::process::exit(1);
        }
    }
}
