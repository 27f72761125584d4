//! Lists the models the configured OpenRouter key can reach.
//! Usage: OPENROUTER_API_KEY=... cargo run --bin probe_models

use serde_json::Value;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let api_key = match std::env::var("OPENROUTER_API_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("OPENROUTER_API_KEY not set");
            std::process::exit(1);
        }
    };

    let response = reqwest::Client::new()
        .get("https://openrouter.ai/api/v1/models")
        .header("Authorization", format!("Bearer {}", api_key))
        .send()
        .await?;

    if !response.status().is_success() {
        eprintln!("model listing failed: {}", response.status());
        std::process::exit(1);
    }

    let body: Value = response.json().await?;
    let models = body["data"].as_array().cloned().unwrap_or_default();
    println!("{} models available:", models.len());
    for model in models {
        if let Some(id) = model["id"].as_str() {
            println!("  {}", id);
        }
    }

    Ok(())
}
