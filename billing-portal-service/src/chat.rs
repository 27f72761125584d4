//! Dashboard chat assistant.
//!
//! The agent gets a preamble describing the user's current bills and cost
//! summary, plus a short rolling history replayed from the chat store, so
//! answers stay grounded in the user's own data.

use chrono::Utc;
use coverage_flow::models::ChatMessage;
use coverage_flow::{BillStore, ChatStore, CoreError, Result, summarize};
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::{Chat, Message};
use rig::providers::openrouter;
use tracing::warn;
use uuid::Uuid;

use crate::service::AppState;

const HISTORY_LIMIT: usize = 20;

fn get_chat_agent(preamble: &str) -> anyhow::Result<Agent<openrouter::CompletionModel>> {
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
    let client = openrouter::Client::new(&api_key);
    let agent = client
        .agent("openai/gpt-4o-mini")
        .preamble(preamble)
        .build();
    Ok(agent)
}

fn build_preamble(bills_summary: &str) -> String {
    format!(
        "You are a helpful assistant on a healthcare billing dashboard. \
         Answer questions about the user's hospital bills, insurance coverage and \
         predicted costs in plain language. Be concise and never invent figures.\n\n\
         Current account snapshot:\n{}",
        bills_summary
    )
}

pub async fn chat_reply(state: &AppState, user_id: &str, message: &str) -> Result<String> {
    let bills = state.bills.list_for_user(user_id).await?;
    let summary = summarize(&bills);
    let snapshot = format!(
        "{} bills on file ({} analyzed, {} pending analysis). \
         Total billed ${:.2}, estimated insurance coverage ${:.2}, \
         estimated patient responsibility ${:.2}.",
        bills.len(),
        summary.analyzed,
        summary.pending_analysis,
        summary.total_billed,
        summary.estimated_insurance,
        summary.estimated_patient,
    );

    let history: Vec<Message> = state
        .chat
        .history(user_id, HISTORY_LIMIT)
        .await?
        .into_iter()
        .map(|m| {
            if m.role == "assistant" {
                Message::assistant(m.content)
            } else {
                Message::user(m.content)
            }
        })
        .collect();

    let agent = get_chat_agent(&build_preamble(&snapshot))
        .map_err(|e| CoreError::Gateway(e.to_string()))?;

    let reply = agent.chat(message, history).await.map_err(|e| {
        warn!(error = %e, "chat completion failed");
        CoreError::Gateway(e.to_string())
    })?;

    let now = Utc::now();
    state
        .chat
        .append(ChatMessage {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            role: "user".to_string(),
            content: message.to_string(),
            created_at: now,
        })
        .await?;
    state
        .chat
        .append(ChatMessage {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            role: "assistant".to_string(),
            content: reply.clone(),
            created_at: Utc::now(),
        })
        .await?;

    Ok(reply)
}
