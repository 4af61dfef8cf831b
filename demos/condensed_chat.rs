//! Example: condensing a short conversation
//!
//! Loads configuration (`config.toml` if present, otherwise defaults and
//! environment), replays a conversation with a tiny live-window budget and
//! prints the context that would be sent to a completion service.

use session_memory::{config::Config, logging::init_tracing, metrics::METRICS, SessionMemory, Turn};
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = if Path::new("config.toml").exists() {
        Config::from_file("config.toml")?
    } else {
        Config::from_env()?
    };
    config.memory.chat_history_token_ratio = 0.0001;
    config.memory.token_limit = 1000;

    init_tracing(&config.logging);

    let memory = SessionMemory::from_config(&config)?;
    let session_id = memory.create_session().await?;

    memory
        .append(
            &session_id,
            vec![
                Turn::user("Hello! My name is Logan"),
                Turn::assistant("Hello! How can I help you?"),
                Turn::user("What is the capital of France?"),
                Turn::assistant("The capital of France is Paris"),
            ],
        )
        .await?;

    println!("Session {}", session_id);
    println!("{}", memory.render_text(&session_id).await?);

    let usage = memory.usage(&session_id).await?;
    println!(
        "live: {} turns / {} tokens, condensed: {} entries / {} tokens",
        usage.live_turns, usage.live_tokens, usage.condensed_entries, usage.condensed_tokens
    );

    println!("{}", METRICS.export_prometheus());

    Ok(())
}
