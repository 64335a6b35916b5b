//! `lexstream ask`: answer one question on the terminal.
//!
//! Answer text goes to stdout as it streams; search activity and the
//! conversation id go to stderr so the answer can be piped.

use lexstream_agent::StreamEvent;
use lexstream_config::AppConfig;
use lexstream_core::message::ConversationId;
use std::io::Write;

pub async fn run(message: String, checkpoint: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No model API key configured!");
        eprintln!();
        eprintln!("  Set LEXSTREAM_API_KEY or OPENAI_API_KEY, or add api_key to:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let agent = lexstream_gateway::assemble(&config).await?;
    let conversation_id = match checkpoint.filter(|c| !c.trim().is_empty()) {
        Some(id) => ConversationId(id),
        None => {
            let id = ConversationId::new();
            eprintln!("  checkpoint: {id}");
            id
        }
    };

    tracing::debug!(conversation_id = %conversation_id, "Starting one-shot run");
    let mut run = agent.run(conversation_id, message);
    let mut stdout = std::io::stdout();

    while let Some(event) = run.events.recv().await {
        match event {
            StreamEvent::Content { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamEvent::SearchStart { query } => eprintln!("\n  [searching] {query}"),
            StreamEvent::SearchResults { urls } => {
                for url in urls {
                    eprintln!("  [source] {url}");
                }
            }
            StreamEvent::Checkpoint { .. } => {}
            StreamEvent::End => break,
        }
    }
    println!();

    let summary = run.outcome.await??;
    eprintln!(
        "  ({} round(s), {} tool call(s))",
        summary.rounds, summary.tool_calls
    );
    Ok(())
}
