//! Console voice agent: typed lines stand in for recognized speech and
//! replies are printed instead of synthesized.

use async_trait::async_trait;
use budget_voice_assistant::{
    agent::AnalysisRouter,
    config::AppConfig,
    gemini::GeminiClient,
    ingest::{self, Categorizer, GeminiCategorizer, RuleCategorizer},
    planner::{GeminiPlanner, QueryPlanner, RulePlanner},
    store::SessionContext,
    voice::{SessionTurnHandler, SpeechSink, VoiceSession},
    Reply,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

struct ConsoleSink;

#[async_trait]
impl SpeechSink for ConsoleSink {
    async fn speak(&self, reply: &Reply) -> budget_voice_assistant::Result<()> {
        println!("assistant [{}]> {}", reply.kind, reply.text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    let (planner, categorizer): (Arc<dyn QueryPlanner>, Arc<dyn Categorizer>) = if config.has_gemini() {
        let client = GeminiClient::new(config.gemini_api_key.clone(), &config.gemini_model)?;
        (
            Arc::new(GeminiPlanner::new(client.clone())),
            Arc::new(GeminiCategorizer::new(client)),
        )
    } else {
        (Arc::new(RulePlanner::new()), Arc::new(RuleCategorizer))
    };

    let session = Arc::new(SessionContext::new(Uuid::new_v4()));

    match std::env::args().nth(1) {
        Some(path) => {
            let content = tokio::fs::read_to_string(&path).await?;
            let records = ingest::ingest(&content, categorizer.as_ref()).await?;
            let loaded = session.replace_dataset(records).await?;
            println!("Loaded {} transactions from {}", loaded.len(), path);
        }
        None => println!("No statement given. Usage: agent <statement.csv>"),
    }

    let router = Arc::new(AnalysisRouter::new(planner, config.router_config()));
    info!(planner = router.planner_name(), session_id = %session.id, "Console agent ready");

    let handler = Arc::new(SessionTurnHandler::new(router, Arc::clone(&session)));
    let voice = VoiceSession::spawn(handler, Arc::new(ConsoleSink), config.voice_config());

    println!("Ask about your budget. Ctrl-D to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(e) = voice.submit(line).await {
            warn!("Voice session stopped: {}", e);
            break;
        }
    }

    voice.shutdown().await;
    Ok(())
}
