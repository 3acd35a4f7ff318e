use budget_voice_assistant::{
    agent::AnalysisRouter,
    api::{start_server, ApiState},
    config::AppConfig,
    gemini::GeminiClient,
    ingest::{Categorizer, GeminiCategorizer, RuleCategorizer},
    planner::{GeminiPlanner, QueryPlanner, RulePlanner},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Budget Voice Assistant - API Server");
    info!(port = config.port, "Configuration loaded");

    let (planner, categorizer): (Arc<dyn QueryPlanner>, Arc<dyn Categorizer>) = if config.has_gemini() {
        let client = GeminiClient::new(config.gemini_api_key.clone(), &config.gemini_model)?;
        (
            Arc::new(GeminiPlanner::new(client.clone())),
            Arc::new(GeminiCategorizer::new(client)),
        )
    } else {
        warn!("GEMINI_API_KEY not set, using rule-based planning and categories");
        (Arc::new(RulePlanner::new()), Arc::new(RuleCategorizer))
    };

    if !config.livekit.is_configured() {
        warn!("LiveKit credentials not set, /api/livekit-token will refuse requests");
    }

    let router = Arc::new(AnalysisRouter::new(planner, config.router_config()));
    info!(planner = router.planner_name(), "Analysis router initialized");

    let state = ApiState::new(&config, router, categorizer);
    start_server(state, config.port).await?;

    Ok(())
}
