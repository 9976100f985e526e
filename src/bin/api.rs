use spending_coach::{
    api::start_server,
    generation::{ClaudeClient, TextGenerator},
    pipeline::SnapshotPipeline,
    risk::RiskScorer,
    store::store_from_env,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("Student Spending Coach - API Server");
    info!("Port: {}", api_port);

    // Create components
    let claude = ClaudeClient::from_env();
    if !claude.is_configured() {
        warn!("ANTHROPIC_API_KEY not set; summaries and coaching will use fallbacks");
    }
    let generator: Arc<dyn TextGenerator> = Arc::new(claude);

    let risk_scorer = RiskScorer::from_env();
    if risk_scorer.is_model_backed() {
        info!("Risk scorer: trained models");
    } else {
        info!("Risk scorer: heuristic path");
    }

    let store = store_from_env();
    let pipeline = Arc::new(SnapshotPipeline::new(generator, risk_scorer, store));

    info!("Pipeline initialized, starting API server");

    start_server(pipeline, api_port).await?;

    Ok(())
}
