use augur::config::Config;
use augur::services::{
    EngineContext, LogisticClassifier, RateGovernor, SignalEngine, SqliteStore, SystemClock,
};
use augur::sources::BridgeClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "augur=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!(
        "Starting Augur for {} on {} (bridge {})",
        config.symbol, config.engine.timeframe, config.bridge_url
    );

    let clock = Arc::new(SystemClock);
    let governor = Arc::new(RateGovernor::new(config.rate_limit.clone()));
    let bridge = Arc::new(BridgeClient::new(
        config.bridge_url.clone(),
        Duration::from_millis(config.bridge_timeout_ms),
        governor,
        clock.clone(),
    ));

    let connected = match bridge.health().await {
        Ok(health) if health.connected => {
            info!("Bridge online and connected");
            true
        }
        Ok(health) => {
            warn!("Bridge {} but not connected to the broker", health.status);
            false
        }
        Err(e) => {
            warn!("Bridge health check failed: {}", e);
            false
        }
    };

    if !connected {
        match &config.bridge_credentials {
            Some(credentials) => {
                if let Err(e) = bridge.connect(credentials).await {
                    warn!("Bridge login failed, candle fetches will error: {}", e);
                }
            }
            None => warn!("BRIDGE_EMAIL/BRIDGE_PASSWORD not set, cannot log the bridge in"),
        }
    }

    match bridge.balance().await {
        Ok(balance) => info!("Broker balance: {:.2}", balance),
        Err(e) => warn!("Failed to read broker balance: {}", e),
    }

    let store = Arc::new(SqliteStore::new(&config.database_path)?);
    info!(
        "Using database at {} ({} signals stored)",
        config.database_path.display(),
        store.signal_count()?
    );

    let classifier = Arc::new(LogisticClassifier::new(Some(config.model_path.clone())));

    let ctx = EngineContext::new(bridge.clone(), store.clone(), store, bridge)
        .with_clock(clock);
    let engine = SignalEngine::new(config, ctx, classifier)?;
    engine.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    engine.shutdown();

    Ok(())
}
