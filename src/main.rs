use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use anireco::config::Config;
use anireco::db::{self, Cache};
use anireco::routes::{create_router, AppState};
use anireco::services::catalog::PostgresCatalogGateway;
use anireco::services::external::MalRecommenderClient;
use anireco::services::generative::OpenAiChatClient;
use anireco::services::orchestrator::RecommendationOrchestrator;
use anireco::services::profile::PostgresProfileStore;
use anireco::services::quota::QuotaGuard;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url).await?;
    let redis_client = db::create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = Cache::new(redis_client.clone()).await;

    let http_timeout = Duration::from_millis(config.http_timeout_ms);

    let orchestrator = RecommendationOrchestrator::new(
        Arc::new(PostgresCatalogGateway::new(pool.clone())),
        Arc::new(PostgresProfileStore::new(pool)),
        Arc::new(MalRecommenderClient::new(
            config.recommender_api_url.clone(),
            http_timeout,
        )?),
        Arc::new(OpenAiChatClient::new(
            config.model_api_url.clone(),
            config.model_api_key.clone(),
            config.model_name.clone(),
            http_timeout,
        )?),
        Arc::new(QuotaGuard::new(redis_client, config.daily_quota_ceiling)),
        Arc::new(cache),
        Duration::from_millis(config.request_deadline_ms),
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Recommendation service listening");

    axum::serve(listener, app).await?;

    // Flush pending cache writes before exiting
    cache_writer.shutdown().await;

    Ok(())
}
