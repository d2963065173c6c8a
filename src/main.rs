use anyhow::Context;

use car_price_predictor::config::ServiceConfig;
use car_price_predictor::server::{router, AppState};
use car_price_predictor::PriceService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    car_price_predictor::init_tracing();

    let cfg = ServiceConfig::from_env();
    let service = PriceService::start(&cfg.artifacts_dir).log_predictions(cfg.log_predictions);

    let health = service.health();
    if health.model_loaded {
        tracing::info!(
            "serving {} brands / {} models from {}",
            health.brands_count,
            health.models_count,
            cfg.artifacts_dir.display()
        );
    } else {
        tracing::warn!("no artifacts loaded; POST /api/reload once training has run");
    }

    let app = router(AppState::new(service));

    let addr = format!("{}:{}", cfg.bind_addr, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
