//! Userhub - session-authenticated user management backend

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use userhub::{
    api::{self, AppState},
    config::{Config, Environment},
    db,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "userhub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Userhub...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    if config.security.environment == Environment::Production && config.uses_default_secret() {
        tracing::warn!(
            "Running in production with the built-in dev secret; set USERHUB_SECRET_KEY"
        );
    }

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Compose stores, services and guards
    let state = AppState::build(pool.clone(), &config);

    // Start the expired-session sweeper, independent of request handling
    {
        let sessions = state.sessions.clone();
        let interval_secs = config.session.sweep_interval_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                match sessions.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Swept {} expired session(s)", n),
                    Err(e) => tracing::warn!("Session sweep failed: {}", e),
                }
            }
        });
    }

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
