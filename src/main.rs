use otpgate::{
    config::AppConfig,
    db::{self, IdentityStore, SqliteIdentityStore},
    engine::{CredentialManager, KeyRing},
    web,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otpgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting otpgate v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    info!("Configuration loaded");

    // No traffic is accepted without working keys.
    let keys = match KeyRing::initialize(&config.keys).await {
        Ok(keys) => Arc::new(keys),
        Err(e) => {
            error!("{}", e);
            error!(
                "Check that {} is writable and its key files are intact",
                config.keys.dir.display()
            );
            return Err(e.into());
        }
    };

    // Initialize database
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!("Database connected: {}", config.database.url);

    db::init_db(&pool).await?;

    let store: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(pool));
    let credentials = Arc::new(CredentialManager::new(store, keys));
    let app = web::create_router(web::AppState::new(credentials));

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Controller listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Controller shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
