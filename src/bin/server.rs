// Saini Connect server binary.
//
// Picks the backing store from configuration: Postgres when DATABASE_URL is
// set, the in-process map store otherwise. Everything downstream only sees
// the Storage trait.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use saini_connect::auth::SessionStore;
use saini_connect::config::Config;
use saini_connect::error::{AppError, AppResult};
use saini_connect::routes::{self, AppState};
use saini_connect::seed;
use saini_connect::storage::{MemoryStorage, PostgresStorage, Storage};

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let storage: Arc<dyn Storage> = match config.database_url {
        Some(_) => {
            let postgres = PostgresStorage::connect(&config).await?;
            postgres.initialize().await?;
            postgres.health_check().await?;
            info!("Connected to Postgres storage");
            Arc::new(postgres)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory storage (state is lost on restart)");
            Arc::new(MemoryStorage::new())
        }
    };

    if config.seed_demo_data {
        seed::seed_demo_data(storage.as_ref()).await?;
    }

    let state = Arc::new(AppState {
        storage,
        sessions: SessionStore::new(),
    });
    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Server starting on http://{}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
