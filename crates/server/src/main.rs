use std::sync::Arc;

use chess_core::StandardRules;
use server::clients::stockfish::StockfishOpponent;
use server::config;
use server::db;
use server::rooms::RoomHub;
use session_sync::{MemoryStore, SessionContext, SessionStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;

    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::pool::create_pool(url).await?;

            tracing::info!("Running migrations...");
            db::pool::run_migrations(&pool).await?;
            Arc::new(db::sessions::PgSessionStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set - sessions are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let mut ctx = SessionContext::new(Arc::new(StandardRules), store, config.session.clone());

    let engine = match &config.stockfish_path {
        Some(path) => {
            let engine = Arc::new(StockfishOpponent::spawn(path, config.stockfish_engines).await?);
            ctx = ctx.with_opponent(engine.clone());
            Some(engine)
        }
        None => {
            tracing::info!("STOCKFISH_PATH not set - engine rooms disabled");
            None
        }
    };

    let hub = Arc::new(RoomHub::new(ctx));
    let app = server::app(hub, config.clone());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    if let Some(engine) = engine {
        engine.shutdown().await;
    }
    Ok(())
}
