// HTTP service: session-scoped upload -> analyze -> export -> download.
//
// Handlers get the session store through `AppState`; per-session locking is
// the store's job (see `session::store`).

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, Config};
use crate::playlist::Scorer;
use crate::session::{MemorySessionStore, SessionStore};

/// Shared state for every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub analysis: Arc<AnalysisConfig>,
    pub sessions: Arc<dyn SessionStore>,
    pub scorer: Arc<Scorer>,
}

impl AppState {
    pub fn new(config: Config, sessions: Arc<dyn SessionStore>) -> Self {
        let scorer = Scorer::new(config.scoring);
        Self {
            analysis: Arc::new(config.analysis.clone()),
            config: Arc::new(config),
            sessions,
            scorer: Arc::new(scorer),
        }
    }

    /// State backed by an in-memory store rooted at the configured scratch dir.
    pub fn in_memory(config: Config) -> Self {
        let store = MemorySessionStore::new(config.storage.scratch_root.clone());
        Self::new(config, Arc::new(store))
    }
}

/// Router with all routes, the upload size cap and CORS applied.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(HeaderValue::from_static("*"));

    let body_limit = state.config.server.max_upload_bytes;

    routes::routes()
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
}

/// Periodically drop sessions that have gone unused for `ttl`.
pub fn spawn_session_sweeper(
    sessions: Arc<dyn SessionStore>,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let expired = sessions.expire_idle(ttl);
            if !expired.is_empty() {
                info!(count = expired.len(), "Expired idle sessions");
            }
        }
    })
}

/// Bind, serve until Ctrl-C, then drain connections.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let ttl = config.storage.session_ttl_secs;

    let state = AppState::in_memory(config);
    let sweeper = (ttl > 0)
        .then(|| spawn_session_sweeper(state.sessions.clone(), Duration::from_secs(ttl)));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            debug!("Shutdown signal received, draining connections...");
        })
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Server stopped");
    Ok(())
}
