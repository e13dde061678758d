use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradeassist_core::assistant::{build_orchestrator, AiOrchestrator};
use tradeassist_core::context::{Clock, SystemClock};
use tradeassist_core::storage::{self, Repositories};

mod caller;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tradeassist_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pool: Option<sqlx::PgPool> = match settings.require_database_url() {
        Ok(db_url) => match storage::connect(db_url).await {
            Ok(pool) => match storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; keeping state in memory");
                    None
                }
            },
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db connect failed; keeping state in memory");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; keeping state in memory");
            None
        }
    };

    let repos = match pool {
        Some(pool) => Repositories::postgres(pool, clock.clone()),
        None => Repositories::in_memory(clock.clone()),
    };

    let assistant = match build_orchestrator(&settings, repos, clock) {
        Ok(assistant) => Some(Arc::new(assistant)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "assistant unavailable; starting API in degraded mode");
            None
        }
    };

    let state = AppState { assistant };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/respond", post(routes::respond))
        .route("/v1/chat", post(routes::chat))
        .route("/v1/functions", get(routes::list_functions))
        .route("/v1/functions/:name", post(routes::execute_function))
        .route("/v1/function-calls", post(routes::function_call))
        .route("/v1/insights", post(routes::insights))
        .route("/v1/trade/recommendation", post(routes::recommend_trade))
        .route("/v1/market/analysis", post(routes::analyze_market))
        .route("/v1/portfolio/optimization", post(routes::optimize_portfolio))
        .route("/v1/similarity/index", post(routes::index_message))
        .route("/v1/similarity/search", post(routes::search_similar))
        .route("/v1/risk/guardrails", post(routes::guardrails))
        .route(
            "/v1/risk/confirmations",
            get(routes::pending_confirmations).post(routes::create_confirmation),
        )
        .route("/v1/risk/confirmations/:id", post(routes::confirm_trade))
        .route("/v1/conversations", get(routes::list_sessions))
        .route(
            "/v1/conversations/:session_id",
            get(routes::get_conversation).delete(routes::delete_conversation),
        )
        .route("/v1/audit", get(routes::audit_events))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
pub(crate) struct AppState {
    assistant: Option<Arc<AiOrchestrator>>,
}

impl AppState {
    pub(crate) fn assistant(&self) -> Result<&AiOrchestrator, caller::ApiError> {
        self.assistant.as_deref().ok_or(caller::ApiError::Unavailable)
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &tradeassist_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
