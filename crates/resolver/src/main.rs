//! LexForge Resolver
//!
//! HTTP entry point for the query resolution pipeline.
//! Handles:
//! - Area exclusion rule loading and periodic reload
//! - Corpus store and embedding provider wiring
//! - Rate limiting
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use lexforge_common::{
    config::{AppConfig, ObservabilityConfig},
    corpus::{CorpusStore, InMemoryCorpusStore},
    db::{DbPool, PgCorpusStore},
    embeddings,
    metrics::{self, EMBEDDING_BUCKETS, LATENCY_BUCKETS, METRICS_PREFIX},
};
use lexforge_resolver::{guard::KeywordClassifier, Orchestrator, RuleRegistry};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn CorpusStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Configuration comes first so the log level can be taken from it
    let config = Arc::new(AppConfig::load().context("failed to load configuration")?);

    init_tracing(&config.observability);
    info!("Starting LexForge Resolver v{}", lexforge_common::VERSION);

    // Initialize metrics
    install_metrics_exporter(&config.observability)?;
    metrics::register_metrics();

    let store = build_store(&config).await?;
    let embedder = embeddings::create_provider(&config.embedding)?;

    info!(path = %config.exclusion.rules_path, "Loading exclusion rules");
    let rules = Arc::new(RuleRegistry::from_path(config.exclusion.rules_path.clone())?);
    let reload_task = rules
        .clone()
        .spawn_reload_task(config.exclusion.reload_interval());

    let orchestrator = Orchestrator::new(
        &config.resolution,
        config.embedding.model.clone(),
        rules,
        Arc::new(KeywordClassifier::new()),
        embedder,
        store.clone(),
    )?
    .with_embedding_dimension(config.embedding.dimension);

    let state = AppState {
        config: config.clone(),
        orchestrator: Arc::new(orchestrator),
        store,
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reload_task.abort();
    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on their own port; port 0 disables the exporter
fn install_metrics_exporter(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_embedding_duration_seconds", METRICS_PREFIX)),
            EMBEDDING_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()
        .context("failed to install Prometheus exporter")?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn CorpusStore>> {
    match config.corpus.backend.as_str() {
        "postgres" => {
            info!("Connecting to database...");
            let pool = DbPool::new(&config.database).await?;
            Ok(Arc::new(PgCorpusStore::new(pool)))
        }
        "memory" => {
            let store = match &config.corpus.fixture_path {
                Some(path) => {
                    info!(path = %path, "Loading corpus fixture");
                    InMemoryCorpusStore::load(path)?
                }
                None => {
                    warn!("No corpus fixture configured; every query will resolve to no results");
                    InMemoryCorpusStore::new()
                }
            };
            Ok(store.into_shared())
        }
        other => anyhow::bail!("unknown corpus backend '{}'", other),
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut resolve_routes = Router::new().route("/resolve", post(handlers::resolve::resolve));

    if state.config.rate_limit.enabled {
        let limit = middleware::rate_limit::create_rate_limiter(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        );
        resolve_routes = resolve_routes.layer(from_fn_with_state(
            limit,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // API routes
    let api_routes = Router::new()
        // Health endpoints (not rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .merge(resolve_routes);

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(request_id)
                .layer(propagate_id)
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
