use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{ConnectInfo, Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use ragline_core::{
    Document, INGEST_ROUTE, Orchestrator, QUERY_ROUTE, QueryRequest, RagError, VectorStore,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn};

use crate::{
    error::ApiError,
    protocol::{
        CollectionSummary, DashboardResponse, HealthResponse, IngestRequest, IngestResponse,
        QueryRequestBody, QueryResponseBody, ReadyResponse,
    },
};

const SERVICE: &str = "ragline";

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator: Arc::new(orchestrator) }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS. `*` (the default) allows any origin without
    /// credentials; an explicit list also allows credentials.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8000, allowed_origins: vec!["*".to_string()] }
    }
}

impl ServerConfig {
    /// Defaults overridden by `RAGLINE_HOST`, `RAGLINE_PORT` and the
    /// comma-separated `RAGLINE_ALLOWED_ORIGINS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("RAGLINE_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("RAGLINE_PORT") {
            config.port =
                port.parse().with_context(|| format!("invalid RAGLINE_PORT '{port}'"))?;
        }
        if let Ok(origins) = std::env::var("RAGLINE_ALLOWED_ORIGINS") {
            let origins: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
            for origin in &origins {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid RAGLINE_ALLOWED_ORIGINS entry '{origin}'"))?;
            }
            if !origins.is_empty() {
                config.allowed_origins = origins;
            }
        }
        Ok(config)
    }

    fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

/// Load `.env` from the working directory or its parents, keeping variables
/// that are already set. Returns the file that was loaded.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Load variables from `path`, keeping variables that are already set.
pub fn load_env_file_from(path: &Path) -> anyhow::Result<()> {
    dotenvy::from_path(path).with_context(|| format!("failed to load {}", path.display()))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.allows_any_origin() {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn app_router(state: AppState, config: &ServerConfig) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        info_span!("request", method = %request.method(), uri = %request.uri(), request_id)
    });

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/dashboard", get(dashboard))
        .route("/v1/ingest", post(ingest))
        .route("/v1/query", post(query))
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(trace)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors_layer(config))
}

pub async fn run_server(config: ServerConfig, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let app = app_router(AppState::new(orchestrator), &config);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for ragline server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(origins = ?config.allowed_origins, "ragline listening on http://{}", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Caller identity for per-client rate limiting: the first `x-forwarded-for`
/// hop, else the peer address.
fn client_id(state: &AppState, headers: &HeaderMap, peer: SocketAddr) -> Option<String> {
    if !state.orchestrator.rate_limiter().config().per_client {
        return None;
    }
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string);
    Some(forwarded.unwrap_or_else(|| peer.ip().to_string()))
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok".to_string(), service: SERVICE.to_string() })
}

async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, ApiError> {
    let collections = state.orchestrator.vector_store().collections().await?;
    let (embedder, llm) = state.orchestrator.provider_names();
    Ok(Json(ReadyResponse {
        status: "ready".to_string(),
        embedder: embedder.to_string(),
        llm: llm.to_string(),
        collections: collections.len(),
    }))
}

async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardResponse>, ApiError> {
    let orchestrator = &state.orchestrator;
    let store = orchestrator.vector_store();
    let mut collections = Vec::new();
    for name in store.collections().await? {
        let chunks = store.count(&name).await?;
        collections.push(CollectionSummary { name, chunks });
    }

    let config = orchestrator.config();
    Ok(Json(DashboardResponse {
        default_collection: config.default_collection.clone(),
        top_k: config.top_k,
        cache_ttl_secs: config.cache_ttl.as_secs(),
        rate_limit: config.rate_limit.clone(),
        stats: orchestrator.stats(),
        collections,
    }))
}

async fn ingest(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let Json(request) = body?;
    if request.texts.is_empty() {
        return Err(RagError::Validation("texts must not be empty".to_string()).into());
    }
    if let Some(metadatas) = &request.metadatas {
        if metadatas.len() != request.texts.len() {
            return Err(RagError::Validation(format!(
                "metadatas has {} entries but texts has {}",
                metadatas.len(),
                request.texts.len()
            ))
            .into());
        }
    }

    let orchestrator = &state.orchestrator;
    orchestrator.admit(INGEST_ROUTE, client_id(&state, &headers, peer).as_deref())?;

    let metadatas = request.metadatas.unwrap_or_default();
    let documents: Vec<Document> = request
        .texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let mut document = Document::new(text);
            if let Some(metadata) = metadatas.get(i) {
                document.metadata = metadata.clone();
            }
            document
        })
        .collect();

    let collection =
        request.collection.unwrap_or_else(|| orchestrator.config().default_collection.clone());
    let report = orchestrator.ingest(&collection, documents).await?;
    Ok((StatusCode::CREATED, Json(IngestResponse::from(report))))
}

async fn query(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<QueryRequestBody>, JsonRejection>,
) -> Result<Json<QueryResponseBody>, ApiError> {
    let Json(body) = body?;

    let mut request = QueryRequest::new(body.query).route(QUERY_ROUTE);
    if let Some(collection) = body.collection {
        request = request.collection(collection);
    }
    if let Some(k) = body.k {
        request = request.top_k(k);
    }
    if let Some(client) = client_id(&state, &headers, peer) {
        request = request.client(client);
    }

    let response = state.orchestrator.query(request).await?;
    Ok(Json(QueryResponseBody {
        answer: response.answer,
        sources: response.sources,
        cached: response.cached,
    }))
}
