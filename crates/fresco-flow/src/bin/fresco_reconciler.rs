//! Fresco reconciler service.
//!
//! Ticks on a fixed interval and exposes:
//!
//! - `GET /health`
//! - `POST /tick`: run a tick immediately
//! - `POST /completions`: terminal result of one asset from the executor
//! - `POST /materializations`: record a materialization made elsewhere
//! - `POST /evictions`: drop a stuck key from the in-flight set
//! - `GET /status`: last tick report and the in-flight set
//!
//! The ledger lives in an [`InMemoryLedgerStore`], so a restart is a cold
//! start and every asset rematerializes once. Hosts that need records to
//! survive restarts embed [`Reconciler`] with a durable [`LedgerStore`].
//!
//! [`LedgerStore`]: fresco_flow::store::LedgerStore

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use fresco_core::SubmissionId;
use fresco_core::observability::init_logging;
use fresco_flow::asset::AssetKey;
use fresco_flow::backend::CompletionOutcome;
use fresco_flow::backend::http::HttpBackend;
use fresco_flow::config::ReconcilerConfig;
use fresco_flow::error::{Error, Result};
use fresco_flow::ledger::MaterializationRecord;
use fresco_flow::reconciler::{CompletionDisposition, InFlightAsset, Reconciler, TickReport};
use fresco_flow::source::JsonFileDefinitionSource;
use fresco_flow::store::memory::InMemoryLedgerStore;

#[derive(Clone)]
struct AppState {
    reconciler: Arc<Reconciler>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::AssetNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Core(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest {
    asset: String,
    #[serde(default)]
    submission_id: Option<SubmissionId>,
    #[serde(flatten)]
    outcome: CompletionOutcome,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaterializationRequest {
    asset: String,
    #[serde(default)]
    data_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EvictionRequest {
    asset: String,
}

#[derive(Debug, Serialize)]
struct EvictionResponse {
    evicted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    last_tick: Option<TickReport>,
    in_flight: Vec<InFlightAsset>,
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn tick_handler(State(state): State<AppState>) -> Json<TickReport> {
    Json(state.reconciler.tick(Utc::now()).await)
}

async fn completion_handler(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> std::result::Result<Json<CompletionDisposition>, ApiError> {
    let key: AssetKey = request.asset.parse()?;
    let disposition = state
        .reconciler
        .on_complete(&key, request.submission_id, request.outcome, Utc::now())
        .await?;
    Ok(Json(disposition))
}

async fn materialization_handler(
    State(state): State<AppState>,
    Json(request): Json<MaterializationRequest>,
) -> std::result::Result<Json<MaterializationRecord>, ApiError> {
    let key: AssetKey = request.asset.parse()?;
    let record = state
        .reconciler
        .record_external_materialization(&key, request.data_version, Utc::now())
        .await?;
    Ok(Json(record))
}

async fn eviction_handler(
    State(state): State<AppState>,
    Json(request): Json<EvictionRequest>,
) -> std::result::Result<Json<EvictionResponse>, ApiError> {
    let key: AssetKey = request.asset.parse()?;
    let evicted = state.reconciler.evict_in_flight(&key)?;
    Ok(Json(EvictionResponse { evicted }))
}

async fn status_handler(
    State(state): State<AppState>,
) -> std::result::Result<Json<StatusResponse>, ApiError> {
    Ok(Json(StatusResponse {
        last_tick: state.reconciler.last_report()?,
        in_flight: state.reconciler.in_flight()?,
    }))
}

/// Ticks forever on the configured interval, evicting stuck keys first when
/// a ceiling is configured.
async fn run_ticker(reconciler: Arc<Reconciler>) {
    let config = reconciler.config().clone();
    let ceiling = config
        .in_flight_ceiling
        .and_then(|ceiling| chrono::Duration::from_std(ceiling).ok());

    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let now = Utc::now();
        if let Some(ceiling) = ceiling {
            if let Err(e) = reconciler.evict_in_flight_older_than(now, ceiling) {
                tracing::error!(error = %e, "in-flight watchdog failed");
            }
        }
        reconciler.tick(now).await;
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::configuration(format!("missing {key}")))
}

fn resolve_port() -> Result<u16> {
    if let Ok(port) = std::env::var("PORT") {
        return port
            .parse::<u16>()
            .map_err(|_| Error::configuration("invalid PORT"));
    }

    if let Ok(port) = std::env::var("FRESCO_PORT") {
        return port
            .parse::<u16>()
            .map_err(|_| Error::configuration("invalid FRESCO_PORT"));
    }

    Ok(8080)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ReconcilerConfig::from_env()?;
    init_logging(config.log_format);

    let assets_path = required_env("FRESCO_ASSETS_PATH")?;
    let backend_url = required_env("FRESCO_BACKEND_URL")?;
    let port = resolve_port()?;

    tracing::info!("ledger is in memory only; a restart rematerializes every asset");
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(JsonFileDefinitionSource::new(assets_path)),
        Arc::new(HttpBackend::new(backend_url)?),
        Arc::new(InMemoryLedgerStore::new()),
        config,
    ));

    tokio::spawn(run_ticker(Arc::clone(&reconciler)));

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/tick", post(tick_handler))
        .route("/completions", post(completion_handler))
        .route("/materializations", post(materialization_handler))
        .route("/evictions", post(eviction_handler))
        .route("/status", get(status_handler))
        .with_state(AppState { reconciler });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "fresco reconciler listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::configuration(format!("failed to bind: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::configuration(format!("server error: {e}")))
}
