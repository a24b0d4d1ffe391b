use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use movie_rounds_api::{
    AssetPreloader, BuildError, CatalogStats, ExperimentConfig, FileCatalogSource,
    HttpAssetPreloader, NoopPreloader, RoundSnapshot, RoundsService, API_CONTRACT_VERSION,
};
use movie_rounds_core::{CategoryDefinition, FilterSummary};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    rounds: RoundsService,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    code: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    rounds_cached: bool,
    building: bool,
}

#[derive(Debug, Clone, Serialize)]
struct InvalidateResponse {
    invalidated: bool,
}

#[derive(Debug, Clone, Serialize)]
struct FilterResponse {
    category: CategoryDefinition,
    summary: FilterSummary,
}

#[derive(Debug, Parser)]
#[command(name = "movie-rounds-service")]
#[command(about = "Local HTTP service that serves memoized experiment rounds")]
struct Args {
    #[arg(long, default_value = "./movies.json")]
    catalog: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4010")]
    bind: SocketAddr,
    /// Shuffle seed; omit for a fresh random allocation per build.
    #[arg(long)]
    seed: Option<u64>,
    /// Skip the HTTP warm-up of poster and backdrop URLs.
    #[arg(long)]
    no_preload: bool,
    /// Start building rounds as soon as the listener is up.
    #[arg(long)]
    warm: bool,
    #[arg(long)]
    log_json: bool,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            code,
            error: message.into(),
        }
    }

    fn build(err: &BuildError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.code(), err.to_string())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/rounds", get(rounds_get))
        .route("/v1/rounds/invalidate", post(rounds_invalidate))
        .route("/v1/catalog/stats", get(catalog_stats))
        .route("/v1/filters/:category_id", get(filters_show))
        .with_state(state)
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = match &args.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ExperimentConfig::default(),
    };
    let preloader: Arc<dyn AssetPreloader> = if args.no_preload {
        Arc::new(NoopPreloader)
    } else {
        Arc::new(HttpAssetPreloader::new(Duration::from_millis(config.preload_timeout_ms))?)
    };
    let source = Arc::new(FileCatalogSource::new(args.catalog.clone()));
    let rounds = match args.seed {
        Some(seed) => RoundsService::with_seed(config, source, preloader, seed),
        None => RoundsService::new(config, source, preloader),
    };

    if args.warm {
        let rounds = rounds.clone();
        tokio::spawn(async move {
            if let Err(err) = rounds.get_or_build().await {
                tracing::warn!(error = %err, "warm-up build failed");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        bind = %args.bind,
        catalog = %args.catalog.display(),
        "movie rounds service listening"
    );
    axum::serve(listener, app(ServiceState { rounds })).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse {
        status: "ok",
        rounds_cached: state.rounds.cached().is_some(),
        building: state.rounds.is_building(),
    }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn rounds_get(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Arc<RoundSnapshot>>>, ServiceError> {
    let snapshot = state.rounds.get_or_build().await.map_err(|err| ServiceError::build(&err))?;
    Ok(Json(envelope(snapshot)))
}

async fn rounds_invalidate(
    State(state): State<ServiceState>,
) -> Json<ServiceEnvelope<InvalidateResponse>> {
    let invalidated = state.rounds.cached().is_some() || state.rounds.is_building();
    state.rounds.invalidate();
    Json(envelope(InvalidateResponse { invalidated }))
}

async fn catalog_stats(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<CatalogStats>>, ServiceError> {
    let stats = state.rounds.catalog_stats().await.map_err(|err| ServiceError::build(&err))?;
    Ok(Json(envelope(stats)))
}

async fn filters_show(
    State(state): State<ServiceState>,
    Path(category_id): Path<String>,
) -> Result<Json<ServiceEnvelope<FilterResponse>>, ServiceError> {
    let not_found = || {
        ServiceError::new(
            StatusCode::NOT_FOUND,
            "unknown_category",
            format!("unknown category `{category_id}`"),
        )
    };
    let category = state.rounds.config().category(&category_id).cloned().ok_or_else(not_found)?;
    let summary = state.rounds.filter_summary(&category_id).ok_or_else(not_found)?;
    Ok(Json(envelope(FilterResponse { category, summary })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use movie_rounds_api::StaticCatalogSource;
    use movie_rounds_core::parse_catalog;
    use tower::ServiceExt;

    fn catalog_json(per_genre: usize) -> String {
        let mut rows = Vec::new();
        for (genre, genre_id) in [("Action", 28), ("Drama", 18)] {
            for index in 0..per_genre {
                rows.push(serde_json::json!({
                    "id": format!("{genre}-{index}"),
                    "title": format!("{genre} {index}"),
                    "genre": genre,
                    "genre_ids": [genre_id],
                    "keywords": ["heist", "rivalry"],
                    "poster_path": format!("/{genre}-{index}.jpg"),
                }));
            }
        }
        serde_json::Value::Array(rows).to_string()
    }

    fn test_config() -> ExperimentConfig {
        match ExperimentConfig::from_yaml_str(
            r"
movies_per_category: 2
rounds_count: 2
image_base_url: https://img.test
categories:
  - id: action
    label: Action
    required_genre_id: 28
  - id: drama
    label: Drama
    required_genre_id: 18
filters:
  labels:
    action:
      exclude:
        titles: ['Action 0']
",
        ) {
            Ok(config) => config,
            Err(err) => panic!("test config should parse: {err}"),
        }
    }

    fn test_state(per_genre: usize) -> ServiceState {
        let items = match parse_catalog(catalog_json(per_genre).as_bytes()) {
            Ok(items) => items,
            Err(err) => panic!("fixture catalog should parse: {err}"),
        };
        ServiceState {
            rounds: RoundsService::with_seed(
                test_config(),
                Arc::new(StaticCatalogSource::new(items)),
                Arc::new(NoopPreloader),
                7,
            ),
        }
    }

    async fn send(router: Router, method: &str, uri: &str) -> Response {
        match router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(method)
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_text(response: Response) -> String {
        let bytes = match to_bytes(response.into_body(), 4 * 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let body = response_text(response).await;
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_cache_state() {
        let router = app(test_state(10));
        let response = send(router, "GET", "/v1/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(value["data"]["status"], "ok");
        assert_eq!(value["data"]["rounds_cached"], false);
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let router = app(test_state(10));
        let response = send(router, "GET", "/v1/openapi").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response_text(response).await;
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/rounds/invalidate"));
        assert!(body.contains("/v1/filters/{category_id}"));
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn rounds_are_memoized_until_invalidated() {
        let state = test_state(10);
        let router = app(state.clone());

        let first = response_json(send(router.clone(), "GET", "/v1/rounds").await).await;
        let second = response_json(send(router.clone(), "GET", "/v1/rounds").await).await;
        assert_eq!(first["api_contract_version"], API_CONTRACT_VERSION);
        assert_eq!(first["data"]["build_id"], second["data"]["build_id"]);
        assert_eq!(state.rounds.builds_started(), 1);

        let rounds = match first["data"]["rounds"].as_array() {
            Some(rounds) => rounds.clone(),
            None => panic!("rounds should be an array: {first}"),
        };
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0]["label"], "Round 1");
        assert_eq!(rounds[0]["categories"][0]["movies"].as_array().map(Vec::len), Some(2));

        let invalidated =
            response_json(send(router.clone(), "POST", "/v1/rounds/invalidate").await).await;
        assert_eq!(invalidated["data"]["invalidated"], true);

        let third = response_json(send(router, "GET", "/v1/rounds").await).await;
        assert_ne!(first["data"]["build_id"], third["data"]["build_id"]);
        assert_eq!(state.rounds.builds_started(), 2);
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn exhausted_pool_maps_to_service_unavailable() {
        let state = test_state(2);
        let router = app(state.clone());

        let response = send(router, "GET", "/v1/rounds").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let value = response_json(response).await;
        assert_eq!(value["code"], "pool_exhausted");
        assert!(value["error"].as_str().is_some_and(|error| error.contains("Action")));
        assert!(state.rounds.cached().is_none());
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn filters_endpoint_resolves_known_categories_only() {
        let router = app(test_state(10));

        let response = send(router.clone(), "GET", "/v1/filters/action").await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(value["data"]["category"]["label"], "Action");
        assert_eq!(value["data"]["summary"]["has_rules"], true);
        assert_eq!(value["data"]["summary"]["exclude_titles"][0], "action 0");

        let missing = send(router, "GET", "/v1/filters/western").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let value = response_json(missing).await;
        assert_eq!(value["code"], "unknown_category");
    }

    // Test IDs: TSVC-006
    #[tokio::test]
    async fn catalog_stats_endpoint_reports_pool_sizes() {
        let router = app(test_state(4));
        let response = send(router, "GET", "/v1/catalog/stats").await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(value["data"]["total"], 8);
        assert_eq!(value["data"]["by_genre"]["Drama"], 4);
        assert_eq!(value["data"]["eligible_by_category"]["action"], 4);
    }
}
