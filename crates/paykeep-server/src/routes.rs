use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use paykeep_core::wire::{
    AckRequest, LogsResponse, PullResponse, PushRequest, PushResponse, SimpleResponse,
    StatusResponse,
};

use crate::auth::{extract_bearer_token, verify_token};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::reconcile::ReconcileStore;

const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: Arc<Mutex<ReconcileStore>>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: ReconcileStore) -> Self {
        Self {
            config,
            store: Arc::new(Mutex::new(store)),
        }
    }

    fn store(&self) -> MutexGuard<'_, ReconcileStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/push", post(push))
        .route("/sync/pull", get(pull))
        .route("/sync/status", get(status).post(acknowledge))
        .route("/sync/logs", get(logs))
        .route("/sync/reset", post(reset))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    verify_token(token, &state.config.api_token)?;
    Ok(next.run(request).await)
}

async fn push(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    let report = state.store().merge_push(&request.device_id, &request.tables)?;

    let accepted: usize = report.accepted.values().map(Vec::len).sum();
    let rejected: usize = report.rejected.values().map(Vec::len).sum();
    tracing::info!(
        endpoint = "push",
        device = %request.device_id,
        accepted,
        rejected,
        "Merged push batch"
    );

    Ok(Json(PushResponse {
        success: true,
        accepted: report.accepted,
        rejected: report.rejected,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullQuery {
    device_id: String,
    since: Option<DateTime<Utc>>,
}

async fn pull(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    if query.device_id.trim().is_empty() {
        return Err(AppError::bad_request("deviceId must not be empty"));
    }
    let (tables, last_sync_time) = state.store().delta_since(&query.device_id, query.since)?;

    let delivered: usize = tables.values().map(Vec::len).sum();
    tracing::info!(
        endpoint = "pull",
        device = %query.device_id,
        delivered,
        "Computed pull delta"
    );

    Ok(Json(PullResponse {
        success: true,
        tables,
        last_sync_time,
    }))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let (mode, last_sync_time) = state.store().status()?;
    Ok(Json(StatusResponse {
        success: true,
        mode,
        last_sync_time,
    }))
}

async fn acknowledge(
    State(state): State<AppState>,
    Json(request): Json<AckRequest>,
) -> Result<Json<SimpleResponse>, AppError> {
    state.store().acknowledge(request.last_sync_time)?;
    tracing::info!(
        endpoint = "status",
        last_sync_time = %request.last_sync_time,
        "Acknowledged watermark"
    );
    Ok(Json(SimpleResponse { success: true }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, AppError> {
    let data = state
        .store()
        .logs(query.limit.unwrap_or(DEFAULT_LOG_LIMIT))?;
    Ok(Json(LogsResponse {
        success: true,
        data,
    }))
}

async fn reset(State(state): State<AppState>) -> Result<Json<SimpleResponse>, AppError> {
    state.store().reset()?;
    Ok(Json(SimpleResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            database_path: ":memory:".to_string(),
            api_token: "test-token".to_string(),
        };
        AppState::new(
            Arc::new(config),
            ReconcileStore::open_in_memory().unwrap(),
        )
    }

    fn authed(method: Method, uri: &str, body: Body) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer test-token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_is_unauthenticated() {
        let app = app_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sync_routes_require_bearer_token() {
        let app = app_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sync/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let app = app_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sync/status")
                    .header(header::AUTHORIZATION, "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn push_then_pull_round_trips_a_record() {
        let app = app_router(test_state());
        let uuid = uuid::Uuid::now_v7().to_string();
        let body = serde_json::json!({
            "deviceId": "device-a",
            "tables": {
                "employees": [{
                    "uuid": uuid,
                    "payload": {"name": "Ada"},
                    "updatedAt": Utc::now().to_rfc3339(),
                }]
            }
        });

        let response = app
            .clone()
            .oneshot(authed(
                Method::POST,
                "/sync/push",
                Body::from(body.to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let pushed: PushResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(pushed.accepted["employees"], vec![uuid.clone()]);

        let response = app
            .oneshot(authed(
                Method::GET,
                "/sync/pull?deviceId=device-a",
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let pulled: PullResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(pulled.tables["employees"][0].uuid, uuid);
    }

    #[tokio::test]
    async fn pull_without_device_id_is_bad_request() {
        let app = app_router(test_state());
        let response = app
            .oneshot(authed(Method::GET, "/sync/pull", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_returns_success_envelope() {
        let app = app_router(test_state());
        let response = app
            .oneshot(authed(Method::POST, "/sync/reset", Body::from("{}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: SimpleResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed.success);
    }
}
