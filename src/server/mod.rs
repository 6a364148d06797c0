//! HTTP operational surface.
//!
//! Every route except `/health` requires `Authorization: Bearer <api_key>`
//! when an API key is configured.

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sheetsync_core::{
    BatchReport, ChangeLogStats, DrainReport, LedgerRecord, SyncContext, SyncDirection, SyncError,
    SyncRequest, TableMapping,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Progress of full-sync batches started through the API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub running: bool,
    pub last_report: Option<BatchReport>,
    pub last_error: Option<String>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    ctx: Arc<SyncContext>,
    api_key: Option<Arc<str>>,
    status: Arc<RwLock<SyncStatus>>,
}

impl AppState {
    pub fn new(ctx: Arc<SyncContext>, api_key: Option<String>) -> Self {
        Self {
            ctx,
            api_key: api_key.map(Arc::from),
            status: Arc::new(RwLock::new(SyncStatus::default())),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    async fn record(&self, result: &Result<BatchReport, SyncError>) {
        let mut status = self.status.write().await;
        match result {
            Ok(report) => {
                status.last_report = Some(report.clone());
                status.last_error = None;
            }
            Err(e) => status.last_error = Some(e.to_string()),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Engine errors mapped onto HTTP statuses.
pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::ConfigurationGap(_) | SyncError::Mapping(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SyncError::BackendUnavailable(_) | SyncError::QuotaExceeded { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(status = %status, error = %self.0, "Request failed");
        (
            status,
            Json(ErrorBody {
                error: self.0.kind(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Authentication middleware
async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let rejection = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) if key == expected => None,
            Some(_) => Some(("invalid_key", "Invalid API key")),
            None => Some((
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            )),
        },
        None => Some(("missing_auth", "Authorization header required")),
    };

    match rejection {
        None => next.run(request).await,
        Some((error, message)) => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error,
                message: message.to_string(),
            }),
        )
            .into_response(),
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_tables(State(state): State<AppState>) -> Json<Vec<TableMapping>> {
    Json(state.ctx.registry().all().to_vec())
}

/// Request body of the sync routes; the direction comes from the route.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncBody {
    client_id: Option<String>,
    tables: Vec<String>,
    force_full_sync: bool,
}

impl SyncBody {
    fn into_request(self, direction: SyncDirection) -> SyncRequest {
        SyncRequest {
            client_id: self.client_id,
            tables: self.tables,
            force_full_sync: self.force_full_sync,
            direction,
        }
    }
}

async fn run_batch(state: &AppState, request: SyncRequest) -> Result<BatchReport, ApiError> {
    let result = state.ctx.coordinator().run(request).await;
    state.record(&result).await;
    Ok(result?)
}

async fn sync_relation_to_sheet(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<BatchReport>, ApiError> {
    let report = run_batch(&state, body.into_request(SyncDirection::RelationToSheet)).await?;
    Ok(Json(report))
}

async fn sync_sheet_to_relation(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> Result<Json<BatchReport>, ApiError> {
    let report = run_batch(&state, body.into_request(SyncDirection::SheetToRelation)).await?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct StartedResponse {
    status: &'static str,
}

/// Starts a bidirectional batch in the background.
async fn sync_bidirectional(
    State(state): State<AppState>,
    Json(body): Json<SyncBody>,
) -> (StatusCode, Json<StartedResponse>) {
    {
        let mut status = state.status.write().await;
        if status.running {
            return (
                StatusCode::CONFLICT,
                Json(StartedResponse {
                    status: "already_running",
                }),
            );
        }
        status.running = true;
    }

    let request = body.into_request(SyncDirection::Both);
    let coordinator = state.ctx.coordinator();
    spawn_batch(state, async move { coordinator.run(request).await });

    (
        StatusCode::ACCEPTED,
        Json(StartedResponse { status: "started" }),
    )
}

/// Runs a batch off the request path. The running flag is cleared however
/// the batch ends, including a panic.
fn spawn_batch<F>(state: AppState, batch: F) -> JoinHandle<()>
where
    F: Future<Output = Result<BatchReport, SyncError>> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::spawn(batch).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Background sync failed");
                }
                state.record(&result).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Background sync aborted");
                state.status.write().await.last_error = Some(e.to_string());
            }
        }
        state.status.write().await.running = false;
    })
}

#[derive(Serialize)]
struct StatusResponse {
    sync: SyncStatus,
    ledger: Vec<LedgerRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ledger_error: Option<String>,
}

async fn sync_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let sync = state.status.read().await.clone();
    let ledger = match state.ctx.ledger().await {
        Ok(ledger) => ledger
            .list_records()
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    let (ledger, ledger_error) = match ledger {
        Ok(records) => (records, None),
        Err(e) => (Vec::new(), Some(e)),
    };
    Json(StatusResponse {
        sync,
        ledger,
        ledger_error,
    })
}

async fn process_changes(State(state): State<AppState>) -> Result<Json<DrainReport>, ApiError> {
    let report = state
        .ctx
        .change_log_processor()
        .process_pending_changes()
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct CleanupParams {
    retention_days: Option<u32>,
}

#[derive(Serialize)]
struct CleanupResponse {
    purged: u64,
    retention_days: u32,
}

async fn cleanup_changes(
    State(state): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let retention_days = params
        .retention_days
        .unwrap_or(state.ctx.settings().retention_days);
    let purged = state
        .ctx
        .change_log_processor()
        .cleanup_old_records(retention_days)
        .await?;
    Ok(Json(CleanupResponse {
        purged,
        retention_days,
    }))
}

async fn change_stats(State(state): State<AppState>) -> Result<Json<ChangeLogStats>, ApiError> {
    Ok(Json(state.ctx.change_log_processor().get_stats().await?))
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required when a key is configured)
    let protected_routes = Router::new()
        .route("/config/tables", get(list_tables))
        .route("/sync/relation-to-sheet", post(sync_relation_to_sheet))
        .route("/sync/sheet-to-relation", post(sync_sheet_to_relation))
        .route("/sync/bidirectional", post(sync_bidirectional))
        .route("/sync/status", get(sync_status))
        .route("/change-log/process", post(process_changes))
        .route("/change-log/cleanup", post(cleanup_changes))
        .route("/change-log/stats", get(change_stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use sheetsync_core::{
        ContextOptions, EngineSettings, MemorySheetBackend, MemorySheetProvider, Registry,
        SheetBackend,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    const MAPPINGS: &str = r#"
- source_table: price_wb
  sheet_name: wb_price
  primary_key: id
  fields:
    - { source: id, header: ID }
    - { source: price, header: Price }
"#;

    async fn setup(api_key: Option<&str>) -> (AppState, Arc<MemorySheetBackend>, TempDir) {
        let dir = tempfile::tempdir().unwrap();

        let admin = Arc::new(MemorySheetBackend::new("admin").with_sheet("tech", 100, 7));
        admin
            .update_range(
                "tech",
                "A1",
                &[
                    vec!["client".into(), "spreadsheet".into(), "table".into()],
                    vec!["c1".into(), "doc-1".into(), "wb_price".into()],
                ],
            )
            .await
            .unwrap();
        let doc = Arc::new(MemorySheetBackend::new("doc-1").with_sheet("Sheet1", 100, 26));
        let provider = Arc::new(MemorySheetProvider::new());
        provider.insert(admin);
        provider.insert(doc.clone());

        let mut options = ContextOptions::new(dir.path().join("test.db"), provider);
        options.registry = Registry::from_yaml_str(MAPPINGS).unwrap();
        options.ledger_spreadsheet_id = Some("admin".into());
        options.spreadsheet_id = Some("doc-1".into());
        options.settings = EngineSettings::immediate();
        let ctx = SyncContext::open(options).await.unwrap();

        for sql in [
            "CREATE TABLE price_wb (id INTEGER PRIMARY KEY, price INTEGER)",
            "INSERT INTO price_wb (id, price) VALUES (1, 10), (2, 20), (3, 30)",
        ] {
            sqlx_exec(&ctx, sql).await;
        }

        let state = AppState::new(Arc::new(ctx), api_key.map(String::from));
        (state, doc, dir)
    }

    async fn sqlx_exec(ctx: &SyncContext, sql: &str) {
        sqlx::query(sql).execute(ctx.pool()).await.unwrap();
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (state, _doc, _dir) = setup(Some("secret")).await;
        let (status, body) = send(router(state), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_protected_routes_require_key() {
        let (state, _doc, _dir) = setup(Some("secret")).await;

        let (status, body) = send(router(state.clone()), get("/config/tables")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing_auth");

        let request = Request::builder()
            .uri("/config/tables")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router(state.clone()), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_key");

        let request = Request::builder()
            .uri("/config/tables")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router(state), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["sheet_name"], "wb_price");
    }

    #[tokio::test]
    async fn test_sync_relation_to_sheet() {
        let (state, doc, _dir) = setup(None).await;

        let (status, body) = send(
            router(state.clone()),
            post_json("/sync/relation-to-sheet", "{}"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["confirmed"], 1);
        assert_eq!(body["tables"][0]["outcome"]["status"], "confirmed");
        assert_eq!(body["tables"][0]["outcome"]["verified_records"], 3);
        assert_eq!(doc.sheet_values("wb_price").unwrap().len(), 4);

        let (status, body) = send(router(state), get("/sync/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sync"]["running"], false);
        assert_eq!(body["sync"]["last_report"]["summary"]["confirmed"], 1);
        assert_eq!(body["ledger"][0]["exported_from_relation"], true);
    }

    #[tokio::test]
    async fn test_bidirectional_runs_in_background() {
        let (state, doc, _dir) = setup(None).await;

        let (status, body) =
            send(router(state.clone()), post_json("/sync/bidirectional", "{}")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "started");

        for _ in 0..100 {
            if !state.status.read().await.running {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(state.status.read().await.last_report.is_some());
        assert!(doc.sheet_values("wb_price").is_some());
    }

    async fn crashing_batch() -> Result<BatchReport, SyncError> {
        panic!("coordinator crashed")
    }

    #[tokio::test]
    async fn test_panicking_batch_clears_running_flag() {
        let (state, _doc, _dir) = setup(None).await;
        state.status.write().await.running = true;

        spawn_batch(state.clone(), crashing_batch()).await.unwrap();

        let status = state.status.read().await;
        assert!(!status.running);
        assert!(status.last_error.as_deref().unwrap().contains("panicked"));
        drop(status);

        let (status, body) =
            send(router(state.clone()), post_json("/sync/bidirectional", "{}")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "started");
    }

    #[tokio::test]
    async fn test_change_log_routes() {
        let (state, doc, _dir) = setup(None).await;
        let repo = state.context().change_log_processor().repository().clone();
        repo.record("price_wb", "2", sheetsync_core::ChangeOperation::Insert)
            .await
            .unwrap();

        let (status, body) = send(router(state.clone()), get("/change-log/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], 1);

        let (status, body) =
            send(router(state.clone()), post_json("/change-log/process", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["processed_count"], 1);
        assert_eq!(body["error_count"], 0);
        assert_eq!(doc.sheet_values("wb_price").unwrap()[1][0], "2");

        let (status, body) = send(
            router(state),
            post_json("/change-log/cleanup?retention_days=0", ""),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retention_days"], 0);
    }

    #[tokio::test]
    async fn test_unconfigured_ledger_is_unprocessable() {
        let (state, _doc, _dir) = setup(None).await;
        let mut bad = state.clone();
        let dir = tempfile::tempdir().unwrap();
        let ctx = SyncContext::open(ContextOptions::new(
            dir.path().join("other.db"),
            Arc::new(MemorySheetProvider::new()),
        ))
        .await
        .unwrap();
        bad.ctx = Arc::new(ctx);

        let (status, body) = send(router(bad), post_json("/sync/relation-to-sheet", "{}")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "configuration_gap");
    }
}
