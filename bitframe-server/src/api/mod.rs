//! HTTP API endpoints

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use bitframe_core::cluster::{Node, NodeClient, NodeStatus, RestoreStats};
use bitframe_core::query::{ExecOptions, Executor};
use bitframe_core::storage::{DatabaseInfo, DatabaseOptions, EngineStats, FrameOptions};
use bitframe_core::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest request body accepted (fragment images can be large)
const MAX_BODY: usize = 256 * 1024 * 1024;

/// Create the API router
pub fn create_router<C: NodeClient>(executor: Arc<Executor<C>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Node info
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/status", get(status::<C>))
        .route("/schema", get(schema::<C>))
        .route("/stats", get(stats::<C>))

        // Administration
        .route("/db", post(create_database::<C>))
        .route("/db/:db", delete(drop_database::<C>))
        .route("/db/:db/frame", post(create_frame::<C>))
        .route("/db/:db/frame/:frame", delete(drop_frame::<C>))
        .route("/db/:db/frame/:frame/restore", post(restore_frame::<C>))

        // Queries
        .route("/db/:db/query", post(query::<C>))

        // Node-to-node
        .route("/slices/max", get(max_slices::<C>))
        .route("/fragment/nodes", get(fragment_nodes::<C>))
        .route(
            "/fragment/data",
            get(backup_fragment::<C>).post(restore_fragment::<C>),
        )

        .layer(DefaultBodyLimit::max(MAX_BODY))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(executor)
}

// ============================================================================
// Errors
// ============================================================================

/// A core error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_already_exists() => StatusCode::CONFLICT,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            Error::Parse { .. }
            | Error::Query(_)
            | Error::InvalidName(_)
            | Error::ColumnOutOfSlice { .. } => StatusCode::BAD_REQUEST,
            Error::Remote { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDatabaseRequest {
    pub name: String,
    #[serde(flatten)]
    pub options: DatabaseOptions,
}

#[derive(Debug, Deserialize)]
pub struct CreateFrameRequest {
    pub name: String,
    #[serde(flatten)]
    pub options: FrameOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    pub profiles: bool,
    pub remote: bool,
    /// Comma-separated slice list
    pub slices: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FragmentParams {
    pub db: String,
    pub slice: u64,
}

#[derive(Debug, Deserialize)]
pub struct FragmentDataParams {
    pub db: String,
    pub frame: String,
    pub slice: u64,
}

#[derive(Debug, Deserialize)]
pub struct RestoreParams {
    pub host: String,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: bitframe_core::VERSION.to_string(),
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: bitframe_core::VERSION.to_string(),
    })
}

async fn status<C: NodeClient>(State(executor): State<Arc<Executor<C>>>) -> Json<NodeStatus> {
    Json(executor.status())
}

async fn schema<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
) -> Json<Vec<DatabaseInfo>> {
    Json(executor.engine().schema())
}

async fn stats<C: NodeClient>(State(executor): State<Arc<Executor<C>>>) -> Json<EngineStats> {
    Json(executor.engine().stats())
}

async fn create_database<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Json(req): Json<CreateDatabaseRequest>,
) -> ApiResult<StatusCode> {
    executor.engine().create_database(&req.name, req.options)?;
    Ok(StatusCode::CREATED)
}

async fn drop_database<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Path(db): Path<String>,
) -> ApiResult<StatusCode> {
    executor.engine().drop_database(&db)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_frame<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Path(db): Path<String>,
    Json(req): Json<CreateFrameRequest>,
) -> ApiResult<StatusCode> {
    executor
        .engine()
        .require_database(&db)?
        .create_frame(&req.name, req.options)?;
    Ok(StatusCode::CREATED)
}

async fn drop_frame<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Path((db, frame)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    executor.engine().require_database(&db)?.drop_frame(&frame)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn query<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Path(db): Path<String>,
    Query(params): Query<QueryParams>,
    body: String,
) -> ApiResult<Response> {
    let options = ExecOptions {
        profiles: params.profiles,
        remote: params.remote,
        slices: params.slices.as_deref().map(parse_slices).transpose()?,
    };

    let resp = executor.execute(&db, &body, &options).await?;
    let mut json = serde_json::to_string(&resp).map_err(Error::from)?;
    json.push('\n');
    Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
}

fn parse_slices(s: &str) -> Result<Vec<u64>, Error> {
    s.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim()
                .parse()
                .map_err(|_| Error::Query(format!("invalid slice: {:?}", part)))
        })
        .collect()
}

async fn max_slices<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
) -> Json<BTreeMap<String, u64>> {
    Json(executor.max_slices())
}

async fn fragment_nodes<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Query(params): Query<FragmentParams>,
) -> Json<Vec<Node>> {
    Json(executor.fragment_nodes(&params.db, params.slice))
}

async fn backup_fragment<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Query(params): Query<FragmentDataParams>,
) -> ApiResult<Response> {
    let data = executor.backup_fragment(&params.db, &params.frame, params.slice)?;
    Ok(match data {
        Some(data) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn restore_fragment<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Query(params): Query<FragmentDataParams>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    executor.restore_fragment(&params.db, &params.frame, params.slice, &body)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_frame<C: NodeClient>(
    State(executor): State<Arc<Executor<C>>>,
    Path((db, frame)): Path<(String, String)>,
    Query(params): Query<RestoreParams>,
) -> ApiResult<Json<RestoreStats>> {
    info!("Restore of {}/{} from {} requested", db, frame, params.host);
    let stats = executor.restore_frame(&params.host, &db, &frame).await?;
    Ok(Json(stats))
}
