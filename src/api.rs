//! HTTP API for the connection manager
//!
//! Provides endpoints for:
//! - Plugin discovery
//! - Connection lifecycle (create, test, update, close)
//! - Query and script execution
//! - Schema metadata

use crate::db::metadata::{MetadataRequest, MetadataResponse};
use crate::db::traits::{
    Connection, ConnectionConfig, ConnectionResult, DatabasePluginConfig, EngineId, ManagerError,
    PluginError, QueryResult,
};
use crate::db::{ConnectionManager, CreateConnectionResponse, PluginRegistry};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// API server state
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<ConnectionManager>,
    pub registry: Arc<PluginRegistry>,
}

impl ApiState {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        let registry = Arc::clone(manager.registry());
        Self { manager, registry }
    }
}

/// Execute request
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub query: String,
}

/// Execute script request
#[derive(Debug, Deserialize)]
pub struct ExecuteScriptRequest {
    pub script: String,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        let (status, details) = match &err {
            ManagerError::PluginNotFound(_) => (StatusCode::NOT_FOUND, "PluginNotFound"),
            ManagerError::ConnectionNotFound(_) => (StatusCode::NOT_FOUND, "ConnectionNotFound"),
            ManagerError::Plugin(PluginError::Unsupported(_)) => {
                (StatusCode::BAD_REQUEST, "Unsupported")
            }
            ManagerError::Plugin(PluginError::InvalidConfig(_)) => {
                (StatusCode::BAD_REQUEST, "InvalidConfig")
            }
            ManagerError::Plugin(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PluginError"),
        };
        Self {
            status,
            message: err.to_string(),
            details: Some(details.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/plugins/ids", get(get_plugin_ids))
        .route("/plugins/configs", get(get_plugin_configs))
        .route("/plugins/:id/config", get(get_plugin_config))
        .route(
            "/connections/all",
            get(get_all_connections).delete(delete_all_connections),
        )
        .route("/connections/create", post(create_connection))
        .route("/connections/test", post(test_connection))
        .route("/connections/:connectionId", get(get_connection))
        .route("/connections/:connectionId/close", post(close_connection))
        .route("/connections/:connectionId/update", post(update_connection))
        .route("/connections/:connectionId/execute", post(execute_query))
        .route("/connections/:connectionId/execute-script", post(execute_script))
        .route("/connections/:connectionId/metadata", post(get_metadata))
        .with_state(state)
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

/// GET /plugins/ids
async fn get_plugin_ids(State(state): State<ApiState>) -> Json<Vec<EngineId>> {
    Json(state.registry.get_plugin_ids().await)
}

/// GET /plugins/configs
async fn get_plugin_configs(State(state): State<ApiState>) -> Json<Vec<DatabasePluginConfig>> {
    Json(state.registry.get_plugin_configs().await)
}

/// GET /plugins/:id/config - `null` for unknown engines and engines without a plugin
async fn get_plugin_config(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Json<Option<DatabasePluginConfig>> {
    match id.parse::<EngineId>() {
        Ok(engine) => Json(state.registry.get_plugin_config(engine).await),
        Err(_) => Json(None),
    }
}

/// GET /connections/all
async fn get_all_connections(State(state): State<ApiState>) -> Json<Vec<Connection>> {
    Json(state.manager.get_all_connections().await)
}

/// DELETE /connections/all
async fn delete_all_connections(State(state): State<ApiState>) -> StatusCode {
    state.manager.delete_all_connections().await;
    StatusCode::NO_CONTENT
}

/// POST /connections/create
async fn create_connection(
    State(state): State<ApiState>,
    Json(config): Json<ConnectionConfig>,
) -> Json<CreateConnectionResponse> {
    Json(state.manager.create_connection(config).await)
}

/// POST /connections/test
async fn test_connection(
    State(state): State<ApiState>,
    Json(config): Json<ConnectionConfig>,
) -> Json<ConnectionResult> {
    Json(state.manager.test_connection(config).await)
}

/// GET /connections/:connectionId
async fn get_connection(
    State(state): State<ApiState>,
    Path(connection_id): Path<String>,
) -> Result<Json<Connection>, ApiError> {
    state
        .manager
        .get_connection(&connection_id)
        .await
        .map(Json)
        .ok_or_else(|| ManagerError::ConnectionNotFound(connection_id).into())
}

/// POST /connections/:connectionId/close - unknown ids are a no-op
async fn close_connection(
    State(state): State<ApiState>,
    Path(connection_id): Path<String>,
) -> StatusCode {
    state.manager.close_connection(&connection_id).await;
    StatusCode::NO_CONTENT
}

/// POST /connections/:connectionId/update - mismatched ids are logged and ignored
async fn update_connection(
    State(state): State<ApiState>,
    Path(connection_id): Path<String>,
    Json(connection): Json<Connection>,
) -> StatusCode {
    state
        .manager
        .update_connection(&connection_id, connection)
        .await;
    StatusCode::NO_CONTENT
}

/// POST /connections/:connectionId/execute
async fn execute_query(
    State(state): State<ApiState>,
    Path(connection_id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Json<QueryResult> {
    Json(
        state
            .manager
            .execute_query(&connection_id, &request.query)
            .await,
    )
}

/// POST /connections/:connectionId/execute-script
async fn execute_script(
    State(state): State<ApiState>,
    Path(connection_id): Path<String>,
    Json(request): Json<ExecuteScriptRequest>,
) -> Json<Vec<QueryResult>> {
    Json(
        state
            .manager
            .execute_script(&connection_id, &request.script)
            .await,
    )
}

/// POST /connections/:connectionId/metadata
async fn get_metadata(
    State(state): State<ApiState>,
    Path(connection_id): Path<String>,
    Json(request): Json<MetadataRequest>,
) -> Result<Json<MetadataResponse>, ApiError> {
    Ok(Json(
        state.manager.get_metadata(&connection_id, request).await?,
    ))
}
