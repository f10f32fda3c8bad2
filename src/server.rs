//! HTTP search server.
//!
//! Exposes the retrieval facade as a JSON HTTP API, the built-in agent tools
//! as REST endpoints, and the same tools over MCP Streamable HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/internal_search` | `{query, top_k = 3}` → `{results: [{text, source, file_name}]}` |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a registered tool by name |
//! | `*`    | `/mcp` | MCP Streamable HTTP endpoint |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "top_k must be a positive integer, got 0" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `search_failed` (500, `/internal_search`), `tool_error` (500, `/tools/{name}`).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::context::AppContext;
use crate::error::IngestError;
use crate::mcp::McpBridge;
use crate::models::ChunkResult;
use crate::retrieval::Retriever;
use crate::tools::{Tool as _, ToolContext, ToolInfo, ToolRegistry};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    retriever: Arc<Retriever>,
    tools: Arc<ToolRegistry>,
    tool_ctx: ToolContext,
    default_top_k: i64,
}

/// Build the full router over an open context.
pub fn router(ctx: &AppContext) -> Router {
    let retriever = Arc::new(ctx.retriever());
    let tools = Arc::new(ToolRegistry::with_builtins());
    let tool_ctx = ToolContext::new(retriever.clone());

    let bridge = McpBridge::new(tools.clone(), tool_ctx.clone());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    let state = AppState {
        retriever,
        tools,
        tool_ctx,
        default_top_k: ctx.config().retrieval.default_top_k,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/internal_search", post(handle_internal_search))
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, serves until Ctrl-C, then closes the context.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = AppContext::open(config).await?;
    let app = router(&ctx);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    println!("Search server listening on http://{}", bind_addr);
    println!("  MCP endpoint: http://{}/mcp", bind_addr);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    tracing::info!("shutting down");
    ctx.close().await;
    Ok(result?)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
    }
}

/// A body that is not valid JSON for the endpoint is the caller's fault.
fn rejected(rejection: JsonRejection) -> AppError {
    bad_request(rejection.body_text())
}

/// Map a core error to a response. Anything that is not the caller's fault
/// becomes a 500 carrying `fallback_code` and the error message.
fn classify(err: IngestError, fallback_code: &str, context: &str) -> AppError {
    match err {
        IngestError::InvalidArgument(msg) => bad_request(msg),
        IngestError::NotFound(msg) => not_found(msg),
        e @ IngestError::Timeout { .. } => timeout_error(e.to_string()),
        e => {
            tracing::error!(error = %e, code = e.code(), "{} failed", context);
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: fallback_code.to_string(),
                message: format!("An error occurred while {}: {}", context, e),
            }
        }
    }
}

// ============ POST /internal_search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    top_k: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<ChunkResult>,
}

async fn handle_internal_search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = payload.map_err(rejected)?;
    let top_k = req.top_k.unwrap_or(state.default_top_k);
    let hits = state
        .retriever
        .search(&req.query, top_k)
        .await
        .map_err(|e| classify(e, "search_failed", "searching documents"))?;

    Ok(Json(SearchResponse {
        results: hits.into_iter().map(ChunkResult::from).collect(),
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Tools ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo::of(t.as_ref()))
        .collect();
    Json(ToolListResponse { tools })
}

/// Dispatch `POST /tools/{name}` and wrap the tool output in `{"result": ...}`.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(params) = payload.map_err(rejected)?;
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    if !params.is_object() {
        return Err(bad_request("tool parameters must be a JSON object"));
    }

    let result = tool
        .execute(params, &state.tool_ctx)
        .await
        .map_err(|e| classify(e, "tool_error", &format!("running tool {}", name)))?;

    Ok(Json(serde_json::json!({ "result": result })))
}
