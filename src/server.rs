use crate::config::ProxyConfig;
use crate::error::internal_error_body;
use crate::logging::SharedExchangeLog;
use crate::models::ModelMap;
use crate::proxy::{self, UpstreamClient};
use crate::translate::openai_types::ChatRequest;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Fixed `created` timestamp reported for every listed model.
const MODELS_CREATED: i64 = 1_700_000_000;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub models: ModelMap,
    pub upstream: UpstreamClient,
    pub log: SharedExchangeLog,
}

impl AppState {
    pub fn new(config: ProxyConfig, upstream: UpstreamClient, log: SharedExchangeLog) -> Self {
        Self {
            models: config.model_map(),
            config,
            upstream,
            log,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/v1/chat/completions",
            post(handle_chat_completions).fallback(handle_not_found),
        )
        .route("/health", get(handle_health).fallback(handle_not_found))
        .route("/v1/models", get(handle_models).fallback(handle_not_found))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse request");
            return internal_error();
        }
    };

    tracing::info!(
        model = %req.model,
        streaming = req.stream,
        messages = req.messages.len(),
        "Chat completion request"
    );

    if req.stream {
        handle_streaming(state, &req).await
    } else {
        handle_non_streaming(state, &req).await
    }
}

async fn handle_non_streaming(state: Arc<AppState>, req: &ChatRequest) -> Response {
    match proxy::proxy_non_streaming(req, &state.config, &state.models, &state.upstream, &state.log)
        .await
    {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_streaming(state: Arc<AppState>, req: &ChatRequest) -> Response {
    let sse_stream =
        match proxy::proxy_streaming(req, &state.config, &state.models, &state.upstream, &state.log)
            .await
        {
            Ok(s) => s,
            Err(e) => return e.into_response(),
        };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(sse_stream))
        .unwrap_or_else(|_| internal_error())
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "nim-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "reasoning_display": state.config.features.show_reasoning,
        "thinking_mode": state.config.features.thinking_mode,
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .models
        .names()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "created": MODELS_CREATED,
                "owned_by": "nim-proxy",
            })
        })
        .collect();

    Json(serde_json::json!({ "object": "list", "data": models }))
}

async fn handle_not_found() -> Response {
    let body = serde_json::json!({
        "error": {
            "message": "Not found",
            "type": "invalid_request_error",
            "code": 404,
        }
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(internal_error_body())).into_response()
}
