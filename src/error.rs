//! Error types for the proxy.
//!
//! Every failure on the chat-completions path collapses into one generic
//! 500 body for the caller; the underlying cause only goes to the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Upstream error{}: {message}", status_suffix(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: msg.into(),
        }
    }

    pub fn upstream_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            message: msg.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// The single error shape callers ever see from `/v1/chat/completions`.
pub fn internal_error_body() -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": "Internal server error",
            "type": "api_error",
            "code": 500,
        }
    })
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(internal_error_body())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
