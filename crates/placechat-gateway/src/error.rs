use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use placechat_core::error::PlacechatError;
use placechat_tools::mcp::McpError;

/// Errors surfaced to HTTP clients before a stream starts.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Tool server unavailable: {0}")]
    ToolServerUnavailable(#[from] McpError),

    #[error("Session error: {0}")]
    Session(#[from] PlacechatError),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ToolServerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ChatError::InvalidRequest("bad".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ChatError::from(McpError::ConnectionClosed).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ChatError::from(PlacechatError::Session("gone".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
