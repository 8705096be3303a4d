//! Error taxonomy shared by the router, the store and the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChatError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Not allowed: {0}")]
    AuthorizationDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Recall window has elapsed for message {0}")]
    RecallWindowElapsed(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        ChatError::AuthorizationDenied(msg.into())
    }

    /// Message sent to the client in an `error` event.
    pub fn client_message(&self) -> String {
        match self {
            // Handshake failures never leak the underlying reason.
            ChatError::AuthenticationFailure(_) => "Authentication failed".to_string(),
            ChatError::Persistence(_) => "Internal storage error".to_string(),
            other => other.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ChatError::AuthenticationFailure(_) => StatusCode::UNAUTHORIZED,
            ChatError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::RecallWindowElapsed(_) => StatusCode::CONFLICT,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Persistence(err.to_string())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.client_message()
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_hides_reason() {
        let err = ChatError::AuthenticationFailure("token expired at 12:00".into());
        assert_eq!(err.client_message(), "Authentication failed");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ChatError::denied("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ChatError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ChatError::NotFound("m".into()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
