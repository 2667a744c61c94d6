//! HTTP-facing error type.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] engine::EngineError),

    #[error(transparent)]
    Database(#[from] db::DbError),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Engine(engine::EngineError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, "invalid_transition")
            }
            Self::Engine(engine::EngineError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            Self::Engine(engine::EngineError::WorkflowRunNotCurrent(_)) => {
                (StatusCode::CONFLICT, "workflow_run_not_current")
            }
            Self::Engine(engine::EngineError::Unauthorized(_)) => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
            Self::Engine(
                engine::EngineError::DuplicateNodeId(_)
                | engine::EngineError::UnknownNodeReference { .. }
                | engine::EngineError::CycleDetected
                | engine::EngineError::Validation(_),
            ) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::Engine(engine::EngineError::Database(inner)) => db_status_and_code(inner),
            Self::Database(inner) => db_status_and_code(inner),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        }
    }
}

fn db_status_and_code(err: &db::DbError) -> (StatusCode, &'static str) {
    match err {
        db::DbError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        db::DbError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        db::DbError::Sqlx(_) | db::DbError::Migration(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "database_unavailable")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        let body = Json(json!({ "code": code, "message": self.to_string(), "details": null }));
        (status, body).into_response()
    }
}
