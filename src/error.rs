//! Error taxonomy shared by the aggregation pipeline, the sentiment workflow
//! and the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("{0}")]
    Validation(String),

    #[error("Malformed record: missing required field '{field}'")]
    MalformedRecord { field: &'static str },

    #[error("{0}")]
    ExternalCall(String),

    #[error("Failed to parse LLM response: {0}")]
    ScoreParse(String),

    #[error("LLM response missing required 'score' field")]
    MissingScoreField,

    #[error("Score must be a number between 1-100, got: {0}")]
    ScoreOutOfRange(String),

    #[error("Request timeout: {0}")]
    RequestTimeout(String),

    #[error("Sentiment analysis already in progress for thread {0}")]
    AnalysisInFlight(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl DashboardError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalCall(msg.into())
    }

    pub fn score_parse(msg: impl Into<String>) -> Self {
        Self::ScoreParse(msg.into())
    }

    pub fn out_of_range(value: impl ToString) -> Self {
        Self::ScoreOutOfRange(value.to_string())
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::RequestTimeout(what.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::MalformedRecord { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AnalysisInFlight(_) => StatusCode::CONFLICT,
            Self::RequestTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ExternalCall(_)
            | Self::ScoreParse(_)
            | Self::MissingScoreField
            | Self::ScoreOutOfRange(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
