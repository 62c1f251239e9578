use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const TOKEN_EXPIRED_HEADER: &str = "token-expired";

/// Body of every error answered by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub slug: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// A client mistake the caller can fix, answered with its slug
    #[error("{message}")]
    BadRequest { slug: &'static str, message: String },

    #[error("missing or malformed authorization header")]
    MissingCredentials,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    TokenExpired,

    #[error("user not found")]
    UserNotFound,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(slug: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            slug,
            message: message.into(),
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            ApiError::BadRequest { slug, .. } => slug,
            ApiError::MissingCredentials => "missing_credentials",
            ApiError::InvalidToken => "invalid_token",
            ApiError::TokenExpired => "token_expired",
            ApiError::UserNotFound => "user_not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let slug = self.slug().to_owned();
        match self {
            ApiError::BadRequest { .. } => {
                metrics::counter!("api_bad_request", "slug" => slug.clone()).increment(1);
                error_response(StatusCode::BAD_REQUEST, slug, self.to_string())
            }
            ApiError::MissingCredentials | ApiError::InvalidToken => {
                error_response(StatusCode::UNAUTHORIZED, slug, self.to_string())
            }
            ApiError::TokenExpired => {
                let mut response =
                    error_response(StatusCode::UNAUTHORIZED, slug, self.to_string());
                response
                    .headers_mut()
                    .insert(TOKEN_EXPIRED_HEADER, HeaderValue::from_static("true"));
                response
            }
            ApiError::UserNotFound => error_response(StatusCode::NOT_FOUND, slug, self.to_string()),
            ApiError::Internal(e) => {
                // the full error stays in our logs, the caller only gets the reference
                let trace_id = Uuid::now_v7().to_string();
                error!(trace_id, "unhandled api error: {:#}", e);
                metrics::counter!("api_error").increment(1);

                let mut response = error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    slug,
                    format!("internal error, reference {trace_id}"),
                );
                if let Ok(value) = HeaderValue::from_str(&trace_id) {
                    response.headers_mut().insert(TRACE_ID_HEADER, value);
                }
                response
            }
        }
    }
}

fn error_response(status: StatusCode, slug: String, message: String) -> Response {
    (status, Json(ErrorResponse { slug, message })).into_response()
}
