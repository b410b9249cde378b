//! HTTP mapping of `AppError`.
//!
//! JSON endpoints answer with `{ "success": false, "code": ..., "message": ... }`.
//! Page endpoints never surface raw errors; they flash [`notice_text`] and redirect.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sb_core::error::AppError;
use serde_json::json;

const GENERIC_FAILURE: &str = "Something went wrong, please try again";

/// Wrapper that lets handlers return `Result<_, ApiError>` and use `?` on
/// anything producing an `AppError`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_)
            | AppError::InvalidItemType(_)
            | AppError::InvalidItemId
            | AppError::InvalidVoteType(_) => StatusCode::BAD_REQUEST,
            AppError::NoIdentity => StatusCode::UNAUTHORIZED,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::IdentityExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match &self.0 {
            AppError::NotFound(..) => "NOT_FOUND",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::InvalidItemType(_) => "INVALID_ITEM_TYPE",
            AppError::InvalidItemId => "INVALID_ITEM_ID",
            AppError::InvalidVoteType(_) => "INVALID_VOTE_TYPE",
            AppError::NoIdentity => "NO_IDENTITY",
            AppError::IdentityExhausted(_) => "IDENTITY_EXHAUSTED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// User-facing text for an error. Server-side details stay in the logs.
pub fn notice_text(err: &AppError) -> String {
    match err {
        AppError::NotFound(kind, _) => format!("{kind} not found"),
        AppError::ValidationError(msg) | AppError::Unauthorized(msg) => msg.clone(),
        AppError::InvalidItemType(_) => "Invalid item type".into(),
        AppError::InvalidItemId => "Invalid item ID".into(),
        AppError::InvalidVoteType(_) => "Invalid vote type".into(),
        AppError::NoIdentity => "No valid identity for this session".into(),
        AppError::Conflict(_) | AppError::IdentityExhausted(_) | AppError::Internal(_) => {
            GENERIC_FAILURE.into()
        }
    }
}

/// Logs at a level matching who caused the failure.
pub fn log_error(err: &AppError) {
    if err.is_server_error() {
        tracing::error!(error = %err, "request failed");
    } else {
        tracing::debug!(error = %err, "request rejected");
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log_error(&self.0);
        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "code": self.error_code(),
            "message": notice_text(&self.0),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_failures_hide_details() {
        let err = AppError::Internal("disk on fire at /var/db".into());
        assert_eq!(notice_text(&err), GENERIC_FAILURE);
        assert_eq!(ApiError(err).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn vote_rejections_are_distinct() {
        let codes = [
            ApiError(AppError::InvalidItemType("poll".into())).error_code(),
            ApiError(AppError::InvalidItemId).error_code(),
            ApiError(AppError::InvalidVoteType("sideways".into())).error_code(),
            ApiError(AppError::NoIdentity).error_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
