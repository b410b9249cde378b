//! `POST /vote`

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use sb_core::error::AppError;
use sb_core::models::Direction;
use sb_core::voting::VoteCommand;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::identity::Caller;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub success: bool,
    pub new_score: i64,
    /// The caller's vote after the transition; `null` once toggled off
    pub user_vote_status: Option<Direction>,
}

/// Applies one vote transition and pushes the new numbers to live clients.
pub async fn cast_vote(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<VoteResponse>, ApiError> {
    let Json(body) = body.map_err(|e| {
        AppError::ValidationError(format!("invalid vote body: {}", e.body_text()))
    })?;
    let command = VoteCommand::from_json(&body)?;
    let voter = caller.require_alias()?;

    let outcome = state.repo.cast_vote(command, voter).await?;
    state.notifier.publish_vote(&outcome);

    Ok(Json(VoteResponse {
        success: true,
        new_score: outcome.new_score,
        user_vote_status: outcome.state,
    }))
}
