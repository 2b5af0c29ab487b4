use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::server::{AppState, JsonResult};
use crate::commands::{ChatContext, LeaderboardEntry, Reply};
use crate::constants::{LEADERBOARD_MAX, LEADERBOARD_SIZE};
use crate::db::prelude::{GroupId, UserId};
use crate::ledger::Profile;

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(flatten)]
    pub context: ChatContext,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<usize>,
}

impl LeaderboardParams {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(LEADERBOARD_SIZE).min(LEADERBOARD_MAX)
    }
}

#[derive(Debug, Serialize)]
pub struct Cleared {
    pub cleared: usize,
}

/// Entry point for the chat transport: one message in, one reply out.
#[instrument(skip_all, fields(user_id = req.context.user_id))]
pub async fn post_command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommandRequest>,
) -> Json<Reply> {
    let reply = state
        .dispatcher
        .handle(&req.context, &req.text, Utc::now())
        .await;

    Json(reply)
}

#[instrument(skip(state))]
pub async fn group_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
    Query(params): Query<LeaderboardParams>,
) -> JsonResult<Vec<LeaderboardEntry>> {
    let top = state
        .dispatcher
        .ledger()
        .top(GroupId(group_id), params.limit())
        .await?;

    Ok(Json(LeaderboardEntry::ranked(top)))
}

#[instrument(skip(state))]
pub async fn member_profile(
    State(state): State<Arc<AppState>>,
    Path((group_id, user_id)): Path<(i64, i64)>,
) -> JsonResult<Profile> {
    let profile = state
        .dispatcher
        .ledger()
        .profile(GroupId(group_id), UserId(user_id))
        .await?;

    Ok(Json(profile))
}

/// Runs the daily cooldown clear right now.
#[instrument(skip(state))]
pub async fn clear_cooldowns(State(state): State<Arc<AppState>>) -> JsonResult<Cleared> {
    let cleared = state.dispatcher.ledger().clear_all_cooldowns().await?;
    tracing::info!(cleared, "manual cooldown clear finished");

    Ok(Json(Cleared { cleared }))
}
