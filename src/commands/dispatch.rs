use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use super::{Chat, ChatContext, Command, DeltaSource};
use crate::constants::LEADERBOARD_SIZE;
use crate::db::prelude::{GroupId, Member, UserId};
use crate::ledger::{Ledger, LedgerError};

/// What happened, for the transport to put into words.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Greeting {
        in_group: bool,
    },
    Help {
        commands: &'static [&'static str],
    },
    Rolled {
        display_name: String,
        delta: i64,
        score: f64,
        rank: Option<usize>,
    },
    OnCooldown {
        display_name: String,
        until: DateTime<Utc>,
        remaining_secs: i64,
    },
    Leaderboard {
        entries: Vec<LeaderboardEntry>,
    },
    NoRolls,
    Profile {
        display_name: String,
        score: f64,
        rank: usize,
    },
    NoProfile,
    ResetDone {
        count: usize,
    },
    GroupOnly,
    PrivateOnly,
    Unauthorized,
    Unknown,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub position: usize,
    pub user_id: UserId,
    pub display_name: String,
    pub score: f64,
}

impl LeaderboardEntry {
    /// Positions are 1-based; members without a usable name are shown by id.
    pub fn ranked(members: Vec<Member>) -> Vec<Self> {
        members
            .into_iter()
            .enumerate()
            .map(|(idx, m)| LeaderboardEntry {
                position: idx + 1,
                user_id: m.user_id,
                display_name: if m.display_name.trim().is_empty() {
                    m.user_id.to_string()
                } else {
                    m.display_name
                },
                score: m.score,
            })
            .collect()
    }
}

/// Turns a chat command into ledger calls.
///
/// Owns the rules the ledger doesn't know about: which chats a command may be used in, who may
/// reset, and how big a roll is.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ledger: Arc<Ledger>,
    dice: Arc<dyn DeltaSource>,
    admin: Option<UserId>,
}

impl Dispatcher {
    pub fn new(ledger: Arc<Ledger>, dice: Arc<dyn DeltaSource>, admin: Option<UserId>) -> Self {
        Self {
            ledger,
            dice,
            admin,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    #[instrument(skip(self, ctx, now), fields(user_id = ctx.user_id))]
    pub async fn handle(&self, ctx: &ChatContext, text: &str, now: DateTime<Utc>) -> Reply {
        let command = Command::parse(text);
        tracing::debug!(?command, "dispatching command");

        let res = match (command, &ctx.chat) {
            (Command::Start, chat) => Ok(Reply::Greeting {
                in_group: matches!(chat, Chat::Group { .. }),
            }),
            (Command::Help, _) => Ok(Reply::Help {
                commands: Command::ALL,
            }),
            (Command::Unknown, _) => Ok(Reply::Unknown),

            (Command::Random | Command::Top | Command::Profile, Chat::Private { .. }) => {
                Ok(Reply::GroupOnly)
            }
            (Command::Random, Chat::Group { id, title }) => {
                self.roll(GroupId(*id), title, ctx, now).await
            }
            (Command::Top, Chat::Group { id, .. }) => self.leaderboard(GroupId(*id)).await,
            (Command::Profile, Chat::Group { id, .. }) => {
                self.profile(GroupId(*id), UserId(ctx.user_id)).await
            }

            (Command::Reset, Chat::Group { .. }) => Ok(Reply::PrivateOnly),
            (Command::Reset, Chat::Private { .. }) => self.reset(UserId(ctx.user_id)).await,
        };

        res.unwrap_or_else(|e| {
            tracing::error!(error = ?e, ?command, "command failed");
            Reply::Failure
        })
    }

    async fn roll(
        &self,
        group_id: GroupId,
        title: &str,
        ctx: &ChatContext,
        now: DateTime<Utc>,
    ) -> Result<Reply, LedgerError> {
        let user_id = UserId(ctx.user_id);
        self.ledger.get_or_create_group(group_id, title).await?;
        self.ledger
            .get_or_create_member(group_id, user_id, &ctx.display_name)
            .await?;

        let delta = self.dice.draw();
        match self.ledger.apply_delta(group_id, user_id, delta, now).await {
            Ok(roll) => Ok(Reply::Rolled {
                display_name: ctx.display_name.clone(),
                delta: roll.delta,
                score: roll.score,
                rank: roll.rank,
            }),
            Err(LedgerError::OnCooldown { until, remaining }) => Ok(Reply::OnCooldown {
                display_name: ctx.display_name.clone(),
                until,
                remaining_secs: remaining.num_seconds(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn leaderboard(&self, group_id: GroupId) -> Result<Reply, LedgerError> {
        let top = self.ledger.top(group_id, LEADERBOARD_SIZE).await?;
        if top.is_empty() {
            return Ok(Reply::NoRolls);
        }

        Ok(Reply::Leaderboard {
            entries: LeaderboardEntry::ranked(top),
        })
    }

    async fn profile(&self, group_id: GroupId, user_id: UserId) -> Result<Reply, LedgerError> {
        match self.ledger.profile(group_id, user_id).await {
            Ok(profile) => Ok(Reply::Profile {
                display_name: profile.member.display_name,
                score: profile.member.score,
                rank: profile.rank,
            }),
            Err(LedgerError::NotFound { .. }) => Ok(Reply::NoProfile),
            Err(e) => Err(e),
        }
    }

    async fn reset(&self, caller: UserId) -> Result<Reply, LedgerError> {
        if self.admin != Some(caller) {
            tracing::warn!(%caller, "unauthorized reset attempt");
            return Ok(Reply::Unauthorized);
        }

        let count = self.ledger.reset_all().await?;
        Ok(Reply::ResetDone { count })
    }
}
