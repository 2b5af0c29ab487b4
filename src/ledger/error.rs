use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::db::prelude::{GroupId, StoreError, UserId};

pub type LedgerResult<T> = core::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Expected and frequent: the member already rolled this window.
    #[error("on cooldown until {until} ({} seconds remaining)", .remaining.num_seconds())]
    OnCooldown {
        until: DateTime<Utc>,
        remaining: Duration,
    },

    #[error("no member record for user {user_id} in group {group_id}")]
    NotFound { group_id: GroupId, user_id: UserId },

    #[error(transparent)]
    Persistence(#[from] StoreError),
}
