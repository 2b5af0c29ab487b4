use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct GroupId(pub i64);

/// Base groups table model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub group_id: GroupId,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(group_id: GroupId, display_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            group_id,
            display_name: display_name.to_owned(),
            created_at: now,
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
