use core::fmt;

use async_trait::async_trait;

use crate::db::prelude::{Group, GroupId, Member, MemberKey, StoreResult};

pub mod memory;
pub mod postgres;

/// Create/read/update access to groups and members.
///
/// Implementations only guarantee that each call is atomic for the row(s) it touches. Anything
/// spanning more than one call (read a member, decide, write it back) is serialized by the
/// ledger, not here.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    /// Inserts the group, or refreshes its display name if it already exists.
    async fn upsert_group(&self, group_id: GroupId, display_name: &str) -> StoreResult<Group>;

    /// Inserts a fresh member (score 0, no cooldown) or overwrites the display name of the
    /// existing one. Fails with [`MissingGroup`] when the group was never created.
    ///
    /// [`MissingGroup`]: crate::db::StoreError::MissingGroup
    async fn upsert_member(&self, key: MemberKey, display_name: &str) -> StoreResult<Member>;

    async fn get_member(&self, key: MemberKey) -> StoreResult<Option<Member>>;

    /// Persists `score` and `cooldown_until` of an existing member in a single row write.
    async fn write_member(&self, member: &Member) -> StoreResult<()>;

    /// All members of a group, in no particular order.
    async fn group_members(&self, group_id: GroupId) -> StoreResult<Vec<Member>>;

    /// Keys of every member across every group.
    async fn member_keys(&self) -> StoreResult<Vec<MemberKey>>;
}
