use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::db::prelude::*;

#[derive(Debug, Default)]
struct Tables {
    groups: HashMap<GroupId, Group>,
    members: HashMap<MemberKey, Member>,
    next_seq: i64,
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(String::from(
                "memory store marked unavailable",
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    #[instrument(skip(self))]
    async fn upsert_group(&self, group_id: GroupId, display_name: &str) -> StoreResult<Group> {
        self.check_available()?;

        let mut tables = self.tables.write().await;
        let group = tables
            .groups
            .entry(group_id)
            .and_modify(|g| g.display_name = display_name.to_owned())
            .or_insert_with(|| Group::new(group_id, display_name, Utc::now()));

        Ok(group.clone())
    }

    #[instrument(skip(self))]
    async fn upsert_member(&self, key: MemberKey, display_name: &str) -> StoreResult<Member> {
        self.check_available()?;

        let mut tables = self.tables.write().await;
        if !tables.groups.contains_key(&key.group_id) {
            return Err(StoreError::MissingGroup(key.group_id));
        }

        let now = Utc::now();
        if let Some(member) = tables.members.get_mut(&key) {
            member.display_name = display_name.to_owned();
            member.updated_at = now;
            return Ok(member.clone());
        }

        tables.next_seq += 1;
        let member = Member {
            seq: tables.next_seq,
            group_id: key.group_id,
            user_id: key.user_id,
            display_name: display_name.to_owned(),
            score: 0.0,
            cooldown_until: None,
            created_at: now,
            updated_at: now,
        };

        tables.members.insert(key, member.clone());
        tracing::debug!(seq = member.seq, "created member");

        Ok(member)
    }

    #[instrument(skip(self))]
    async fn get_member(&self, key: MemberKey) -> StoreResult<Option<Member>> {
        self.check_available()?;
        Ok(self.tables.read().await.members.get(&key).cloned())
    }

    #[instrument(skip(self, member), fields(key = %member.key()))]
    async fn write_member(&self, member: &Member) -> StoreResult<()> {
        self.check_available()?;

        let mut tables = self.tables.write().await;
        let stored = tables
            .members
            .get_mut(&member.key())
            .ok_or(StoreError::MissingMember(member.key()))?;

        stored.score = member.score;
        stored.cooldown_until = member.cooldown_until;
        stored.updated_at = Utc::now();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn group_members(&self, group_id: GroupId) -> StoreResult<Vec<Member>> {
        self.check_available()?;

        Ok(self
            .tables
            .read()
            .await
            .members
            .values()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    #[instrument(skip(self))]
    async fn member_keys(&self) -> StoreResult<Vec<MemberKey>> {
        self.check_available()?;
        Ok(self.tables.read().await.members.keys().copied().collect())
    }
}
