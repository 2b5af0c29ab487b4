use async_trait::async_trait;
use sqlx::{PgPool, Result as SqlxResult};
use tracing::instrument;

use crate::db::prelude::*;

pub mod sql_fragment {
    pub const GROUP_FIELDS: &str = r#"
        group_id,
        display_name,
        created_at
    "#;

    pub const MEMBER_FIELDS: &str = r#"
        seq,
        group_id,
        user_id,
        display_name,
        score,
        cooldown_until,
        created_at,
        updated_at
    "#;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn upsert_group(&self, group_id: GroupId, display_name: &str) -> StoreResult<Group> {
        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            INSERT INTO groups (group_id, display_name, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (group_id)
            DO UPDATE SET display_name = EXCLUDED.display_name
            RETURNING {}
            "#,
            sql_fragment::GROUP_FIELDS
        ))
        .bind(group_id)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await;

        match group {
            Ok(g) => Ok(g),
            Err(e) => {
                tracing::error!(error = ?e, "failure during group upsert");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn upsert_member(&self, key: MemberKey, display_name: &str) -> StoreResult<Member> {
        let member: SqlxResult<Member> = sqlx::query_as::<_, Member>(&format!(
            r#"
            INSERT INTO members (
                group_id,
                user_id,
                display_name,
                score,
                cooldown_until,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, 0, NULL, NOW(), NOW())
            ON CONFLICT (group_id, user_id)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                updated_at = NOW()
            RETURNING {}
            "#,
            sql_fragment::MEMBER_FIELDS
        ))
        .bind(key.group_id)
        .bind(key.user_id)
        .bind(display_name)
        .fetch_one(&self.pool)
        .await;

        match member {
            Ok(m) => Ok(m),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StoreError::MissingGroup(key.group_id))
            }
            Err(e) => {
                tracing::error!(error = ?e, "failure during member upsert");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_member(&self, key: MemberKey) -> StoreResult<Option<Member>> {
        Ok(sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE group_id = $1 AND user_id = $2",
            sql_fragment::MEMBER_FIELDS
        ))
        .bind(key.group_id)
        .bind(key.user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self, member), fields(key = %member.key()))]
    async fn write_member(&self, member: &Member) -> StoreResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE members
            SET score = $3,
                cooldown_until = $4,
                updated_at = NOW()
            WHERE group_id = $1
            AND user_id = $2
            "#,
        )
        .bind(member.group_id)
        .bind(member.user_id)
        .bind(member.score)
        .bind(member.cooldown_until)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::MissingMember(member.key())),
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(error = ?e, "failure during member write");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn group_members(&self, group_id: GroupId) -> StoreResult<Vec<Member>> {
        Ok(sqlx::query_as::<_, Member>(&format!(
            r#"
            SELECT {} FROM members
            WHERE group_id = $1
            ORDER BY score DESC, seq ASC
            "#,
            sql_fragment::MEMBER_FIELDS
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn member_keys(&self) -> StoreResult<Vec<MemberKey>> {
        let rows: Vec<(GroupId, UserId)> =
            sqlx::query_as("SELECT group_id, user_id FROM members ORDER BY seq ASC")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(group_id, user_id)| MemberKey::new(group_id, user_id))
            .collect())
    }
}
