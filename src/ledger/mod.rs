//! Scores, cooldowns and ranks for every member of every group.
//!
//! All reads and writes go through the injected [`Store`]. Anything that reads a member and then
//! writes it back (a roll, a reset, the daily cooldown clear) holds that member's lock for the
//! whole read-decide-write sequence, so two of them can never interleave on the same row.
//! Different members never contend.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::constants::COOLDOWN_HOURS;
use crate::db::prelude::*;

pub mod error;
pub mod rank;

pub use error::{LedgerError, LedgerResult};
pub use rank::RankCalculator;

/// Outcome of an accepted roll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Roll {
    pub delta: i64,
    pub score: f64,
    pub cooldown_until: DateTime<Utc>,
    /// `None` only when the roll was stored but the follow-up leaderboard read failed.
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub member: Member,
    pub rank: usize,
}

#[derive(Debug)]
pub struct Ledger {
    store: Arc<dyn Store>,
    locks: DashMap<MemberKey, Arc<Mutex<()>>>,
    cooldown: Duration,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            cooldown: Duration::hours(COOLDOWN_HOURS),
        }
    }

    /// Entries are never evicted; members are never deleted either, so the table is bounded by
    /// the member count.
    fn lock_for(&self, key: MemberKey) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(key).or_default())
    }

    #[instrument(skip(self))]
    pub async fn get_or_create_group(
        &self,
        group_id: GroupId,
        display_name: &str,
    ) -> LedgerResult<Group> {
        Ok(self.store.upsert_group(group_id, display_name).await?)
    }

    /// Only the display name is written here, never score or cooldown, so no member lock is
    /// taken.
    #[instrument(skip(self))]
    pub async fn get_or_create_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        display_name: &str,
    ) -> LedgerResult<Member> {
        let key = MemberKey::new(group_id, user_id);
        Ok(self.store.upsert_member(key, display_name).await?)
    }

    /// Adds `delta` to the member's score and starts a new cooldown window at `now`.
    ///
    /// Rejected with [`LedgerError::OnCooldown`] (and nothing written) while `now` is still
    /// before the member's `cooldown_until`.
    #[instrument(skip(self, now))]
    pub async fn apply_delta(
        &self,
        group_id: GroupId,
        user_id: UserId,
        delta: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<Roll> {
        let key = MemberKey::new(group_id, user_id);
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let mut member = self
            .store
            .get_member(key)
            .await?
            .ok_or(LedgerError::NotFound { group_id, user_id })?;

        if !member.is_eligible(now)
            && let Some(until) = member.cooldown_until
        {
            tracing::debug!(%until, "roll rejected, member on cooldown");
            return Err(LedgerError::OnCooldown {
                until,
                remaining: until - now,
            });
        }

        let cooldown_until = now + self.cooldown;
        member.score += delta as f64;
        member.cooldown_until = Some(cooldown_until);
        self.store.write_member(&member).await?;

        let rank = match self.store.group_members(group_id).await {
            Ok(members) => RankCalculator::rank_of(&members, user_id),
            Err(e) => {
                tracing::error!(error = ?e, "roll stored but rank lookup failed");
                None
            }
        };

        tracing::info!(score = member.score, ?rank, "roll applied");

        Ok(Roll {
            delta,
            score: member.score,
            cooldown_until,
            rank,
        })
    }

    /// Zeroes every score and clears every cooldown, in every group.
    #[instrument(skip(self))]
    pub async fn reset_all(&self) -> LedgerResult<usize> {
        let touched = self
            .rewrite_each(|member| {
                member.score = 0.0;
                member.cooldown_until = None;
            })
            .await?;

        tracing::info!(touched, "all scores and cooldowns reset");
        Ok(touched)
    }

    /// Makes every member eligible to roll again; scores are left alone.
    #[instrument(skip(self))]
    pub async fn clear_all_cooldowns(&self) -> LedgerResult<usize> {
        let touched = self
            .rewrite_each(|member| member.cooldown_until = None)
            .await?;

        tracing::info!(touched, "all cooldowns cleared");
        Ok(touched)
    }

    /// Applies `f` to every member, one row at a time under that row's lock.
    ///
    /// A store failure stops the sweep: rows already rewritten stay rewritten, the rest are left
    /// untouched.
    async fn rewrite_each<F>(&self, f: F) -> LedgerResult<usize>
    where
        F: Fn(&mut Member),
    {
        let keys = self.store.member_keys().await?;
        let mut touched = 0;

        for key in keys {
            let lock = self.lock_for(key);
            let _guard = lock.lock().await;

            let Some(mut member) = self.store.get_member(key).await? else {
                continue;
            };

            f(&mut member);
            self.store.write_member(&member).await?;
            touched += 1;
        }

        Ok(touched)
    }

    #[instrument(skip(self))]
    pub async fn rank_of(&self, group_id: GroupId, user_id: UserId) -> LedgerResult<usize> {
        let members = self.store.group_members(group_id).await?;
        RankCalculator::rank_of(&members, user_id).ok_or(LedgerError::NotFound { group_id, user_id })
    }

    /// The `n` best members of the group, best first. Empty for a group nobody has rolled in.
    #[instrument(skip(self))]
    pub async fn top(&self, group_id: GroupId, n: usize) -> LedgerResult<Vec<Member>> {
        let members = self.store.group_members(group_id).await?;
        Ok(RankCalculator::top_n(&members, n))
    }

    #[instrument(skip(self))]
    pub async fn profile(&self, group_id: GroupId, user_id: UserId) -> LedgerResult<Profile> {
        let members = self.store.group_members(group_id).await?;
        let rank = RankCalculator::rank_of(&members, user_id)
            .ok_or(LedgerError::NotFound { group_id, user_id })?;

        let member = members
            .into_iter()
            .find(|m| m.user_id == user_id)
            .ok_or(LedgerError::NotFound { group_id, user_id })?;

        Ok(Profile { member, rank })
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    const GROUP: GroupId = GroupId(-1001);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 1, 9, 30, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Ledger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone());
        (store, ledger)
    }

    async fn join(ledger: &Ledger, group: GroupId, user: i64) -> Member {
        ledger.get_or_create_group(group, "test chat").await.unwrap();
        ledger
            .get_or_create_member(group, UserId(user), &format!("user{user}"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_roll_cooldown_roll() {
        let (_, ledger) = setup();
        let fresh = join(&ledger, GROUP, 1).await;
        assert_eq!(fresh.score, 0.0);
        assert_eq!(fresh.cooldown_until, None);

        let roll = ledger.apply_delta(GROUP, UserId(1), 7, t0()).await.unwrap();
        assert_eq!(roll.score, 7.0);
        assert_eq!(roll.cooldown_until, t0() + Duration::hours(24));
        assert_eq!(roll.rank, Some(1));

        let early = ledger
            .apply_delta(GROUP, UserId(1), 5, t0() + Duration::hours(1))
            .await;
        match early {
            Err(LedgerError::OnCooldown { until, remaining }) => {
                assert_eq!(until, t0() + Duration::hours(24));
                assert_eq!(remaining, Duration::hours(23));
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
        assert_eq!(ledger.profile(GROUP, UserId(1)).await.unwrap().member.score, 7.0);

        let later = ledger
            .apply_delta(GROUP, UserId(1), -3, t0() + Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(later.score, 4.0);
        assert_eq!(later.cooldown_until, t0() + Duration::hours(49));
    }

    #[tokio::test]
    async fn test_roll_exactly_at_expiry_is_accepted() {
        let (_, ledger) = setup();
        join(&ledger, GROUP, 1).await;

        ledger.apply_delta(GROUP, UserId(1), 1, t0()).await.unwrap();
        let res = ledger
            .apply_delta(GROUP, UserId(1), 1, t0() + Duration::hours(24))
            .await;

        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_roll_without_member_is_not_found() {
        let (_, ledger) = setup();
        ledger.get_or_create_group(GROUP, "test chat").await.unwrap();

        let res = ledger.apply_delta(GROUP, UserId(5), 3, t0()).await;
        assert!(matches!(res, Err(LedgerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_rank_reflects_other_members() {
        let (_, ledger) = setup();
        for user in 1..=3 {
            join(&ledger, GROUP, user).await;
        }

        ledger.apply_delta(GROUP, UserId(1), 10, t0()).await.unwrap();
        ledger.apply_delta(GROUP, UserId(2), 10, t0()).await.unwrap();
        let third = ledger.apply_delta(GROUP, UserId(3), 5, t0()).await.unwrap();

        assert_eq!(third.rank, Some(3));
        let top: Vec<_> = ledger
            .top(GROUP, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        assert_eq!(top, vec![UserId(1), UserId(2)]);
        assert_eq!(ledger.rank_of(GROUP, UserId(2)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let (_, ledger) = setup();
        let other = GroupId(-2002);
        join(&ledger, GROUP, 1).await;
        join(&ledger, other, 1).await;

        ledger.apply_delta(GROUP, UserId(1), 9, t0()).await.unwrap();
        let roll = ledger.apply_delta(other, UserId(1), -2, t0()).await.unwrap();

        assert_eq!(roll.score, -2.0);
        assert_eq!(ledger.profile(GROUP, UserId(1)).await.unwrap().member.score, 9.0);
    }

    #[tokio::test]
    async fn test_unknown_member_lookups() {
        let (_, ledger) = setup();

        assert!(matches!(
            ledger.rank_of(GROUP, UserId(1)).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.profile(GROUP, UserId(1)).await,
            Err(LedgerError::NotFound { .. })
        ));
        assert!(ledger.top(GROUP, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_cooldowns_keeps_scores() {
        let (_, ledger) = setup();
        join(&ledger, GROUP, 1).await;
        join(&ledger, GROUP, 2).await;
        ledger.apply_delta(GROUP, UserId(1), 6, t0()).await.unwrap();

        let cleared = ledger.clear_all_cooldowns().await.unwrap();
        assert_eq!(cleared, 2);

        let next = ledger
            .apply_delta(GROUP, UserId(1), 0, t0() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(next.score, 6.0);
    }

    #[tokio::test]
    async fn test_reset_all_spans_groups() {
        let (store, ledger) = setup();
        let other = GroupId(-2002);
        join(&ledger, GROUP, 1).await;
        join(&ledger, other, 2).await;
        ledger.apply_delta(GROUP, UserId(1), 4, t0()).await.unwrap();
        ledger.apply_delta(other, UserId(2), -8, t0()).await.unwrap();

        assert_eq!(ledger.reset_all().await.unwrap(), 2);

        for key in store.member_keys().await.unwrap() {
            let member = store.get_member(key).await.unwrap().unwrap();
            assert_eq!(member.score, 0.0);
            assert_eq!(member.cooldown_until, None);
        }
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_and_mutates_nothing() {
        let (store, ledger) = setup();
        join(&ledger, GROUP, 1).await;

        store.set_unavailable(true);
        let res = ledger.apply_delta(GROUP, UserId(1), 5, t0()).await;
        assert!(matches!(res, Err(LedgerError::Persistence(_))));
        assert!(matches!(
            ledger.clear_all_cooldowns().await,
            Err(LedgerError::Persistence(_))
        ));

        store.set_unavailable(false);
        let member = ledger.profile(GROUP, UserId(1)).await.unwrap().member;
        assert_eq!(member.score, 0.0);
        assert_eq!(member.cooldown_until, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rolls_apply_once() {
        let (_, ledger) = setup();
        join(&ledger, GROUP, 1).await;
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.apply_delta(GROUP, UserId(1), 3, t0()).await })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(LedgerError::OnCooldown { .. }) => (),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(ledger.profile(GROUP, UserId(1)).await.unwrap().member.score, 3.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reset_racing_rolls_leaves_whole_rows() {
        let (store, ledger) = setup();
        for user in 1..=50 {
            join(&ledger, GROUP, user).await;
        }
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for user in 1..=50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                _ = ledger.apply_delta(GROUP, UserId(user), 3, t0()).await;
            }));
        }

        let resetter = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.reset_all().await.unwrap() })
        };

        for handle in handles {
            handle.await.unwrap();
        }
        resetter.await.unwrap();

        for key in store.member_keys().await.unwrap() {
            let m = store.get_member(key).await.unwrap().unwrap();
            let rolled_after_reset = m.score == 3.0 && m.cooldown_until.is_some();
            let reset_after_roll = m.score == 0.0 && m.cooldown_until.is_none();
            assert!(rolled_after_reset || reset_after_roll, "half-applied row: {m:?}");
        }
    }
}
