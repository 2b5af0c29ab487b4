//! Ordering of a group's members for rank lookups and leaderboards.
//!
//! Members are ordered by score, highest first; equal scores fall back to creation order
//! (`seq`), earliest first. The comparator is a total order, so any two calls over the same
//! snapshot agree.

use std::cmp::Ordering;

use crate::db::prelude::{Member, UserId};

pub struct RankCalculator;

impl RankCalculator {
    pub fn compare(a: &Member, b: &Member) -> Ordering {
        b.score.total_cmp(&a.score).then(a.seq.cmp(&b.seq))
    }

    /// 1-based position of `user_id`, or `None` if they have no entry in `members`.
    pub fn rank_of(members: &[Member], user_id: UserId) -> Option<usize> {
        let target = members.iter().find(|m| m.user_id == user_id)?;

        let ahead = members
            .iter()
            .filter(|m| Self::compare(m, target) == Ordering::Less)
            .count();

        Some(ahead + 1)
    }

    pub fn top_n(members: &[Member], n: usize) -> Vec<Member> {
        let mut ordered = members.to_vec();
        ordered.sort_by(Self::compare);
        ordered.truncate(n);

        ordered
    }
}
