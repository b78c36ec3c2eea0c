//! Immutable routing snapshot of a single randomizer.

use std::collections::HashSet;

use crate::error::PublishError;
use crate::model::{BotId, Membership, Mode, RandomizerConfig, RandomizerId};

/// Which pool of a randomizer served a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Primary,
    Reserve,
}

impl PoolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolKind::Primary => "primary",
            PoolKind::Reserve => "reserve",
        }
    }
}

/// A bot inside a pool, with the fields needed for selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMember {
    pub bot_id: BotId,
    pub weight: u32,
    pub sort_order: i32,
}

/// Ordered pool of bots with its cumulative weight table.
///
/// Members are sorted by `sort_order`, then `bot_id`. `cumulative[i]` is the
/// sum of weights of members `0..=i`, built once per snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pool {
    members: Vec<PoolMember>,
    cumulative: Vec<u64>,
}

impl Pool {
    pub fn new(mut members: Vec<PoolMember>) -> Self {
        members.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.bot_id.cmp(&b.bot_id))
        });

        let cumulative = members
            .iter()
            .scan(0u64, |acc, m| {
                *acc += u64::from(m.weight);
                Some(*acc)
            })
            .collect();

        Self {
            members,
            cumulative,
        }
    }

    pub fn members(&self) -> &[PoolMember] {
        &self.members
    }

    pub fn cumulative(&self) -> &[u64] {
        &self.cumulative
    }

    pub fn total_weight(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Point-in-time, versioned view of a randomizer used for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingSnapshot {
    pub id: RandomizerId,
    pub slug: String,
    pub version: u64,
    pub mode: Mode,
    pub active: bool,
    pub cloaker_enabled: bool,
    pub primary: Pool,
    pub reserve: Pool,
}

impl RoutingSnapshot {
    /// Builds a snapshot from a published configuration.
    ///
    /// Rejects an empty slug and duplicate bot memberships.
    pub fn build(config: RandomizerConfig) -> Result<Self, PublishError> {
        if config.slug.trim().is_empty() {
            return Err(PublishError::EmptySlug(config.id));
        }

        let mut seen = HashSet::with_capacity(config.members.len());
        for member in &config.members {
            if !seen.insert(&member.bot_id) {
                return Err(PublishError::DuplicateMember {
                    id: config.id.clone(),
                    bot_id: member.bot_id.clone(),
                });
            }
        }

        let (reserve, primary): (Vec<_>, Vec<_>) =
            config.members.into_iter().partition(|m| m.is_reserve);
        let to_pool = |members: Vec<Membership>| {
            Pool::new(
                members
                    .into_iter()
                    .map(|m| PoolMember {
                        bot_id: m.bot_id,
                        weight: m.weight,
                        sort_order: m.sort_order,
                    })
                    .collect(),
            )
        };

        Ok(Self {
            id: config.id,
            slug: config.slug,
            version: config.version,
            mode: config.mode,
            active: config.active,
            cloaker_enabled: config.cloaker_enabled,
            primary: to_pool(primary),
            reserve: to_pool(reserve),
        })
    }

    pub fn pool(&self, kind: PoolKind) -> &Pool {
        match kind {
            PoolKind::Primary => &self.primary,
            PoolKind::Reserve => &self.reserve,
        }
    }

    /// Total number of memberships across both pools.
    pub fn member_count(&self) -> usize {
        self.primary.len() + self.reserve.len()
    }
}
