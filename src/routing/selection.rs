//! Bot selection within a randomizer's pools.
//!
//! Primary pool first, reserve pool only when no primary bot is eligible.
//! Within a pool, `random` mode picks uniformly and `weighted` mode picks
//! proportionally to the configured weights. The random source is passed in
//! so a seeded generator reproduces the same sequence of choices.

use rand::Rng;

use crate::model::{BotId, Mode};
use crate::store::{Pool, PoolKind, PoolMember, RoutingSnapshot};

/// A successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected {
    pub bot_id: BotId,
    pub pool: PoolKind,
}

/// Selects one eligible bot, falling back to the reserve pool.
///
/// Returns `None` when neither pool has an eligible bot.
pub fn select<R, F>(snapshot: &RoutingSnapshot, is_eligible: F, rng: &mut R) -> Option<Selected>
where
    R: Rng + ?Sized,
    F: Fn(&BotId) -> bool,
{
    [PoolKind::Primary, PoolKind::Reserve]
        .into_iter()
        .find_map(|kind| {
            pick_from_pool(snapshot.pool(kind), snapshot.mode, &is_eligible, rng).map(|member| {
                Selected {
                    bot_id: member.bot_id.clone(),
                    pool: kind,
                }
            })
        })
}

/// Picks one eligible member of a single pool.
pub fn pick_from_pool<'a, R, F>(
    pool: &'a Pool,
    mode: Mode,
    is_eligible: &F,
    rng: &mut R,
) -> Option<&'a PoolMember>
where
    R: Rng + ?Sized,
    F: Fn(&BotId) -> bool,
{
    let members = pool.members();
    let eligible: Vec<usize> = members
        .iter()
        .enumerate()
        .filter(|(_, m)| is_eligible(&m.bot_id))
        .map(|(i, _)| i)
        .collect();

    if eligible.is_empty() {
        return None;
    }

    let idx = match mode {
        Mode::Random => uniform(&eligible, rng),
        Mode::Weighted if eligible.len() == members.len() => {
            // Whole pool eligible: search the precomputed table.
            let total = pool.total_weight();
            if total == 0 {
                uniform(&eligible, rng)
            } else {
                let draw = rng.gen_range(0..total);
                pool.cumulative().partition_point(|&c| c <= draw)
            }
        }
        Mode::Weighted => {
            let total: u64 = eligible
                .iter()
                .map(|&i| u64::from(members[i].weight))
                .sum();
            if total == 0 {
                uniform(&eligible, rng)
            } else {
                let draw = rng.gen_range(0..total);
                scan_cumulative(members, &eligible, draw)
            }
        }
    };

    members.get(idx)
}

fn uniform<R: Rng + ?Sized>(eligible: &[usize], rng: &mut R) -> usize {
    eligible[rng.gen_range(0..eligible.len())]
}

/// First eligible member whose running weight exceeds `draw`.
fn scan_cumulative(members: &[PoolMember], eligible: &[usize], draw: u64) -> usize {
    let mut acc = 0u64;
    for &i in eligible {
        acc += u64::from(members[i].weight);
        if acc > draw {
            return i;
        }
    }
    // Unreachable while draw < total; keep the last eligible member.
    eligible[eligible.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::model::{Membership, RandomizerConfig};

    const TRIALS: usize = 20_000;
    const TOLERANCE: f64 = 0.02;

    fn make_snapshot(mode: Mode, members: Vec<(&str, u32, bool)>) -> RoutingSnapshot {
        RoutingSnapshot::build(RandomizerConfig {
            id: "r1".into(),
            slug: "promo".to_string(),
            version: 1,
            mode,
            active: true,
            cloaker_enabled: false,
            members: members
                .into_iter()
                .enumerate()
                .map(|(i, (bot, weight, is_reserve))| Membership {
                    bot_id: bot.into(),
                    weight,
                    is_reserve,
                    sort_order: i as i32,
                })
                .collect(),
        })
        .unwrap()
    }

    fn all_online(_: &BotId) -> bool {
        true
    }

    fn frequencies<F: Fn(&BotId) -> bool>(
        snapshot: &RoutingSnapshot,
        is_eligible: F,
        seed: u64,
    ) -> HashMap<String, f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..TRIALS {
            let selected = select(snapshot, &is_eligible, &mut rng).unwrap();
            *counts.entry(selected.bot_id.to_string()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .map(|(k, v)| (k, v as f64 / TRIALS as f64))
            .collect()
    }

    fn assert_close(actual: Option<&f64>, expected: f64) {
        let actual = actual.copied().unwrap_or(0.0);
        assert!(
            (actual - expected).abs() <= TOLERANCE,
            "frequency {actual} not within {TOLERANCE} of {expected}"
        );
    }

    // ========== Phase 1: Pool fallback ==========

    #[test]
    fn test_single_bot_always_selected() {
        let snapshot = make_snapshot(Mode::Random, vec![("a", 1, false)]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            let selected = select(&snapshot, all_online, &mut rng).unwrap();
            assert_eq!(selected.bot_id.as_str(), "a");
            assert_eq!(selected.pool, PoolKind::Primary);
        }
    }

    #[test]
    fn test_reserve_used_when_primary_ineligible() {
        let snapshot = make_snapshot(
            Mode::Weighted,
            vec![("a", 5, false), ("b", 5, false), ("r1", 1, true), ("r2", 1, true)],
        );
        let online: HashSet<&str> = ["r1", "r2"].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..1_000 {
            let selected = select(&snapshot, |id| online.contains(id.as_str()), &mut rng).unwrap();
            assert_eq!(selected.pool, PoolKind::Reserve);
            assert!(selected.bot_id.as_str().starts_with('r'));
        }
    }

    #[test]
    fn test_primary_preferred_over_reserve() {
        let snapshot = make_snapshot(
            Mode::Random,
            vec![("a", 1, false), ("b", 1, false), ("r1", 100, true)],
        );
        let online: HashSet<&str> = ["b", "r1"].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..500 {
            let selected = select(&snapshot, |id| online.contains(id.as_str()), &mut rng).unwrap();
            assert_eq!(selected.bot_id.as_str(), "b");
        }
    }

    #[test]
    fn test_no_eligible_bot() {
        let snapshot = make_snapshot(Mode::Random, vec![("a", 1, false), ("r", 1, true)]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select(&snapshot, |_| false, &mut rng).is_none());
    }

    #[test]
    fn test_empty_pools() {
        let snapshot = make_snapshot(Mode::Weighted, vec![]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select(&snapshot, all_online, &mut rng).is_none());
    }

    // ========== Phase 2: Distribution ==========

    #[test]
    fn test_random_mode_is_uniform_regardless_of_weight() {
        let snapshot = make_snapshot(
            Mode::Random,
            vec![("a", 1, false), ("b", 50, false), ("c", 0, false), ("d", 9, false)],
        );
        let freq = frequencies(&snapshot, all_online, 42);

        for bot in ["a", "b", "c", "d"] {
            assert_close(freq.get(bot), 0.25);
        }
    }

    #[test]
    fn test_weighted_mode_follows_weights() {
        let snapshot = make_snapshot(
            Mode::Weighted,
            vec![("a", 1, false), ("b", 2, false), ("c", 7, false)],
        );
        let freq = frequencies(&snapshot, all_online, 42);

        assert_close(freq.get("a"), 0.1);
        assert_close(freq.get("b"), 0.2);
        assert_close(freq.get("c"), 0.7);
    }

    #[test]
    fn test_weighted_mode_renormalizes_over_eligible_subset() {
        let snapshot = make_snapshot(
            Mode::Weighted,
            vec![("a", 1, false), ("b", 6, false), ("c", 3, false)],
        );
        let freq = frequencies(&snapshot, |id| id.as_str() != "b", 9);

        assert_close(freq.get("a"), 0.25);
        assert_close(freq.get("c"), 0.75);
        assert!(freq.get("b").is_none());
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_uniform() {
        let snapshot = make_snapshot(
            Mode::Weighted,
            vec![("a", 0, false), ("b", 0, false), ("c", 0, false)],
        );
        let freq = frequencies(&snapshot, all_online, 5);

        for bot in ["a", "b", "c"] {
            assert_close(freq.get(bot), 1.0 / 3.0);
        }
    }

    #[test]
    fn test_zero_weight_reachable_when_positive_weights_offline() {
        let snapshot = make_snapshot(
            Mode::Weighted,
            vec![("a", 5, false), ("z", 0, false)],
        );
        let mut rng = StdRng::seed_from_u64(11);

        let selected = select(&snapshot, |id| id.as_str() == "z", &mut rng).unwrap();
        assert_eq!(selected.bot_id.as_str(), "z");
    }

    #[test]
    fn test_zero_weight_gets_no_traffic_in_mixed_pool() {
        let snapshot = make_snapshot(
            Mode::Weighted,
            vec![("a", 3, false), ("z", 0, false), ("b", 1, false)],
        );
        let freq = frequencies(&snapshot, all_online, 13);

        assert!(freq.get("z").is_none());
        assert_close(freq.get("a"), 0.75);
    }

    // ========== Phase 3: Reproducibility ==========

    #[test]
    fn test_same_seed_same_sequence() {
        let snapshot = make_snapshot(
            Mode::Weighted,
            vec![("a", 1, false), ("b", 2, false), ("c", 7, false)],
        );
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..200)
                .map(|_| select(&snapshot, all_online, &mut rng).unwrap().bot_id)
                .collect::<Vec<_>>()
        };

        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_table_and_scan_paths_agree() {
        let snapshot = make_snapshot(
            Mode::Weighted,
            vec![("a", 4, false), ("b", 0, false), ("c", 2, false), ("d", 3, false)],
        );
        let pool = &snapshot.primary;
        let all: Vec<usize> = (0..pool.len()).collect();

        for draw in 0..pool.total_weight() {
            let via_table = pool.cumulative().partition_point(|&c| c <= draw);
            assert_eq!(via_table, scan_cumulative(pool.members(), &all, draw));
        }
    }
}
