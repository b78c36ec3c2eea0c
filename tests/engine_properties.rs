//! End-to-end properties of the routing engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use bot_randomizer::routing::{DenyAll, DEFAULT_CLOAK_TIMEOUT};
use bot_randomizer::store::PoolKind;
use bot_randomizer::{
    Bot, BotRegistry, BotStatus, MemorySink, Membership, Mode, Outcome, PublishOutcome,
    RandomizerConfig, RouteDecision, RouteTable, Router, VisitContext, VisitRecorder,
};

// ========== Test Helpers ==========

fn make_router(capacity: usize) -> (Router, Arc<MemorySink>, tokio::task::JoinHandle<()>) {
    let sink = Arc::new(MemorySink::new());
    let (recorder, handle) = VisitRecorder::spawn(sink.clone(), capacity);
    let router = Router::new(Arc::new(BotRegistry::new("https://t.me/")), recorder);
    (router, sink, handle)
}

fn add_bot(router: &Router, id: &str, status: BotStatus) {
    router.register_bot(
        Bot {
            id: id.into(),
            handle: format!("@{}", id),
        },
        Some((status, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())),
    );
}

fn member(bot: &str, weight: u32, is_reserve: bool, sort_order: i32) -> Membership {
    Membership {
        bot_id: bot.into(),
        weight,
        is_reserve,
        sort_order,
    }
}

fn config(slug: &str, version: u64, mode: Mode, members: Vec<Membership>) -> RandomizerConfig {
    RandomizerConfig {
        id: format!("id-{}", slug).into(),
        slug: slug.to_string(),
        version,
        mode,
        active: true,
        cloaker_enabled: false,
        members,
    }
}

async fn tally(router: &Router, slug: &str, trials: usize, seed: u64) -> HashMap<String, usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut counts = HashMap::new();
    for _ in 0..trials {
        let decision = router
            .route_with_rng(slug, &VisitContext::default(), &mut rng)
            .await;
        if let RouteDecision::Redirect(target) = decision {
            *counts.entry(target.bot_id.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

// ========== Phase 1: Distribution ==========

#[tokio::test]
async fn test_weighted_distribution_matches_weights() {
    let (router, _sink, _handle) = make_router(64);
    for bot in ["a", "b", "c"] {
        add_bot(&router, bot, BotStatus::Online);
    }
    router
        .publish_snapshot(config(
            "promo",
            1,
            Mode::Weighted,
            vec![member("a", 1, false, 0), member("b", 2, false, 1), member("c", 7, false, 2)],
        ))
        .unwrap();

    let trials = 20_000;
    let counts = tally(&router, "promo", trials, 7).await;

    for (bot, expected) in [("a", 0.1), ("b", 0.2), ("c", 0.7)] {
        let share = counts[bot] as f64 / trials as f64;
        assert!(
            (share - expected).abs() < 0.02,
            "bot {} share {} expected {}",
            bot,
            share,
            expected
        );
    }
}

#[tokio::test]
async fn test_random_mode_ignores_weights() {
    let (router, _sink, _handle) = make_router(64);
    for bot in ["a", "b"] {
        add_bot(&router, bot, BotStatus::Online);
    }
    router
        .publish_snapshot(config(
            "promo",
            1,
            Mode::Random,
            vec![member("a", 1, false, 0), member("b", 99, false, 1)],
        ))
        .unwrap();

    let trials = 20_000;
    let counts = tally(&router, "promo", trials, 11).await;

    let share = counts["a"] as f64 / trials as f64;
    assert!((share - 0.5).abs() < 0.02, "share {}", share);
}

#[tokio::test]
async fn test_weights_renormalize_over_online_bots() {
    let (router, _sink, _handle) = make_router(64);
    add_bot(&router, "a", BotStatus::Online);
    add_bot(&router, "b", BotStatus::Paused);
    add_bot(&router, "c", BotStatus::Online);
    router
        .publish_snapshot(config(
            "promo",
            1,
            Mode::Weighted,
            vec![member("a", 1, false, 0), member("b", 5, false, 1), member("c", 3, false, 2)],
        ))
        .unwrap();

    let trials = 20_000;
    let counts = tally(&router, "promo", trials, 3).await;

    assert!(!counts.contains_key("b"));
    let share = counts["a"] as f64 / trials as f64;
    assert!((share - 0.25).abs() < 0.02, "share {}", share);
}

// ========== Phase 2: Failover and short-circuits ==========

#[tokio::test]
async fn test_reserve_used_only_when_primary_exhausted() {
    let (router, _sink, _handle) = make_router(64);
    add_bot(&router, "p", BotStatus::Online);
    add_bot(&router, "r", BotStatus::Online);
    router
        .publish_snapshot(config(
            "promo",
            1,
            Mode::Weighted,
            vec![member("p", 1, false, 0), member("r", 100, true, 1)],
        ))
        .unwrap();

    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..500 {
        let decision = router
            .route_with_rng("promo", &VisitContext::default(), &mut rng)
            .await;
        assert_eq!(decision.target().unwrap().pool, PoolKind::Primary);
    }

    let later = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
    router.set_status("p".into(), BotStatus::Offline, later);
    for _ in 0..500 {
        let decision = router
            .route_with_rng("promo", &VisitContext::default(), &mut rng)
            .await;
        let target = decision.target().unwrap();
        assert_eq!(target.pool, PoolKind::Reserve);
        assert_eq!(target.url, "https://t.me/r");
    }
}

#[tokio::test]
async fn test_cloak_deny_never_records_a_bot() {
    let (router, sink, handle) = make_router(4096);
    let router = router.with_cloak_gate(Arc::new(DenyAll), DEFAULT_CLOAK_TIMEOUT);
    add_bot(&router, "a", BotStatus::Online);
    let mut cloaked = config("promo", 1, Mode::Random, vec![member("a", 1, false, 0)]);
    cloaked.cloaker_enabled = true;
    router.publish_snapshot(cloaked).unwrap();

    for _ in 0..200 {
        router.route("promo", &VisitContext::default()).await;
    }

    router.recorder().close();
    handle.await.unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 200);
    assert!(records
        .iter()
        .all(|r| r.outcome == Outcome::Cloaked && r.bot_id.is_none()));
}

#[tokio::test]
async fn test_stale_status_report_is_ignored() {
    let (router, _sink, _handle) = make_router(64);
    add_bot(&router, "a", BotStatus::Online);
    router
        .publish_snapshot(config("promo", 1, Mode::Random, vec![member("a", 1, false, 0)]))
        .unwrap();

    let earlier = Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap();
    assert!(!router.set_status("a".into(), BotStatus::Offline, earlier));

    let decision = router.route("promo", &VisitContext::default()).await;
    assert!(decision.target().is_some());
}

// ========== Phase 3: Concurrency ==========

/// Readers must observe each snapshot whole: version `v` always carries
/// exactly `v` members named after that version.
#[test]
fn test_concurrent_publish_never_exposes_mixed_snapshot() {
    let table = Arc::new(RouteTable::new());
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observed = 0u64;
                while !done.load(Ordering::Acquire) {
                    let Some(snapshot) = table.resolve("promo") else {
                        continue;
                    };
                    assert_eq!(snapshot.member_count() as u64, snapshot.version);
                    let prefix = format!("v{}-", snapshot.version);
                    assert!(snapshot
                        .pool(PoolKind::Primary)
                        .members()
                        .iter()
                        .all(|m| m.bot_id.as_str().starts_with(&prefix)));
                    assert!(snapshot.version >= observed, "version went backwards");
                    observed = snapshot.version;
                }
            })
        })
        .collect();

    for version in 1..=300u64 {
        let members = (0..version)
            .map(|i| member(&format!("v{}-{}", version, i), 1, false, i as i32))
            .collect();
        let outcome = table
            .publish(config("promo", version, Mode::Weighted, members))
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Applied { version });
    }

    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(table.version_of(&"id-promo".into()), Some(300));
}

#[test]
fn test_racing_publishers_keep_highest_version() {
    let table = Arc::new(RouteTable::new());

    let writers: Vec<_> = (0..4u64)
        .map(|w| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for round in 0..50u64 {
                    let version = round * 4 + w + 1;
                    table
                        .publish(config(
                            "promo",
                            version,
                            Mode::Random,
                            vec![member("a", 1, false, 0)],
                        ))
                        .unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(table.version_of(&"id-promo".into()), Some(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_routing_during_status_churn() {
    let (router, _sink, _handle) = make_router(1024);
    let router = Arc::new(router);
    for bot in ["a", "b", "c"] {
        add_bot(&router, bot, BotStatus::Online);
    }
    router
        .publish_snapshot(config(
            "promo",
            1,
            Mode::Weighted,
            vec![member("a", 1, false, 0), member("b", 1, false, 1), member("c", 1, true, 2)],
        ))
        .unwrap();

    let churn = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            for i in 1..=500i64 {
                let status = if i % 2 == 0 {
                    BotStatus::Online
                } else {
                    BotStatus::Paused
                };
                router.set_status("a".into(), status, start + Duration::milliseconds(i));
                tokio::task::yield_now().await;
            }
        })
    };

    let visitors: Vec<_> = (0..8)
        .map(|_| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                for _ in 0..250 {
                    let decision = router.route("promo", &VisitContext::default()).await;
                    let target = decision.target().expect("b or c is always online");
                    assert!(["a", "b", "c"].contains(&target.bot_id.as_str()));
                    assert_eq!(target.pool, PoolKind::Primary, "b keeps primary alive");
                }
            })
        })
        .collect();

    churn.await.unwrap();
    for visitor in visitors {
        visitor.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bot_removal_during_routing_never_strands_a_visit() {
    let (router, _sink, _handle) = make_router(1 << 16);
    let router = Arc::new(router);
    add_bot(&router, "a", BotStatus::Online);
    add_bot(&router, "b", BotStatus::Online);
    router
        .publish_snapshot(config(
            "promo",
            1,
            Mode::Random,
            vec![member("a", 1, false, 0), member("b", 1, false, 1)],
        ))
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let churn = {
        let router = Arc::clone(&router);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            let mut i = 1i64;
            while !stop.load(Ordering::Relaxed) {
                router.remove_bot(&"a".into());
                router.register_bot(
                    Bot {
                        id: "a".into(),
                        handle: "@a".to_string(),
                    },
                    Some((BotStatus::Online, start + Duration::milliseconds(i))),
                );
                i += 1;
            }
        })
    };

    let visitors: Vec<_> = (0..8)
        .map(|_| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                for _ in 0..2_000 {
                    let decision = router.route("promo", &VisitContext::default()).await;
                    let target = decision.target().expect("b stays registered and online");
                    assert!(target.url == "https://t.me/a" || target.url == "https://t.me/b");
                }
            })
        })
        .collect();

    for visitor in visitors {
        visitor.await.unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    churn.join().unwrap();
}
