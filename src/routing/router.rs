//! Per-visit routing decision.
//!
//! Resolves the slug, short-circuits inactive randomizers, consults the
//! cloak gate when enabled, and selects a bot from the primary or reserve
//! pool. Every outcome for a known randomizer is handed to the visit
//! recorder without waiting for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::error::PublishError;
use crate::model::{
    Bot, BotId, BotStatus, Outcome, RandomizerConfig, RandomizerId, VisitContext, VisitRecord,
};
use crate::recorder::VisitRecorder;
use crate::store::{BotRegistry, PoolKind, PublishOutcome, RouteTable, RoutingSnapshot};

use super::availability::AvailabilityTracker;
use super::cloak::{evaluate_with_timeout, AllowAll, CloakDecision, CloakGate};
use super::selection;

/// Default deadline for a cloak gate answer.
pub const DEFAULT_CLOAK_TIMEOUT: Duration = Duration::from_millis(250);

/// Where a routed visitor is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub randomizer_id: RandomizerId,
    pub bot_id: BotId,
    pub pool: PoolKind,
    pub url: String,
}

/// Why a visit was not routed to a bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No randomizer has this slug.
    NotFound,
    /// The randomizer is administratively disabled.
    Inactive(RandomizerId),
    /// Neither pool has an online bot.
    NoEligibleBot(RandomizerId),
    /// The cloak gate diverted the visit.
    Cloaked(RandomizerId),
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::NotFound => "not_found",
            Rejection::Inactive(_) => "inactive",
            Rejection::NoEligibleBot(_) => "no_eligible_bot",
            Rejection::Cloaked(_) => "cloaked",
        }
    }
}

/// Result of routing one visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Redirect(RedirectTarget),
    Rejected(Rejection),
}

impl RouteDecision {
    pub fn target(&self) -> Option<&RedirectTarget> {
        match self {
            RouteDecision::Redirect(target) => Some(target),
            RouteDecision::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            RouteDecision::Redirect(_) => None,
            RouteDecision::Rejected(rejection) => Some(rejection),
        }
    }
}

enum Admission {
    Decided(RouteDecision),
    Select(Arc<RoutingSnapshot>),
}

/// Routing engine for randomizer links.
///
/// Thread-safe: all shared state is read through atomically swapped
/// snapshots, so any number of visits can be routed concurrently.
pub struct Router {
    table: Arc<RouteTable>,
    registry: Arc<BotRegistry>,
    availability: Arc<AvailabilityTracker>,
    gate: Arc<dyn CloakGate>,
    cloak_timeout: Duration,
    recorder: VisitRecorder,
}

impl Router {
    /// Creates a router with an empty table, no known statuses and a gate
    /// that allows every visit.
    pub fn new(registry: Arc<BotRegistry>, recorder: VisitRecorder) -> Self {
        Self {
            table: Arc::new(RouteTable::new()),
            registry,
            availability: Arc::new(AvailabilityTracker::new()),
            gate: Arc::new(AllowAll),
            cloak_timeout: DEFAULT_CLOAK_TIMEOUT,
            recorder,
        }
    }

    /// Replaces the cloak gate and its deadline.
    pub fn with_cloak_gate(mut self, gate: Arc<dyn CloakGate>, timeout: Duration) -> Self {
        self.gate = gate;
        self.cloak_timeout = timeout;
        self
    }

    /// Routes a visit using the thread-local random source.
    pub async fn route(&self, slug: &str, visit: &VisitContext) -> RouteDecision {
        match self.admit(slug, visit).await {
            Admission::Decided(decision) => decision,
            Admission::Select(snapshot) => self.select(&snapshot, &mut rand::thread_rng()),
        }
    }

    /// Routes a visit with a caller-supplied random source.
    pub async fn route_with_rng<R>(
        &self,
        slug: &str,
        visit: &VisitContext,
        rng: &mut R,
    ) -> RouteDecision
    where
        R: Rng + Send + ?Sized,
    {
        match self.admit(slug, visit).await {
            Admission::Decided(decision) => decision,
            Admission::Select(snapshot) => self.select(&snapshot, rng),
        }
    }

    async fn admit(&self, slug: &str, visit: &VisitContext) -> Admission {
        let Some(snapshot) = self.table.resolve(slug) else {
            tracing::debug!(slug = slug, "unknown slug");
            return Admission::Decided(RouteDecision::Rejected(Rejection::NotFound));
        };

        if !snapshot.active {
            self.record(&snapshot.id, None, Outcome::Inactive);
            return Admission::Decided(RouteDecision::Rejected(Rejection::Inactive(
                snapshot.id.clone(),
            )));
        }

        if snapshot.cloaker_enabled {
            let decision =
                evaluate_with_timeout(self.gate.as_ref(), visit, self.cloak_timeout).await;
            if decision == CloakDecision::Deny {
                tracing::debug!(slug = slug, randomizer_id = %snapshot.id, "visit cloaked");
                self.record(&snapshot.id, None, Outcome::Cloaked);
                return Admission::Decided(RouteDecision::Rejected(Rejection::Cloaked(
                    snapshot.id.clone(),
                )));
            }
        }

        Admission::Select(snapshot)
    }

    fn select<R: Rng + ?Sized>(&self, snapshot: &RoutingSnapshot, rng: &mut R) -> RouteDecision {
        let statuses = self.availability.view();
        let bots = self.registry.view();
        let selected = selection::select(
            snapshot,
            |id| statuses.is_online(id) && bots.contains(id),
            rng,
        );

        let target = selected.and_then(|sel| {
            bots.redirect_url(&sel.bot_id).map(|url| RedirectTarget {
                randomizer_id: snapshot.id.clone(),
                bot_id: sel.bot_id,
                pool: sel.pool,
                url,
            })
        });

        match target {
            Some(target) => {
                tracing::debug!(
                    randomizer_id = %target.randomizer_id,
                    bot_id = %target.bot_id,
                    pool = target.pool.as_str(),
                    version = snapshot.version,
                    "visit routed"
                );
                self.record(&snapshot.id, Some(target.bot_id.clone()), Outcome::Routed);
                RouteDecision::Redirect(target)
            }
            None => {
                tracing::warn!(
                    randomizer_id = %snapshot.id,
                    slug = %snapshot.slug,
                    "no eligible bot in primary or reserve pool"
                );
                self.record(&snapshot.id, None, Outcome::NoEligibleBot);
                RouteDecision::Rejected(Rejection::NoEligibleBot(snapshot.id.clone()))
            }
        }
    }

    fn record(&self, randomizer_id: &RandomizerId, bot_id: Option<BotId>, outcome: Outcome) {
        self.recorder
            .record(VisitRecord::new(randomizer_id.clone(), bot_id, outcome, Utc::now()));
    }

    // ========== Configuration and health commands ==========

    /// Publishes a randomizer configuration (configuration collaborator).
    pub fn publish_snapshot(
        &self,
        config: RandomizerConfig,
    ) -> Result<PublishOutcome, PublishError> {
        let id = config.id.clone();
        let outcome = self.table.publish(config);
        match &outcome {
            Ok(PublishOutcome::Applied { version }) => {
                tracing::info!(randomizer_id = %id, version, "snapshot applied");
            }
            Ok(PublishOutcome::Stale { current }) => {
                tracing::info!(randomizer_id = %id, current, "stale snapshot ignored");
            }
            Ok(PublishOutcome::Unchanged { .. }) => {}
            Err(e) => {
                tracing::warn!(randomizer_id = %id, error = %e, "snapshot rejected");
            }
        }
        outcome
    }

    /// Removes a randomizer from routing.
    pub fn retire(&self, id: &RandomizerId, version: u64) -> PublishOutcome {
        let outcome = self.table.retire(id, version);
        if outcome.is_applied() {
            tracing::info!(randomizer_id = %id, version, "randomizer retired");
        }
        outcome
    }

    /// Records a bot status observation (health collaborator).
    pub fn set_status(&self, bot_id: BotId, status: BotStatus, observed_at: DateTime<Utc>) -> bool {
        self.availability.set_status(bot_id, status, observed_at)
    }

    /// Registers or updates a bot identity, optionally seeding its status.
    pub fn register_bot(&self, bot: Bot, status: Option<(BotStatus, DateTime<Utc>)>) {
        let id = bot.id.clone();
        self.registry.register(bot);
        if let Some((status, observed_at)) = status {
            self.availability.set_status(id.clone(), status, observed_at);
        }
        tracing::info!(bot_id = %id, "bot registered");
    }

    /// Forgets a bot's identity and status.
    pub fn remove_bot(&self, bot_id: &BotId) -> bool {
        let known = self.registry.remove(bot_id);
        self.availability.forget(bot_id);
        if known {
            tracing::info!(bot_id = %bot_id, "bot removed");
        }
        known
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub fn registry(&self) -> &Arc<BotRegistry> {
        &self.registry
    }

    pub fn availability(&self) -> &Arc<AvailabilityTracker> {
        &self.availability
    }

    pub fn recorder(&self) -> &VisitRecorder {
        &self.recorder
    }
}
