//! Slug-keyed routing table published by atomic pointer swap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::error::PublishError;
use crate::model::{RandomizerConfig, RandomizerId};

use super::snapshot::RoutingSnapshot;

/// Result of a publish or retire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The change was swapped in.
    Applied { version: u64 },
    /// Same version already known; nothing changed.
    Unchanged { version: u64 },
    /// A newer version is already known; the change was discarded.
    Stale { current: u64 },
}

impl PublishOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PublishOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Live(Arc<RoutingSnapshot>),
    Retired { version: u64 },
}

impl Entry {
    fn version(&self) -> u64 {
        match self {
            Entry::Live(snapshot) => snapshot.version,
            Entry::Retired { version } => *version,
        }
    }
}

/// Immutable table state. Replaced as a whole on every change.
#[derive(Debug, Clone, Default)]
struct TableState {
    by_slug: HashMap<String, Arc<RoutingSnapshot>>,
    by_id: HashMap<RandomizerId, Entry>,
}

/// Thread-safe routing table.
///
/// Readers load the current state without locking and always see a complete
/// table. Writers serialize on an internal mutex, build a new state, and
/// publish it with a single `ArcSwap::store`.
pub struct RouteTable {
    state: ArcSwap<TableState>,
    write_lock: Mutex<()>,
    generation: AtomicU64,
}

impl RouteTable {
    /// Creates a new empty routing table.
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(TableState::default()),
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Resolves a public slug to its current snapshot.
    pub fn resolve(&self, slug: &str) -> Option<Arc<RoutingSnapshot>> {
        self.state.load().by_slug.get(slug).cloned()
    }

    /// Returns the live snapshot of a randomizer by id.
    pub fn get(&self, id: &RandomizerId) -> Option<Arc<RoutingSnapshot>> {
        match self.state.load().by_id.get(id) {
            Some(Entry::Live(snapshot)) => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }

    /// Returns the last known version of a randomizer, live or retired.
    pub fn version_of(&self, id: &RandomizerId) -> Option<u64> {
        self.state.load().by_id.get(id).map(Entry::version)
    }

    /// Publishes a new configuration for a randomizer.
    ///
    /// Idempotent and monotonic: an equal version is a no-op and an older
    /// version is discarded, so out-of-order deliveries never roll back.
    pub fn publish(&self, config: RandomizerConfig) -> Result<PublishOutcome, PublishError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.state.load_full();

        if let Some(outcome) = Self::check_version(&current, &config.id, config.version) {
            return Ok(outcome);
        }

        if let Some(owner) = current.by_slug.get(&config.slug) {
            if owner.id != config.id {
                return Err(PublishError::SlugTaken {
                    slug: config.slug,
                    owner: owner.id.clone(),
                });
            }
        }
        if let Some(Entry::Live(existing)) = current.by_id.get(&config.id) {
            if existing.slug != config.slug {
                return Err(PublishError::SlugChanged {
                    id: config.id,
                    current: existing.slug.clone(),
                    requested: config.slug,
                });
            }
        }

        let snapshot = Arc::new(RoutingSnapshot::build(config)?);
        let version = snapshot.version;

        let mut next = TableState::clone(&current);
        next.by_slug
            .insert(snapshot.slug.clone(), Arc::clone(&snapshot));
        next.by_id
            .insert(snapshot.id.clone(), Entry::Live(Arc::clone(&snapshot)));
        self.swap(next);

        tracing::debug!(
            randomizer_id = %snapshot.id,
            slug = %snapshot.slug,
            version,
            primary = snapshot.primary.len(),
            reserve = snapshot.reserve.len(),
            "snapshot published"
        );
        Ok(PublishOutcome::Applied { version })
    }

    /// Removes a randomizer from routing.
    ///
    /// The retired version is remembered so that a delayed publish with an
    /// older version cannot bring the randomizer back.
    pub fn retire(&self, id: &RandomizerId, version: u64) -> PublishOutcome {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.state.load_full();

        if let Some(outcome) = Self::check_version(&current, id, version) {
            return outcome;
        }

        let mut next = TableState::clone(&current);
        if let Some(Entry::Live(snapshot)) = next.by_id.get(id) {
            let slug = snapshot.slug.clone();
            next.by_slug.remove(&slug);
        }
        next.by_id.insert(id.clone(), Entry::Retired { version });
        self.swap(next);

        tracing::debug!(randomizer_id = %id, version, "randomizer retired");
        PublishOutcome::Applied { version }
    }

    /// Number of routable randomizers.
    pub fn len(&self) -> usize {
        self.state.load().by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of applied changes since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn check_version(
        state: &TableState,
        id: &RandomizerId,
        version: u64,
    ) -> Option<PublishOutcome> {
        let current = state.by_id.get(id)?.version();
        if version == current {
            Some(PublishOutcome::Unchanged { version })
        } else if version < current {
            tracing::debug!(randomizer_id = %id, version, current, "stale version discarded");
            Some(PublishOutcome::Stale { current })
        } else {
            None
        }
    }

    fn swap(&self, next: TableState) {
        self.state.store(Arc::new(next));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
