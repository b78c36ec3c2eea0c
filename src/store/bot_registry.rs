//! Read-mostly registry of bot identities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::model::{Bot, BotId};

/// Consistent read-only view of all bot identities at one instant.
///
/// A routing decision checks membership and builds the redirect URL from the
/// same view, so a concurrent removal cannot split the two reads.
#[derive(Clone)]
pub struct RegistryView {
    bots: Arc<HashMap<BotId, Bot>>,
    redirect_base: Arc<str>,
}

impl RegistryView {
    pub fn contains(&self, id: &BotId) -> bool {
        self.bots.contains_key(id)
    }

    /// Public URL a visitor is redirected to for the given bot.
    pub fn redirect_url(&self, id: &BotId) -> Option<String> {
        self.bots
            .get(id)
            .map(|bot| build_redirect_url(&self.redirect_base, &bot.handle))
    }
}

/// Thread-safe storage of bot identities keyed by id.
///
/// The map is published by atomic swap: readers never block on writers.
/// Status is tracked separately by [`crate::routing::AvailabilityTracker`].
pub struct BotRegistry {
    bots: ArcSwap<HashMap<BotId, Bot>>,
    write_lock: Mutex<()>,
    redirect_base: Arc<str>,
}

impl BotRegistry {
    /// Creates an empty registry that builds redirect URLs from `redirect_base`.
    pub fn new(redirect_base: impl Into<String>) -> Self {
        Self {
            bots: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            redirect_base: Arc::from(redirect_base.into()),
        }
    }

    /// Inserts or replaces a bot identity.
    pub fn register(&self, bot: Bot) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::clone(&self.bots.load_full());
        next.insert(bot.id.clone(), bot);
        self.bots.store(Arc::new(next));
    }

    /// Removes a bot. Returns whether it was known.
    pub fn remove(&self, id: &BotId) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.bots.load_full();
        if !current.contains_key(id) {
            return false;
        }
        let mut next = HashMap::clone(&current);
        next.remove(id);
        self.bots.store(Arc::new(next));
        true
    }

    /// Returns a consistent view for the duration of one routing decision.
    pub fn view(&self) -> RegistryView {
        RegistryView {
            bots: self.bots.load_full(),
            redirect_base: Arc::clone(&self.redirect_base),
        }
    }

    pub fn len(&self) -> usize {
        self.bots.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.load().is_empty()
    }

    pub fn redirect_url(&self, id: &BotId) -> Option<String> {
        self.view().redirect_url(id)
    }
}

/// Joins a redirect base and a handle, stripping a leading `@`.
///
/// `("https://t.me/", "@salesbot")` -> `https://t.me/salesbot`
pub fn build_redirect_url(base: &str, handle: &str) -> String {
    let handle = handle.trim().trim_start_matches('@');
    if base.ends_with('/') {
        format!("{}{}", base, handle)
    } else {
        format!("{}/{}", base, handle)
    }
}
