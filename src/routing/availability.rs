//! Bot availability tracking.
//!
//! Keeps the latest observed status per bot. Updates are last-write-wins by
//! `observed_at`, so reordered reports from the health source never roll a
//! bot back to an older state. Forgetting a bot keeps its last `observed_at`
//! as a watermark for the same reason. The status map is published by atomic
//! swap; readers never block on writers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::FeedError;
use crate::model::{BotId, BotStatus};

/// Maximum number of queued reports applied in a single swap.
const MAX_BATCH: usize = 256;

/// Latest observation for a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub status: BotStatus,
    pub observed_at: DateTime<Utc>,
}

/// A status observation pushed by the health source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub bot_id: BotId,
    pub status: BotStatus,
    pub observed_at: DateTime<Utc>,
}

/// Number of tracked bots per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub online: usize,
    pub offline: usize,
    pub paused: usize,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Known(StatusEntry),
    /// Bot was removed. Reports older than its last observation stay
    /// discarded.
    Forgotten { observed_at: DateTime<Utc> },
}

impl Slot {
    fn observed_at(&self) -> DateTime<Utc> {
        match self {
            Slot::Known(entry) => entry.observed_at,
            Slot::Forgotten { observed_at } => *observed_at,
        }
    }

    fn entry(&self) -> Option<StatusEntry> {
        match self {
            Slot::Known(entry) => Some(*entry),
            Slot::Forgotten { .. } => None,
        }
    }
}

/// Consistent read-only view of all bot statuses at one instant.
#[derive(Clone)]
pub struct AvailabilityView(Arc<HashMap<BotId, Slot>>);

impl AvailabilityView {
    /// Bots with no observed status are not eligible.
    pub fn is_online(&self, id: &BotId) -> bool {
        self.0
            .get(id)
            .and_then(Slot::entry)
            .map(|entry| entry.status.is_eligible())
            .unwrap_or(false)
    }
}

/// Tracks the most recently observed status of every bot.
pub struct AvailabilityTracker {
    statuses: ArcSwap<HashMap<BotId, Slot>>,
    write_lock: Mutex<()>,
}

impl AvailabilityTracker {
    /// Creates a tracker with no known bots.
    pub fn new() -> Self {
        Self {
            statuses: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Records an observation. Returns `false` if an observation with a later
    /// `observed_at` is already known.
    pub fn set_status(&self, bot_id: BotId, status: BotStatus, observed_at: DateTime<Utc>) -> bool {
        self.apply_batch(vec![StatusReport {
            bot_id,
            status,
            observed_at,
        }]) == 1
    }

    /// Applies several observations with a single swap. Returns how many
    /// were accepted.
    pub fn apply_batch(&self, reports: Vec<StatusReport>) -> usize {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.statuses.load_full();
        let mut next: Option<HashMap<BotId, Slot>> = None;
        let mut applied = 0;

        for report in reports {
            let map = next.as_ref().unwrap_or(&*current);
            if let Some(known) = map.get(&report.bot_id) {
                if report.observed_at < known.observed_at() {
                    tracing::debug!(
                        bot_id = %report.bot_id,
                        status = %report.status,
                        observed_at = %report.observed_at,
                        known_at = %known.observed_at(),
                        "out-of-order status discarded"
                    );
                    continue;
                }
            }

            let map = next.get_or_insert_with(|| HashMap::clone(&current));
            let previous = map.insert(
                report.bot_id.clone(),
                Slot::Known(StatusEntry {
                    status: report.status,
                    observed_at: report.observed_at,
                }),
            );
            if previous.and_then(|p| p.entry()).map(|p| p.status) != Some(report.status) {
                tracing::info!(
                    bot_id = %report.bot_id,
                    status = %report.status,
                    "bot status changed"
                );
            }
            applied += 1;
        }

        if let Some(map) = next {
            self.statuses.store(Arc::new(map));
        }
        applied
    }

    /// Stops tracking a bot's status, e.g. after it was deleted. Its last
    /// `observed_at` is kept so delayed older reports are still discarded.
    pub fn forget(&self, bot_id: &BotId) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.statuses.load_full();
        let Some(Slot::Known(entry)) = current.get(bot_id).copied() else {
            return false;
        };
        let mut next = HashMap::clone(&current);
        next.insert(
            bot_id.clone(),
            Slot::Forgotten {
                observed_at: entry.observed_at,
            },
        );
        self.statuses.store(Arc::new(next));
        true
    }

    /// Returns a consistent view for the duration of one routing decision.
    pub fn view(&self) -> AvailabilityView {
        AvailabilityView(self.statuses.load_full())
    }

    pub fn status_of(&self, bot_id: &BotId) -> Option<StatusEntry> {
        self.statuses.load().get(bot_id).and_then(Slot::entry)
    }

    pub fn is_online(&self, bot_id: &BotId) -> bool {
        self.view().is_online(bot_id)
    }

    pub fn counts(&self) -> StatusCounts {
        let statuses = self.statuses.load();
        statuses
            .values()
            .filter_map(Slot::entry)
            .fold(StatusCounts::default(), |mut counts, entry| {
                match entry.status {
                    BotStatus::Online => counts.online += 1,
                    BotStatus::Offline => counts.offline += 1,
                    BotStatus::Paused => counts.paused += 1,
                }
                counts
            })
    }
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Push interface for the health source.
///
/// Reports go through a bounded channel and are applied to the tracker by a
/// background task, off the routing path.
#[derive(Clone)]
pub struct StatusFeed {
    tx: mpsc::Sender<StatusReport>,
}

impl StatusFeed {
    /// Starts the applier task. The task exits once every feed handle is
    /// dropped and the queue is drained.
    pub fn spawn(tracker: Arc<AvailabilityTracker>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<StatusReport>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                while batch.len() < MAX_BATCH {
                    match rx.try_recv() {
                        Ok(report) => batch.push(report),
                        Err(_) => break,
                    }
                }
                let received = batch.len();
                let applied = tracker.apply_batch(batch);
                tracing::trace!(received, applied, "status batch applied");
            }
            tracing::debug!("status feed closed");
        });

        (Self { tx }, handle)
    }

    /// Queues a report, waiting for capacity.
    pub async fn push(&self, report: StatusReport) -> Result<(), FeedError> {
        self.tx.send(report).await.map_err(|_| FeedError::Closed)
    }

    /// Queues a report without waiting.
    pub fn try_push(&self, report: StatusReport) -> Result<(), FeedError> {
        self.tx.try_send(report).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => FeedError::Full,
            mpsc::error::TrySendError::Closed(_) => FeedError::Closed,
        })
    }
}
