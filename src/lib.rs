//! Routing engine for randomizer short links.
//!
//! A visit to `/r/{slug}` is resolved to the randomizer's current snapshot,
//! optionally screened by a cloak gate, and redirected to one online bot
//! chosen uniformly or by weight, failing over from the primary pool to the
//! reserve pool. Every decision for a known randomizer is recorded
//! asynchronously.

pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod recorder;
pub mod routing;
pub mod store;

pub use config::Config;
pub use error::{ConfigError, FeedError, PublishError, RecordError};
pub use model::{
    Bot, BotId, BotStatus, Membership, Mode, Outcome, RandomizerConfig, RandomizerId,
    VisitContext, VisitRecord,
};
pub use recorder::{
    JsonLinesSink, MemorySink, RecorderStats, TracingSink, VisitRecorder, VisitSink,
};
pub use routing::{
    CloakDecision, CloakGate, RedirectTarget, Rejection, RouteDecision, Router, StatusFeed,
    StatusReport,
};
pub use store::{BotRegistry, PublishOutcome, RouteTable, RoutingSnapshot};
