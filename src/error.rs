//! Error types for the engine's write paths.
//!
//! Routing outcomes (not found, inactive, no eligible bot, cloaked) are not
//! errors and live in [`crate::routing::RouteDecision`].

use crate::model::{BotId, RandomizerId};

/// Rejection of a configuration publish. The routing table is left unchanged.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("randomizer {0} has an empty slug")]
    EmptySlug(RandomizerId),
    #[error("slug '{slug}' is already owned by randomizer {owner}")]
    SlugTaken { slug: String, owner: RandomizerId },
    #[error("slug of randomizer {id} cannot change from '{current}' to '{requested}'")]
    SlugChanged {
        id: RandomizerId,
        current: String,
        requested: String,
    },
    #[error("bot {bot_id} appears more than once in randomizer {id}")]
    DuplicateMember { id: RandomizerId, bot_id: BotId },
}

/// Failure of an attribution sink. Logged, never propagated to routing.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to queue a status report.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("status feed is full")]
    Full,
    #[error("status feed is closed")]
    Closed,
}

/// Invalid service configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid URL for {field}: '{value}'")]
    InvalidUrl { field: &'static str, value: String },
    #[error("listen and admin_listen must differ, both are {0}")]
    SharedListener(std::net::SocketAddr),
    #[error("admin_token must not be blank")]
    EmptyAdminToken,
}
