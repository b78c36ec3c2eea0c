//! Domain types shared by the routing engine.
//!
//! These mirror the configuration and attribution records owned by the
//! surrounding application. The engine only ever reads configuration and
//! writes visits.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a bot (routing target).
    BotId
);

string_id!(
    /// Identifier of a randomizer (public short link).
    RandomizerId
);

/// Distribution policy of a randomizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Uniform choice among eligible bots, weights ignored.
    #[default]
    Random,
    /// Weight-proportional choice among eligible bots.
    Weighted,
}

/// Externally owned availability status of a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Online,
    Offline,
    Paused,
}

impl BotStatus {
    /// Only online bots may receive traffic. Offline and paused are
    /// indistinguishable for routing.
    pub fn is_eligible(self) -> bool {
        matches!(self, BotStatus::Online)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BotStatus::Online => "online",
            BotStatus::Offline => "offline",
            BotStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bot identity as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    /// Messenger handle, e.g. `@salesbot`.
    pub handle: String,
}

/// A bot's membership in one randomizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub bot_id: BotId,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub is_reserve: bool,
    #[serde(default)]
    pub sort_order: i32,
}

/// Resolved configuration of a randomizer as published by the
/// configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomizerConfig {
    pub id: RandomizerId,
    pub slug: String,
    /// Monotonic configuration version. Newer always wins.
    pub version: u64,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub cloaker_enabled: bool,
    #[serde(default)]
    pub members: Vec<Membership>,
}

fn default_true() -> bool {
    true
}

/// Request attributes available to the cloak gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitContext {
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub accept_language: Option<String>,
    pub query: Option<String>,
}

/// Final outcome of a visit that reached a known randomizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Routed,
    Inactive,
    NoEligibleBot,
    Cloaked,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Routed => "routed",
            Outcome::Inactive => "inactive",
            Outcome::NoEligibleBot => "no_eligible_bot",
            Outcome::Cloaked => "cloaked",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribution record for one visit. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub timestamp: DateTime<Utc>,
    /// UTC hour of day (0-23) the visit falls into.
    pub hour: u32,
    pub randomizer_id: RandomizerId,
    pub bot_id: Option<BotId>,
    pub outcome: Outcome,
}

impl VisitRecord {
    pub fn new(
        randomizer_id: RandomizerId,
        bot_id: Option<BotId>,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            hour: timestamp.hour(),
            timestamp,
            randomizer_id,
            bot_id,
            outcome,
        }
    }
}
