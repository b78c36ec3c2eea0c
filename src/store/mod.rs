//! Configuration state read by the routing engine.
//!
//! Holds the per-randomizer routing snapshots published by the
//! configuration store and the registry of bot identities.

mod bot_registry;
mod route_table;
mod snapshot;

pub use bot_registry::{build_redirect_url, BotRegistry, RegistryView};
pub use route_table::{PublishOutcome, RouteTable};
pub use snapshot::{Pool, PoolKind, PoolMember, RoutingSnapshot};
