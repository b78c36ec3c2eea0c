//! Visit routing and bot availability.
//!
//! Provides the per-visit decision engine: cloak gate contract, availability
//! tracking with last-write-wins status updates, and random or weighted bot
//! selection with reserve-pool failover.

mod availability;
mod cloak;
mod router;
pub mod selection;

pub use availability::{
    AvailabilityTracker, AvailabilityView, StatusCounts, StatusEntry, StatusFeed, StatusReport,
};
pub use cloak::{evaluate_with_timeout, AllowAll, CloakDecision, CloakGate, DenyAll, FnGate};
pub use router::{RedirectTarget, Rejection, RouteDecision, Router, DEFAULT_CLOAK_TIMEOUT};
